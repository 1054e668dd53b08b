//! Corruption-tolerant recovery for SQLite database files.
//!
//! Pages are decoded directly from disk, one layer below the SQL engine, so a
//! damaged file can still be backed up into a [`material::Material`] or
//! rebuilt row by row into a fresh database.

pub mod config;
pub mod crawler;
pub mod material;
pub mod repair;
pub mod sql;
pub mod storage;
pub mod types;
pub mod utils;
