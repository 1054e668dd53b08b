pub mod cell;
pub mod error;
pub mod page;
pub mod value;

// Common type aliases
pub type PageNo = u32;
pub type RowId = i64;

// Constants from the SQLite file format
pub const HEADER_SIZE: usize = 100; // Database header size, stored on page 1
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;
pub const LEAF_PAGE_HEADER_SIZE: usize = 8;
pub const INTERIOR_PAGE_HEADER_SIZE: usize = 12;
pub const CELL_POINTER_SIZE: usize = 2;
pub const OVERFLOW_POINTER_SIZE: usize = 4; // next-page number at the head of every overflow page

// B-tree depth in SQLite never exceeds 20; anything deeper is a pointer loop.
pub const MAX_BTREE_DEPTH: usize = 64;
