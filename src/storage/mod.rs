pub mod file_layer;
pub mod header;
pub mod pager;
pub mod wal;

pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
