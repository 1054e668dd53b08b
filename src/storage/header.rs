use crate::{
    storage::SQLITE_MAGIC,
    types::{
        HEADER_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageNo,
        error::{CorruptField, RepairError},
    },
    utils::serialization::{read_u16, read_u32},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16le,
    Utf16be,
}

impl TextEncoding {
    fn from_u32(value: u32) -> Self {
        match value {
            2 => TextEncoding::Utf16le,
            3 => TextEncoding::Utf16be,
            _ => TextEncoding::Utf8,
        }
    }
}

/// The 100-byte header at the start of page 1.
#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub reserved_space: u8,
    pub file_change_counter: u32,
    pub database_size_pages: u32,
    pub freelist_trunk_page: PageNo,
    pub freelist_pages_count: u32,
    pub schema_cookie: u32,
    pub schema_format_number: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub application_id: u32,
}

impl DatabaseHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RepairError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RepairError::corruption(
                1,
                CorruptField::Header,
                format!("Header too short: {} bytes", bytes.len()),
            ));
        }
        if &bytes[..16] != SQLITE_MAGIC {
            return Err(RepairError::NotADatabase {
                path: String::new(),
            });
        }

        let field_u32 = |offset: usize| read_u32(bytes, offset).unwrap_or_default();

        // The value 1 encodes a page size of 65536.
        let raw_page_size = read_u16(bytes, 16).unwrap_or_default();
        let page_size = if raw_page_size == 1 {
            MAX_PAGE_SIZE
        } else {
            u32::from(raw_page_size)
        };

        Ok(Self {
            page_size,
            file_format_write_version: bytes[18],
            file_format_read_version: bytes[19],
            reserved_space: bytes[20],
            file_change_counter: field_u32(24),
            database_size_pages: field_u32(28),
            freelist_trunk_page: field_u32(32),
            freelist_pages_count: field_u32(36),
            schema_cookie: field_u32(40),
            schema_format_number: field_u32(44),
            text_encoding: TextEncoding::from_u32(field_u32(56)),
            user_version: field_u32(60),
            application_id: field_u32(68),
        })
    }
}

pub fn validate_page_size(page_size: u32) -> Result<(), RepairError> {
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(RepairError::corruption(
            1,
            CorruptField::PageSize,
            format!("Page size: {} is not aligned or out of range", page_size),
        ));
    }
    Ok(())
}
