use crate::{
    storage::pager::Pager,
    types::{
        CELL_POINTER_SIZE, HEADER_SIZE, INTERIOR_PAGE_HEADER_SIZE, LEAF_PAGE_HEADER_SIZE, PageNo,
        error::{CorruptField, RepairError, Result},
    },
    utils::{
        hash::calculate_page_hash,
        serialization::{get_varint, read_u16, read_u32},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    InteriorIndex = 2,
    InteriorTable = 5,
    LeafIndex = 10,
    LeafTable = 13,
}

impl PageType {
    pub fn from_flag(value: u8, page_no: PageNo) -> Result<Self> {
        match value {
            2 => Ok(PageType::InteriorIndex),
            5 => Ok(PageType::InteriorTable),
            10 => Ok(PageType::LeafIndex),
            13 => Ok(PageType::LeafTable),
            _ => Err(RepairError::corruption(
                page_no,
                CorruptField::PageType,
                format!("Unexpected page type: {}", value),
            )),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PageType::InteriorIndex => 2,
            PageType::InteriorTable => 5,
            PageType::LeafIndex => 10,
            PageType::LeafTable => 13,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, PageType::InteriorTable | PageType::LeafTable)
    }

    pub fn header_size(&self) -> usize {
        if self.is_leaf() {
            LEAF_PAGE_HEADER_SIZE
        } else {
            INTERIOR_PAGE_HEADER_SIZE
        }
    }
}

/*
 * B-tree page layout
 * ┌──────────────────────────────────────────────────────────────┐
 * │ database header (100 bytes, page 1 only)                     │
 * ├──────────────────────────────────────────────────────────────┤
 * │ flag(1) | first_freeblock(2) | cell_count(2) |               │
 * │ content_start(2) | fragmented(1) | right_most(4, interior)   │
 * ├──────────────────────────────────────────────────────────────┤
 * │ cell pointer array: cell_count × 2 bytes, big-endian         │
 * ├──────────────────────────────────────────────────────────────┤
 * │ unallocated space                                            │
 * ├──────────────────────────────────────────────────────────────┤
 * │ cell content area                                            │
 * ├──────────────────────────────────────────────────────────────┤
 * │ reserved bytes                                               │
 * └──────────────────────────────────────────────────────────────┘
 */

/// One decoded b-tree page. Built fresh for every read.
#[derive(Debug, Clone)]
pub struct Page {
    number: PageNo,
    page_type: PageType,
    data: Vec<u8>,
    header_offset: usize,
    cell_pointers: Vec<usize>,
    right_most: Option<PageNo>,
    usable_size: usize,
    max_local: usize,
    min_local: usize,
}

impl Page {
    pub fn decode(pager: &mut Pager, page_no: PageNo) -> Result<Self> {
        let data = pager.acquire_page_data(page_no)?;
        Self::from_bytes(page_no, data, pager.usable_size() as usize)
    }

    pub fn from_bytes(page_no: PageNo, data: Vec<u8>, usable_size: usize) -> Result<Self> {
        let header_offset = if page_no == 1 { HEADER_SIZE } else { 0 };
        let flag = *data.get(header_offset).ok_or_else(|| {
            RepairError::corruption(page_no, CorruptField::ShortRead, "Page is shorter than its header")
        })?;
        let page_type = PageType::from_flag(flag, page_no)?;
        let header_end = header_offset + page_type.header_size();
        if header_end > usable_size.min(data.len()) {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::ShortRead,
                "Page is shorter than its header",
            ));
        }

        let cell_count = read_u16(&data, header_offset + 3).unwrap_or_default() as usize;
        let pointers_end = header_end + cell_count * CELL_POINTER_SIZE;
        if pointers_end > usable_size {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::CellPointer,
                format!("Cell count: {} overflows the page", cell_count),
            ));
        }
        let mut cell_pointers = Vec::with_capacity(cell_count);
        for index in 0..cell_count {
            let pointer = read_u16(&data, header_end + index * CELL_POINTER_SIZE).unwrap_or_default()
                as usize;
            if pointer < pointers_end || pointer >= usable_size {
                return Err(RepairError::corruption(
                    page_no,
                    CorruptField::CellPointer,
                    format!("Cell pointer: {} at index {} is out of range", pointer, index),
                ));
            }
            cell_pointers.push(pointer);
        }

        let right_most = if page_type.is_leaf() {
            None
        } else {
            read_u32(&data, header_offset + 8)
        };

        // Thresholds from the b-tree format: table leaves may keep almost the
        // whole usable area local, index cells keep at most a quarter.
        let max_local = if page_type == PageType::LeafTable {
            usable_size - 35
        } else {
            (usable_size - 12) * 64 / 255 - 23
        };
        let min_local = (usable_size - 12) * 32 / 255 - 23;

        Ok(Self {
            number: page_no,
            page_type,
            data,
            header_offset,
            cell_pointers,
            right_most,
            usable_size,
            max_local,
            min_local,
        })
    }

    pub fn number(&self) -> PageNo {
        self.number
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type.is_leaf()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    pub fn max_local(&self) -> usize {
        self.max_local
    }

    pub fn min_local(&self) -> usize {
        self.min_local
    }

    pub fn cell_count(&self) -> usize {
        self.cell_pointers.len()
    }

    pub fn cell_offsets(&self) -> &[usize] {
        &self.cell_pointers
    }

    pub fn right_most(&self) -> Option<PageNo> {
        self.right_most
    }

    /// Child pages of an interior page in key order, right-most last.
    /// Empty for leaves.
    pub fn child_page_numbers(&self) -> Result<Vec<PageNo>> {
        let Some(right_most) = self.right_most else {
            return Ok(Vec::new());
        };
        let mut children = Vec::with_capacity(self.cell_pointers.len() + 1);
        for &offset in &self.cell_pointers {
            let child = read_u32(&self.data, offset).ok_or_else(|| {
                RepairError::corruption(
                    self.number,
                    CorruptField::CellPointer,
                    format!("Interior cell at {} is truncated", offset),
                )
            })?;
            if self.page_type == PageType::InteriorTable
                && get_varint(&self.data[(offset + 4).min(self.data.len())..]).is_none()
            {
                return Err(RepairError::corruption(
                    self.number,
                    CorruptField::Rowid,
                    format!("Interior cell at {} has no key", offset),
                ));
            }
            children.push(child);
        }
        children.push(right_most);
        Ok(children)
    }

    pub fn hash(&self) -> u32 {
        calculate_page_hash(&self.data)
    }
}
