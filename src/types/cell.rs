use std::collections::HashSet;

use crate::{
    storage::{header::TextEncoding, pager::Pager},
    types::{
        OVERFLOW_POINTER_SIZE, PageNo, RowId,
        error::{CorruptField, RepairError, Result},
        page::{Page, PageType},
        value::{SerialType, Value},
    },
    utils::serialization::{get_varint, read_signed, read_u32},
};

/// One row of a table leaf: rowid plus the reassembled record payload.
#[derive(Debug, Clone)]
pub struct Cell {
    page_number: PageNo,
    row_id: RowId,
    columns: Vec<(SerialType, usize)>,
    payload: Vec<u8>,
    encoding: TextEncoding,
}

impl Cell {
    /// Decode the cell at `offset` of a table leaf, following its overflow
    /// chain through `pager` when the payload does not fit locally.
    pub fn decode(pager: &mut Pager, page: &Page, offset: usize) -> Result<Self> {
        let page_no = page.number();
        if page.page_type() != PageType::LeafTable {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::PageType,
                "Cells are only decoded from table leaves",
            ));
        }
        let data = &page.data()[..page.usable_size().min(page.data().len())];

        let (payload_size, length) = data.get(offset..).and_then(get_varint).ok_or_else(|| {
            RepairError::corruption(page_no, CorruptField::PayloadSize, "Payload size is truncated")
        })?;
        let mut cursor = offset + length;
        let (row_id, length) = get_varint(&data[cursor..]).ok_or_else(|| {
            RepairError::corruption(page_no, CorruptField::Rowid, "Rowid is truncated")
        })?;
        cursor += length;

        let usable_size = page.usable_size() as u64;
        let max_payload = u64::from(pager.number_of_pages()) * usable_size;
        if payload_size > max_payload {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::PayloadSize,
                format!("Payload size: {} exceeds the file", payload_size),
            ));
        }
        let payload_size = payload_size as usize;

        let max_local = page.max_local();
        let min_local = page.min_local();
        let local_size = if payload_size <= max_local {
            payload_size
        } else {
            let surplus = min_local + (payload_size - min_local) % (page.usable_size() - 4);
            if surplus <= max_local { surplus } else { min_local }
        };

        let local = data.get(cursor..cursor + local_size).ok_or_else(|| {
            RepairError::corruption(
                page_no,
                CorruptField::LocalPayload,
                format!("Local payload of {} bytes overruns the page", local_size),
            )
        })?;
        let mut payload = Vec::with_capacity(payload_size);
        payload.extend_from_slice(local);
        cursor += local_size;

        if local_size < payload_size {
            let first = read_u32(data, cursor).ok_or_else(|| {
                RepairError::corruption(
                    page_no,
                    CorruptField::OverflowPage,
                    "First overflow page number is truncated",
                )
            })?;
            Self::read_overflow_chain(pager, page_no, first, payload_size, &mut payload)?;
        }

        let columns = Self::decode_record_header(page_no, &payload)?;

        Ok(Self {
            page_number: page_no,
            row_id: row_id as RowId,
            columns,
            payload,
            encoding: pager.text_encoding(),
        })
    }

    fn read_overflow_chain(
        pager: &mut Pager,
        page_no: PageNo,
        first: PageNo,
        payload_size: usize,
        payload: &mut Vec<u8>,
    ) -> Result<()> {
        let chunk_size = pager.usable_size() as usize - OVERFLOW_POINTER_SIZE;
        let page_count = pager.number_of_pages();
        let mut visited = HashSet::new();
        let mut overflow = first;

        while payload.len() < payload_size {
            if overflow == 0 || overflow > page_count {
                return Err(RepairError::corruption(
                    page_no,
                    CorruptField::OverflowPage,
                    format!("Overflow page: {} is out of range", overflow),
                ));
            }
            if !visited.insert(overflow) {
                return Err(RepairError::corruption(
                    page_no,
                    CorruptField::PageCycle,
                    format!("Overflow page: {} appears twice in one chain", overflow),
                ));
            }
            let data = pager.acquire_page_data(overflow)?;
            let next = read_u32(&data, 0).unwrap_or_default();
            let size = chunk_size.min(payload_size - payload.len());
            let chunk = data
                .get(OVERFLOW_POINTER_SIZE..OVERFLOW_POINTER_SIZE + size)
                .ok_or_else(|| {
                    RepairError::corruption(overflow, CorruptField::ShortRead, "Overflow page is truncated")
                })?;
            payload.extend_from_slice(chunk);
            overflow = next;
        }

        if overflow != 0 {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::OverflowPage,
                format!("Overflow chain continues to page {} past the payload", overflow),
            ));
        }
        Ok(())
    }

    fn decode_record_header(page_no: PageNo, payload: &[u8]) -> Result<Vec<(SerialType, usize)>> {
        let (header_size, length) = get_varint(payload).ok_or_else(|| {
            RepairError::corruption(page_no, CorruptField::Payload, "Record header size is truncated")
        })?;
        let header_size = header_size as usize;
        if header_size < length || header_size > payload.len() {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::Payload,
                format!("Record header size: {} is out of range", header_size),
            ));
        }

        let mut columns = Vec::new();
        let mut cursor = length;
        let mut content_offset = header_size;
        while cursor < header_size {
            let (raw, length) = get_varint(&payload[cursor..header_size]).ok_or_else(|| {
                RepairError::corruption(page_no, CorruptField::SerialType, "Serial type is truncated")
            })?;
            cursor += length;
            let serial_type = SerialType::decode(raw, page_no)?;
            let end = content_offset
                .checked_add(serial_type.content_size())
                .filter(|&end| end <= payload.len())
                .ok_or_else(|| {
                    RepairError::corruption(
                        page_no,
                        CorruptField::Payload,
                        format!(
                            "Column {} of {} bytes overruns the payload of {}",
                            columns.len(),
                            serial_type.content_size(),
                            payload.len()
                        ),
                    )
                })?;
            columns.push((serial_type, content_offset));
            content_offset = end;
        }

        if content_offset != payload.len() {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::Payload,
                format!(
                    "Unexpected termination of payload: columns end at {} of {}",
                    content_offset,
                    payload.len()
                ),
            ));
        }
        Ok(columns)
    }

    pub fn page_number(&self) -> PageNo {
        self.page_number
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn count(&self) -> usize {
        self.columns.len()
    }

    pub fn serial_type(&self, index: usize) -> Option<SerialType> {
        self.columns.get(index).map(|(serial_type, _)| *serial_type)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Column `index`, or `Null` past the end of the record (columns added
    /// by ALTER TABLE after the row was written).
    pub fn value(&self, index: usize) -> Value {
        let Some(&(serial_type, offset)) = self.columns.get(index) else {
            return Value::Null;
        };
        let bytes = &self.payload[offset..offset + serial_type.content_size()];
        match serial_type {
            SerialType::Null => Value::Null,
            SerialType::Zero => Value::Integer(0),
            SerialType::One => Value::Integer(1),
            SerialType::Integer(_) => Value::Integer(read_signed(bytes)),
            SerialType::Real => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Value::Real(f64::from_be_bytes(raw))
            }
            SerialType::Text(_) => Value::Text(self.decode_text(bytes)),
            SerialType::Blob(_) => Value::Blob(bytes.to_vec()),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.count()).map(|index| self.value(index)).collect()
    }

    fn decode_text(&self, bytes: &[u8]) -> String {
        match self.encoding {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            TextEncoding::Utf16be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}
