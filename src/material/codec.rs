//! Binary layout, all fixed-width fields big-endian:
//!
//! ```text
//! [magic u32][version u32]
//! [page_size u32][reserved_bytes u32][salt1 u32][salt2 u32][wal_frame u32]
//! [checksum u32][varint length][content block]
//! ```
//!
//! The content block repeats, per table:
//!
//! ```text
//! [sized name][varint sequence][sized sql]
//! [varint n][sized associated sql] × n
//! [varint m][varint page number][hash u32] × m
//! ```
//!
//! Decoding accepts a material whole or not at all.

use std::collections::BTreeMap;

use crate::{
    material::{Content, Info, Material},
    types::{
        PageNo,
        error::{RepairError, Result},
    },
    utils::{
        hash::calculate_block_checksum,
        serialization::{Deserialization, Serialization},
    },
};

pub const MATERIAL_MAGIC: u32 = 0x5341_4c56;
pub const MATERIAL_VERSION: u32 = 0x0100_0000;

fn corrupt(element: &'static str) -> RepairError {
    RepairError::MaterialCorrupt { element }
}

fn empty(element: &'static str) -> RepairError {
    RepairError::MaterialEmpty { element }
}

pub fn encode(material: &Material) -> Result<Vec<u8>> {
    if material.contents.is_empty() {
        return Err(empty("contents"));
    }

    let mut block = Serialization::new();
    for (name, content) in &material.contents {
        if name.is_empty() {
            return Err(empty("name"));
        }
        if content.sql.is_empty() {
            return Err(empty("sql"));
        }
        if content.verified_pages.is_empty() {
            return Err(empty("pages"));
        }
        block.put_sized_string(name);
        block.put_varint(content.sequence as u64);
        block.put_sized_string(&content.sql);
        block.put_varint(content.associated_sqls.len() as u64);
        for sql in &content.associated_sqls {
            block.put_sized_string(sql);
        }
        block.put_varint(content.verified_pages.len() as u64);
        for (&page_no, &hash) in &content.verified_pages {
            block.put_varint(u64::from(page_no));
            block.put_u32(hash);
        }
    }
    let block = block.finalize();

    let mut encoder = Serialization::new();
    encoder.put_u32(MATERIAL_MAGIC);
    encoder.put_u32(MATERIAL_VERSION);
    encoder.put_u32(material.info.page_size);
    encoder.put_u32(material.info.reserved_bytes);
    encoder.put_u32(material.info.wal_salt.0);
    encoder.put_u32(material.info.wal_salt.1);
    encoder.put_u32(material.info.wal_frame);
    encoder.put_u32(calculate_block_checksum(&block));
    encoder.put_sized_bytes(&block);
    Ok(encoder.finalize())
}

pub fn decode(data: &[u8]) -> Result<Material> {
    let mut decoder = Deserialization::new(data);

    if decoder.advance_u32().ok_or_else(|| corrupt("magic"))? != MATERIAL_MAGIC {
        return Err(corrupt("magic"));
    }
    if decoder.advance_u32().ok_or_else(|| corrupt("version"))? != MATERIAL_VERSION {
        return Err(corrupt("version"));
    }

    let mut field = || decoder.advance_u32().ok_or_else(|| corrupt("info"));
    let info = Info {
        page_size: field()?,
        reserved_bytes: field()?,
        wal_salt: (field()?, field()?),
        wal_frame: field()?,
    };

    let checksum = decoder.advance_u32().ok_or_else(|| corrupt("checksum"))?;
    let block = decoder.advance_sized_bytes().ok_or_else(|| corrupt("length"))?;
    if !decoder.ended() {
        return Err(corrupt("length"));
    }
    if calculate_block_checksum(block) != checksum {
        return Err(corrupt("checksum"));
    }

    let contents = decode_contents(block)?;
    Ok(Material { info, contents })
}

fn decode_contents(block: &[u8]) -> Result<BTreeMap<String, Content>> {
    let mut decoder = Deserialization::new(block);
    let mut contents = BTreeMap::new();

    while !decoder.ended() {
        let name = decoder.advance_sized_string().ok_or_else(|| corrupt("name"))?;
        if name.is_empty() {
            return Err(empty("name"));
        }
        let sequence = decoder.advance_varint().ok_or_else(|| corrupt("sequence"))? as i64;
        let sql = decoder.advance_sized_string().ok_or_else(|| corrupt("sql"))?;
        if sql.is_empty() {
            return Err(empty("sql"));
        }

        let count = decoder.advance_varint().ok_or_else(|| corrupt("associated sqls"))?;
        let mut associated_sqls = Vec::new();
        for _ in 0..count {
            let sql = decoder
                .advance_sized_string()
                .ok_or_else(|| corrupt("associated sql"))?;
            associated_sqls.push(sql);
        }

        let count = decoder.advance_varint().ok_or_else(|| corrupt("pages"))?;
        if count == 0 {
            return Err(empty("pages"));
        }
        let mut verified_pages = BTreeMap::new();
        for _ in 0..count {
            let page_no = decoder.advance_varint().ok_or_else(|| corrupt("page number"))?;
            let page_no = PageNo::try_from(page_no).map_err(|_| corrupt("page number"))?;
            let hash = decoder.advance_u32().ok_or_else(|| corrupt("page hash"))?;
            verified_pages.insert(page_no, hash);
        }

        let content = Content {
            sql,
            associated_sqls,
            sequence,
            verified_pages,
        };
        if contents.insert(name, content).is_some() {
            return Err(corrupt("duplicated table"));
        }
    }

    if contents.is_empty() {
        return Err(empty("contents"));
    }
    Ok(contents)
}
