use crc32fast::Hasher;

/// Content hash recorded for each verified page in a material.
pub fn calculate_page_hash(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn verify_page_hash(data: &[u8], expected_hash: u32) -> bool {
    calculate_page_hash(data) == expected_hash
}

/// Checksum over the material content block. An empty block checksums to 0.
pub fn calculate_block_checksum(block: &[u8]) -> u32 {
    if block.is_empty() {
        return 0;
    }
    let mut hasher = Hasher::new();
    hasher.update(block);
    hasher.finalize()
}
