//! Read-only view of a database's write-ahead log.
//!
//! Only frames up to the last valid commit frame are honoured; a frame whose
//! salt or checksum chain breaks ends the log, exactly as SQLite recovery
//! would treat it.

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    types::{
        PageNo,
        error::{CorruptField, RepairError, Result},
    },
    utils::serialization::read_u32,
};

pub const WAL_HEADER_SIZE: usize = 32;
pub const FRAME_HEADER_SIZE: usize = 24;
const WAL_MAGIC: u32 = 0x377f_0682;

pub type Salt = (u32, u32);

pub fn wal_path_for(database: &Path) -> PathBuf {
    let mut path = database.as_os_str().to_owned();
    path.push("-wal");
    PathBuf::from(path)
}

#[derive(Debug, Default)]
pub struct Wal {
    path: PathBuf,
    file: Option<File>,
    page_size: u32,
    salt: Salt,
    pages_to_frames: HashMap<PageNo, u32>,
    max_frame: u32,
}

impl Wal {
    /// A log with no frames, used when the WAL is absent or disposed.
    pub fn empty(database: &Path) -> Self {
        Self {
            path: wal_path_for(database),
            ..Self::default()
        }
    }

    pub fn load(database: &Path, page_size: u32) -> Result<Self> {
        let mut wal = Self::empty(database);
        wal.page_size = page_size;
        let size = match std::fs::metadata(&wal.path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(wal),
            Err(error) => return Err(error.into()),
        };
        if size == 0 {
            return Ok(wal);
        }

        let mut file = File::open(&wal.path)?;
        let mut header = [0u8; WAL_HEADER_SIZE];
        if file.read_exact(&mut header).is_err() {
            return Err(RepairError::corruption(
                0,
                CorruptField::Wal,
                "WAL header is truncated",
            ));
        }

        let magic = read_u32(&header, 0).unwrap_or_default();
        if magic & 0xffff_fffe != WAL_MAGIC {
            return Err(RepairError::corruption(
                0,
                CorruptField::Wal,
                format!("Incorrect wal magic: {:#x}", magic),
            ));
        }
        let big_endian = magic & 1 == 1;

        let header_page_size = read_u32(&header, 8).unwrap_or_default();
        if header_page_size != page_size {
            return Err(RepairError::corruption(
                0,
                CorruptField::Wal,
                format!(
                    "WAL page size {} does not match database page size {}",
                    header_page_size, page_size
                ),
            ));
        }

        let mut checksum = calculate_checksum(&header[..24], big_endian, (0, 0));
        if checksum != (read_u32(&header, 24).unwrap_or_default(), read_u32(&header, 28).unwrap_or_default()) {
            return Err(RepairError::corruption(
                0,
                CorruptField::Wal,
                "WAL header checksum mismatch",
            ));
        }
        wal.salt = (
            read_u32(&header, 16).unwrap_or_default(),
            read_u32(&header, 20).unwrap_or_default(),
        );

        let frame_size = FRAME_HEADER_SIZE as u64 + u64::from(page_size);
        let frame_count = (size - WAL_HEADER_SIZE as u64) / frame_size;
        let mut pending: HashMap<PageNo, u32> = HashMap::new();
        let mut frame = vec![0u8; frame_size as usize];

        for index in 1..=frame_count as u32 {
            file.seek(SeekFrom::Start(
                WAL_HEADER_SIZE as u64 + u64::from(index - 1) * frame_size,
            ))?;
            if file.read_exact(&mut frame).is_err() {
                break;
            }
            let page_no = read_u32(&frame, 0).unwrap_or_default();
            let commit_size = read_u32(&frame, 4).unwrap_or_default();
            let frame_salt = (
                read_u32(&frame, 8).unwrap_or_default(),
                read_u32(&frame, 12).unwrap_or_default(),
            );
            if page_no == 0 || frame_salt != wal.salt {
                break;
            }
            checksum = calculate_checksum(&frame[..8], big_endian, checksum);
            checksum = calculate_checksum(&frame[FRAME_HEADER_SIZE..], big_endian, checksum);
            let expected = (
                read_u32(&frame, 16).unwrap_or_default(),
                read_u32(&frame, 20).unwrap_or_default(),
            );
            if checksum != expected {
                break;
            }
            pending.insert(page_no, index);
            if commit_size != 0 {
                wal.pages_to_frames.extend(pending.drain());
                wal.max_frame = index;
            }
        }

        debug!(
            path = %wal.path.display(),
            frames = wal.max_frame,
            pages = wal.pages_to_frames.len(),
            "loaded wal"
        );
        wal.file = Some(file);
        Ok(wal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> Salt {
        self.salt
    }

    /// Number of frames up to and including the last commit frame.
    pub fn max_frame(&self) -> u32 {
        self.max_frame
    }

    pub fn number_of_pages(&self) -> usize {
        self.pages_to_frames.len()
    }

    pub fn max_page_no(&self) -> PageNo {
        self.pages_to_frames.keys().copied().max().unwrap_or(0)
    }

    pub fn contains_page(&self, page_no: PageNo) -> bool {
        self.pages_to_frames.contains_key(&page_no)
    }

    /// The newest committed image of `page_no`, if the log holds one.
    pub fn read_page(&mut self, page_no: PageNo) -> Option<Result<Vec<u8>>> {
        let frame = *self.pages_to_frames.get(&page_no)?;
        let file = self.file.as_mut()?;
        let frame_size = FRAME_HEADER_SIZE as u64 + u64::from(self.page_size);
        let offset =
            WAL_HEADER_SIZE as u64 + u64::from(frame - 1) * frame_size + FRAME_HEADER_SIZE as u64;
        let mut data = vec![0u8; self.page_size as usize];
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut data))
            .map(|_| data)
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::UnexpectedEof {
                    RepairError::corruption(page_no, CorruptField::ShortRead, "WAL frame is truncated")
                } else {
                    error.into()
                }
            });
        Some(result)
    }
}

fn calculate_checksum(data: &[u8], big_endian: bool, seed: Salt) -> Salt {
    let (mut s1, mut s2) = seed;
    for chunk in data.chunks_exact(8) {
        let (a, b) = if big_endian {
            (
                u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            )
        } else {
            (
                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            )
        };
        s1 = s1.wrapping_add(a).wrapping_add(s2);
        s2 = s2.wrapping_add(b).wrapping_add(s1);
    }
    (s1, s2)
}
