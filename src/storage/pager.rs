use std::{
    collections::BTreeSet,
    fmt,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    config::RepairConfig,
    storage::{
        header::{DatabaseHeader, TextEncoding, validate_page_size},
        wal::{Salt, Wal},
    },
    types::{
        HEADER_SIZE, PageNo,
        error::{CorruptField, RepairError, Result},
    },
    utils::serialization::read_u32,
};

/// Decrypts raw pages of an encrypted database. Supplied by the handle layer
/// that owns the key; the pager never sees key material.
pub trait PageCipher: Send + Sync {
    /// Decode `data` in place. An error marks the page as corrupted.
    fn decode_page(&self, page_no: PageNo, data: &mut [u8]) -> std::result::Result<(), String>;
}

#[derive(Clone, Default)]
pub struct PagerConfig {
    /// Out-of-band page size, required when a cipher is set.
    pub page_size: Option<u32>,
    pub reserved_bytes: Option<u8>,
    pub cipher: Option<Arc<dyn PageCipher>>,
    pub skip_wal: bool,
    /// Fail instead of disposing a WAL that does not parse.
    pub wal_required: bool,
}

impl PagerConfig {
    pub fn from_repair_config(config: &RepairConfig) -> Self {
        Self {
            page_size: config.page_size,
            reserved_bytes: config.reserved_bytes,
            cipher: None,
            skip_wal: false,
            wal_required: config.wal_required,
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn PageCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }
}

impl fmt::Debug for PagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagerConfig")
            .field("page_size", &self.page_size)
            .field("reserved_bytes", &self.reserved_bytes)
            .field("cipher", &self.cipher.is_some())
            .field("skip_wal", &self.skip_wal)
            .field("wal_required", &self.wal_required)
            .finish()
    }
}

/// Page-granular reader over one database file and its WAL.
pub struct Pager {
    path: PathBuf,
    file: File,
    cipher: Option<Arc<dyn PageCipher>>,
    page_size: u32,
    reserved_bytes: u32,
    file_size: u64,
    number_of_pages: u32,
    header: Option<DatabaseHeader>,
    wal: Wal,
    disposed_wal_pages: usize,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P, config: PagerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_size = std::fs::metadata(&path)?.len();
        if file_size == 0 {
            return Err(RepairError::EmptyFile {
                path: path.display().to_string(),
            });
        }
        let mut file = OpenOptions::new().read(true).open(&path)?;

        let header = Self::read_header(&mut file, &path, &config)?;
        let page_size = match (config.page_size, &header) {
            (Some(page_size), _) => page_size,
            (None, Some(header)) => header.page_size,
            (None, None) => {
                return Err(RepairError::NotADatabase {
                    path: path.display().to_string(),
                });
            }
        };
        validate_page_size(page_size)?;
        let reserved_bytes = config
            .reserved_bytes
            .or(header.as_ref().map(|header| header.reserved_space))
            .unwrap_or(0);
        if u32::from(reserved_bytes) >= page_size / 2 {
            return Err(RepairError::corruption(
                1,
                CorruptField::ReservedBytes,
                format!("Reserved bytes: {} is illegal", reserved_bytes),
            ));
        }

        let number_of_pages = file_size.div_ceil(u64::from(page_size)) as u32;
        let mut pager = Self {
            path,
            file,
            cipher: config.cipher.clone(),
            page_size,
            reserved_bytes: u32::from(reserved_bytes),
            file_size,
            number_of_pages,
            header,
            wal: Wal::default(),
            disposed_wal_pages: 0,
        };
        pager.wal = Wal::empty(&pager.path);

        if !config.skip_wal {
            match Wal::load(&pager.path, page_size) {
                Ok(wal) => pager.wal = wal,
                Err(error) if error.is_corruption() && !config.wal_required => {
                    warn!(
                        path = %pager.path.display(),
                        error = %error,
                        "disposing unreadable wal"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        debug!(
            path = %pager.path.display(),
            page_size = pager.page_size,
            reserved_bytes = pager.reserved_bytes,
            pages = pager.number_of_pages(),
            "pager initialized"
        );
        Ok(pager)
    }

    fn read_header(
        file: &mut File,
        path: &Path,
        config: &PagerConfig,
    ) -> Result<Option<DatabaseHeader>> {
        let length = match (&config.cipher, config.page_size) {
            (Some(_), Some(page_size)) => page_size as usize,
            (Some(_), None) => {
                return Err(RepairError::Config {
                    details: "page size must be supplied for encrypted databases".to_string(),
                });
            }
            (None, _) => HEADER_SIZE,
        };
        let mut buffer = vec![0u8; length];
        file.seek(SeekFrom::Start(0))?;
        if let Err(error) = file.read_exact(&mut buffer) {
            if error.kind() != std::io::ErrorKind::UnexpectedEof {
                return Err(error.into());
            }
            if config.page_size.is_none() {
                return Err(RepairError::corruption(
                    1,
                    CorruptField::ShortRead,
                    "Database header is truncated",
                ));
            }
            return Ok(None);
        }
        if let Some(cipher) = &config.cipher {
            if cipher.decode_page(1, &mut buffer).is_err() {
                return Ok(None);
            }
        }
        match DatabaseHeader::from_bytes(&buffer[..HEADER_SIZE]) {
            Ok(header) => Ok(Some(header)),
            // An out-of-band page size lets us read past a damaged header.
            Err(_) if config.page_size.is_some() => Ok(None),
            Err(RepairError::NotADatabase { .. }) => Err(RepairError::NotADatabase {
                path: path.display().to_string(),
            }),
            Err(error) => Err(error),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn reserved_bytes(&self) -> u32 {
        self.reserved_bytes
    }

    pub fn usable_size(&self) -> u32 {
        self.page_size - self.reserved_bytes
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn number_of_pages(&self) -> u32 {
        self.number_of_pages.max(self.wal.max_page_no())
    }

    pub fn header(&self) -> Option<&DatabaseHeader> {
        self.header.as_ref()
    }

    pub fn text_encoding(&self) -> TextEncoding {
        self.header
            .as_ref()
            .map(|header| header.text_encoding)
            .unwrap_or_default()
    }

    pub fn wal_salt(&self) -> Salt {
        self.wal.salt()
    }

    pub fn wal_frame_count(&self) -> u32 {
        self.wal.max_frame()
    }

    pub fn wal_page_count(&self) -> usize {
        self.wal.number_of_pages()
    }

    pub fn disposed_wal_pages(&self) -> usize {
        self.disposed_wal_pages
    }

    /// Forget the WAL so pages are read from the main file only.
    pub fn dispose_wal(&mut self) {
        self.disposed_wal_pages += self.wal.number_of_pages();
        self.wal = Wal::empty(&self.path);
    }

    fn page_offset(&self, page_no: PageNo) -> u64 {
        u64::from(page_no - 1) * u64::from(self.page_size)
    }

    /// Raw bytes of one page, WAL image first, decrypted when a cipher is set.
    pub fn acquire_page_data(&mut self, page_no: PageNo) -> Result<Vec<u8>> {
        if page_no == 0 {
            return Err(RepairError::corruption(
                page_no,
                CorruptField::PageNumber,
                "Page number 0 is never valid",
            ));
        }
        let mut data = match self.wal.read_page(page_no) {
            Some(result) => result?,
            None => {
                if page_no > self.number_of_pages {
                    return Err(RepairError::corruption(
                        page_no,
                        CorruptField::PageNumber,
                        format!(
                            "Acquired page number: {} exceeds the page count: {}",
                            page_no, self.number_of_pages
                        ),
                    ));
                }
                let mut buffer = vec![0u8; self.page_size as usize];
                self.file.seek(SeekFrom::Start(self.page_offset(page_no)))?;
                if let Err(error) = self.file.read_exact(&mut buffer) {
                    if error.kind() == std::io::ErrorKind::UnexpectedEof {
                        return Err(RepairError::corruption(
                            page_no,
                            CorruptField::ShortRead,
                            "Acquired page data is less than the page size",
                        ));
                    }
                    return Err(error.into());
                }
                buffer
            }
        };
        if let Some(cipher) = &self.cipher {
            cipher.decode_page(page_no, &mut data).map_err(|details| {
                RepairError::corruption(page_no, CorruptField::Cipher, details)
            })?;
        }
        Ok(data)
    }

    /// Pages on the freelist. Damage in the chain ends the walk quietly.
    pub fn freelist_pages(&mut self) -> BTreeSet<PageNo> {
        let mut pages = BTreeSet::new();
        let Some(header) = &self.header else {
            return pages;
        };
        let mut trunk = header.freelist_trunk_page;
        let limit = self.number_of_pages();
        let leaves_per_trunk = (self.usable_size() / 4).saturating_sub(2);

        while trunk != 0 && trunk <= limit && pages.insert(trunk) {
            let Ok(data) = self.acquire_page_data(trunk) else {
                break;
            };
            let next = read_u32(&data, 0).unwrap_or_default();
            let count = read_u32(&data, 4).unwrap_or_default().min(leaves_per_trunk);
            for index in 0..count as usize {
                if let Some(leaf) = read_u32(&data, 8 + index * 4) {
                    if leaf != 0 && leaf <= limit {
                        pages.insert(leaf);
                    }
                }
            }
            trunk = next;
        }
        pages
    }
}
