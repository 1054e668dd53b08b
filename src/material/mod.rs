//! The backup artifact: every verified leaf page of every table, with the
//! SQL needed to recreate the table around them.

pub mod codec;

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{info, warn};

use crate::{
    storage::wal::Salt,
    types::{
        PageNo,
        error::{RepairError, Result},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Info {
    pub page_size: u32,
    pub reserved_bytes: u32,
    pub wal_salt: Salt,
    pub wal_frame: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Content {
    pub sql: String,
    /// Indexes and triggers, replayed after the table's rows.
    pub associated_sqls: Vec<String>,
    pub sequence: i64,
    /// Leaf page number to the hash of its bytes at backup time.
    pub verified_pages: BTreeMap<PageNo, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Material {
    pub info: Info,
    pub contents: BTreeMap<String, Content>,
}

impl Material {
    pub fn new(info: Info) -> Self {
        Self {
            info,
            contents: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn number_of_pages(&self) -> usize {
        self.contents
            .values()
            .map(|content| content.verified_pages.len())
            .sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        codec::decode(data)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = self.encode()?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        Self::decode(&data)
    }
}

fn suffixed(database: &Path, suffix: &str) -> PathBuf {
    let mut path = database.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

pub fn first_material_path(database: &Path) -> PathBuf {
    suffixed(database, "-first.material")
}

pub fn last_material_path(database: &Path) -> PathBuf {
    suffixed(database, "-last.material")
}

pub fn material_paths(database: &Path) -> [PathBuf; 2] {
    [first_material_path(database), last_material_path(database)]
}

fn modified_time(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

/// Material slots that exist, newest first.
fn existing_slots(database: &Path) -> io::Result<Vec<(PathBuf, SystemTime)>> {
    let mut slots = Vec::with_capacity(2);
    for path in material_paths(database) {
        if let Some(modified) = modified_time(&path)? {
            slots.push((path, modified));
        }
    }
    // Stable sort keeps `-last` ahead of `-first` on equal timestamps.
    slots.reverse();
    slots.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(slots)
}

/// Write `material` into the missing slot, or over the older one.
pub fn save_material(database: &Path, material: &Material) -> Result<PathBuf> {
    let first = first_material_path(database);
    let last = last_material_path(database);
    let target = match (modified_time(&first)?, modified_time(&last)?) {
        (None, _) => first,
        (Some(_), None) => last,
        (Some(first_time), Some(last_time)) => {
            if first_time <= last_time {
                first
            } else {
                last
            }
        }
    };
    material.save_to(&target)?;
    info!(
        path = %target.display(),
        tables = material.contents.len(),
        pages = material.number_of_pages(),
        "material saved"
    );
    Ok(target)
}

/// The newest decodable material, or `None` when no slot holds one.
/// A corrupted slot is skipped with a warning; any other failure is returned.
pub fn load_material(database: &Path) -> Result<Option<Material>> {
    for (path, _) in existing_slots(database)? {
        match Material::load_from(&path) {
            Ok(material) => {
                info!(path = %path.display(), tables = material.contents.len(), "material loaded");
                return Ok(Some(material));
            }
            Err(
                error @ (RepairError::MaterialCorrupt { .. } | RepairError::MaterialEmpty { .. }),
            ) => {
                warn!(path = %path.display(), error = %error, "skipping unusable material");
            }
            Err(error) => return Err(error),
        }
    }
    warn!(database = %database.display(), "no usable material");
    Ok(None)
}
