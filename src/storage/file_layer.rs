use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::warn;

/// File operations the repair layer needs from its host. Errors keep the
/// OS error code (`io::Error::raw_os_error`).
pub trait FileLayer {
    fn file_exists(&self, path: &Path) -> io::Result<bool>;

    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Move every `(source, destination)` pair, skipping missing sources.
    /// Fails without touching the remaining pairs if a destination exists.
    fn move_items(&self, items: &[(PathBuf, PathBuf)]) -> io::Result<()>;

    /// Remove files and directories, skipping missing ones.
    fn remove_items(&self, paths: &[PathBuf]) -> io::Result<()>;

    fn create_directory(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileLayer;

impl FileLayer for LocalFileLayer {
    fn file_exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(error) => Err(error),
        }
    }

    fn move_items(&self, items: &[(PathBuf, PathBuf)]) -> io::Result<()> {
        for (_, destination) in items {
            if destination.try_exists()? {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", destination.display()),
                ));
            }
        }
        for (source, destination) in items {
            if !source.try_exists()? {
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(source, destination)?;
        }
        Ok(())
    }

    fn remove_items(&self, paths: &[PathBuf]) -> io::Result<()> {
        for path in paths {
            let result = match fs::symlink_metadata(path) {
                Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
                Ok(_) => fs::remove_file(path),
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                warn!(path = %path.display(), code = ?error.raw_os_error(), "failed to remove item");
                return Err(error);
            }
        }
        Ok(())
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}
