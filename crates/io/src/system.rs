//! File-system driver seam
//!
//! The buffered layers talk to files through [`SystemFileDriver`], so the
//! local filesystem, a host-scoped remote scheme or a distributed
//! filesystem can back the same line APIs. Only the local driver ships
//! here; other schemes plug in at the task layer.

use crate::error::IoError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Positioned reads on an opened input file. The implementation owns the
/// OS file offset; one reader belongs to one evaluator.
pub trait FileReader {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize, IoError>;
}

/// Sequential writes on an opened output file.
pub trait FileWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError>;
    fn flush(&mut self) -> Result<(), IoError>;
}

/// Scheme-level operations: sizes are learned at open time, handles are
/// opened per evaluator.
pub trait SystemFileDriver {
    fn file_size(&self, path: &Path) -> Result<u64, IoError>;
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn FileReader>, IoError>;
    /// `append = false` truncates; reopening with `append = true` is how
    /// open-on-demand writers resume.
    fn open_for_write(&self, path: &Path, append: bool) -> Result<Box<dyn FileWriter>, IoError>;
}

/// Accept both plain paths and `file://` URIs.
pub fn resolve_local_path(path_or_uri: &str) -> PathBuf {
    match path_or_uri.strip_prefix("file://") {
        Some(stripped) => PathBuf::from(stripped),
        None => PathBuf::from(path_or_uri),
    }
}

/// The local filesystem driver.
#[derive(Debug, Clone, Default)]
pub struct LocalFileDriver;

struct LocalReader {
    path: PathBuf,
    file: File,
    position: u64,
}

impl FileReader for LocalReader {
    fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize, IoError> {
        if self.position != offset {
            self.file.seek(SeekFrom::Start(offset)).map_err(|source| IoError::Read {
                path: self.path.clone(),
                offset,
                source,
            })?;
            self.position = offset;
        }
        let mut filled = 0;
        // Plain Read returns short counts; loop until EOF or full.
        while filled < buffer.len() {
            let count = self.file.read(&mut buffer[filled..]).map_err(|source| IoError::Read {
                path: self.path.clone(),
                offset: offset + filled as u64,
                source,
            })?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        self.position = offset + filled as u64;
        Ok(filled)
    }
}

struct LocalWriter {
    path: PathBuf,
    file: File,
}

impl FileWriter for LocalWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.file
            .write_all(data)
            .map_err(|source| IoError::Write { path: self.path.clone(), source })
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.file.flush().map_err(|source| IoError::Write { path: self.path.clone(), source })
    }
}

impl SystemFileDriver for LocalFileDriver {
    fn file_size(&self, path: &Path) -> Result<u64, IoError> {
        std::fs::metadata(path)
            .map(|metadata| metadata.len())
            .map_err(|source| IoError::Open { path: path.to_path_buf(), source })
    }

    fn open_for_read(&self, path: &Path) -> Result<Box<dyn FileReader>, IoError> {
        let file = File::open(path)
            .map_err(|source| IoError::Open { path: path.to_path_buf(), source })?;
        Ok(Box::new(LocalReader { path: path.to_path_buf(), file, position: 0 }))
    }

    fn open_for_write(&self, path: &Path, append: bool) -> Result<Box<dyn FileWriter>, IoError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|source| IoError::Open { path: path.to_path_buf(), source })?;
        Ok(Box::new(LocalWriter { path: path.to_path_buf(), file }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_resolve_local_path() {
        assert_eq!(resolve_local_path("/tmp/data.txt"), PathBuf::from("/tmp/data.txt"));
        assert_eq!(resolve_local_path("file:///tmp/data.txt"), PathBuf::from("/tmp/data.txt"));
    }

    #[test]
    fn test_read_at() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "0123456789").unwrap();

        let driver = LocalFileDriver;
        assert_eq!(driver.file_size(file.path()).unwrap(), 10);

        let mut reader = driver.open_for_read(file.path()).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(reader.read_at(3, &mut buffer).unwrap(), 4);
        assert_eq!(&buffer, b"3456");

        // Reading past EOF returns the short count.
        assert_eq!(reader.read_at(8, &mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"89");
    }

    #[test]
    fn test_write_truncate_and_append() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let driver = LocalFileDriver;

        let mut writer = driver.open_for_write(file.path(), false).unwrap();
        writer.write_all(b"first").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut writer = driver.open_for_write(file.path(), true).unwrap();
        writer.write_all(b" second").unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "first second");
    }
}
