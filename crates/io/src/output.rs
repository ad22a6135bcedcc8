//! Cache-backed tabular output
//!
//! Writes accumulate in a cache flushed in preferred-buffer-size units.
//! In open-on-demand mode the physical handle is closed between flushes,
//! so thousands of writers can coexist under the OS file-handle limit;
//! every physical re-open appends, and a successfully closed file
//! contains exactly what was written.

use crate::error::IoError;
use crate::field::write_field;
use crate::input::DEFAULT_PREFERRED_BUFFER_SIZE;
use crate::system::{FileWriter, SystemFileDriver, resolve_local_path};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub preferred_buffer_size: usize,
    /// Append to an existing file instead of truncating.
    pub append: bool,
    /// Close the physical handle between flushes.
    pub open_on_demand: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            preferred_buffer_size: DEFAULT_PREFERRED_BUFFER_SIZE,
            append: false,
            open_on_demand: false,
        }
    }
}

pub struct OutputBufferedFile<'d> {
    driver: &'d dyn SystemFileDriver,
    path: PathBuf,
    separator: u8,
    cache: Vec<u8>,
    preferred_buffer_size: usize,
    open_on_demand: bool,
    writer: Option<Box<dyn FileWriter>>,
    /// False until the first physical open; decides truncate vs append.
    physically_opened: bool,
}

impl<'d> OutputBufferedFile<'d> {
    pub fn open(
        driver: &'d dyn SystemFileDriver,
        path_or_uri: &str,
        separator: u8,
        options: OutputOptions,
    ) -> Result<OutputBufferedFile<'d>, IoError> {
        let path = resolve_local_path(path_or_uri);
        let mut file = OutputBufferedFile {
            driver,
            path,
            separator,
            cache: Vec::with_capacity(options.preferred_buffer_size),
            preferred_buffer_size: options.preferred_buffer_size.max(16),
            open_on_demand: options.open_on_demand,
            writer: None,
            physically_opened: options.append,
        };
        // Truncate (or touch) the file right away so open errors surface
        // at open time, not at the first flush.
        file.ensure_writer()?;
        if file.open_on_demand {
            file.writer = None;
        }
        Ok(file)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Raw bytes, flushing full cache units.
    pub fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.cache.extend_from_slice(data);
        if self.cache.len() >= self.preferred_buffer_size {
            self.flush_cache()?;
        }
        Ok(())
    }

    /// One field under the quoting discipline.
    pub fn write_field(&mut self, field: &str) -> Result<(), IoError> {
        let mut quoted = String::new();
        write_field(field, self.separator, &mut quoted);
        self.write(quoted.as_bytes())
    }

    pub fn write_separator(&mut self) -> Result<(), IoError> {
        self.write(&[self.separator])
    }

    pub fn write_end_of_line(&mut self) -> Result<(), IoError> {
        self.write(b"\n")
    }

    /// Push everything to the OS; in open-on-demand mode the handle is
    /// released afterwards.
    pub fn flush(&mut self) -> Result<(), IoError> {
        self.flush_cache()
    }

    /// Flush and release the handle. After a successful close the file
    /// contains exactly what was written.
    pub fn close(&mut self) -> Result<(), IoError> {
        self.flush_cache()?;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn ensure_writer(&mut self) -> Result<(), IoError> {
        if self.writer.is_none() {
            self.writer = Some(self.driver.open_for_write(&self.path, self.physically_opened)?);
            self.physically_opened = true;
        }
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<(), IoError> {
        if self.cache.is_empty() {
            return Ok(());
        }
        self.ensure_writer()?;
        let writer = self.writer.as_mut().expect("writer just ensured");
        writer.write_all(&self.cache)?;
        writer.flush()?;
        self.cache.clear();
        if self.open_on_demand {
            self.writer = None;
        }
        Ok(())
    }
}

impl Drop for OutputBufferedFile<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "output file dropped without a clean close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::LocalFileDriver;
    use tempfile::NamedTempFile;

    fn contents(file: &NamedTempFile) -> String {
        std::fs::read_to_string(file.path()).unwrap()
    }

    #[test]
    fn test_basic_row_writing() {
        let file = NamedTempFile::new().unwrap();
        let driver = LocalFileDriver;
        let mut output = OutputBufferedFile::open(
            &driver,
            file.path().to_str().unwrap(),
            b',',
            OutputOptions::default(),
        )
        .unwrap();

        output.write_field("a").unwrap();
        output.write_separator().unwrap();
        output.write_field("b,c").unwrap();
        output.write_end_of_line().unwrap();
        output.close().unwrap();

        assert_eq!(contents(&file), "a,\"b,c\"\n");
    }

    #[test]
    fn test_small_cache_flushes() {
        let file = NamedTempFile::new().unwrap();
        let driver = LocalFileDriver;
        let mut output = OutputBufferedFile::open(
            &driver,
            file.path().to_str().unwrap(),
            b',',
            OutputOptions { preferred_buffer_size: 16, ..OutputOptions::default() },
        )
        .unwrap();

        for index in 0..100 {
            output.write_field(&index.to_string()).unwrap();
            output.write_end_of_line().unwrap();
        }
        output.close().unwrap();

        let text = contents(&file);
        assert_eq!(text.lines().count(), 100);
        assert!(text.ends_with("99\n"));
    }

    #[test]
    fn test_append_mode() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "existing\n").unwrap();
        let driver = LocalFileDriver;
        let mut output = OutputBufferedFile::open(
            &driver,
            file.path().to_str().unwrap(),
            b',',
            OutputOptions { append: true, ..OutputOptions::default() },
        )
        .unwrap();
        output.write(b"added\n").unwrap();
        output.close().unwrap();

        assert_eq!(contents(&file), "existing\nadded\n");
    }

    #[test]
    fn test_open_on_demand_preserves_content() {
        let file = NamedTempFile::new().unwrap();
        let driver = LocalFileDriver;
        let mut output = OutputBufferedFile::open(
            &driver,
            file.path().to_str().unwrap(),
            b',',
            OutputOptions {
                preferred_buffer_size: 16,
                open_on_demand: true,
                ..OutputOptions::default()
            },
        )
        .unwrap();

        // Each flush reopens in append mode; content never reorders.
        for index in 0..50 {
            output.write(format!("row {}\n", index).as_bytes()).unwrap();
        }
        output.close().unwrap();

        let text = contents(&file);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "row 0");
        assert_eq!(lines[49], "row 49");
    }

    #[test]
    fn test_open_error_surfaces_at_open() {
        let driver = LocalFileDriver;
        let result = OutputBufferedFile::open(
            &driver,
            "/nonexistent-dir/file.txt",
            b',',
            OutputOptions::default(),
        );
        assert!(matches!(result, Err(IoError::Open { .. })));
    }
}
