//! Line-accurate buffered input
//!
//! An [`InputBufferedFile`] keeps a cache read in preferred-buffer-size
//! aligned chunks and exposes a *buffer*: the byte window the caller is
//! currently working on. The line APIs position that window on whole
//! lines, which is what makes byte-range chunked scans possible: a
//! chunk boundary can fall anywhere and
//! [`search_next_line_until`](InputBufferedFile::search_next_line_until)
//! plus [`fill_outer_lines_until`](InputBufferedFile::fill_outer_lines_until)
//! still produce exactly the lines of a single full scan.
//!
//! The first page decides the encoding: a UTF-8 BOM is skipped
//! transparently, UTF-16/UTF-32 BOMs and NUL bytes are rejected, and a
//! page full of carriage returns without a single line feed is diagnosed
//! as legacy Mac line endings.

use crate::error::{EncodingError, IoError};
use crate::system::{FileReader, SystemFileDriver, resolve_local_path};
use std::path::PathBuf;

/// Default visible buffer size (the cache reads in multiples of it).
pub const DEFAULT_PREFERRED_BUFFER_SIZE: usize = 64 * 1024;

/// Default bound on a single line, 8 MiB.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone)]
pub struct InputOptions {
    pub preferred_buffer_size: usize,
    pub max_line_length: usize,
}

impl Default for InputOptions {
    fn default() -> Self {
        InputOptions {
            preferred_buffer_size: DEFAULT_PREFERRED_BUFFER_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Result of [`InputBufferedFile::fill_one_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFill {
    pub found: bool,
    pub line_too_long: bool,
    /// Where the next line starts (past the skipped line when too long).
    pub next_position: u64,
}

/// Result of [`InputBufferedFile::fill_outer_lines_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterFill {
    pub filled: bool,
    pub line_too_long: bool,
    pub next_position: u64,
}

pub struct InputBufferedFile {
    path: PathBuf,
    reader: Box<dyn FileReader>,
    file_size: u64,
    preferred_buffer_size: usize,
    max_line_length: usize,
    cache: Vec<u8>,
    cache_start: u64,
    buffer_start: u64,
    buffer_len: usize,
    bom_skip: u64,
}

impl InputBufferedFile {
    /// Open a file by path or `file://` URI; sizes are learned here and
    /// the first page is checked for unsupported encodings.
    pub fn open(
        driver: &dyn SystemFileDriver,
        path_or_uri: &str,
        options: InputOptions,
    ) -> Result<InputBufferedFile, IoError> {
        let path = resolve_local_path(path_or_uri);
        let file_size = driver.file_size(&path)?;
        let mut reader = driver.open_for_read(&path)?;

        let preferred = options.preferred_buffer_size.max(16);
        let first_page_len = (file_size as usize).min(preferred);
        let mut first_page = vec![0u8; first_page_len];
        let read = reader.read_at(0, &mut first_page)?;
        first_page.truncate(read);

        let bom_skip = check_first_page(&first_page, &path)?;

        let mut file = InputBufferedFile {
            path,
            reader,
            file_size,
            preferred_buffer_size: preferred,
            max_line_length: options.max_line_length,
            cache: first_page,
            cache_start: 0,
            buffer_start: 0,
            buffer_len: 0,
            bom_skip: bom_skip as u64,
        };
        file.buffer_start = file.bom_skip;
        Ok(file)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// First data position: 0, or 3 when a UTF-8 BOM was skipped.
    pub fn start_position(&self) -> u64 {
        self.bom_skip
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    pub fn preferred_buffer_size(&self) -> usize {
        self.preferred_buffer_size
    }

    /// The currently exposed buffer.
    pub fn buffer(&self) -> &[u8] {
        self.span(self.buffer_start, self.buffer_start + self.buffer_len as u64)
    }

    pub fn buffer_start_in_file(&self) -> u64 {
        self.buffer_start
    }

    pub fn buffer_end_in_file(&self) -> u64 {
        self.buffer_start + self.buffer_len as u64
    }

    /// Scan `[begin, max_end)` for the start of the next line. Returns
    /// `None` when no line starts there; the trailing line of a file
    /// without a final line feed still counts when `max_end` reaches the
    /// file size.
    pub fn search_next_line_until(
        &mut self,
        begin: u64,
        max_end: u64,
    ) -> Result<Option<u64>, IoError> {
        let limit = max_end.min(self.file_size);
        let mut position = begin;
        while position < limit {
            let chunk_end = (position + self.preferred_buffer_size as u64).min(limit);
            self.ensure_span(position, chunk_end)?;
            let bytes = self.span(position, chunk_end);
            if let Some(found) = bytes.iter().position(|byte| *byte == b'\n') {
                return Ok(Some(position + found as u64 + 1));
            }
            position = chunk_end;
        }
        if max_end >= self.file_size && begin < self.file_size {
            return Ok(Some(self.file_size));
        }
        Ok(None)
    }

    /// Fill the buffer with the single line starting at `begin`. A line
    /// longer than the configured maximum leaves the buffer empty and
    /// reports where the next line starts.
    pub fn fill_one_line(&mut self, begin: u64) -> Result<LineFill, IoError> {
        self.buffer_start = begin;
        self.buffer_len = 0;
        if begin >= self.file_size {
            return Ok(LineFill { found: false, line_too_long: false, next_position: begin });
        }
        let next = self.search_next_line_until(begin, self.file_size)?.unwrap_or(self.file_size);
        if next - begin > self.max_line_length as u64 {
            return Ok(LineFill { found: false, line_too_long: true, next_position: next });
        }
        self.ensure_span(begin, next)?;
        self.buffer_len = (next - begin) as usize;
        Ok(LineFill { found: true, line_too_long: false, next_position: next })
    }

    /// Fill the buffer with whole lines from `begin`, never crossing
    /// `max_end` and never exceeding the preferred buffer size; the last
    /// buffer byte is a line feed unless the file ends first. Returns
    /// false when not even one whole line fits.
    pub fn fill_inner_lines_until(&mut self, begin: u64, max_end: u64) -> Result<bool, IoError> {
        self.buffer_start = begin;
        self.buffer_len = 0;
        let limit =
            (begin + self.preferred_buffer_size as u64).min(max_end).min(self.file_size);
        if begin >= limit {
            return Ok(false);
        }
        self.ensure_span(begin, limit)?;
        let bytes = self.span(begin, limit);
        if let Some(last) = bytes.iter().rposition(|byte| *byte == b'\n') {
            self.buffer_len = last + 1;
            return Ok(true);
        }
        if limit == self.file_size {
            // Trailing line without a final line feed.
            self.buffer_len = (limit - begin) as usize;
            return Ok(true);
        }
        Ok(false)
    }

    /// Chunk-friendly fill: whole lines as
    /// [`fill_inner_lines_until`](Self::fill_inner_lines_until), and when
    /// no whole line fits the buffer, either the one
    /// larger-than-buffer line crossing the boundary, or (past the
    /// configured maximum) an empty buffer with the line skipped.
    pub fn fill_outer_lines_until(
        &mut self,
        begin: u64,
        max_end: u64,
    ) -> Result<OuterFill, IoError> {
        if begin >= max_end.min(self.file_size) {
            self.buffer_start = begin;
            self.buffer_len = 0;
            return Ok(OuterFill { filled: false, line_too_long: false, next_position: begin });
        }
        if self.fill_inner_lines_until(begin, max_end)? {
            return Ok(OuterFill {
                filled: true,
                line_too_long: false,
                next_position: self.buffer_end_in_file(),
            });
        }

        // The line at `begin` is longer than the buffer (or crosses
        // max_end): read it whole, or skip it when oversized.
        let next = self.search_next_line_until(begin, self.file_size)?.unwrap_or(self.file_size);
        if next - begin > self.max_line_length as u64 {
            self.buffer_start = begin;
            self.buffer_len = 0;
            return Ok(OuterFill { filled: false, line_too_long: true, next_position: next });
        }
        self.ensure_span(begin, next)?;
        self.buffer_start = begin;
        self.buffer_len = (next - begin) as usize;
        Ok(OuterFill { filled: true, line_too_long: false, next_position: next })
    }

    // Make `[start, end)` resident in the cache.
    fn ensure_span(&mut self, start: u64, end: u64) -> Result<(), IoError> {
        let end = end.min(self.file_size);
        if start >= end {
            return Ok(());
        }
        let cache_end = self.cache_start + self.cache.len() as u64;
        if start >= self.cache_start && end <= cache_end {
            return Ok(());
        }

        if start >= self.cache_start && start < cache_end {
            // The new span begins inside the cache: shift the unused
            // head forward and keep reading from the tail.
            let unused = (start - self.cache_start) as usize;
            self.cache.drain(..unused);
            self.cache_start = start;
        } else {
            // Restart the cache on an aligned position at or before the
            // requested start.
            self.cache.clear();
            self.cache_start = start - (start % self.preferred_buffer_size as u64);
        }

        while self.cache_start + (self.cache.len() as u64) < end {
            let read_position = self.cache_start + self.cache.len() as u64;
            // Chunks re-align on preferred-buffer-size multiples.
            let alignment =
                self.preferred_buffer_size as u64 - (read_position % self.preferred_buffer_size as u64);
            let wanted = alignment.min(self.file_size - read_position) as usize;
            let mut chunk = vec![0u8; wanted];
            let read = self.reader.read_at(read_position, &mut chunk)?;
            chunk.truncate(read);
            if chunk.is_empty() {
                break;
            }
            self.cache.extend_from_slice(&chunk);
        }
        Ok(())
    }

    fn span(&self, start: u64, end: u64) -> &[u8] {
        let end = end.min(self.cache_start + self.cache.len() as u64);
        if start >= end {
            return &[];
        }
        let from = (start - self.cache_start) as usize;
        let to = (end - self.cache_start) as usize;
        &self.cache[from..to]
    }
}

/// First-page encoding checks; returns the number of BOM bytes to skip.
fn check_first_page(page: &[u8], path: &std::path::Path) -> Result<usize, IoError> {
    let encoding_error =
        |source: EncodingError| IoError::Encoding { path: path.to_path_buf(), source };

    // Four-byte BOMs first: UTF-32LE starts like UTF-16LE.
    if page.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) || page.starts_with(&[0xFF, 0xFE, 0x00, 0x00])
    {
        return Err(encoding_error(EncodingError::UnsupportedBom));
    }
    if page.starts_with(&[0xFE, 0xFF]) || page.starts_with(&[0xFF, 0xFE]) {
        return Err(encoding_error(EncodingError::UnsupportedBom));
    }
    let bom_skip = if page.starts_with(&UTF8_BOM) { UTF8_BOM.len() } else { 0 };

    let data = &page[bom_skip..];
    if data.contains(&0) {
        return Err(encoding_error(EncodingError::NulByte));
    }
    // One long "line" whose carriage returns never meet a line feed is
    // the signature of a legacy Mac text file.
    if !data.contains(&b'\n') && data.iter().filter(|byte| **byte == b'\r').count() >= 2 {
        return Err(encoding_error(EncodingError::LegacyMacFormat));
    }
    Ok(bom_skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::LocalFileDriver;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn open(file: &NamedTempFile, preferred: usize) -> InputBufferedFile {
        InputBufferedFile::open(
            &LocalFileDriver,
            file.path().to_str().unwrap(),
            InputOptions {
                preferred_buffer_size: preferred,
                max_line_length: DEFAULT_MAX_LINE_LENGTH,
            },
        )
        .unwrap()
    }

    /// Collect every line of the file through repeated one-line fills.
    fn read_all_lines(input: &mut InputBufferedFile) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut position = input.start_position();
        loop {
            let fill = input.fill_one_line(position).unwrap();
            if !fill.found {
                break;
            }
            lines.push(input.buffer().to_vec());
            position = fill.next_position;
        }
        lines
    }

    #[test]
    fn test_search_next_line() {
        let file = file_with(b"aa\nbbb\ncc");
        let mut input = open(&file, 4);

        assert_eq!(input.search_next_line_until(0, 9).unwrap(), Some(3));
        assert_eq!(input.search_next_line_until(3, 9).unwrap(), Some(7));
        // Trailing line without \n counts when max_end is the file size.
        assert_eq!(input.search_next_line_until(7, 9).unwrap(), Some(9));
        // But not when the scan stops earlier.
        assert_eq!(input.search_next_line_until(7, 8).unwrap(), None);
        assert_eq!(input.search_next_line_until(9, 9).unwrap(), None);
    }

    #[test]
    fn test_fill_one_line() {
        let file = file_with(b"first\nsecond\n");
        let mut input = open(&file, 4);

        let fill = input.fill_one_line(0).unwrap();
        assert!(fill.found);
        assert_eq!(input.buffer(), b"first\n");

        let fill = input.fill_one_line(fill.next_position).unwrap();
        assert_eq!(input.buffer(), b"second\n");
        assert_eq!(fill.next_position, 13);

        let fill = input.fill_one_line(fill.next_position).unwrap();
        assert!(!fill.found);
    }

    #[test]
    fn test_line_too_long_is_skipped() {
        let long = vec![b'x'; 100];
        let mut content = long.clone();
        content.push(b'\n');
        content.extend_from_slice(b"ok\n");
        let file = file_with(&content);

        let mut input = InputBufferedFile::open(
            &LocalFileDriver,
            file.path().to_str().unwrap(),
            InputOptions { preferred_buffer_size: 16, max_line_length: 50 },
        )
        .unwrap();

        let fill = input.fill_one_line(0).unwrap();
        assert!(!fill.found);
        assert!(fill.line_too_long);
        assert_eq!(fill.next_position, 101);
        assert!(input.buffer().is_empty());

        let fill = input.fill_one_line(fill.next_position).unwrap();
        assert!(fill.found);
        assert_eq!(input.buffer(), b"ok\n");
    }

    #[test]
    fn test_fill_inner_lines() {
        let file = file_with(b"aa\nbb\ncc\n");
        let mut input = open(&file, 7);

        // A 7-byte buffer holds "aa\nbb\n" whole but not "cc\n" too.
        assert!(input.fill_inner_lines_until(0, 9).unwrap());
        assert_eq!(input.buffer(), b"aa\nbb\n");
        let next = input.buffer_end_in_file();
        assert!(input.fill_inner_lines_until(next, 9).unwrap());
        assert_eq!(input.buffer(), b"cc\n");
    }

    #[test]
    fn test_fill_outer_reads_line_bigger_than_buffer() {
        let file = file_with(b"0123456789012345\nshort\n");
        let mut input = open(&file, 8);

        let fill = input.fill_outer_lines_until(0, 23).unwrap();
        assert!(fill.filled);
        assert!(!fill.line_too_long);
        assert_eq!(input.buffer(), b"0123456789012345\n");
        assert_eq!(fill.next_position, 17);
    }

    #[test]
    fn test_chunked_scan_equals_full_scan() {
        // Property: outer fills over arbitrary chunk boundaries
        // reproduce exactly the single-scan line stream.
        let content = b"alpha\nbeta\ngamma,delta\n\nlast line without lf".to_vec();
        let file = file_with(&content);

        let mut reference = open(&file, 4096);
        let expected = read_all_lines(&mut reference);

        for chunk_size in [3u64, 5, 7, 11, 16, 64] {
            let mut input = open(&file, 8);
            let mut lines: Vec<Vec<u8>> = Vec::new();
            let file_size = input.file_size();
            let mut chunk_begin = input.start_position();

            while chunk_begin < file_size {
                let chunk_end = (chunk_begin + chunk_size).min(file_size);
                // First line of the chunk: continue where the previous
                // chunk's lines ended, skipping a straddling line.
                let mut position = if chunk_begin == input.start_position() {
                    chunk_begin
                } else {
                    match input.search_next_line_until(chunk_begin - 1, file_size).unwrap() {
                        Some(position) => position,
                        None => break,
                    }
                };
                while position < chunk_end {
                    let fill = input.fill_outer_lines_until(position, chunk_end).unwrap();
                    if !fill.filled {
                        position = fill.next_position;
                        break;
                    }
                    // Split the buffer back into individual lines.
                    let mut line_start = 0;
                    let buffer = input.buffer().to_vec();
                    for (index, byte) in buffer.iter().enumerate() {
                        if *byte == b'\n' {
                            lines.push(buffer[line_start..=index].to_vec());
                            line_start = index + 1;
                        }
                    }
                    if line_start < buffer.len() {
                        lines.push(buffer[line_start..].to_vec());
                    }
                    position = fill.next_position;
                }
                chunk_begin = chunk_end;
            }
            assert_eq!(lines, expected, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_utf8_bom_is_transparent() {
        let plain = file_with(b"a,b\n1,2\n");
        let mut with_bom_content = UTF8_BOM.to_vec();
        with_bom_content.extend_from_slice(b"a,b\n1,2\n");
        let with_bom = file_with(&with_bom_content);

        let mut plain_input = open(&plain, 16);
        let mut bom_input = open(&with_bom, 16);
        assert_eq!(bom_input.start_position(), 3);
        assert_eq!(read_all_lines(&mut plain_input), read_all_lines(&mut bom_input));
    }

    #[test]
    fn test_utf16_bom_rejected() {
        for bom in [[0xFFu8, 0xFE].as_slice(), &[0xFE, 0xFF], &[0xFF, 0xFE, 0x00, 0x00]] {
            let mut content = bom.to_vec();
            content.extend_from_slice(b"data");
            let file = file_with(&content);
            let result = InputBufferedFile::open(
                &LocalFileDriver,
                file.path().to_str().unwrap(),
                InputOptions::default(),
            );
            assert!(matches!(
                result,
                Err(IoError::Encoding { source: EncodingError::UnsupportedBom, .. })
            ));
        }
    }

    #[test]
    fn test_nul_byte_rejected() {
        let file = file_with(b"ab\0cd\n");
        let result = InputBufferedFile::open(
            &LocalFileDriver,
            file.path().to_str().unwrap(),
            InputOptions::default(),
        );
        assert!(matches!(
            result,
            Err(IoError::Encoding { source: EncodingError::NulByte, .. })
        ));
    }

    #[test]
    fn test_legacy_mac_rejected() {
        let file = file_with(b"line one\rline two\rline three\r");
        let result = InputBufferedFile::open(
            &LocalFileDriver,
            file.path().to_str().unwrap(),
            InputOptions::default(),
        );
        assert!(matches!(
            result,
            Err(IoError::Encoding { source: EncodingError::LegacyMacFormat, .. })
        ));
    }

    #[test]
    fn test_crlf_content_is_accepted() {
        let file = file_with(b"a\r\nb\r\n");
        let mut input = open(&file, 16);
        let lines = read_all_lines(&mut input);
        assert_eq!(lines, vec![b"a\r\n".to_vec(), b"b\r\n".to_vec()]);
    }
}
