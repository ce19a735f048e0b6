//! Buffered scalar input
//!
//! Presents any `Read` source as a stream of UTF-8 scalars with precise
//! (byte, line, column) tracking. A single contiguous window is compacted
//! on refill, so a multi-byte scalar is always decoded from contiguous
//! bytes even when it straddles a refill boundary and the window is as
//! small as four bytes.

use crate::core::utf8::{self, DecodeResult, EncodeResult};
use memchr::memchr;
use std::io::Read;

/// Hard cap on the window size accepted by the factory.
const MAX_BUFFER_SIZE: usize = 1 << 30;

const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const SPACE: u8 = 0x20;
const TAB: u8 = 0x09;

/// Construction failure for [`BufferedInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    ZeroBufferSize,
    /// The window must hold at least one whole scalar (four bytes).
    BufferTooSmall,
    OutOfMemory,
    IoError,
}

/// Source encoding as sniffed at construction. Only UTF-8 variants are
/// supported; the distinction records whether a BOM was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 with a consumed BOM.
    Utf8,
    /// UTF-8 without a BOM (the common case).
    Utf8NoBom,
}

/// Buffered UTF-8 scalar stream over a byte source.
///
/// The BOM, if present, is consumed at construction and never shows up in
/// `total_bytes_read`, the line, or the column. Invalid UTF-8 reads as end
/// of input at this layer; I/O failures latch and also read as end of
/// input (see [`BufferedInput::io_error`]).
pub struct BufferedInput<R: Read> {
    source: R,
    buffer: Box<[u8]>,
    pos: usize,
    end: usize,
    line: u32,
    column: u32,
    total_bytes_read: u64,
    has_pending_cr: bool,
    source_eof: bool,
    io_failed: bool,
    /// Single-slot peek cache: decoded `{cp, width}` at the cursor.
    peek: Option<(u32, u8)>,
    encoding: Encoding,
}

impl<R: Read> BufferedInput<R> {
    /// Validate the window size, perform the initial fill, and consume a
    /// UTF-8 BOM if one is present.
    pub fn new(source: R, buffer_size: usize) -> Result<Self, StreamError> {
        if buffer_size == 0 {
            return Err(StreamError::ZeroBufferSize);
        }
        if buffer_size < 4 {
            return Err(StreamError::BufferTooSmall);
        }
        if buffer_size > MAX_BUFFER_SIZE {
            return Err(StreamError::OutOfMemory);
        }

        let mut this = BufferedInput {
            source,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            pos: 0,
            end: 0,
            line: 1,
            column: 1,
            total_bytes_read: 0,
            has_pending_cr: false,
            source_eof: false,
            io_failed: false,
            peek: None,
            encoding: Encoding::Utf8NoBom,
        };

        this.ensure_at_least(3);
        if this.available() >= 3 && this.buffer[this.pos..this.pos + 3] == [0xEF, 0xBB, 0xBF] {
            // BOM is not part of the document: no byte/line/column effect
            this.pos += 3;
            this.encoding = Encoding::Utf8;
        }
        Ok(this)
    }

    #[inline]
    fn available(&self) -> usize {
        self.end - self.pos
    }

    /// Compact unread bytes to the front and refill until at least `n`
    /// bytes are available or the source is dry. Compaction invalidates
    /// the peek cache.
    fn ensure_at_least(&mut self, n: usize) -> bool {
        if self.available() >= n {
            return true;
        }
        if self.pos > 0 {
            if self.pos < self.end {
                self.buffer.copy_within(self.pos..self.end, 0);
            }
            self.end -= self.pos;
            self.pos = 0;
            self.peek = None;
        }
        while self.available() < n && !self.source_eof {
            let room = self.buffer.len() - self.end;
            if room == 0 {
                break;
            }
            match self.source.read(&mut self.buffer[self.end..]) {
                Ok(0) => self.source_eof = true,
                Ok(got) => self.end += got,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.io_failed = true;
                    self.source_eof = true;
                }
            }
        }
        self.available() >= n
    }

    /// Decode the scalar at the cursor, refilling as needed. `None` means
    /// end of input or an invalid sequence.
    fn decode_next(&mut self) -> Option<(u32, u8)> {
        if !self.ensure_at_least(1) {
            return None;
        }
        match utf8::decode(&self.buffer[self.pos..self.end]) {
            DecodeResult::Ok { cp, width } => Some((cp, width)),
            DecodeResult::NeedMore { width } => {
                if !self.ensure_at_least(width as usize) {
                    return None; // premature EOF
                }
                match utf8::decode(&self.buffer[self.pos..self.end]) {
                    DecodeResult::Ok { cp, width } => Some((cp, width)),
                    _ => None,
                }
            }
            DecodeResult::Invalid => None,
        }
    }

    /// Next scalar without consuming it, or `None` at end of input.
    /// Idempotent: repeated peeks return the same value and move nothing.
    pub fn peek_cp(&mut self) -> Option<u32> {
        if let Some((cp, _)) = self.peek {
            return Some(cp);
        }
        let (cp, width) = self.decode_next()?;
        self.peek = Some((cp, width));
        Some(cp)
    }

    /// Next scalar, advancing position by its encoded width.
    pub fn get_cp(&mut self) -> Option<u32> {
        if let Some((cp, width)) = self.peek.take() {
            self.advance(width as usize);
            return Some(cp);
        }
        let (cp, width) = self.decode_next()?;
        self.advance(width as usize);
        Some(cp)
    }

    /// Consume `width` bytes while maintaining byte/line/column and the
    /// pending-CR state.
    fn advance(&mut self, width: usize) {
        for _ in 0..width {
            if self.pos >= self.end {
                break;
            }
            let b = self.buffer[self.pos];
            self.pos += 1;
            self.total_bytes_read += 1;

            if b == CR {
                self.line += 1;
                self.column = 1;
                self.has_pending_cr = true;
            } else if b == LF {
                if self.has_pending_cr {
                    // CRLF: the CR already advanced the line
                    self.has_pending_cr = false;
                } else {
                    self.line += 1;
                    self.column = 1;
                }
            } else {
                // continuation bytes do not advance the column
                if b & 0xC0 != 0x80 {
                    self.column += 1;
                }
                self.has_pending_cr = false;
            }
        }
    }

    fn append_next_cp(&mut self, out: &mut Vec<u8>) -> bool {
        match self.get_cp() {
            Some(cp) => {
                let mut scratch = [0u8; 4];
                if let EncodeResult::Ok { width } = utf8::encode(cp, &mut scratch) {
                    out.extend_from_slice(&scratch[..width as usize]);
                }
                true
            }
            None => false,
        }
    }

    /// Append the UTF-8 bytes of each accepted scalar to `out` until end of
    /// input, an invalid sequence, or `pred` rejecting a scalar (the
    /// rejected scalar is left unconsumed). Returns whether anything was
    /// appended.
    pub fn read_while<F>(&mut self, out: &mut Vec<u8>, mut pred: F) -> bool
    where
        F: FnMut(u32) -> bool,
    {
        out.clear();
        while let Some(cp) = self.peek_cp() {
            if !pred(cp) {
                break;
            }
            self.append_next_cp(out);
        }
        !out.is_empty()
    }

    /// `read_while(out, |cp| cp != delim)` with an ASCII delimiter and a
    /// memchr-bounded fast path. The delimiter is left unconsumed.
    pub fn read_until(&mut self, out: &mut Vec<u8>, delim: u8) -> bool {
        debug_assert!(delim < 0x80);
        out.clear();
        loop {
            if let Some((cp, _)) = self.peek {
                if cp == delim as u32 {
                    break;
                }
                self.append_next_cp(out);
                continue;
            }
            if !self.ensure_at_least(1) {
                break;
            }
            let window = &self.buffer[self.pos..self.end];
            let stop = memchr(delim, window).unwrap_or(window.len());
            // Bytes below 0x80 are one-scalar-per-byte and cannot be part
            // of a multi-byte sequence, so a pure-ASCII prefix can be bulk
            // copied; anything else goes through the decoder.
            let ascii = window[..stop].iter().position(|&b| b >= 0x80).unwrap_or(stop);
            if ascii > 0 {
                out.extend_from_slice(&self.buffer[self.pos..self.pos + ascii]);
                self.advance(ascii);
                continue;
            }
            if stop == 0 {
                break; // delimiter is next
            }
            match self.decode_next() {
                Some((cp, width)) => {
                    debug_assert_ne!(cp, delim as u32);
                    let mut scratch = [0u8; 4];
                    if let EncodeResult::Ok { width: w } = utf8::encode(cp, &mut scratch) {
                        out.extend_from_slice(&scratch[..w as usize]);
                    }
                    self.advance(width as usize);
                }
                None => break, // invalid sequence or EOF
            }
        }
        !out.is_empty()
    }

    /// Consume XML whitespace: space, tab, LF, CR.
    pub fn skip_whitespace(&mut self) {
        while let Some(cp) = self.peek_cp() {
            if cp != SPACE as u32 && cp != TAB as u32 && cp != LF as u32 && cp != CR as u32 {
                break;
            }
            self.get_cp();
        }
    }

    /// 1-based line of the cursor.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 1-based column of the cursor, counted in scalars.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Bytes consumed so far, excluding any BOM.
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// True once the window is drained and the source has reported end.
    pub fn eof(&self) -> bool {
        self.available() == 0 && self.source_eof
    }

    /// True if a read failed; the stream reads as end of input from then on.
    pub fn io_error(&self) -> bool {
        self.io_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `chunk` bytes per read, to exercise refills.
    struct Dribble<'a> {
        data: &'a [u8],
        pos: usize,
        chunk: usize,
    }

    impl<'a> Dribble<'a> {
        fn new(data: &'a [u8], chunk: usize) -> Self {
            Dribble { data, pos: 0, chunk }
        }
    }

    impl Read for Dribble<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Fails after handing out a prefix.
    struct FailAfter<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl Read for FailAfter<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "broken pipe"));
            }
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn input(data: &[u8]) -> BufferedInput<Cursor<Vec<u8>>> {
        BufferedInput::new(Cursor::new(data.to_vec()), 1024).unwrap()
    }

    #[test]
    fn test_factory_rejects_bad_sizes() {
        let err = BufferedInput::new(Cursor::new(vec![]), 0).err();
        assert_eq!(err, Some(StreamError::ZeroBufferSize));
        let err = BufferedInput::new(Cursor::new(vec![]), 3).err();
        assert_eq!(err, Some(StreamError::BufferTooSmall));
        let err = BufferedInput::new(Cursor::new(vec![]), MAX_BUFFER_SIZE + 1).err();
        assert_eq!(err, Some(StreamError::OutOfMemory));
    }

    #[test]
    fn test_minimum_buffer_size_accepted() {
        assert!(BufferedInput::new(Cursor::new(b"abc".to_vec()), 4).is_ok());
    }

    #[test]
    fn test_basic_sequence() {
        let mut bis = input(b"ab");
        assert_eq!(bis.get_cp(), Some(b'a' as u32));
        assert_eq!(bis.get_cp(), Some(b'b' as u32));
        assert_eq!(bis.get_cp(), None);
        assert_eq!(bis.peek_cp(), None);
        assert!(bis.eof());
    }

    #[test]
    fn test_peek_is_idempotent() {
        let mut bis = input("é!".as_bytes());
        let before = (bis.total_bytes_read(), bis.line(), bis.column());
        assert_eq!(bis.peek_cp(), Some(0xE9));
        assert_eq!(bis.peek_cp(), Some(0xE9));
        assert_eq!((bis.total_bytes_read(), bis.line(), bis.column()), before);
        assert_eq!(bis.get_cp(), Some(0xE9));
        assert_eq!(bis.total_bytes_read(), 2);
        assert_eq!(bis.column(), 2);
    }

    #[test]
    fn test_bom_is_skipped_and_uncounted() {
        let mut bis = input(b"\xEF\xBB\xBFhi");
        assert_eq!(bis.encoding(), Encoding::Utf8);
        assert_eq!(bis.total_bytes_read(), 0);
        assert_eq!(bis.line(), 1);
        assert_eq!(bis.column(), 1);
        assert_eq!(bis.get_cp(), Some(b'h' as u32));
        assert_eq!(bis.total_bytes_read(), 1);
    }

    #[test]
    fn test_no_bom_encoding() {
        let bis = input(b"hi");
        assert_eq!(bis.encoding(), Encoding::Utf8NoBom);
    }

    #[test]
    fn test_bom_straddles_dribbled_reads() {
        let data = b"\xEF\xBB\xBFx";
        let mut bis = BufferedInput::new(Dribble::new(data, 1), 8).unwrap();
        assert_eq!(bis.encoding(), Encoding::Utf8);
        assert_eq!(bis.get_cp(), Some(b'x' as u32));
    }

    #[test]
    fn test_lf_line_counting() {
        let mut bis = input(b"a\nb");
        bis.get_cp();
        assert_eq!((bis.line(), bis.column()), (1, 2));
        bis.get_cp(); // \n
        assert_eq!((bis.line(), bis.column()), (2, 1));
        bis.get_cp();
        assert_eq!((bis.line(), bis.column()), (2, 2));
    }

    #[test]
    fn test_crlf_counts_one_line() {
        let mut bis = input(b"a\r\nb\r\nc");
        let mut lines = Vec::new();
        while bis.get_cp().is_some() {
            lines.push(bis.line());
        }
        assert_eq!(bis.line(), 3);
        assert_eq!(bis.column(), 2);
        assert_eq!(lines, vec![1, 2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_lone_cr_counts_one_line() {
        let mut bis = input(b"a\rb");
        bis.get_cp();
        bis.get_cp(); // \r
        assert_eq!((bis.line(), bis.column()), (2, 1));
        bis.get_cp();
        assert_eq!((bis.line(), bis.column()), (2, 2));
    }

    #[test]
    fn test_column_counts_scalars_not_bytes() {
        let mut bis = input("世界x".as_bytes());
        bis.get_cp();
        assert_eq!(bis.column(), 2);
        bis.get_cp();
        assert_eq!(bis.column(), 3);
        bis.get_cp();
        assert_eq!(bis.column(), 4);
        assert_eq!(bis.total_bytes_read(), 7);
    }

    #[test]
    fn test_multibyte_straddles_refill_with_minimum_buffer() {
        // 4-byte window, source dribbles one byte at a time
        let data = "a🌍b".as_bytes();
        let mut bis = BufferedInput::new(Dribble::new(data, 1), 4).unwrap();
        assert_eq!(bis.get_cp(), Some(b'a' as u32));
        assert_eq!(bis.peek_cp(), Some(0x1F30D));
        assert_eq!(bis.get_cp(), Some(0x1F30D));
        assert_eq!(bis.get_cp(), Some(b'b' as u32));
        assert_eq!(bis.get_cp(), None);
    }

    #[test]
    fn test_invalid_utf8_reads_as_eof() {
        let mut bis = input(b"a\xFFb");
        assert_eq!(bis.get_cp(), Some(b'a' as u32));
        assert_eq!(bis.get_cp(), None);
        assert_eq!(bis.peek_cp(), None);
    }

    #[test]
    fn test_truncated_sequence_reads_as_eof() {
        let mut bis = input(b"a\xE4\xB8");
        assert_eq!(bis.get_cp(), Some(b'a' as u32));
        assert_eq!(bis.get_cp(), None);
    }

    #[test]
    fn test_read_while_collects_matching_scalars() {
        let mut bis = input(b"abc123");
        let mut out = Vec::new();
        assert!(bis.read_while(&mut out, |cp| (0x61..=0x7A).contains(&cp)));
        assert_eq!(out, b"abc");
        assert_eq!(bis.peek_cp(), Some(b'1' as u32));
    }

    #[test]
    fn test_read_while_preserves_multibyte_bytes() {
        let data = "héllo🌍<rest".as_bytes();
        let mut bis = BufferedInput::new(Dribble::new(data, 2), 4).unwrap();
        let mut out = Vec::new();
        assert!(bis.read_while(&mut out, |cp| cp != b'<' as u32));
        assert_eq!(out, "héllo🌍".as_bytes());
        assert_eq!(bis.get_cp(), Some(b'<' as u32));
    }

    #[test]
    fn test_read_until_leaves_delimiter() {
        let mut bis = input(b"name=value");
        let mut out = Vec::new();
        assert!(bis.read_until(&mut out, b'='));
        assert_eq!(out, b"name");
        assert_eq!(bis.get_cp(), Some(b'=' as u32));
    }

    #[test]
    fn test_read_until_with_multibyte_and_refills() {
        let data = "前書き>rest".as_bytes();
        let mut bis = BufferedInput::new(Dribble::new(data, 3), 4).unwrap();
        let mut out = Vec::new();
        assert!(bis.read_until(&mut out, b'>'));
        assert_eq!(out, "前書き".as_bytes());
        assert_eq!(bis.peek_cp(), Some(b'>' as u32));
    }

    #[test]
    fn test_read_until_missing_delimiter_consumes_all() {
        let mut bis = input(b"abc");
        let mut out = Vec::new();
        assert!(bis.read_until(&mut out, b'>'));
        assert_eq!(out, b"abc");
        assert_eq!(bis.peek_cp(), None);
    }

    #[test]
    fn test_read_until_empty_result() {
        let mut bis = input(b">abc");
        let mut out = Vec::new();
        assert!(!bis.read_until(&mut out, b'>'));
        assert!(out.is_empty());
        assert_eq!(bis.get_cp(), Some(b'>' as u32));
    }

    #[test]
    fn test_read_until_after_peek() {
        let mut bis = input(b"ab>c");
        assert_eq!(bis.peek_cp(), Some(b'a' as u32));
        let mut out = Vec::new();
        assert!(bis.read_until(&mut out, b'>'));
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_read_until_stops_at_invalid_sequence() {
        let mut bis = input(b"ab\xFFcd>");
        let mut out = Vec::new();
        assert!(bis.read_until(&mut out, b'>'));
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_skip_whitespace() {
        let mut bis = input(b" \t\r\n  x");
        bis.skip_whitespace();
        assert_eq!(bis.get_cp(), Some(b'x' as u32));
        assert_eq!(bis.line(), 2);
    }

    #[test]
    fn test_io_error_latches_and_reads_as_eof() {
        let mut bis = BufferedInput::new(FailAfter { data: b"ok", pos: 0 }, 4).unwrap();
        assert_eq!(bis.get_cp(), Some(b'o' as u32));
        assert_eq!(bis.get_cp(), Some(b'k' as u32));
        assert_eq!(bis.get_cp(), None);
        assert!(bis.io_error());
    }

    #[test]
    fn test_total_bytes_read_tracks_widths() {
        let mut bis = input("a€b".as_bytes());
        bis.get_cp();
        assert_eq!(bis.total_bytes_read(), 1);
        bis.get_cp();
        assert_eq!(bis.total_bytes_read(), 4);
        bis.get_cp();
        assert_eq!(bis.total_bytes_read(), 5);
    }
}
