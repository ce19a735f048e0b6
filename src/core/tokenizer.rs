//! XML tokenizer - state machine over a buffered scalar stream
//!
//! Pull-parser style: each `next_token` call runs the trampoline until
//! exactly one token is produced, then returns. Tag names and attribute
//! bytes for an open element live in that element's fixed-capacity tag
//! buffer, so their token slices stay valid until the element closes;
//! text runs live in a single growable arena that is recycled per token.

use crate::core::types::{
    is_name_char, is_name_start, ByteLen, ErrorArena, ErrorCode, ErrorRecord, Flags, Limits,
    Options, Severity, SourcePosition, State, TagBuffer, TagContext, TextArena, Token, TokenType,
};
#[cfg(feature = "stats")]
use crate::core::types::TokenizerStats;
use crate::core::utf8::{self, EncodeResult};
use crate::reader::buffered::BufferedInput;
use std::io::Read;

const LT: u32 = b'<' as u32;
const GT: u32 = b'>' as u32;
const SLASH: u32 = b'/' as u32;
const EQUALS: u32 = b'=' as u32;
const QUOTE: u32 = b'"' as u32;
const BANG: u32 = b'!' as u32;
const QUESTION: u32 = b'?' as u32;

/// Sentinel for failed tag-buffer appends.
const BAD_OFFSET: u32 = u32::MAX;

/// Popped tag buffers are cached for reuse up to this many bytes; past the
/// budget they are released instead.
const FREELIST_BUDGET_BYTES: usize = 64 * 1024 * 1024;

/// One open element: its stable byte storage, bookkeeping, and where it
/// started (for end-of-document diagnostics and EmptyTag positions).
struct TagFrame {
    buf: TagBuffer,
    ctx: TagContext,
    start_pos: SourcePosition,
}

/// Streaming XML tokenizer.
///
/// Emits exactly one token per `next_token` call, in strict source order:
/// one `DocumentStart`, then tags/attributes/text, then either one
/// `DocumentEnd` or one fatal `Error`. After the terminator, `next_token`
/// returns `false` until `reset()`.
pub struct Tokenizer<'a, R: Read> {
    input: &'a mut BufferedInput<R>,
    opts: Options,
    limits: Limits,
    flags: Flags,
    state: State,
    /// LIFO: last entry is the innermost open element.
    tag_stack: Vec<TagFrame>,
    text_arena: TextArena,
    errors: Vec<ErrorRecord>,
    error_arena: ErrorArena,
    /// Recycled tag-buffer blocks, every one exactly `freelist_block_size`.
    freelist: Vec<Box<[u8]>>,
    freelist_block_size: ByteLen,
    freelist_bytes: usize,
    /// Position captured before the first byte of the token being scanned.
    pending_start: Option<SourcePosition>,
    /// A frame emitted its closing token; pop it when the next token is
    /// requested so the emitted slice stays readable until then.
    pop_after_emit: bool,
    #[cfg(feature = "stats")]
    stats: TokenizerStats,
}

impl<'a, R: Read> Tokenizer<'a, R> {
    /// Build a tokenizer over `input`. Soft limits are clamped to the
    /// absolute caps; the freelist block size is tied to the clamped
    /// per-tag capacity.
    pub fn new(input: &'a mut BufferedInput<R>, opts: Options, limits: Limits) -> Self {
        let limits = limits.clamped();
        Tokenizer {
            input,
            opts,
            limits,
            flags: Flags::default(),
            state: State::Content,
            tag_stack: Vec::new(),
            text_arena: TextArena::default(),
            errors: Vec::new(),
            error_arena: ErrorArena::default(),
            freelist: Vec::new(),
            freelist_block_size: limits.max_per_tag_bytes,
            freelist_bytes: 0,
            pending_start: None,
            pop_after_emit: false,
            #[cfg(feature = "stats")]
            stats: TokenizerStats::default(),
        }
    }

    /// Produce the next token. Returns `false` after `DocumentEnd` or the
    /// first fatal error.
    pub fn next_token(&mut self, out: &mut Token) -> bool {
        if self.pop_after_emit {
            self.pop_tag_frame();
            self.pop_after_emit = false;
        }
        if self.flags.test(Flags::ENDED) {
            return false;
        }
        if !self.flags.test(Flags::STARTED) {
            return self.emit_document_start(out);
        }
        loop {
            let emitted = match self.state {
                State::Content => match self.scan_text(out) {
                    Some(emitted) => emitted,
                    None => return self.finish_document(out),
                },
                State::TagOpen => self.scan_tag_or_error(out),
                State::StartTagName => self.parse_start_tag(out),
                State::EndTagName => self.parse_end_tag(out),
                State::InTag
                | State::AttrName
                | State::AfterAttrName
                | State::BeforeAttrValue
                | State::AttrValueQuoted => self.parse_attributes_basic(out),
                // reserved comment/CDATA/PI states are never entered
                _ => self.emit_error(
                    out,
                    ErrorCode::InvalidCharAfterLt,
                    Severity::Fatal,
                    b"Unsupported markup construct",
                ),
            };
            if emitted {
                return true;
            }
        }
    }

    /// Diagnostics recorded so far. Slices stay valid until `reset()`.
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Drop recorded diagnostics. Does not clear the `Ended` flag.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Restore the pre-`DocumentStart` state, keeping the same stream,
    /// options, and limits. Open tag buffers are recycled via the freelist.
    pub fn reset(&mut self) {
        self.state = State::Content;
        self.flags = Flags::default();
        self.errors.clear();
        self.error_arena.clear();
        self.pop_after_emit = false;
        while !self.tag_stack.is_empty() {
            self.pop_tag_frame();
        }
        if self.freelist_block_size != self.limits.max_per_tag_bytes {
            self.freelist.clear();
            self.freelist_bytes = 0;
            self.freelist_block_size = self.limits.max_per_tag_bytes;
        }
        self.text_arena.buf.clear();
        self.pending_start = None;
    }

    /// Stream position as of the last read.
    pub fn current_position(&self) -> SourcePosition {
        SourcePosition {
            byte_offset: self.input.total_bytes_read(),
            line: self.input.line(),
            column: self.input.column(),
        }
    }

    /// Number of currently open elements.
    pub fn nesting_depth(&self) -> usize {
        self.tag_stack.len()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &TokenizerStats {
        &self.stats
    }

    // --- trampoline pieces ---

    fn emit_document_start(&mut self, out: &mut Token) -> bool {
        debug_assert!(
            !self.flags.test(Flags::STARTED),
            "document boundary already emitted"
        );
        let pos = self.current_position();
        *out = Token {
            data: std::ptr::null(),
            byte_offset: pos.byte_offset,
            length: 0,
            line: pos.line,
            column: pos.column,
            kind: TokenType::DocumentStart,
        };
        self.flags.set(Flags::STARTED);
        self.note_token();
        true
    }

    fn emit_document_end(&mut self, out: &mut Token) -> bool {
        let pos = self.current_position();
        *out = Token {
            data: std::ptr::null(),
            byte_offset: pos.byte_offset,
            length: 0,
            line: pos.line,
            column: pos.column,
            kind: TokenType::DocumentEnd,
        };
        self.flags.set(Flags::ENDED);
        self.note_token();
        true
    }

    /// End-of-input reached in `Content`.
    fn finish_document(&mut self, out: &mut Token) -> bool {
        if self.input.io_error() {
            return self.emit_error(
                out,
                ErrorCode::IoError,
                Severity::Fatal,
                b"I/O error while reading input",
            );
        }
        if !self.tag_stack.is_empty() {
            return self.emit_error(
                out,
                ErrorCode::UnexpectedEof,
                Severity::Fatal,
                b"Unclosed tag at end of document",
            );
        }
        self.emit_document_end(out)
    }

    /// Gather a text run until `<` or end of input. `None` means end of
    /// input with no token started.
    fn scan_text(&mut self, out: &mut Token) -> Option<bool> {
        match self.input.peek_cp() {
            Some(LT) => {
                self.state = State::TagOpen;
                Some(false)
            }
            None => None,
            Some(_) => {
                self.text_arena.buf.clear();
                self.mark_token_start();
                loop {
                    let cp = match self.input.peek_cp() {
                        Some(LT) | None => break,
                        Some(cp) => cp,
                    };
                    self.input.get_cp();
                    // Normalization applies in content only, never in markup
                    if self.opts.normalize_line_endings() && cp == b'\r' as u32 {
                        if self.input.peek_cp() == Some(b'\n' as u32) {
                            self.input.get_cp();
                        }
                        self.text_arena.buf.push(b'\n');
                    } else {
                        append_cp(cp, &mut self.text_arena.buf);
                    }
                    if self.text_arena.buf.len() >= self.limits.max_text_run_bytes as usize {
                        return Some(self.emit_error(
                            out,
                            ErrorCode::LimitExceeded,
                            Severity::Fatal,
                            b"Text run exceeds limit",
                        ));
                    }
                }
                Some(self.make_text_token(out))
            }
        }
    }

    /// Decide start tag vs end tag after `<`. Comments, PIs, CDATA, and
    /// DOCTYPE are rejected here until their scanners land.
    fn scan_tag_or_error(&mut self, out: &mut Token) -> bool {
        self.mark_token_start();
        self.input.get_cp(); // consume '<'
        match self.input.peek_cp() {
            Some(SLASH) => {
                self.input.get_cp();
                self.state = State::EndTagName;
                false
            }
            Some(cp) if is_name_start(cp) => {
                self.state = State::StartTagName;
                false
            }
            Some(BANG) | Some(QUESTION) => self.emit_error(
                out,
                ErrorCode::InvalidCharAfterLt,
                Severity::Fatal,
                b"Invalid character after '<'",
            ),
            None => self.emit_error(
                out,
                ErrorCode::UnexpectedEof,
                Severity::Fatal,
                b"Unexpected EOF after '<'",
            ),
            Some(_) => self.emit_error(
                out,
                ErrorCode::InvalidCharAfterLt,
                Severity::Fatal,
                b"Invalid character after '<'",
            ),
        }
    }

    /// `<Name` has been dispatched; push a frame, read the name, emit
    /// `StartTag`.
    fn parse_start_tag(&mut self, out: &mut Token) -> bool {
        if !self.push_tag_frame() {
            return self.emit_error(
                out,
                ErrorCode::LimitExceeded,
                Severity::Fatal,
                b"Nesting depth exceeds limit",
            );
        }
        let (off, len) = match self.read_name(out) {
            Ok(v) => v,
            Err(()) => return true,
        };
        if let Some(frame) = self.tag_stack.last_mut() {
            frame.ctx.name_mark = off;
            frame.ctx.name_len = len;
        }
        self.state = State::InTag;
        let pos = self.take_pending_or_current();
        self.make_tag_token(out, TokenType::StartTag, off, len, pos)
    }

    /// `</` has been consumed; read the name into the open element's
    /// buffer, require `>`, and match it against the open element.
    fn parse_end_tag(&mut self, out: &mut Token) -> bool {
        if self.tag_stack.is_empty() {
            return self.emit_error(
                out,
                ErrorCode::UnterminatedTag,
                Severity::Fatal,
                b"End tag without matching start tag",
            );
        }
        let (off, len) = match self.read_name(out) {
            Ok(v) => v,
            Err(()) => return true,
        };
        self.input.skip_whitespace();
        match self.input.peek_cp() {
            Some(GT) => {
                self.input.get_cp();
            }
            None => {
                return self.emit_error(
                    out,
                    ErrorCode::UnexpectedEof,
                    Severity::Fatal,
                    b"Unexpected EOF in end tag",
                )
            }
            Some(_) => {
                return self.emit_error(
                    out,
                    ErrorCode::UnterminatedTag,
                    Severity::Fatal,
                    b"Expected '>' in end tag",
                )
            }
        }
        if !self.end_tag_matches(off, len) {
            return self.emit_error(
                out,
                ErrorCode::UnterminatedTag,
                Severity::Fatal,
                b"End tag mismatch",
            );
        }
        self.state = State::Content;
        self.pop_after_emit = true;
        let pos = self.take_pending_or_current();
        self.make_tag_token(out, TokenType::EndTag, off, len, pos)
    }

    /// In-tag dispatch: whitespace, `>`, `/>`, or one attribute per pass
    /// through the AttrName/AfterAttrName/BeforeAttrValue/AttrValueQuoted
    /// states. Each pass emits at most one token.
    fn parse_attributes_basic(&mut self, out: &mut Token) -> bool {
        match self.state {
            State::InTag => {
                self.input.skip_whitespace();
                match self.input.peek_cp() {
                    Some(GT) => {
                        self.input.get_cp();
                        self.state = State::Content;
                        false
                    }
                    Some(SLASH) => {
                        self.input.get_cp();
                        if self.input.peek_cp() == Some(GT) {
                            self.input.get_cp();
                            if let Some(frame) = self.tag_stack.last_mut() {
                                frame.ctx.saw_slash_before_gt = true;
                            }
                            self.state = State::Content;
                            self.pop_after_emit = true;
                            let (off, len, pos) = match self.tag_stack.last() {
                                Some(frame) => {
                                    (frame.ctx.name_mark, frame.ctx.name_len, frame.start_pos)
                                }
                                None => (0, 0, self.current_position()),
                            };
                            self.make_tag_token(out, TokenType::EmptyTag, off, len, pos)
                        } else {
                            self.emit_error(
                                out,
                                ErrorCode::UnterminatedTag,
                                Severity::Fatal,
                                b"Expected '>' after '/'",
                            )
                        }
                    }
                    Some(cp) if is_name_start(cp) => {
                        self.state = State::AttrName;
                        false
                    }
                    Some(_) => self.emit_error(
                        out,
                        ErrorCode::UnterminatedTag,
                        Severity::Fatal,
                        b"Invalid character in tag",
                    ),
                    None => self.emit_error(
                        out,
                        ErrorCode::UnterminatedTag,
                        Severity::Fatal,
                        b"Unexpected EOF inside tag",
                    ),
                }
            }
            State::AttrName => {
                self.mark_token_start();
                self.flags.set(Flags::IN_ATTR);
                let over_limit = match self.tag_stack.last_mut() {
                    Some(frame) => {
                        if frame.ctx.attr_count >= self.limits.max_attrs_per_element {
                            true
                        } else {
                            frame.ctx.attr_count += 1;
                            false
                        }
                    }
                    None => true,
                };
                if over_limit {
                    return self.emit_error(
                        out,
                        ErrorCode::LimitExceeded,
                        Severity::Fatal,
                        b"Too many attributes in element",
                    );
                }
                let (off, len) = match self.read_name(out) {
                    Ok(v) => v,
                    Err(()) => return true,
                };
                self.state = State::AfterAttrName;
                let pos = self.take_pending_or_current();
                self.make_tag_token(out, TokenType::AttributeName, off, len, pos)
            }
            State::AfterAttrName => {
                self.input.skip_whitespace();
                match self.input.peek_cp() {
                    Some(EQUALS) => {
                        self.input.get_cp();
                        self.state = State::BeforeAttrValue;
                        false
                    }
                    None => self.emit_error(
                        out,
                        ErrorCode::UnterminatedTag,
                        Severity::Fatal,
                        b"Unexpected EOF inside tag",
                    ),
                    Some(_) => self.emit_error(
                        out,
                        ErrorCode::ExpectedEqualsAfterAttrName,
                        Severity::Fatal,
                        b"Expected '=' after attribute name",
                    ),
                }
            }
            State::BeforeAttrValue => {
                self.input.skip_whitespace();
                match self.input.peek_cp() {
                    Some(QUOTE) => {
                        self.input.get_cp();
                        self.mark_token_start();
                        self.state = State::AttrValueQuoted;
                        false
                    }
                    None => self.emit_error(
                        out,
                        ErrorCode::UnterminatedTag,
                        Severity::Fatal,
                        b"Unexpected EOF inside tag",
                    ),
                    // single quotes included: double quotes only for now
                    Some(_) => self.emit_error(
                        out,
                        ErrorCode::ExpectedQuoteForAttrValue,
                        Severity::Fatal,
                        b"Expected '\"' before attribute value",
                    ),
                }
            }
            State::AttrValueQuoted => {
                let mut off = BAD_OFFSET;
                let mut len: ByteLen = 0;
                let mut scratch = [0u8; 4];
                loop {
                    let cp = match self.input.peek_cp() {
                        None => {
                            return self.emit_error(
                                out,
                                ErrorCode::UnterminatedTag,
                                Severity::Fatal,
                                b"Unexpected EOF in attribute value",
                            )
                        }
                        Some(QUOTE) => {
                            self.input.get_cp();
                            break;
                        }
                        Some(cp) => cp,
                    };
                    self.input.get_cp();
                    let width = match utf8::encode(cp, &mut scratch) {
                        EncodeResult::Ok { width } => width as usize,
                        _ => 1,
                    };
                    let appended = self.append_to_tag_buf(&scratch[..width]);
                    if appended == BAD_OFFSET {
                        return self.emit_error(
                            out,
                            ErrorCode::LimitExceeded,
                            Severity::Fatal,
                            b"Tag exceeds buffer limit",
                        );
                    }
                    if len == 0 {
                        off = appended;
                    }
                    len += width as ByteLen;
                    if len > self.limits.max_attr_value_bytes {
                        return self.emit_error(
                            out,
                            ErrorCode::LimitExceeded,
                            Severity::Fatal,
                            b"Attribute value exceeds limit",
                        );
                    }
                }
                self.flags.clear(Flags::IN_ATTR);
                self.state = State::InTag;
                let pos = self.take_pending_or_current();
                self.make_tag_token(out, TokenType::AttributeValue, off, len, pos)
            }
            _ => self.emit_error(
                out,
                ErrorCode::UnterminatedTag,
                Severity::Fatal,
                b"Invalid tokenizer state",
            ),
        }
    }

    // --- tag frame stack ---

    /// Push a frame for an element starting at the pending position.
    /// Fails when the stack is at `max_open_depth`.
    fn push_tag_frame(&mut self) -> bool {
        if self.tag_stack.len() >= self.limits.max_open_depth as usize {
            return false;
        }
        let start_pos = self.pending_start.unwrap_or_else(|| self.current_position());
        self.tag_stack.push(TagFrame {
            buf: TagBuffer::default(),
            ctx: TagContext::default(),
            start_pos,
        });
        true
    }

    /// Pop the innermost frame, recycling its buffer through the freelist
    /// while the budget allows.
    fn pop_tag_frame(&mut self) {
        let Some(frame) = self.tag_stack.pop() else {
            return;
        };
        if let Some(mem) = frame.buf.mem {
            if frame.buf.cap == self.freelist_block_size
                && self.freelist_bytes + mem.len() <= FREELIST_BUDGET_BYTES
            {
                self.freelist_bytes += mem.len();
                self.freelist.push(mem);
            }
        }
    }

    /// Allocate or reuse the top frame's buffer. Capacity is always the
    /// current per-tag limit so freelist blocks are interchangeable.
    fn ensure_current_tag_buffer(&mut self) -> bool {
        let block_size = self.limits.max_per_tag_bytes;
        let Some(frame) = self.tag_stack.last_mut() else {
            return false;
        };
        if frame.buf.mem.is_some() {
            return true;
        }
        let mem = match self.freelist.pop() {
            Some(block) => {
                self.freelist_bytes -= block.len();
                block
            }
            None => vec![0u8; block_size as usize].into_boxed_slice(),
        };
        frame.buf.cap = block_size;
        frame.buf.used = 0;
        frame.buf.mem = Some(mem);
        true
    }

    /// Append raw bytes to the top frame's buffer. Returns the starting
    /// offset, or `BAD_OFFSET` when the buffer is absent or full.
    fn append_to_tag_buf(&mut self, bytes: &[u8]) -> u32 {
        if !self.ensure_current_tag_buffer() {
            return BAD_OFFSET;
        }
        let Some(frame) = self.tag_stack.last_mut() else {
            return BAD_OFFSET;
        };
        let Some(mem) = frame.buf.mem.as_mut() else {
            return BAD_OFFSET;
        };
        let used = frame.buf.used as usize;
        if used + bytes.len() > frame.buf.cap as usize {
            return BAD_OFFSET;
        }
        mem[used..used + bytes.len()].copy_from_slice(bytes);
        frame.buf.used += bytes.len() as ByteLen;
        used as u32
    }

    /// Read one Name (name-start scalar, then name-continuation scalars)
    /// into the top frame's buffer. On failure an error token has already
    /// been written to `out`.
    fn read_name(&mut self, out: &mut Token) -> Result<(u32, u32), ()> {
        let first = match self.input.peek_cp() {
            Some(cp) => cp,
            None => {
                self.emit_error(
                    out,
                    ErrorCode::UnexpectedEof,
                    Severity::Fatal,
                    b"Unexpected EOF in name",
                );
                return Err(());
            }
        };
        if !is_name_start(first) {
            self.emit_error(
                out,
                ErrorCode::InvalidCharInName,
                Severity::Fatal,
                b"Invalid character in name",
            );
            return Err(());
        }
        let mut scratch = [0u8; 4];
        let mut start = BAD_OFFSET;
        let mut len: u32 = 0;
        loop {
            let cp = match self.input.peek_cp() {
                Some(cp) => cp,
                None => break,
            };
            let accept = if len == 0 { is_name_start(cp) } else { is_name_char(cp) };
            if !accept {
                break;
            }
            self.input.get_cp();
            let width = match utf8::encode(cp, &mut scratch) {
                EncodeResult::Ok { width } => width as usize,
                _ => 1,
            };
            let off = self.append_to_tag_buf(&scratch[..width]);
            if off == BAD_OFFSET {
                self.emit_error(
                    out,
                    ErrorCode::LimitExceeded,
                    Severity::Fatal,
                    b"Tag exceeds buffer limit",
                );
                return Err(());
            }
            if len == 0 {
                start = off;
            }
            len += width as u32;
            if len > self.limits.max_name_bytes {
                self.emit_error(
                    out,
                    ErrorCode::LimitExceeded,
                    Severity::Fatal,
                    b"Name exceeds length limit",
                );
                return Err(());
            }
        }
        Ok((start, len))
    }

    /// Byte-for-byte comparison of a scanned end-tag name against the open
    /// element's name; both slices live in the same tag buffer.
    fn end_tag_matches(&self, off: u32, len: u32) -> bool {
        let Some(frame) = self.tag_stack.last() else {
            return false;
        };
        let Some(mem) = frame.buf.mem.as_ref() else {
            return false;
        };
        if len != frame.ctx.name_len {
            return false;
        }
        let name = &mem[frame.ctx.name_mark as usize..][..frame.ctx.name_len as usize];
        let scanned = &mem[off as usize..][..len as usize];
        name == scanned
    }

    // --- token construction ---

    fn mark_token_start(&mut self) {
        self.pending_start = Some(self.current_position());
    }

    /// Take the pending start if one was marked, else the cursor. Every
    /// emission goes through here so a stale mark can never leak onto the
    /// next token.
    fn take_pending_or_current(&mut self) -> SourcePosition {
        self.pending_start
            .take()
            .unwrap_or_else(|| self.current_position())
    }

    fn make_text_token(&mut self, out: &mut Token) -> bool {
        let pos = self.take_pending_or_current();
        let len = self.text_arena.buf.len() as ByteLen;
        let data = if len == 0 {
            std::ptr::null()
        } else {
            self.text_arena.buf.as_ptr()
        };
        *out = Token {
            data,
            byte_offset: pos.byte_offset,
            length: len,
            line: pos.line,
            column: pos.column,
            kind: TokenType::Text,
        };
        self.note_token();
        true
    }

    fn make_tag_token(
        &mut self,
        out: &mut Token,
        kind: TokenType,
        off: u32,
        len: u32,
        pos: SourcePosition,
    ) -> bool {
        let data = if len == 0 {
            std::ptr::null()
        } else {
            match self.tag_stack.last().and_then(|f| f.buf.mem.as_ref()) {
                Some(mem) => mem[off as usize..].as_ptr(),
                None => std::ptr::null(),
            }
        };
        *out = Token {
            data,
            byte_offset: pos.byte_offset,
            length: len,
            line: pos.line,
            column: pos.column,
            kind,
        };
        self.pending_start = None;
        self.note_token();
        true
    }

    /// Record a diagnostic, intern its message, emit the Error token, and
    /// terminate the stream when fatal.
    fn emit_error(
        &mut self,
        out: &mut Token,
        code: ErrorCode,
        severity: Severity,
        msg: &[u8],
    ) -> bool {
        let msg = if msg.is_empty() {
            b"Tokenizer error".as_slice()
        } else {
            msg
        };
        let (ptr, len) = self.error_arena.intern(msg);
        let position = self.take_pending_or_current();
        self.errors.push(ErrorRecord {
            code,
            severity,
            position,
            msg: ptr,
            msg_len: len,
        });
        if severity == Severity::Fatal {
            self.flags.set(Flags::ENDED);
        }
        *out = Token {
            data: ptr,
            byte_offset: position.byte_offset,
            length: len,
            line: position.line,
            column: position.column,
            kind: TokenType::Error,
        };
        self.note_error();
        self.note_token();
        true
    }

    fn note_token(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.stats.tokens_emitted += 1;
            self.stats.bytes_consumed = self.input.total_bytes_read();
            self.stats.max_text_arena = self
                .stats
                .max_text_arena
                .max(self.text_arena.buf.len() as ByteLen);
            if let Some(frame) = self.tag_stack.last() {
                self.stats.max_tag_arena = self.stats.max_tag_arena.max(frame.buf.used);
            }
        }
    }

    fn note_error(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.stats.errors_emitted += 1;
        }
    }
}

fn append_cp(cp: u32, out: &mut Vec<u8>) {
    let mut scratch = [0u8; 4];
    if let EncodeResult::Ok { width } = utf8::encode(cp, &mut scratch) {
        out.extend_from_slice(&scratch[..width as usize]);
    }
}
