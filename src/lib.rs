//! streamxml - streaming XML tokenization with bounded memory
//!
//! Tokenizes documents whose size may exceed RAM by pulling scalars from a
//! compacting buffered window and emitting one semantic token per call:
//! - `reader::buffered::BufferedInput`: UTF-8 scalar stream over any
//!   `io::Read` source, with precise byte/line/column tracking
//! - `core::tokenizer::Tokenizer`: pull tokenizer (DFA + per-element tag
//!   buffers + text/error arenas)
//! - `core::utf8`: strict table-driven codec
//!
//! ```
//! use std::io::Cursor;
//! use streamxml::{BufferedInput, Limits, Options, Token, TokenType, Tokenizer};
//!
//! let doc = Cursor::new(b"<greeting lang=\"en\">hi</greeting>".to_vec());
//! let mut input = BufferedInput::new(doc, 64 * 1024).unwrap();
//! let mut tokenizer = Tokenizer::new(&mut input, Options::default(), Limits::default());
//!
//! let mut token = Token::default();
//! let mut names = Vec::new();
//! while tokenizer.next_token(&mut token) {
//!     if token.kind == TokenType::StartTag {
//!         names.push(unsafe { token.bytes() }.to_vec());
//!     }
//! }
//! assert_eq!(names, vec![b"greeting".to_vec()]);
//! ```

pub mod core;
pub mod reader;

pub use crate::core::tokenizer::Tokenizer;
pub use crate::core::types::{
    ErrorCode, ErrorRecord, Limits, Options, Severity, SourcePosition, State, Token,
    TokenType, TokenizerStats,
};
pub use crate::reader::buffered::{BufferedInput, Encoding, StreamError};
