//! Buffered input layer
//!
//! Presents the raw byte source as a stream of UTF-8 scalars:
//! - BufferedInput: compacting window with lookahead and position tracking

pub mod buffered;
