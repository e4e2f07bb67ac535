//! Range Scan Module
//!
//! Streams a half-open key range of the local store over a chunked HTTP body.
//! The storage iterator is pulled lazily as the client reads, so memory use is
//! bounded by one chunk regardless of the size of the range. Once headers are
//! committed a decode failure can only truncate the stream.

pub mod streamer;

#[cfg(test)]
mod tests;
