//! Multi-threaded block-parallel LZ4 file compression.
//!
//! The library marshals fixed-size input blocks through a pool of
//! worker-owned compression contexts, serializes output blocks in
//! submission order, and writes an LZ4-framed stream with a trailing
//! seek index stored in a skippable frame. Decompression mirrors this
//! with a lazy block-at-a-time decoder that carries unconsumed input
//! across reads, and the tail index enables random access by
//! uncompressed offset.
//!
//! **Stream layout:**
//!
//! | Section        | Contents                                          |
//! |----------------|---------------------------------------------------|
//! | header (7 B)   | magic, flag byte, block-size id, header CRC       |
//! | blocks         | `[len word: u32 LE][payload]` per block           |
//! | end of stream  | zero length word, then the XXH32 stream digest    |
//! | tail           | skippable frame carrying `(uoff, zoff)` pairs     |
//!
//! The high bit of a length word marks a block stored raw (the codec
//! could not beat the input). See [`zfile::ZFile`] for the file API.

pub mod engine;
pub mod frame;
pub mod lz4;
pub mod pool;
pub mod zfile;

pub use zfile::{detect_format, Format, ZFile};

/// Default number of worker pools for write mode.
pub const DEFAULT_THREADS: usize = 16;

/// Default compression block size.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default compression level.
pub const DEFAULT_LEVEL: u32 = 1;

/// Lowest level that selects the high-compression codec.
pub const MIN_HC_LEVEL: u32 = 3;

/// Seed for both the header CRC and the rolling stream checksum.
pub const CHECKSUM_SEED: u32 = 0;

/// Error types for zcp operations.
///
/// Streams latch the first error: once a call fails, later calls on the
/// same stream short-circuit and report the latched error (see
/// [`zfile::ZFile::fail`] and [`zfile::ZFile::str_error`]).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZcpError {
    /// File could not be opened, or open arguments were invalid.
    Open(String),
    /// Read from the underlying file failed, or the stream is corrupt.
    Read(String),
    /// Write to the underlying file failed.
    Write(String),
    /// The block codec reported an error.
    Compress(String),
    /// A worker job could not be set up.
    JobInit(String),
    /// A worker thread could not be spawned.
    JobCreate(String),
    /// A worker thread could not be joined.
    JobWait(String),
    /// A worker job failed for an unclassified reason.
    JobUnknown(String),
    /// The file header is missing or malformed.
    Header(String),
    /// The stream tail (end mark or checksum) is invalid.
    Tail(String),
    /// The skippable-frame metadata is corrupt.
    Meta(String),
    /// A seek was rejected or failed.
    Seek(String),
}

impl std::fmt::Display for ZcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(m) => write!(f, "open error: {m}"),
            Self::Read(m) => write!(f, "read error: {m}"),
            Self::Write(m) => write!(f, "write error: {m}"),
            Self::Compress(m) => write!(f, "compress error: {m}"),
            Self::JobInit(m) => write!(f, "job init error: {m}"),
            Self::JobCreate(m) => write!(f, "job create error: {m}"),
            Self::JobWait(m) => write!(f, "job wait error: {m}"),
            Self::JobUnknown(m) => write!(f, "job error: {m}"),
            Self::Header(m) => write!(f, "header error: {m}"),
            Self::Tail(m) => write!(f, "tail error: {m}"),
            Self::Meta(m) => write!(f, "metadata error: {m}"),
            Self::Seek(m) => write!(f, "seek error: {m}"),
        }
    }
}

impl std::error::Error for ZcpError {}

pub type ZcpResult<T> = Result<T, ZcpError>;
