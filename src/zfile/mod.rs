//! File streams: the public open/read/write/close/seek surface.
//!
//! A [`ZFile`] is one of two codecs behind a single API:
//!
//! | Variant       | Behavior                                            |
//! |---------------|-----------------------------------------------------|
//! | `Passthrough` | identity codec, no framing                          |
//! | `Lz4`         | block-parallel LZ4 with a seekable tail index       |
//!
//! Errors latch on the stream: after the first failure every subsequent
//! call short-circuits and reports the latched error, matching the
//! `fail()` / `str_error()` checking style of the callers.

mod passthrough;
mod read;
mod write;

#[cfg(test)]
mod tests;

use std::io::SeekFrom;
use std::path::Path;

use crate::frame::IndexEntry;
use crate::{ZcpError, ZcpResult};

use passthrough::RawFile;
use read::Lz4Reader;
use write::Lz4Writer;

/// Open mode of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// File format as reported by [`detect_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// LZ4-framed stream with a valid header.
    Lz4,
    /// Anything else.
    None,
}

/// Probe a file by attempting a read-mode open and inspecting the
/// header (magic, flag byte, and header CRC must all check out).
pub fn detect_format<P: AsRef<Path>>(path: P) -> Format {
    match Lz4Reader::open(path.as_ref()) {
        Ok(_) => Format::Lz4,
        Err(_) => Format::None,
    }
}

/// Resolve a thread-count argument: 0 means one worker per available
/// core.
pub(crate) fn resolve_thread_count(threads: usize) -> usize {
    if threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        threads
    }
}

enum Inner {
    Raw(RawFile),
    Writer(Lz4Writer),
    Reader(Lz4Reader),
}

/// A compressed (or passthrough) file stream.
pub struct ZFile {
    inner: Inner,
    error: Option<ZcpError>,
}

impl ZFile {
    /// Open an LZ4 stream for reading. Validates the header and parses
    /// the tail index when present.
    pub fn open_read<P: AsRef<Path>>(path: P) -> ZcpResult<ZFile> {
        Ok(ZFile {
            inner: Inner::Reader(Lz4Reader::open(path.as_ref())?),
            error: None,
        })
    }

    /// Create an LZ4 stream for writing.
    ///
    /// `block_size` is clamped to 4 MiB; `threads` selects the number of
    /// worker-owned block buffers, 0 meaning one per available core.
    pub fn open_write<P: AsRef<Path>>(
        path: P,
        level: u32,
        block_size: usize,
        threads: usize,
    ) -> ZcpResult<ZFile> {
        Ok(ZFile {
            inner: Inner::Writer(Lz4Writer::open(path.as_ref(), level, block_size, threads)?),
            error: None,
        })
    }

    /// Open a plain file for reading through the passthrough codec.
    pub fn open_raw_read<P: AsRef<Path>>(path: P) -> ZcpResult<ZFile> {
        Ok(ZFile {
            inner: Inner::Raw(RawFile::open(path.as_ref(), OpenMode::Read)?),
            error: None,
        })
    }

    /// Create a plain file for writing through the passthrough codec.
    pub fn open_raw_write<P: AsRef<Path>>(path: P) -> ZcpResult<ZFile> {
        Ok(ZFile {
            inner: Inner::Raw(RawFile::open(path.as_ref(), OpenMode::Write)?),
            error: None,
        })
    }

    /// Read uncompressed bytes. Returns the number of bytes produced;
    /// fewer than requested only at end of stream.
    pub fn read(&mut self, dst: &mut [u8]) -> ZcpResult<usize> {
        self.checked(|inner| match inner {
            Inner::Raw(f) => f.read(dst),
            Inner::Reader(r) => r.read(dst),
            Inner::Writer(_) => Err(ZcpError::Read(
                "error reading a file opened in write mode".into(),
            )),
        })
    }

    /// Write uncompressed bytes. Returns `data.len()` on success.
    pub fn write(&mut self, data: &[u8]) -> ZcpResult<usize> {
        self.checked(|inner| match inner {
            Inner::Raw(f) => f.write(data),
            Inner::Writer(w) => w.write(data),
            Inner::Reader(_) => Err(ZcpError::Write(
                "error writing into a read mode file".into(),
            )),
        })
    }

    /// Flush remaining blocks and write the stream tail. Idempotent:
    /// closing twice is safe and leaves the error state unchanged.
    pub fn close(&mut self) -> ZcpResult<()> {
        self.checked(|inner| match inner {
            Inner::Raw(f) => f.close(),
            Inner::Writer(w) => w.close(),
            Inner::Reader(_) => Ok(()),
        })
    }

    /// Seek to a position in the uncompressed stream (read mode only).
    /// `End` resolves against the index's span of the uncompressed
    /// stream.
    pub fn seek_uncompressed(&mut self, pos: SeekFrom) -> ZcpResult<()> {
        self.checked(|inner| match inner {
            Inner::Raw(f) => f.seek(pos),
            Inner::Reader(r) => r.seek_uncompressed(pos),
            Inner::Writer(_) => Err(ZcpError::Seek(
                "seek unhandled for write mode files".into(),
            )),
        })
    }

    /// Seek to a byte position in the underlying file (read mode only).
    /// Resets the decoder state; the logical position is lost.
    pub fn seek_raw(&mut self, pos: SeekFrom) -> ZcpResult<()> {
        self.checked(|inner| match inner {
            Inner::Raw(f) => f.seek(pos),
            Inner::Reader(r) => r.seek_raw(pos),
            Inner::Writer(_) => Err(ZcpError::Seek(
                "seek unhandled for write mode files".into(),
            )),
        })
    }

    /// True once the stream is exhausted: the file is at end of file and
    /// both decoder sides are drained.
    pub fn eof(&self) -> bool {
        match &self.inner {
            Inner::Raw(f) => f.eof(),
            Inner::Reader(r) => r.eof(),
            Inner::Writer(_) => false,
        }
    }

    /// Compression ratio in percent (`100 · uncompressed / compressed`).
    pub fn ratio(&self) -> f64 {
        match &self.inner {
            Inner::Raw(f) => f.ratio(),
            Inner::Reader(r) => r.ratio(),
            Inner::Writer(w) => w.ratio(),
        }
    }

    /// The seek index: accumulated entries on a write stream, parsed
    /// tail entries on a read stream.
    pub fn index(&self) -> &[IndexEntry] {
        match &self.inner {
            Inner::Raw(_) => &[],
            Inner::Reader(r) => r.index(),
            Inner::Writer(w) => w.index(),
        }
    }

    /// Whether an error has been latched on this stream.
    pub fn fail(&self) -> bool {
        self.error.is_some()
    }

    /// The latched error, if any.
    pub fn last_error(&self) -> Option<&ZcpError> {
        self.error.as_ref()
    }

    /// Text of the latched error, empty when none.
    pub fn str_error(&self) -> String {
        self.error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Run an operation unless an error is latched; latch its failure.
    fn checked<T>(
        &mut self,
        op: impl FnOnce(&mut Inner) -> ZcpResult<T>,
    ) -> ZcpResult<T> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        let result = op(&mut self.inner);
        if let Err(e) = &result {
            self.error = Some(e.clone());
        }
        result
    }
}
