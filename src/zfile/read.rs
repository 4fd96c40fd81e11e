//! Read pipeline: lazy block-at-a-time decoding with input carry-over.
//!
//! One block buffer serves the whole stream. Each fill appends up to a
//! buffer of file bytes to whatever the previous decode pass left
//! behind, then runs the decoder in a worker and joins it. The decoder
//! reports why it stopped: short input (append more file bytes first),
//! short output (drain before decoding again), or end of stream.
//!
//! The tail index parsed at open maps uncompressed offsets to
//! compressed ones, so `seek_uncompressed` can reposition the file at a
//! block boundary, reset the decoder, and skip forward to the exact
//! offset. The stream digest is verified at end of stream while the
//! read path is purely sequential; any seek disarms verification since
//! the rolling state is no longer a prefix hash.

use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom};
use std::path::Path;

use log::{debug, trace};
use xxhash_rust::xxh32::Xxh32;

use crate::engine::{self, RC_EOS, RC_OK, RC_SHORT_OUTPUT};
use crate::frame::{self, FileHeader, IndexEntry, BLOCK_WORD_LEN, HEADER_LEN};
use crate::pool::BlockBuffer;
use crate::{ZcpError, ZcpResult, CHECKSUM_SEED};

pub(crate) struct Lz4Reader {
    file: File,
    file_len: u64,
    /// Output-side capacity from the header's block-size id. The input
    /// side gets four more bytes so a worst-case raw frame always fits,
    /// and short input therefore always makes progress.
    cap: usize,
    buf: Option<BlockBuffer>,
    pub(crate) rc: u32,
    index: Vec<IndexEntry>,
    xxh: Xxh32,
    verify: bool,
    logical: u64,
    file_eof: bool,
}

impl Lz4Reader {
    pub(crate) fn open(path: &Path) -> ZcpResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| ZcpError::Open(format!("{}: {e}", path.display())))?;

        let mut bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut bytes)
            .map_err(|e| ZcpError::Header(format!("error reading lz4 file header: {e}")))?;
        let header = FileHeader::decode(&bytes)?;

        let index = frame::read_index(&mut file)?;
        let file_len = file
            .metadata()
            .map_err(|e| ZcpError::Open(format!("{}: {e}", path.display())))?
            .len();
        file.seek(SeekFrom::Start(HEADER_LEN as u64))
            .map_err(|e| ZcpError::Seek(format!("error rewinding past header: {e}")))?;

        let cap = header.bsid.cap();
        debug!(
            "open read {}: block cap {cap}, {} index entries",
            path.display(),
            index.len()
        );
        Ok(Lz4Reader {
            file,
            file_len,
            cap,
            buf: Some(BlockBuffer::new(0, cap + BLOCK_WORD_LEN, cap)),
            rc: RC_OK,
            index,
            xxh: Xxh32::new(CHECKSUM_SEED),
            verify: true,
            logical: 0,
            file_eof: false,
        })
    }

    /// Pull decoded bytes. Returns less than `dst.len()` only at end of
    /// stream.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> ZcpResult<usize> {
        let mut got = 0;
        while got < dst.len() {
            let n = self.buffer().drain(&mut dst[got..]);
            if n == 0 {
                if !self.fill_output()? {
                    break;
                }
                continue;
            }
            got += n;
            self.logical += n as u64;
        }
        trace!("read {got}/{} bytes, logical {}", dst.len(), self.logical);
        Ok(got)
    }

    /// Refill the output side: unless the last pass stopped on short
    /// output, append more file bytes first, then run one decode pass.
    /// Returns false at end of stream.
    fn fill_output(&mut self) -> ZcpResult<bool> {
        if self.rc == RC_EOS {
            return Ok(false);
        }
        if self.rc != RC_SHORT_OUTPUT {
            let limit = self.cap + BLOCK_WORD_LEN;
            let buf = self.buf.as_mut().expect("reader buffer missing");
            let want = limit - buf.in_len();
            let n = buf
                .add_from_stream(&mut self.file, limit)
                .map_err(|e| ZcpError::Read(format!("error reading data: {e}")))?;
            if n < want {
                self.file_eof = true;
            }
            if n == 0 {
                if buf.in_is_empty() {
                    return Ok(false);
                }
                return Err(ZcpError::Read("truncated lz4 stream".into()));
            }
        }

        let buf = self.buf.take().expect("reader buffer missing");
        let job = buf.run(engine::decode_blocks)?;
        let buf = job.wait()?;
        self.rc = buf.rc();

        if buf.out_len() > 0 {
            self.xxh.update(buf.out_filled());
        }
        if self.rc == RC_EOS && self.verify {
            if let Some(digest) = buf.eos_digest() {
                if digest != self.xxh.digest() {
                    self.buf = Some(buf);
                    return Err(ZcpError::Tail("stream checksum mismatch".into()));
                }
                trace!("stream checksum verified");
            }
        }
        if self.rc == RC_SHORT_OUTPUT && buf.out_len() == 0 {
            // No block fits the output side even when empty: the data
            // is not a valid block of this stream's size class.
            self.buf = Some(buf);
            return Err(ZcpError::Read("lz4 block decode failed".into()));
        }
        self.buf = Some(buf);
        Ok(true)
    }

    /// Advance the decoded stream without copying it out.
    fn skip_ahead(&mut self, mut n: u64) -> ZcpResult<()> {
        while n > 0 {
            let avail = self.buffer().out_available();
            if avail == 0 {
                if !self.fill_output()? {
                    break;
                }
                continue;
            }
            let step = (avail as u64).min(n) as usize;
            self.buffer().skip(step);
            self.logical += step as u64;
            n -= step as u64;
        }
        Ok(())
    }

    /// Seek by uncompressed offset using the tail index: position the
    /// file at the covering block's compressed offset, reset the
    /// decoder, and decode forward to the target.
    pub(crate) fn seek_uncompressed(&mut self, pos: SeekFrom) -> ZcpResult<()> {
        if self.index.is_empty() {
            return Err(ZcpError::Seek("no seek index in file".into()));
        }
        let last = self.index[self.index.len() - 1];
        let span = last.uoff + last.ulen;
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .logical
                .checked_add_signed(delta)
                .ok_or_else(|| ZcpError::Seek("seek before start of stream".into()))?,
            SeekFrom::End(delta) => span
                .checked_add_signed(delta)
                .ok_or_else(|| ZcpError::Seek("seek before start of stream".into()))?,
        };
        let entry = *frame::find_entry(&self.index, target)
            .ok_or_else(|| ZcpError::Seek("offset outside index".into()))?;

        debug!(
            "seek to u {target}: block at u {} / z {}",
            entry.uoff, entry.zoff
        );
        self.file
            .seek(SeekFrom::Start(entry.zoff))
            .map_err(|e| ZcpError::Seek(format!("error seeking data block: {e}")))?;
        self.buffer().reset();
        self.rc = RC_OK;
        self.file_eof = false;
        self.verify = false;
        self.logical = entry.uoff;
        self.skip_ahead(target - entry.uoff)
    }

    /// Seek the underlying file directly. The decoder state is reset;
    /// the logical uncompressed position becomes meaningless.
    pub(crate) fn seek_raw(&mut self, pos: SeekFrom) -> ZcpResult<()> {
        self.file
            .seek(pos)
            .map_err(|e| ZcpError::Seek(format!("error seeking file: {e}")))?;
        self.buffer().reset();
        self.rc = RC_OK;
        self.file_eof = false;
        self.verify = false;
        self.logical = 0;
        Ok(())
    }

    pub(crate) fn eof(&self) -> bool {
        let buf = match &self.buf {
            Some(buf) => buf,
            None => return false,
        };
        (self.file_eof || self.rc == RC_EOS) && buf.in_is_empty() && buf.out_is_empty()
    }

    /// Ratio derived from the index span over the file length.
    pub(crate) fn ratio(&self) -> f64 {
        let last = match self.index.last() {
            Some(last) => last,
            None => return 0.0,
        };
        if self.file_len == 0 {
            return 0.0;
        }
        (last.uoff + last.ulen) as f64 * 100.0 / self.file_len as f64
    }

    pub(crate) fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    fn buffer(&mut self) -> &mut BlockBuffer {
        self.buf.as_mut().expect("reader buffer missing")
    }
}
