//! Write pipeline: producer, out-of-order workers, in-order flusher.
//!
//! The producer fills the pool's current buffer; a full buffer is
//! submitted, which spawns a compression worker and promotes a free
//! buffer. When the free list is empty the producer first flushes the
//! *oldest* in-flight job, giving backpressure proportional to worker
//! throughput. Flushing joins the worker, folds the block's plaintext
//! into the rolling stream checksum, appends the framed output to the
//! file, and records one index entry. File output order and index order
//! therefore both equal submission order, whatever order workers finish
//! in.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use log::debug;
use xxhash_rust::xxh32::Xxh32;

use crate::engine::{self, Codec};
use crate::frame::{
    self, BlockSizeId, FileHeader, IndexEntry, BLOCK_INDEPENDENCE, BLOCK_WORD_LEN, HEADER_LEN,
    MAX_BLOCK_SIZE, SIZE_MASK, STREAM_CHECKSUM,
};
use crate::pool::{BlockBuffer, PoolSet};
use crate::zfile::resolve_thread_count;
use crate::{ZcpError, ZcpResult, CHECKSUM_SEED};

pub(crate) struct Lz4Writer {
    file: File,
    pub(crate) pool: PoolSet,
    codec: Codec,
    level: u32,
    xxh: Xxh32,
    index: Vec<IndexEntry>,
    uoff: u64,
    zoff: u64,
    closed: bool,
}

impl Lz4Writer {
    pub(crate) fn open(
        path: &Path,
        level: u32,
        block_size: usize,
        threads: usize,
    ) -> ZcpResult<Self> {
        if block_size == 0 {
            return Err(ZcpError::Open("block size must be non-zero".into()));
        }
        let block_size = block_size.min(MAX_BLOCK_SIZE);
        let threads = resolve_thread_count(threads);
        let codec = Codec::select(level, BLOCK_INDEPENDENCE);

        let mut file = File::create(path)
            .map_err(|e| ZcpError::Open(format!("{}: {e}", path.display())))?;

        let bsid = BlockSizeId::for_block_size(block_size);
        file.write_all(&FileHeader::new(bsid).encode())
            .map_err(|e| ZcpError::Write(format!("error writing lz4 header: {e}")))?;

        let mut buffers = Vec::with_capacity(threads);
        for seq in 0..threads {
            let mut buf =
                BlockBuffer::new(seq as u64, block_size, block_size + BLOCK_WORD_LEN);
            buf.ctx = Some(codec.new_context()?);
            buffers.push(buf);
        }
        debug!(
            "open write {}: level {level}, block size {block_size}, {threads} buffers",
            path.display()
        );

        Ok(Lz4Writer {
            file,
            pool: PoolSet::new(buffers),
            codec,
            level,
            xxh: Xxh32::new(CHECKSUM_SEED),
            index: Vec::new(),
            uoff: 0,
            zoff: HEADER_LEN as u64,
            closed: false,
        })
    }

    /// Append plaintext to the stream, submitting blocks as they fill.
    pub(crate) fn write(&mut self, data: &[u8]) -> ZcpResult<usize> {
        if self.closed {
            return Err(ZcpError::Write("file already closed".into()));
        }
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.pool.current_mut().add(rest);
            if n == 0 {
                self.submit()?;
            } else {
                rest = &rest[n..];
            }
        }
        Ok(data.len())
    }

    /// Spawn the worker for the current buffer, enqueue it in-flight,
    /// and promote a free buffer (flushing first when none is free).
    fn submit(&mut self) -> ZcpResult<()> {
        let buf = self.pool.take_current();
        let (codec, level) = (self.codec, self.level);
        let job = buf.run(move |b| engine::compress_block(b, codec, level))?;
        self.pool.enqueue(job);
        if self.pool.free_is_empty() {
            self.flush_one()?;
        }
        self.pool.promote();
        Ok(())
    }

    /// Join the oldest in-flight worker and emit its block.
    fn flush_one(&mut self) -> ZcpResult<()> {
        let job = match self.pool.pop_oldest() {
            Some(job) => job,
            None => return Ok(()),
        };
        let mut buf = job.wait()?;

        // The checksum covers plaintext in submission order, folded in
        // before the buffer is released.
        self.xxh.update(buf.input_filled());
        self.file
            .write_all(buf.out_filled())
            .map_err(|e| ZcpError::Write(format!("error writing lz4 block: {e}")))?;

        let zlen = (buf.out_len() as u32 & SIZE_MASK) as u64;
        self.index.push(IndexEntry {
            uoff: self.uoff,
            ulen: buf.in_len() as u64,
            zoff: self.zoff,
            zlen,
        });
        self.uoff += buf.in_len() as u64;
        self.zoff += zlen;
        debug!(
            "flushed buffer {}: {} -> {} bytes at z {}",
            buf.seq(),
            buf.in_len(),
            buf.out_len(),
            self.zoff
        );

        buf.reset();
        self.pool.push_free(buf);
        Ok(())
    }

    /// Submit any partial current buffer, drain the in-flight queue in
    /// order, and write the stream tail.
    ///
    /// A failed worker join is recorded but does not stop the drain or
    /// the tail write; the first error is the one reported.
    pub(crate) fn close(&mut self) -> ZcpResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_err: Option<ZcpError> = None;
        if self.pool.has_current() && self.pool.current_mut().in_len() > 0 {
            let buf = self.pool.take_current();
            let (codec, level) = (self.codec, self.level);
            match buf.run(move |b| engine::compress_block(b, codec, level)) {
                Ok(job) => self.pool.enqueue(job),
                Err(e) => first_err = Some(e),
            }
        }
        while self.pool.in_flight_len() > 0 {
            if let Err(e) = self.flush_one() {
                first_err.get_or_insert(e);
            }
        }

        let digest = STREAM_CHECKSUM.then(|| self.xxh.digest());
        if let Err(e) = frame::write_tail(&mut self.file, digest, &self.index)
            .map_err(|e| ZcpError::Write(format!("error writing lz4 tail: {e}")))
        {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn ratio(&self) -> f64 {
        if self.zoff == 0 {
            return 0.0;
        }
        self.uoff as f64 * 100.0 / self.zoff as f64
    }

    pub(crate) fn index(&self) -> &[IndexEntry] {
        &self.index
    }
}

impl Drop for Lz4Writer {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
