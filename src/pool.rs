//! Block buffers and the write-side pool discipline.
//!
//! A [`BlockBuffer`] pairs an input side (plaintext on write, compressed
//! bytes on read) with an output side and a read cursor. Buffers are
//! exclusively owned: by the producer while being filled, by a worker
//! thread while a job runs, and by the flusher while being drained. The
//! hand-off into a worker moves the buffer into the thread; joining the
//! [`Job`] moves it back. A buffer therefore never needs a reference to
//! the stream that owns it.
//!
//! [`PoolSet`] tracks the write-side queues: the single *current* buffer
//! being filled, the *free* list, and the *in-flight* jobs in submission
//! order. Flushing always joins the oldest in-flight job, which is what
//! makes file output order equal submission order.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use log::trace;

use crate::lz4::Lz4Context;
use crate::{ZcpError, ZcpResult};

/// A reusable input/output byte buffer with one worker slot.
pub struct BlockBuffer {
    seq: u64,
    input: Box<[u8]>,
    in_len: usize,
    out: Box<[u8]>,
    out_len: usize,
    pos: usize,
    rc: u32,
    eos_digest: Option<u32>,
    pub(crate) ctx: Option<Lz4Context>,
}

impl BlockBuffer {
    /// Allocate a buffer with the given input and output capacities.
    pub fn new(seq: u64, in_cap: usize, out_cap: usize) -> Self {
        BlockBuffer {
            seq,
            input: vec![0u8; in_cap].into_boxed_slice(),
            in_len: 0,
            out: vec![0u8; out_cap].into_boxed_slice(),
            out_len: 0,
            pos: 0,
            rc: 0,
            eos_digest: None,
            ctx: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn in_len(&self) -> usize {
        self.in_len
    }

    pub fn out_len(&self) -> usize {
        self.out_len
    }

    pub fn rc(&self) -> u32 {
        self.rc
    }

    pub fn eos_digest(&self) -> Option<u32> {
        self.eos_digest
    }

    pub fn in_is_empty(&self) -> bool {
        self.in_len == 0
    }

    pub fn out_is_empty(&self) -> bool {
        self.out_len - self.pos == 0
    }

    /// Bytes still drainable from the output side.
    pub fn out_available(&self) -> usize {
        self.out_len - self.pos
    }

    /// Filled portion of the input side.
    pub fn input_filled(&self) -> &[u8] {
        &self.input[..self.in_len]
    }

    /// Written portion of the output side.
    pub fn out_filled(&self) -> &[u8] {
        &self.out[..self.out_len]
    }

    /// Copy up to `data.len()` bytes into the input side. Returns the
    /// number of bytes taken; 0 means the buffer is full and should be
    /// submitted.
    pub fn add(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.input.len() - self.in_len);
        if n == 0 {
            return 0;
        }
        self.input[self.in_len..self.in_len + n].copy_from_slice(&data[..n]);
        self.in_len += n;
        n
    }

    /// Fill the input side from a byte source, reading at most `limit`
    /// bytes and stopping at end of input. Returns the number of bytes
    /// appended; fewer than requested means the source is exhausted.
    pub fn add_from_stream<R: Read>(&mut self, r: &mut R, limit: usize) -> std::io::Result<usize> {
        let want = limit.min(self.input.len() - self.in_len);
        let mut got = 0;
        while got < want {
            match r.read(&mut self.input[self.in_len + got..self.in_len + want]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.in_len += got;
        Ok(got)
    }

    /// Copy up to `dst.len()` bytes out of the output side, advancing
    /// the read cursor.
    pub fn drain(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.out_len - self.pos);
        if n == 0 {
            return 0;
        }
        dst[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Advance the read cursor without copying.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.out_len - self.pos);
        self.pos += n;
        n
    }

    /// Zero all counters and the cursor. Keeps the codec context.
    pub fn reset(&mut self) {
        self.in_len = 0;
        self.out_len = 0;
        self.pos = 0;
        self.rc = 0;
        self.eos_digest = None;
    }

    /// Move the buffer into a worker thread running `task`. The buffer
    /// comes back through [`Job::wait`]. Submitting an empty buffer is a
    /// caller bug and reported as a distinct condition.
    pub fn run<F>(self, task: F) -> ZcpResult<Job>
    where
        F: FnOnce(&mut BlockBuffer) + Send + 'static,
    {
        if self.in_len == 0 {
            return Err(ZcpError::JobInit("refusing to run an empty buffer".into()));
        }
        let seq = self.seq;
        trace!("buffer {seq}: spawning worker, in_len={}", self.in_len);
        let handle = thread::Builder::new()
            .name(format!("zcp-worker-{seq}"))
            .spawn(move || {
                let mut buf = self;
                task(&mut buf);
                buf.pos = 0;
                buf
            })
            .map_err(|e| ZcpError::JobCreate(format!("cannot spawn worker thread: {e}")))?;
        Ok(Job { seq, handle })
    }

    /// Disjoint views for a compression task: filled input, whole output
    /// side, and the paired codec context.
    pub(crate) fn compress_parts(&mut self) -> (&[u8], &mut [u8], Option<&mut Lz4Context>) {
        (
            &self.input[..self.in_len],
            &mut self.out[..],
            self.ctx.as_mut(),
        )
    }

    /// Disjoint views for a decode task: whole input side with its fill
    /// level, and the whole output side.
    pub(crate) fn decode_parts(&mut self) -> (&mut [u8], usize, &mut [u8]) {
        (&mut self.input[..], self.in_len, &mut self.out[..])
    }

    /// Store a decode result: output length, carry-over length (the
    /// unconsumed input has already been moved to the front), return
    /// code, and the digest captured at end of stream.
    pub(crate) fn finish_decode(
        &mut self,
        out_len: usize,
        remaining: usize,
        rc: u32,
        eos_digest: Option<u32>,
    ) {
        self.out_len = out_len;
        self.in_len = remaining;
        self.pos = 0;
        self.rc = rc;
        self.eos_digest = eos_digest;
    }

    /// Store a compression result.
    pub(crate) fn finish_compress(&mut self, out_len: usize, rc: u32) {
        self.out_len = out_len;
        self.pos = 0;
        self.rc = rc;
    }
}

/// A running worker job; joining it returns the buffer.
pub struct Job {
    seq: u64,
    handle: JoinHandle<BlockBuffer>,
}

impl Job {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Join the worker and take the buffer back.
    pub fn wait(self) -> ZcpResult<BlockBuffer> {
        let seq = self.seq;
        let buf = self
            .handle
            .join()
            .map_err(|_| ZcpError::JobWait("error joining worker thread".into()))?;
        trace!("buffer {seq}: worker joined, out_len={}", buf.out_len);
        Ok(buf)
    }
}

/// Write-side buffer queues: one current, the rest split between free
/// and in-flight. Every buffer is in exactly one place at a time.
pub struct PoolSet {
    current: Option<BlockBuffer>,
    free: VecDeque<BlockBuffer>,
    in_flight: VecDeque<Job>,
}

impl PoolSet {
    /// Build a pool from pre-allocated buffers. The first becomes the
    /// current buffer.
    pub fn new(mut buffers: Vec<BlockBuffer>) -> Self {
        let current = buffers.pop();
        PoolSet {
            current,
            free: buffers.into(),
            in_flight: VecDeque::new(),
        }
    }

    /// The buffer currently accepting producer input.
    pub fn current_mut(&mut self) -> &mut BlockBuffer {
        self.current.as_mut().expect("pool has no current buffer")
    }

    /// Detach the current buffer for submission.
    pub fn take_current(&mut self) -> BlockBuffer {
        self.current.take().expect("pool has no current buffer")
    }

    /// Whether a current buffer is attached.
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Append a job to the in-flight queue (submission order).
    pub fn enqueue(&mut self, job: Job) {
        self.in_flight.push_back(job);
    }

    /// Oldest in-flight job, if any.
    pub fn pop_oldest(&mut self) -> Option<Job> {
        self.in_flight.pop_front()
    }

    pub fn free_is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Promote a free buffer to current. Callers flush first when the
    /// free list is empty.
    pub fn promote(&mut self) {
        let buf = self.free.pop_front().expect("promote from empty free list");
        self.current = Some(buf);
    }

    /// Return a drained buffer to the free list.
    pub fn push_free(&mut self, buf: BlockBuffer) {
        self.free.push_back(buf);
    }

    /// Number of in-flight jobs.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
