//! Thin safe wrappers over the liblz4 block primitives.
//!
//! `lz4-sys` builds and links the bundled liblz4; this module declares
//! the block-level entry points the engine dispatches between and wraps
//! them behind safe slice-based functions. The codec is treated as a
//! black box: four compressors (fast/HC, stateless/continue) and one
//! decompressor.
//!
//! Compression state is owned by [`Lz4Context`]. One context is paired
//! with each block buffer and travels with it into the worker thread;
//! a context is never shared between concurrent jobs.

use std::os::raw::{c_char, c_int, c_void};

use crate::{ZcpError, ZcpResult};

// Link against the liblz4 that lz4-sys builds.
use lz4_sys as _;

/// Opaque `LZ4_stream_t`.
#[repr(C)]
pub struct Lz4StreamT {
    _private: [u8; 0],
}

/// Opaque `LZ4_streamHC_t`.
#[repr(C)]
pub struct Lz4StreamHcT {
    _private: [u8; 0],
}

extern "C" {
    fn LZ4_createStream() -> *mut Lz4StreamT;
    fn LZ4_freeStream(stream: *mut Lz4StreamT) -> c_int;
    fn LZ4_createStreamHC() -> *mut Lz4StreamHcT;
    fn LZ4_freeStreamHC(stream: *mut Lz4StreamHcT) -> c_int;

    fn LZ4_compress_fast_extState(
        state: *mut c_void,
        src: *const c_char,
        dst: *mut c_char,
        src_size: c_int,
        dst_capacity: c_int,
        acceleration: c_int,
    ) -> c_int;
    fn LZ4_compress_fast_continue(
        stream: *mut Lz4StreamT,
        src: *const c_char,
        dst: *mut c_char,
        src_size: c_int,
        dst_capacity: c_int,
        acceleration: c_int,
    ) -> c_int;
    fn LZ4_compress_HC_extStateHC(
        state: *mut c_void,
        src: *const c_char,
        dst: *mut c_char,
        src_size: c_int,
        dst_capacity: c_int,
        compression_level: c_int,
    ) -> c_int;
    fn LZ4_compress_HC_continue(
        stream: *mut Lz4StreamHcT,
        src: *const c_char,
        dst: *mut c_char,
        src_size: c_int,
        dst_capacity: c_int,
    ) -> c_int;

    fn LZ4_decompress_safe(
        src: *const c_char,
        dst: *mut c_char,
        compressed_size: c_int,
        dst_capacity: c_int,
    ) -> c_int;
}

/// A per-buffer liblz4 compression context.
///
/// `Fast` wraps an `LZ4_stream_t`, `Hc` an `LZ4_streamHC_t`. The same
/// allocation serves both the stateless (`extState`) and the linked
/// (`continue`) entry points of its family.
#[derive(Debug)]
pub enum Lz4Context {
    Fast(*mut Lz4StreamT),
    Hc(*mut Lz4StreamHcT),
}

// The context is plain codec state; it moves with its buffer between
// threads but is only ever used by one job at a time.
unsafe impl Send for Lz4Context {}

impl Lz4Context {
    /// Allocate a fast-codec context.
    pub fn new_fast() -> ZcpResult<Self> {
        let ptr = unsafe { LZ4_createStream() };
        if ptr.is_null() {
            return Err(ZcpError::Compress("cannot allocate lz4 context".into()));
        }
        Ok(Lz4Context::Fast(ptr))
    }

    /// Allocate a high-compression context.
    pub fn new_hc() -> ZcpResult<Self> {
        let ptr = unsafe { LZ4_createStreamHC() };
        if ptr.is_null() {
            return Err(ZcpError::Compress("cannot allocate lz4 HC context".into()));
        }
        Ok(Lz4Context::Hc(ptr))
    }
}

impl Drop for Lz4Context {
    fn drop(&mut self) {
        unsafe {
            match *self {
                Lz4Context::Fast(p) => {
                    LZ4_freeStream(p);
                }
                Lz4Context::Hc(p) => {
                    LZ4_freeStreamHC(p);
                }
            }
        }
    }
}

fn fast_state(ctx: &mut Lz4Context) -> *mut Lz4StreamT {
    match ctx {
        Lz4Context::Fast(p) => *p,
        Lz4Context::Hc(_) => unreachable!("fast codec paired with HC context"),
    }
}

fn hc_state(ctx: &mut Lz4Context) -> *mut Lz4StreamHcT {
    match ctx {
        Lz4Context::Hc(p) => *p,
        Lz4Context::Fast(_) => unreachable!("HC codec paired with fast context"),
    }
}

/// `LZ4_compress_fast_extState`: stateless fast compression.
///
/// Returns the compressed size, or <= 0 when the output does not fit in
/// `dst`.
pub fn compress_fast_extstate(ctx: &mut Lz4Context, src: &[u8], dst: &mut [u8], level: u32) -> i32 {
    unsafe {
        LZ4_compress_fast_extState(
            fast_state(ctx) as *mut c_void,
            src.as_ptr() as *const c_char,
            dst.as_mut_ptr() as *mut c_char,
            src.len() as c_int,
            dst.len() as c_int,
            level.max(1) as c_int,
        )
    }
}

/// `LZ4_compress_fast_continue`: fast compression chaining the previous
/// block as dictionary.
pub fn compress_fast_continue(ctx: &mut Lz4Context, src: &[u8], dst: &mut [u8], level: u32) -> i32 {
    unsafe {
        LZ4_compress_fast_continue(
            fast_state(ctx),
            src.as_ptr() as *const c_char,
            dst.as_mut_ptr() as *mut c_char,
            src.len() as c_int,
            dst.len() as c_int,
            level.max(1) as c_int,
        )
    }
}

/// `LZ4_compress_HC_extStateHC`: stateless high compression.
pub fn compress_hc_extstate(ctx: &mut Lz4Context, src: &[u8], dst: &mut [u8], level: u32) -> i32 {
    unsafe {
        LZ4_compress_HC_extStateHC(
            hc_state(ctx) as *mut c_void,
            src.as_ptr() as *const c_char,
            dst.as_mut_ptr() as *mut c_char,
            src.len() as c_int,
            dst.len() as c_int,
            level as c_int,
        )
    }
}

/// `LZ4_compress_HC_continue`: high compression chaining the previous
/// block as dictionary. The level is fixed at context creation.
pub fn compress_hc_continue(ctx: &mut Lz4Context, src: &[u8], dst: &mut [u8]) -> i32 {
    unsafe {
        LZ4_compress_HC_continue(
            hc_state(ctx),
            src.as_ptr() as *const c_char,
            dst.as_mut_ptr() as *mut c_char,
            src.len() as c_int,
            dst.len() as c_int,
        )
    }
}

/// `LZ4_decompress_safe`: decode one compressed block.
///
/// Returns the decoded size, or < 0 on malformed input or when the
/// output does not fit in `dst`.
pub fn decompress_safe(src: &[u8], dst: &mut [u8]) -> i32 {
    unsafe {
        LZ4_decompress_safe(
            src.as_ptr() as *const c_char,
            dst.as_mut_ptr() as *mut c_char,
            src.len() as c_int,
            dst.len() as c_int,
        )
    }
}
