//! Block compression and decompression tasks run by worker threads.
//!
//! The compressor picks one of four liblz4 entry points from the
//! compression level and the block-independence flag, and prefixes each
//! payload with its length word. Output that cannot beat the input is
//! stored raw with the high bit of the word set.
//!
//! The decoder makes a single pass over a buffer of concatenated block
//! frames, decoding as many whole blocks as fit, and reports why it
//! stopped through a return code. Unconsumed input is moved to the
//! front of the buffer so the caller can append more bytes and decode
//! again.

use log::trace;

use crate::frame::{decode_block_word, encode_block_word, BLOCK_WORD_LEN};
use crate::lz4::{self, Lz4Context};
use crate::pool::BlockBuffer;
use crate::{ZcpResult, MIN_HC_LEVEL};

/// Compression return code: the block was stored raw.
pub const RC_UNZIPPED: u32 = 0;
/// Compression return code: the block was compressed.
pub const RC_ZIPPED: u32 = 1;

/// Decode return code: all input consumed.
pub const RC_OK: u32 = 0;
/// Decode return code: a block frame extends past the input.
pub const RC_SHORT_INPUT: u32 = 1;
/// Decode return code: a decoded block did not fit in the output side.
pub const RC_SHORT_OUTPUT: u32 = 2;
/// Decode return code: the end-of-stream word was reached.
pub const RC_EOS: u32 = 3;

/// The four block compressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    FastExtState,
    FastContinue,
    HcExtState,
    HcContinue,
}

impl Codec {
    /// Selection table keyed on `(level >= MIN_HC_LEVEL, independence)`.
    pub fn select(level: u32, block_independence: bool) -> Codec {
        match (level >= MIN_HC_LEVEL, block_independence) {
            (false, true) => Codec::FastExtState,
            (false, false) => Codec::FastContinue,
            (true, true) => Codec::HcExtState,
            (true, false) => Codec::HcContinue,
        }
    }

    /// Allocate the context family this codec needs.
    pub fn new_context(self) -> ZcpResult<Lz4Context> {
        match self {
            Codec::FastExtState | Codec::FastContinue => Lz4Context::new_fast(),
            Codec::HcExtState | Codec::HcContinue => Lz4Context::new_hc(),
        }
    }
}

/// Compress a buffer's input side into its output side, length word
/// included. Runs on a worker thread.
///
/// The codec is offered a destination no larger than the input, so a
/// block that cannot shrink falls back to the raw marker.
pub fn compress_block(buf: &mut BlockBuffer, codec: Codec, level: u32) {
    let seq = buf.seq();
    let (input, out, ctx) = buf.compress_parts();
    let in_len = input.len();
    let ctx = ctx.expect("compress buffer without codec context");
    let (word_area, payload_area) = out.split_at_mut(BLOCK_WORD_LEN);

    let dst = &mut payload_area[..in_len];
    let r = match codec {
        Codec::FastExtState => lz4::compress_fast_extstate(ctx, input, dst, level),
        Codec::FastContinue => lz4::compress_fast_continue(ctx, input, dst, level),
        Codec::HcExtState => lz4::compress_hc_extstate(ctx, input, dst, level),
        Codec::HcContinue => lz4::compress_hc_continue(ctx, input, dst),
    };

    let (out_len, rc) = if r <= 0 {
        payload_area[..in_len].copy_from_slice(input);
        word_area.copy_from_slice(&encode_block_word(in_len, true));
        (in_len + BLOCK_WORD_LEN, RC_UNZIPPED)
    } else {
        word_area.copy_from_slice(&encode_block_word(r as usize, false));
        (r as usize + BLOCK_WORD_LEN, RC_ZIPPED)
    };
    trace!(
        "buffer {seq}: {} {in_len} -> {out_len}",
        if rc == RC_ZIPPED { "zipped" } else { "stored" },
    );
    buf.finish_compress(out_len, rc);
}

/// Decode one pass of whole block frames from a buffer's input side
/// into its output side. Runs on a worker thread.
///
/// Stops at short input, short output, or the end-of-stream word. On
/// EOS the stream digest is captured when its four bytes are already in
/// the buffer, and the rest of the input (checksum and tail metadata)
/// is consumed.
pub fn decode_blocks(buf: &mut BlockBuffer) {
    let seq = buf.seq();
    let (input, in_len, out) = buf.decode_parts();
    let out_cap = out.len();
    let mut inptr = 0usize;
    let mut outptr = 0usize;
    let mut rc = RC_OK;
    let mut eos_digest = None;

    while inptr + BLOCK_WORD_LEN <= in_len {
        let (sz, raw) = decode_block_word([
            input[inptr],
            input[inptr + 1],
            input[inptr + 2],
            input[inptr + 3],
        ]);
        let sz = sz as usize;

        if sz == 0 {
            rc = RC_EOS;
            let after = inptr + BLOCK_WORD_LEN;
            if in_len - after >= 4 {
                eos_digest = Some(u32::from_le_bytes([
                    input[after],
                    input[after + 1],
                    input[after + 2],
                    input[after + 3],
                ]));
            }
            inptr = in_len;
            break;
        }
        if inptr + BLOCK_WORD_LEN + sz > in_len {
            rc = RC_SHORT_INPUT;
            break;
        }

        let payload = inptr + BLOCK_WORD_LEN;
        let written = if raw {
            if outptr + sz > out_cap {
                rc = RC_SHORT_OUTPUT;
                break;
            }
            out[outptr..outptr + sz].copy_from_slice(&input[payload..payload + sz]);
            sz
        } else {
            let w = lz4::decompress_safe(&input[payload..payload + sz], &mut out[outptr..]);
            if w <= 0 {
                rc = RC_SHORT_OUTPUT;
                break;
            }
            w as usize
        };
        outptr += written;
        inptr += BLOCK_WORD_LEN + sz;
    }

    let remaining = in_len - inptr;
    input.copy_within(inptr..in_len, 0);
    trace!("buffer {seq}: decoded {outptr} bytes, carry {remaining}, rc {rc}");
    buf.finish_decode(outptr, remaining, rc, eos_digest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::UNCOMPRESSED_BIT;

    fn buffer_with(data: &[u8], block_size: usize) -> BlockBuffer {
        let mut buf = BlockBuffer::new(0, block_size, block_size + BLOCK_WORD_LEN);
        assert_eq!(buf.add(data), data.len());
        buf
    }

    /// Feed a compressed frame through the decoder with output cap `cap`.
    fn decode_one(frame: &[u8], cap: usize) -> (Vec<u8>, u32) {
        let mut buf = BlockBuffer::new(1, frame.len().max(cap + 4), cap);
        buf.add(frame);
        decode_blocks(&mut buf);
        (buf.out_filled().to_vec(), buf.rc())
    }

    #[test]
    fn test_compress_round_trip_all_codecs() {
        let input = b"round and round and round the block goes. ".repeat(50);
        for codec in [
            Codec::FastExtState,
            Codec::FastContinue,
            Codec::HcExtState,
            Codec::HcContinue,
        ] {
            let mut buf = buffer_with(&input, input.len());
            buf.ctx = Some(codec.new_context().unwrap());
            compress_block(&mut buf, codec, 9);
            assert_eq!(buf.rc(), RC_ZIPPED, "{codec:?} did not compress");
            assert!(buf.out_len() < input.len());

            let (out, rc) = decode_one(buf.out_filled(), input.len());
            assert_eq!(rc, RC_OK, "{codec:?}");
            assert_eq!(out, input, "{codec:?}");
        }
    }

    #[test]
    fn test_incompressible_stored_raw() {
        let input: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let mut buf = buffer_with(&input, input.len());
        buf.ctx = Some(Codec::FastExtState.new_context().unwrap());
        compress_block(&mut buf, Codec::FastExtState, 1);
        assert_eq!(buf.rc(), RC_UNZIPPED);
        assert_eq!(buf.out_len(), input.len() + BLOCK_WORD_LEN);

        let word = u32::from_le_bytes(buf.out_filled()[..4].try_into().unwrap());
        assert_ne!(word & UNCOMPRESSED_BIT, 0);
        assert_eq!((word & !UNCOMPRESSED_BIT) as usize, input.len());
        assert_eq!(&buf.out_filled()[4..], &input[..]);

        let (out, rc) = decode_one(buf.out_filled(), input.len());
        assert_eq!(rc, RC_OK);
        assert_eq!(out, input);
    }

    #[test]
    fn test_decode_short_input_carries_over() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&encode_block_word(100, true));
        frame.extend_from_slice(&[7u8; 60]); // 40 bytes missing

        let mut buf = BlockBuffer::new(0, 256, 256);
        buf.add(&frame);
        decode_blocks(&mut buf);
        assert_eq!(buf.rc(), RC_SHORT_INPUT);
        assert_eq!(buf.out_len(), 0);
        assert_eq!(buf.in_len(), frame.len());

        // Supply the rest and decode again.
        buf.add(&[7u8; 40]);
        decode_blocks(&mut buf);
        assert_eq!(buf.rc(), RC_OK);
        assert_eq!(buf.out_len(), 100);
        assert!(buf.in_is_empty());
    }

    #[test]
    fn test_decode_eos_captures_digest() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_block_word(3, true));
        stream.extend_from_slice(b"abc");
        stream.extend_from_slice(&0u32.to_le_bytes());
        stream.extend_from_slice(&0x1122_3344u32.to_le_bytes());
        stream.extend_from_slice(&[0xEE; 10]); // tail metadata, consumed blindly

        let mut buf = BlockBuffer::new(0, 64, 64);
        buf.add(&stream);
        decode_blocks(&mut buf);
        assert_eq!(buf.rc(), RC_EOS);
        assert_eq!(buf.out_filled(), b"abc");
        assert_eq!(buf.eos_digest(), Some(0x1122_3344));
        assert!(buf.in_is_empty());
    }

    #[test]
    fn test_decode_eos_without_digest() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&0u32.to_le_bytes());

        let mut buf = BlockBuffer::new(0, 16, 16);
        buf.add(&stream);
        decode_blocks(&mut buf);
        assert_eq!(buf.rc(), RC_EOS);
        assert_eq!(buf.eos_digest(), None);
    }

    #[test]
    fn test_decode_corrupt_block_reports_short_output() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&encode_block_word(8, false));
        frame.extend_from_slice(&[0xFF; 8]); // not a valid lz4 sequence

        let (_, rc) = decode_one(&frame, 64);
        assert_eq!(rc, RC_SHORT_OUTPUT);
    }

    #[test]
    fn test_codec_selection_table() {
        assert_eq!(Codec::select(1, true), Codec::FastExtState);
        assert_eq!(Codec::select(2, false), Codec::FastContinue);
        assert_eq!(Codec::select(3, true), Codec::HcExtState);
        assert_eq!(Codec::select(12, false), Codec::HcContinue);
    }
}
