//! File-level framing: header, block length words, and the tail index.
//!
//! **Header (7 bytes):** magic `0x184D2204` LE, one flag byte, one
//! block-size-id byte (`(id & 7) << 4`), and a CRC byte equal to the
//! second byte of the XXH32 of the flag and block-size bytes (seed 0).
//!
//! **Block frames:** a little-endian u32 length word followed by the
//! payload. The low 31 bits carry the payload size; the high bit marks a
//! payload stored raw. A zero word terminates the block sequence, and is
//! followed by the XXH32 digest of the whole uncompressed stream.
//!
//! **Tail index:** a skippable frame (`0x184D2A50`) whose payload is an
//! identification record plus one `(uoff, zoff)` LE32 pair per block.
//! The 8-byte skippable header is written a second time after the
//! payload so the tail can be located by reading backwards from the end
//! of the file.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, trace};
use xxhash_rust::xxh32::xxh32;

use crate::{ZcpError, ZcpResult, CHECKSUM_SEED};

/// LZ4 frame magic number.
pub const LZ4F_MAGIC: u32 = 0x184D_2204;

/// First magic number of the skippable-frame range.
pub const SKIPPABLE_MAGIC: u32 = 0x184D_2A50;

/// Application magic identifying zcp metadata inside a skippable frame.
pub const INDEX_APP_MAGIC: u32 = 0xCAFE_DECA;

/// Version of the index metadata record.
pub const INDEX_VERSION: u32 = 1;

/// Metadata type tag for the seek index.
pub const META_TYPE_INDEX: u32 = 0;

/// High bit of a length word: payload is stored uncompressed.
pub const UNCOMPRESSED_BIT: u32 = 1 << 31;

/// Low 31 bits of a length word: payload size.
pub const SIZE_MASK: u32 = 0x7FFF_FFFF;

/// Size of the on-disk file header. The descriptor's reserved fourth
/// byte is not written.
pub const HEADER_LEN: usize = 7;

/// Size of a block length word.
pub const BLOCK_WORD_LEN: usize = 4;

/// The only flag byte this implementation reads or writes: version 01,
/// independent blocks, stream checksum on, no block checksums, no
/// content size, no preset dictionary.
pub const FLAG_BYTE: u8 = 0b0110_0100;

/// Blocks never chain dictionary state across block boundaries.
pub const BLOCK_INDEPENDENCE: bool = true;

/// The stream digest is always written after the end-of-stream word.
pub const STREAM_CHECKSUM: bool = true;

const META_HEADER_LEN: usize = 8;
const META_IDENT_LEN: usize = 16;
const INDEX_PAIR_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Block size ids
// ---------------------------------------------------------------------------

/// Block-size id stored in bits 4–6 of the header's third byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockSizeId {
    Max64Kb = 4,
    Max256Kb = 5,
    Max1Mb = 6,
    Max4Mb = 7,
}

/// Largest block size any id can describe.
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

impl BlockSizeId {
    /// Smallest id whose cap covers `block_size`.
    pub fn for_block_size(block_size: usize) -> Self {
        if block_size <= 64 * 1024 {
            BlockSizeId::Max64Kb
        } else if block_size <= 256 * 1024 {
            BlockSizeId::Max256Kb
        } else if block_size <= 1024 * 1024 {
            BlockSizeId::Max1Mb
        } else {
            BlockSizeId::Max4Mb
        }
    }

    /// Byte cap for this id.
    pub fn cap(self) -> usize {
        match self {
            BlockSizeId::Max64Kb => 64 * 1024,
            BlockSizeId::Max256Kb => 256 * 1024,
            BlockSizeId::Max1Mb => 1024 * 1024,
            BlockSizeId::Max4Mb => 4 * 1024 * 1024,
        }
    }

    fn from_bits(blk: u8) -> Option<Self> {
        match (blk >> 4) & 7 {
            4 => Some(BlockSizeId::Max64Kb),
            5 => Some(BlockSizeId::Max256Kb),
            6 => Some(BlockSizeId::Max1Mb),
            7 => Some(BlockSizeId::Max4Mb),
            _ => None,
        }
    }

    fn to_bits(self) -> u8 {
        ((self as u8) & 7) << 4
    }
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub bsid: BlockSizeId,
}

impl FileHeader {
    pub fn new(bsid: BlockSizeId) -> Self {
        FileHeader { bsid }
    }

    /// Serialize: magic, flag, block-size bits, CRC.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let blk = self.bsid.to_bits();
        let magic = LZ4F_MAGIC.to_le_bytes();
        [
            magic[0],
            magic[1],
            magic[2],
            magic[3],
            FLAG_BYTE,
            blk,
            header_crc(FLAG_BYTE, blk),
        ]
    }

    /// Parse and validate a 7-byte header.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> ZcpResult<Self> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != LZ4F_MAGIC {
            return Err(ZcpError::Header("invalid magic number".into()));
        }
        let flag = bytes[4];
        let blk = bytes[5];
        if flag != FLAG_BYTE {
            return Err(ZcpError::Header("unhandled lz4 file format".into()));
        }
        if bytes[6] != header_crc(flag, blk) {
            return Err(ZcpError::Header("header crc mismatch".into()));
        }
        let bsid = BlockSizeId::from_bits(blk)
            .ok_or_else(|| ZcpError::Header("invalid block size id".into()))?;
        Ok(FileHeader { bsid })
    }
}

/// Header CRC: second byte of the XXH32 of the two descriptor bytes.
pub fn header_crc(flag: u8, blk: u8) -> u8 {
    ((xxh32(&[flag, blk], CHECKSUM_SEED) >> 8) & 0xFF) as u8
}

// ---------------------------------------------------------------------------
// Block length words
// ---------------------------------------------------------------------------

/// Encode a block length word.
pub fn encode_block_word(len: usize, raw: bool) -> [u8; BLOCK_WORD_LEN] {
    let mut word = (len as u32) & SIZE_MASK;
    if raw {
        word |= UNCOMPRESSED_BIT;
    }
    word.to_le_bytes()
}

/// Decode a block length word into `(payload size, raw)`.
pub fn decode_block_word(bytes: [u8; BLOCK_WORD_LEN]) -> (u32, bool) {
    let word = u32::from_le_bytes(bytes);
    (word & SIZE_MASK, word & UNCOMPRESSED_BIT != 0)
}

// ---------------------------------------------------------------------------
// Seek index
// ---------------------------------------------------------------------------

/// One block of the seek index: where it starts in the uncompressed and
/// the compressed stream, and how long it is in each.
///
/// Only the offsets are stored on disk; sizes are recovered from
/// adjacent entries when the tail is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub uoff: u64,
    pub ulen: u64,
    pub zoff: u64,
    pub zlen: u64,
}

/// Find the entry covering `target`: the one with the largest
/// `uoff <= target`.
pub fn find_entry(index: &[IndexEntry], target: u64) -> Option<&IndexEntry> {
    let idx = index.partition_point(|e| e.uoff <= target);
    if idx == 0 {
        None
    } else {
        Some(&index[idx - 1])
    }
}

/// Write the stream tail: end-of-stream word, stream digest, and the
/// skippable frame carrying the index. The skippable header is repeated
/// after the payload as the reverse-seek anchor.
pub fn write_tail<W: Write>(
    w: &mut W,
    digest: Option<u32>,
    index: &[IndexEntry],
) -> io::Result<()> {
    w.write_all(&0u32.to_le_bytes())?;
    if let Some(d) = digest {
        w.write_all(&d.to_le_bytes())?;
    }

    let payload = META_IDENT_LEN + index.len() * INDEX_PAIR_LEN;
    let mut header = [0u8; META_HEADER_LEN];
    header[..4].copy_from_slice(&SKIPPABLE_MAGIC.to_le_bytes());
    header[4..].copy_from_slice(&((payload + META_HEADER_LEN) as u32).to_le_bytes());

    w.write_all(&header)?;
    w.write_all(&INDEX_APP_MAGIC.to_le_bytes())?;
    w.write_all(&INDEX_VERSION.to_le_bytes())?;
    w.write_all(&META_TYPE_INDEX.to_le_bytes())?;
    w.write_all(&((index.len() * INDEX_PAIR_LEN) as u32).to_le_bytes())?;
    for entry in index {
        w.write_all(&(entry.uoff as u32).to_le_bytes())?;
        w.write_all(&(entry.zoff as u32).to_le_bytes())?;
    }
    w.write_all(&header)?;

    debug!("wrote tail index: {} entries", index.len());
    Ok(())
}

/// Locate and parse the tail index of an open stream.
///
/// Returns an empty index when the file carries no recognizable
/// skippable tail; such files are still sequentially readable. The
/// stream position is unspecified afterwards; callers reseek.
pub fn read_index<R: Read + Seek>(r: &mut R) -> ZcpResult<Vec<IndexEntry>> {
    let file_len = r
        .seek(SeekFrom::End(0))
        .map_err(|e| ZcpError::Read(format!("error locating lz4 tail: {e}")))?;
    if file_len < (HEADER_LEN + META_HEADER_LEN) as u64 {
        return Ok(Vec::new());
    }

    // Second copy of the skippable header sits at the very end.
    let mut header = [0u8; META_HEADER_LEN];
    r.seek(SeekFrom::End(-(META_HEADER_LEN as i64)))
        .and_then(|_| r.read_exact(&mut header))
        .map_err(|e| ZcpError::Read(format!("error reading lz4 tail second header: {e}")))?;
    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
    if magic != SKIPPABLE_MAGIC {
        trace!("no skippable tail (magic {magic:#x})");
        return Ok(Vec::new());
    }
    if size < (META_IDENT_LEN + META_HEADER_LEN) as u64
        || size + META_HEADER_LEN as u64 > file_len
    {
        return Err(ZcpError::Meta("corrupt tail size".into()));
    }

    // `size` spans ident + pairs + the trailing header copy; the frame's
    // first header sits just before it.
    let tail_start = file_len - META_HEADER_LEN as u64 - size;
    r.seek(SeekFrom::End(-(size as i64)))
        .map_err(|e| ZcpError::Read(format!("error seeking lz4 meta data: {e}")))?;
    let mut payload = vec![0u8; size as usize - META_HEADER_LEN];
    r.read_exact(&mut payload)
        .map_err(|e| ZcpError::Read(format!("error reading lz4 meta data: {e}")))?;

    let word = |off: usize| -> u32 {
        u32::from_le_bytes([
            payload[off],
            payload[off + 1],
            payload[off + 2],
            payload[off + 3],
        ])
    };
    let app_magic = word(0);
    let version = word(4);
    let meta_type = word(8);
    let index_size = word(12) as usize;
    if app_magic != INDEX_APP_MAGIC || version != INDEX_VERSION || meta_type != META_TYPE_INDEX {
        trace!("skippable tail holds unknown metadata, ignoring");
        return Ok(Vec::new());
    }
    if index_size % INDEX_PAIR_LEN != 0
        || META_IDENT_LEN + index_size != size as usize - META_HEADER_LEN
    {
        return Err(ZcpError::Meta("index size mismatch".into()));
    }

    let count = index_size / INDEX_PAIR_LEN;
    let mut index = Vec::with_capacity(count);
    for i in 0..count {
        let off = META_IDENT_LEN + i * INDEX_PAIR_LEN;
        let uoff = word(off) as u64;
        let zoff = word(off + 4) as u64;
        let (ulen, zlen) = if i + 1 < count {
            let next = META_IDENT_LEN + (i + 1) * INDEX_PAIR_LEN;
            let next_uoff = word(next) as u64;
            let next_zoff = word(next + 4) as u64;
            if next_uoff <= uoff || next_zoff <= zoff {
                return Err(ZcpError::Meta("index offsets not monotonic".into()));
            }
            (next_uoff - uoff, next_zoff - zoff)
        } else {
            // Last block: the tail follows it directly, so the distance
            // to the skippable frame bounds its compressed span. The
            // uncompressed span is not stored; the same bound stands in.
            if zoff >= tail_start {
                return Err(ZcpError::Meta("index offsets not monotonic".into()));
            }
            (tail_start - zoff, tail_start - zoff)
        };
        index.push(IndexEntry {
            uoff,
            ulen,
            zoff,
            zlen,
        });
    }

    debug!("parsed tail index: {} entries, tail at {tail_start}", index.len());
    Ok(index)
}
