use std::fs;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tempfile::TempDir;
use xxhash_rust::xxh32::xxh32;

use super::read::Lz4Reader;
use super::write::Lz4Writer;
use super::{detect_format, Format, ZFile};
use crate::engine::{RC_EOS, RC_SHORT_INPUT};
use crate::frame::UNCOMPRESSED_BIT;
use crate::ZcpError;

fn text_block(len: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn random_block(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

fn compress_to(path: &Path, data: &[u8], level: u32, block_size: usize, threads: usize) {
    let mut zf = ZFile::open_write(path, level, block_size, threads).unwrap();
    zf.write(data).unwrap();
    zf.close().unwrap();
    assert!(!zf.fail(), "{}", zf.str_error());
}

fn read_all(path: &Path) -> Vec<u8> {
    let mut zf = ZFile::open_read(path).unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = zf.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert!(zf.eof());
    out
}

fn temp_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

// --- envelope layout ---

#[test]
fn test_tiny_input_envelope() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "tiny.lz4");

    let mut zf = ZFile::open_write(&path, 1, 64 * 1024, 1).unwrap();
    zf.write(b"hello world").unwrap();
    zf.close().unwrap();

    // One write-side index entry: 11 plaintext bytes stored raw behind
    // the 7-byte header, framed as 4 + 11 bytes.
    let index = zf.index();
    assert_eq!(index.len(), 1);
    assert_eq!(
        (index[0].uoff, index[0].ulen, index[0].zoff, index[0].zlen),
        (0, 11, 7, 15)
    );

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &[0x04, 0x22, 0x4D, 0x18]);
    assert_eq!(bytes[4], 0b0110_0100);
    assert_eq!(bytes[5], 4 << 4);
    assert_eq!(bytes[6], ((xxh32(&[bytes[4], bytes[5]], 0) >> 8) & 0xFF) as u8);

    let word = u32::from_le_bytes(bytes[7..11].try_into().unwrap());
    assert_eq!(word, 11 | UNCOMPRESSED_BIT);
    assert_eq!(&bytes[11..22], b"hello world");

    // End of stream, then the stream digest.
    assert_eq!(&bytes[22..26], &[0, 0, 0, 0]);
    let digest = u32::from_le_bytes(bytes[26..30].try_into().unwrap());
    assert_eq!(digest, xxh32(b"hello world", 0));

    // Skippable tail with one (uoff, zoff) pair, header repeated.
    let magic = u32::from_le_bytes(bytes[30..34].try_into().unwrap());
    assert_eq!(magic, 0x184D_2A50);
    let size = u32::from_le_bytes(bytes[34..38].try_into().unwrap());
    assert_eq!(size, 16 + 8 + 8);
    assert_eq!(u32::from_le_bytes(bytes[38..42].try_into().unwrap()), 0xCAFE_DECA);
    assert_eq!(u32::from_le_bytes(bytes[42..46].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(bytes[46..50].try_into().unwrap()), 0);
    assert_eq!(u32::from_le_bytes(bytes[50..54].try_into().unwrap()), 8);
    assert_eq!(u32::from_le_bytes(bytes[54..58].try_into().unwrap()), 0);
    assert_eq!(u32::from_le_bytes(bytes[58..62].try_into().unwrap()), 7);
    assert_eq!(&bytes[62..70], &bytes[30..38]);
    assert_eq!(bytes.len(), 70);

    assert_eq!(read_all(&path), b"hello world");
}

#[test]
fn test_incompressible_block_stored_raw() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "raw.lz4");
    let data = random_block(65536);

    let mut zf = ZFile::open_write(&path, 1, 64 * 1024, 2).unwrap();
    zf.write(&data).unwrap();
    zf.close().unwrap();
    assert!(zf.ratio() < 100.0);

    let bytes = fs::read(&path).unwrap();
    let word = u32::from_le_bytes(bytes[7..11].try_into().unwrap());
    assert_ne!(word & UNCOMPRESSED_BIT, 0);
    assert_eq!(word & !UNCOMPRESSED_BIT, 65536);
    // header + frame + EOS + digest + tail(8 + 16 + 8 + 8)
    assert_eq!(bytes.len(), 7 + 65540 + 8 + 40);

    assert_eq!(read_all(&path), data);
}

// --- ordering and index ---

#[test]
fn test_multi_block_submission_order() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "abc.lz4");
    let mut data = vec![b'A'; 65536];
    data.extend(vec![b'B'; 65536]);
    data.extend(vec![b'C'; 65536]);

    let mut zf = ZFile::open_write(&path, 1, 64 * 1024, 2).unwrap();
    zf.write(&data).unwrap();
    zf.close().unwrap();

    // Write-side entries chain on both axes in submission order.
    let index = zf.index();
    assert_eq!(index.len(), 3);
    assert_eq!(index[0].uoff, 0);
    assert_eq!(index[1].uoff, 65536);
    assert_eq!(index[2].uoff, 131072);
    for pair in index.windows(2) {
        assert!(pair[0].uoff < pair[1].uoff);
        assert!(pair[0].zoff < pair[1].zoff);
        assert_eq!(pair[0].uoff + pair[0].ulen, pair[1].uoff);
        assert_eq!(pair[0].zoff + pair[0].zlen, pair[1].zoff);
    }

    assert_eq!(read_all(&path), data);

    // Parsed tail entries agree with the writer for all chained fields.
    let zf = ZFile::open_read(&path).unwrap();
    let parsed = zf.index();
    assert_eq!(parsed.len(), 3);
    for (written, parsed) in index.iter().zip(parsed).take(2) {
        assert_eq!(written, parsed);
    }
    assert_eq!(parsed[2].uoff, 131072);
    assert_eq!(parsed[2].zoff, index[2].zoff);
}

#[test]
fn test_backpressure_bounds_in_flight() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "bp.lz4");

    let mut writer = Lz4Writer::open(&path, 1, 1024, 2).unwrap();
    let chunk = text_block(1024);
    for _ in 0..16 {
        writer.write(&chunk).unwrap();
        assert!(writer.pool.in_flight_len() <= 2);
    }
    writer.close().unwrap();
    assert_eq!(read_all(&path).len(), 16 * 1024);
}

// --- seeking ---

#[test]
fn test_seek_by_uncompressed_offset() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "seek.lz4");
    let mut data = vec![b'A'; 65536];
    data.extend(vec![b'B'; 65536]);
    data.extend(vec![b'C'; 65536]);
    compress_to(&path, &data, 1, 64 * 1024, 2);

    let mut zf = ZFile::open_read(&path).unwrap();
    let mut buf = [0u8; 10];

    zf.seek_uncompressed(SeekFrom::Start(65536)).unwrap();
    zf.read(&mut buf).unwrap();
    assert_eq!(&buf, b"BBBBBBBBBB");

    // Back up within the stream.
    zf.seek_uncompressed(SeekFrom::Current(-11)).unwrap();
    zf.read(&mut buf).unwrap();
    assert_eq!(&buf, b"ABBBBBBBBB");

    // Mid-block target: the decoder drops the leading delta.
    zf.seek_uncompressed(SeekFrom::Start(131072 + 1000)).unwrap();
    zf.read(&mut buf).unwrap();
    assert_eq!(&buf, b"CCCCCCCCCC");

    // End whence resolves against the index span; stepping back by the
    // last entry's span lands on the last block boundary.
    let last = *zf.index().last().unwrap();
    zf.seek_uncompressed(SeekFrom::End(-(last.ulen as i64))).unwrap();
    zf.read(&mut buf).unwrap();
    assert_eq!(&buf, b"CCCCCCCCCC");

    // Every indexed block start reads back the matching plaintext slice.
    let entries: Vec<_> = zf.index().to_vec();
    for entry in entries.iter().take(entries.len() - 1) {
        zf.seek_uncompressed(SeekFrom::Start(entry.uoff)).unwrap();
        let mut block = vec![0u8; entry.ulen as usize];
        assert_eq!(zf.read(&mut block).unwrap(), block.len());
        let start = entry.uoff as usize;
        assert_eq!(block, &data[start..start + block.len()]);
    }

    // Seeking to the end of the uncompressed data leaves the stream at
    // end of file.
    zf.seek_uncompressed(SeekFrom::Start(data.len() as u64)).unwrap();
    assert_eq!(zf.read(&mut buf).unwrap(), 0);
    assert!(zf.eof());
}

#[test]
fn test_seek_without_index_fails() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "empty.lz4");
    compress_to(&path, b"", 1, 64 * 1024, 1);

    let mut zf = ZFile::open_read(&path).unwrap();
    assert!(matches!(
        zf.seek_uncompressed(SeekFrom::Start(0)),
        Err(ZcpError::Seek(_))
    ));
    assert!(zf.fail());
}

// --- decoder state machine ---

#[test]
fn test_short_input_carry_over() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "carry.lz4");

    // A compressible first block shifts every following raw frame off
    // the reader's buffer boundary, forcing a mid-frame read.
    let mut data = text_block(65536);
    let tail = random_block(2 * 65536);
    data.extend_from_slice(&tail);
    compress_to(&path, &data, 1, 64 * 1024, 1);

    let mut reader = Lz4Reader::open(&path).unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut saw_short_input = false;
    loop {
        let n = reader.read(&mut chunk).unwrap();
        if reader.rc == RC_SHORT_INPUT {
            saw_short_input = true;
        }
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert!(saw_short_input, "decoder never carried over input");
    assert_eq!(reader.rc, RC_EOS);
    assert_eq!(out, data);
}

#[test]
fn test_checksum_mismatch_latches_tail_error() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "bad.lz4");
    let data = random_block(65536);
    compress_to(&path, &data, 1, 64 * 1024, 1);

    // Flip one byte inside the raw payload: lengths stay valid, the
    // stream digest does not.
    let mut bytes = fs::read(&path).unwrap();
    bytes[7 + 4 + 100] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let mut zf = ZFile::open_read(&path).unwrap();
    let mut out = vec![0u8; data.len() + 16];
    let err = zf.read(&mut out).unwrap_err();
    assert!(matches!(err, ZcpError::Tail(_)), "{err}");
    assert!(zf.fail());
    assert!(zf.str_error().contains("checksum"));
}

#[test]
fn test_truncated_stream_reports_read_error() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "trunc.lz4");
    let data = random_block(65536);
    compress_to(&path, &data, 1, 64 * 1024, 1);

    let mut bytes = fs::read(&path).unwrap();
    bytes.truncate(7 + 4 + 1000); // mid-block, no end mark
    fs::write(&path, &bytes).unwrap();

    let mut zf = ZFile::open_read(&path).unwrap();
    let mut out = vec![0u8; data.len()];
    assert!(matches!(zf.read(&mut out), Err(ZcpError::Read(_))));
}

// --- round trips ---

#[test]
fn test_round_trip_levels_and_threads() {
    let dir = TempDir::new().unwrap();
    let mut data = text_block(300_000);
    data.extend(random_block(100_000));
    data.extend(text_block(50_000));

    for (name, level, block_size, threads) in [
        ("fast.lz4", 1, 64 * 1024, 4),
        ("hc.lz4", 9, 256 * 1024, 2),
        ("hc12.lz4", 12, 1024 * 1024, 0),
    ] {
        let path = temp_path(&dir, name);
        compress_to(&path, &data, level, block_size, threads);
        assert_eq!(read_all(&path), data, "level {level}");
    }
}

#[test]
fn test_round_trip_partial_final_block() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "partial.lz4");
    let data = text_block(65536 + 12345);
    compress_to(&path, &data, 1, 64 * 1024, 2);

    let zf = ZFile::open_read(&path).unwrap();
    assert_eq!(zf.index().len(), 2);
    assert_eq!(read_all(&path), data);
}

#[test]
fn test_empty_stream() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "empty.lz4");
    compress_to(&path, b"", 1, 64 * 1024, 2);

    // Header, end mark, digest, and an index with zero entries.
    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 7 + 4 + 4 + 8 + 16 + 8);

    let mut zf = ZFile::open_read(&path).unwrap();
    assert!(zf.index().is_empty());
    let mut buf = [0u8; 16];
    assert_eq!(zf.read(&mut buf).unwrap(), 0);
    assert!(zf.eof());
}

#[test]
fn test_passthrough_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "plain.bin");
    let data = text_block(10_000);

    let mut zf = ZFile::open_raw_write(&path).unwrap();
    zf.write(&data).unwrap();
    zf.close().unwrap();
    assert_eq!(zf.ratio(), 100.0);

    let mut zf = ZFile::open_raw_read(&path).unwrap();
    let mut out = vec![0u8; data.len()];
    assert_eq!(zf.read(&mut out).unwrap(), data.len());
    assert_eq!(out, data);

    zf.seek_uncompressed(SeekFrom::Start(45)).unwrap();
    let mut buf = [0u8; 3];
    zf.read(&mut buf).unwrap();
    assert_eq!(&buf, b"The");
}

// --- stream contract ---

#[test]
fn test_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "close.lz4");

    let mut zf = ZFile::open_write(&path, 1, 64 * 1024, 1).unwrap();
    zf.write(b"some data").unwrap();
    zf.close().unwrap();
    zf.close().unwrap();
    assert!(!zf.fail());
    assert_eq!(zf.str_error(), "");
}

#[test]
fn test_mode_misuse_latches_error() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "mode.lz4");

    let mut zf = ZFile::open_write(&path, 1, 64 * 1024, 1).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(zf.read(&mut buf), Err(ZcpError::Read(_))));
    assert!(zf.fail());
    assert!(zf.str_error().contains("write mode"));
    // The first error stays latched.
    assert!(matches!(zf.write(b"x"), Err(ZcpError::Read(_))));
}

#[test]
fn test_ratio_reporting() {
    let dir = TempDir::new().unwrap();
    let path = temp_path(&dir, "ratio.lz4");
    let data = text_block(512 * 1024);
    compress_to(&path, &data, 1, 64 * 1024, 4);

    let written = ZFile::open_read(&path).unwrap();
    assert!(written.ratio() > 100.0, "text should compress");
}

// --- format detection ---

#[test]
fn test_detect_format() {
    let dir = TempDir::new().unwrap();

    let good = temp_path(&dir, "good.lz4");
    compress_to(&good, b"payload", 1, 64 * 1024, 1);
    assert_eq!(detect_format(&good), Format::Lz4);

    let plain = temp_path(&dir, "plain.txt");
    fs::write(&plain, b"just some text, long enough to cover a header").unwrap();
    assert_eq!(detect_format(&plain), Format::None);

    let short = temp_path(&dir, "short.bin");
    fs::write(&short, &[0x04, 0x22, 0x4D]).unwrap();
    assert_eq!(detect_format(&short), Format::None);

    let bad_crc = temp_path(&dir, "badcrc.lz4");
    let mut bytes = fs::read(&good).unwrap();
    bytes[6] ^= 0xFF;
    fs::write(&bad_crc, &bytes).unwrap();
    assert_eq!(detect_format(&bad_crc), Format::None);

    assert_eq!(detect_format(dir.path().join("missing.lz4")), Format::None);
}
