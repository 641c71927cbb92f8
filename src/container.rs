//! Chunked-LZ4 container — reassembles the logical image.
//!
//! # On-disk layout (all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic          = "SNFHFZLC"  (8 ASCII bytes)
//!    8      4   chunk_count    (LE i32)
//!   12      4   header_size    (LE i32) — byte length of the literal header
//!   16   N×12   chunk table: (compressed_size, uncompressed_size, eof_offset)
//!   ...    ...  padding up to header_size
//!   header_size onward: compressed chunk bodies, in table order
//! ```
//!
//! # Image assembly
//! The image is the first `header_size` bytes of the file copied verbatim,
//! followed by the concatenation of the decompressed chunks.  Offsets stored
//! inside the image are absolute within the original uncompressed file, so
//! prepending the literal header makes them directly usable — no offset
//! adjustment is ever applied.
//!
//! # Chunk predicate
//! A chunk is decompressed only when `0 < compressed_size < uncompressed_size`.
//! Chunks failing the predicate are metadata sentinels: their bytes are read
//! (the cursor must still pass over them) but contribute nothing to the image.
//!
//! # Invariants (hard failures)
//! - For every chunk, `eof_offset == 0` or the cursor equals `eof_offset`
//!   immediately after the chunk's compressed body.
//! - Each decompressed chunk's length equals its declared `uncompressed_size`.

use log::debug;
use std::io::SeekFrom;

use crate::cursor::Cursor;
use crate::error::{Result, SaveError};

/// 8-byte container magic.
pub const CONTAINER_MAGIC: &str = "SNFHFZLC";

/// One entry of the chunk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub compressed_size:   i32,
    pub uncompressed_size: i32,
    /// Expected cursor position after this chunk's body; 0 means unchecked.
    pub eof_offset:        i32,
}

impl ChunkInfo {
    /// True when the chunk holds compressed payload rather than a sentinel.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        0 < self.compressed_size && self.compressed_size < self.uncompressed_size
    }
}

/// Validate the container and reassemble the logical image.
///
/// Returns `(image, header_size)`.  Corruption is fatal; there is no
/// partial image.
pub fn decompress(file: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut cur = Cursor::new(file);

    let magic = cur.read_ascii(8)?;
    if magic != CONTAINER_MAGIC {
        return Err(SaveError::BadMagic {
            offset:   0,
            expected: CONTAINER_MAGIC,
            found:    magic,
        });
    }

    let chunk_count = cur.read_i32()?;
    let header_size = cur.read_i32()?;
    if chunk_count < 0 || header_size < 16 {
        return Err(SaveError::SizeMismatch {
            offset:   8,
            what:     "container header fields",
            declared: chunk_count.min(header_size) as i64,
            observed: file.len() as i64,
        });
    }

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        chunks.push(ChunkInfo {
            compressed_size:   cur.read_i32()?,
            uncompressed_size: cur.read_i32()?,
            eof_offset:        cur.read_i32()?,
        });
    }

    // The literal header is part of the image: absolute offsets inside the
    // decompressed data count it.
    let header_size = header_size as usize;
    cur.seek(SeekFrom::Start(0))?;
    let expected_len: usize = header_size
        + chunks
            .iter()
            .filter(|c| c.is_compressed())
            .map(|c| c.uncompressed_size as usize)
            .sum::<usize>();
    let mut image = Vec::with_capacity(expected_len);
    image.extend_from_slice(cur.read_bytes(header_size)?);

    cur.seek(SeekFrom::Start(header_size as u64))?;
    for (i, chunk) in chunks.iter().enumerate() {
        let body_offset = cur.tell();
        let raw = cur.read_bytes(chunk.compressed_size.max(0) as usize)?;

        if chunk.eof_offset != 0 && cur.tell() != chunk.eof_offset as u64 {
            return Err(SaveError::SizeMismatch {
                offset:   body_offset,
                what:     "chunk eof_offset",
                declared: chunk.eof_offset as i64,
                observed: cur.tell() as i64,
            });
        }

        if chunk.is_compressed() {
            let data = lz4_flex::block::decompress(raw, chunk.uncompressed_size as usize)
                .map_err(|source| SaveError::DecompressFailed { offset: body_offset, source })?;
            if data.len() != chunk.uncompressed_size as usize {
                return Err(SaveError::SizeMismatch {
                    offset:   body_offset,
                    what:     "decompressed chunk length",
                    declared: chunk.uncompressed_size as i64,
                    observed: data.len() as i64,
                });
            }
            image.extend_from_slice(&data);
        } else {
            debug!(
                "chunk {i}: sentinel (compressed={}, uncompressed={}), skipped",
                chunk.compressed_size, chunk.uncompressed_size
            );
        }
    }

    debug!(
        "container: {} chunk(s), header {} B, image {} B",
        chunks.len(),
        header_size,
        image.len()
    );
    Ok((image, header_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a container file around pre-compressed chunk bodies.
    fn build_container(header_size: usize, chunks: &[(Vec<u8>, i32, i32)]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(CONTAINER_MAGIC.as_bytes());
        file.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
        file.extend_from_slice(&(header_size as i32).to_le_bytes());
        for (body, uncompressed, eof) in chunks {
            file.extend_from_slice(&(body.len() as i32).to_le_bytes());
            file.extend_from_slice(&uncompressed.to_le_bytes());
            file.extend_from_slice(&eof.to_le_bytes());
        }
        assert!(file.len() <= header_size, "chunk table overflows declared header");
        file.resize(header_size, 0);
        for (body, _, _) in chunks {
            file.extend_from_slice(body);
        }
        file
    }

    #[test]
    fn minimal_container_prepends_header() {
        let plain = vec![0u8; 4096];
        let body = lz4_flex::block::compress(&plain);
        assert!(body.len() < plain.len());

        let file = build_container(32, &[(body, plain.len() as i32, 0)]);
        let (image, header_size) = decompress(&file).unwrap();

        assert_eq!(header_size, 32);
        assert_eq!(image.len(), 32 + plain.len());
        assert_eq!(&image[..32], &file[..32]);
        assert_eq!(&image[32..], &plain[..]);
    }

    #[test]
    fn eof_offset_checked_when_nonzero() {
        let plain = vec![7u8; 1024];
        let body = lz4_flex::block::compress(&plain);
        let eof = (32 + body.len()) as i32;

        let good = build_container(32, &[(body.clone(), plain.len() as i32, eof)]);
        assert!(decompress(&good).is_ok());

        let bad = build_container(32, &[(body, plain.len() as i32, eof + 1)]);
        match decompress(&bad).unwrap_err() {
            SaveError::SizeMismatch { what, .. } => assert_eq!(what, "chunk eof_offset"),
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn sentinel_chunks_are_skipped() {
        // compressed == uncompressed fails the strict predicate.
        let sentinel = vec![0xAB; 64];
        let plain = vec![3u8; 2048];
        let body = lz4_flex::block::compress(&plain);

        let file = build_container(
            48,
            &[(sentinel, 64, 0), (body, plain.len() as i32, 0)],
        );
        let (image, _) = decompress(&file).unwrap();
        // Only the genuinely compressed chunk lands in the image.
        assert_eq!(image.len(), 48 + plain.len());
        assert_eq!(&image[48..], &plain[..]);
    }

    #[test]
    fn wrong_magic_is_fatal() {
        let file = b"NOTASAVExxxxxxxxxxxxxxxx".to_vec();
        match decompress(&file).unwrap_err() {
            SaveError::BadMagic { expected, .. } => assert_eq!(expected, CONTAINER_MAGIC),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn truncated_chunk_body_is_fatal() {
        let plain = vec![0u8; 512];
        let mut body = lz4_flex::block::compress(&plain);
        let declared = body.len() as i32;
        body.truncate(body.len() - 4);

        let mut file = Vec::new();
        file.extend_from_slice(CONTAINER_MAGIC.as_bytes());
        file.extend_from_slice(&1i32.to_le_bytes());
        file.extend_from_slice(&32i32.to_le_bytes());
        file.extend_from_slice(&declared.to_le_bytes());
        file.extend_from_slice(&(plain.len() as i32).to_le_bytes());
        file.extend_from_slice(&0i32.to_le_bytes());
        file.resize(32, 0);
        file.extend_from_slice(&body);

        assert!(matches!(
            decompress(&file).unwrap_err(),
            SaveError::ShortRead { .. }
        ));
    }

    #[test]
    fn corrupt_lz4_stream_is_fatal() {
        let garbage = vec![0xF0u8; 100];
        let file = build_container(32, &[(garbage, 4096, 0)]);
        assert!(matches!(
            decompress(&file).unwrap_err(),
            SaveError::DecompressFailed { .. }
        ));
    }
}
