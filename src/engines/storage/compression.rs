//! Checksummed compressed blocks
//!
//! A block wraps a payload of serialized records:
//!
//! ```text
//! [u32 uncompressed size][u32 compressed size][u32 crc32][deflate payload]
//! ```
//!
//! Integers are little-endian and the checksum covers the compressed
//! payload, so corruption is caught before anything is inflated.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::engines::{EngineError, EngineResult};

/// Size of the block header
pub const BLOCK_HEADER_LEN: usize = 12;

/// Upper bound on buffer space reserved from an untrusted size field
const MAX_PREALLOCATION: usize = 1 << 20;

/// Header fields of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub uncompressed_len: u32,
    pub compressed_len: u32,
    pub checksum: u32,
}

impl BlockHeader {
    /// Parse the header at the start of `bytes`, `None` if it is incomplete
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let field = |at: usize| -> Option<u32> {
            let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
            Some(u32::from_le_bytes(raw))
        };
        Some(Self {
            uncompressed_len: field(0)?,
            compressed_len: field(4)?,
            checksum: field(8)?,
        })
    }

    /// Total size of the framed block
    pub fn block_len(&self) -> usize {
        BLOCK_HEADER_LEN + self.compressed_len as usize
    }
}

/// Compress `payload` into a framed block
pub fn compress_block(payload: &[u8]) -> EngineResult<Vec<u8>> {
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| {
            EngineError::CorruptBlock(format!("payload of {} bytes is too large", payload.len()))
        })?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let compressed = encoder.finish()?;
    let compressed_len = u32::try_from(compressed.len())
        .map_err(|_| {
            EngineError::CorruptBlock(format!("compressed size {} is too large", compressed.len()))
        })?;

    let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + compressed.len());
    block.extend_from_slice(&uncompressed_len.to_le_bytes());
    block.extend_from_slice(&compressed_len.to_le_bytes());
    block.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
    block.extend_from_slice(&compressed);
    Ok(block)
}

/// Verify and inflate exactly one framed block
pub fn decompress_block(block: &[u8]) -> EngineResult<Vec<u8>> {
    let header = BlockHeader::parse(block)
        .ok_or_else(|| {
            EngineError::CorruptBlock(format!("truncated header ({} bytes)", block.len()))
        })?;
    if block.len() != header.block_len() {
        return Err(EngineError::CorruptBlock(format!(
            "block is {} bytes, header declares {}",
            block.len(),
            header.block_len()
        )));
    }

    let payload = &block[BLOCK_HEADER_LEN..];
    let checksum = crc32fast::hash(payload);
    if checksum != header.checksum {
        return Err(EngineError::CorruptBlock(format!(
            "checksum mismatch: computed {:#010x}, stored {:#010x}",
            checksum, header.checksum
        )));
    }

    // Read one byte past the declared size to notice oversized payloads
    let expected = header.uncompressed_len as usize;
    let mut inflated = Vec::with_capacity(expected.min(MAX_PREALLOCATION));
    DeflateDecoder::new(payload)
        .take(expected as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| EngineError::CorruptBlock(format!("inflate failed: {}", e)))?;
    if inflated.len() != expected {
        return Err(EngineError::CorruptBlock(format!(
            "inflated {} bytes, header declares {}",
            inflated.len(),
            expected
        )));
    }
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_round_trip() {
        let payload: Vec<u8> = b"ACGT".iter().cycle().take(4096).copied().collect();
        let block = compress_block(&payload).unwrap();

        let header = BlockHeader::parse(&block).unwrap();
        assert_eq!(header.uncompressed_len, 4096);
        assert_eq!(header.block_len(), block.len());
        assert!(block.len() < payload.len());
        assert_eq!(decompress_block(&block).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let block = compress_block(&[]).unwrap();
        assert!(decompress_block(&block).unwrap().is_empty());
    }

    #[test]
    fn test_every_single_byte_corruption_is_detected() {
        let block = compress_block(b"@read1 ACGTTGCA and some more payload").unwrap();
        for position in 0..block.len() {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = block.clone();
                corrupted[position] ^= flip;
                assert!(
                    matches!(decompress_block(&corrupted), Err(EngineError::CorruptBlock(_))),
                    "corruption at byte {} went unnoticed",
                    position
                );
            }
        }
    }

    #[test]
    fn test_truncation_is_detected() {
        let block = compress_block(b"payload").unwrap();
        for len in 0..block.len() {
            assert!(matches!(
                decompress_block(&block[..len]),
                Err(EngineError::CorruptBlock(_))
            ));
        }
        assert!(BlockHeader::parse(&block[..BLOCK_HEADER_LEN - 1]).is_none());
    }
}
