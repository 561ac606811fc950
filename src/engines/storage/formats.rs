//! Binary wire formats
//!
//! Records are written as
//!
//! ```text
//! [u8 alphabet tag][u32 length][packed symbols][length quality bytes]
//! [u16 id length][id bytes][u16 reference length][reference bytes]
//! ```
//!
//! and alignment results as
//!
//! ```text
//! [u16 id length][id bytes][i32 score][u32 query start][u32 query end]
//! [u32 reference start][u32 reference end][u32 runs]([u8 op][u32 length])*
//! ```
//!
//! with little-endian integers throughout. A reference length of zero means
//! the record carries no reference tag, so an empty tag reads back as none.
//! Streams are either plain concatenated records or a sequence of compressed
//! blocks, each holding whole records.

use std::collections::VecDeque;

use super::compression::{self, BlockHeader};
use super::{AlignedRecord, PipelineRecord};
use crate::engines::compute::alignment::{AlignmentResult, EditOp, EditRun};
use crate::engines::core::memory::packed_len;
use crate::engines::{EngineError, EngineResult};
use crate::modules::seq::{Alphabet, EncodedSequence, QualifiedSequence, QualityTrack};

fn corrupt(message: impl Into<String>) -> EngineError {
    EngineError::CorruptRecord(message.into())
}

/// Little-endian reader over an untrusted byte slice
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> EngineResult<&'a [u8]> {
        let remaining = self.bytes.len() - self.pos;
        if len > remaining {
            return Err(corrupt(format!(
                "truncated {}: need {} bytes, {} left",
                what, len, remaining
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> EngineResult<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N, what)?);
        Ok(raw)
    }

    fn u8(&mut self, what: &str) -> EngineResult<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> EngineResult<u16> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn i32(&mut self, what: &str) -> EngineResult<i32> {
        Ok(i32::from_le_bytes(self.array(what)?))
    }

    fn string(&mut self, len: usize, what: &str) -> EngineResult<String> {
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec()).map_err(|_| corrupt(format!("{} is not valid UTF-8", what)))
    }

    fn finish(&self) -> EngineResult<()> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            extra => Err(corrupt(format!("{} trailing bytes", extra))),
        }
    }
}

fn length_u16(len: usize, what: &str) -> EngineResult<u16> {
    u16::try_from(len)
        .map_err(|_| corrupt(format!("{} of {} bytes does not fit the wire format", what, len)))
}

fn length_u32(len: usize, what: &str) -> EngineResult<u32> {
    u32::try_from(len)
        .map_err(|_| corrupt(format!("{} of {} does not fit the wire format", what, len)))
}

/// Append the wire form of `record` to `out`
pub fn write_record(record: &PipelineRecord, out: &mut Vec<u8>) -> EngineResult<()> {
    let sequence = record.read.sequence();
    let reference = record.reference.as_deref().unwrap_or("");
    let len = length_u32(sequence.len(), "sequence length")?;
    let id_len = length_u16(record.id.len(), "identifier")?;
    let reference_len = length_u16(reference.len(), "reference tag")?;

    out.push(sequence.alphabet().tag());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(sequence.packed_bytes());
    out.extend_from_slice(record.read.quality().as_slice());
    out.extend_from_slice(&id_len.to_le_bytes());
    out.extend_from_slice(record.id.as_bytes());
    out.extend_from_slice(&reference_len.to_le_bytes());
    out.extend_from_slice(reference.as_bytes());
    Ok(())
}

/// Serialize one record
pub fn serialize_record(record: &PipelineRecord) -> EngineResult<Vec<u8>> {
    let mut out = Vec::with_capacity(record_size_hint(record));
    write_record(record, &mut out)?;
    Ok(out)
}

fn record_size_hint(record: &PipelineRecord) -> usize {
    let sequence = record.read.sequence();
    let reference = record.reference.as_ref().map_or(0, String::len);
    9 + sequence.packed_bytes().len() + sequence.len() + record.id.len() + reference
}

/// Parse exactly one record; any deviation from the layout is rejected
pub fn deserialize_record(bytes: &[u8]) -> EngineResult<PipelineRecord> {
    let mut reader = ByteReader::new(bytes);

    let tag = reader.u8("alphabet tag")?;
    let alphabet =
        Alphabet::from_tag(tag).ok_or_else(|| corrupt(format!("unknown alphabet tag {}", tag)))?;
    let len = reader.u32("sequence length")? as usize;

    let packed = reader.take(packed_len(len, alphabet.bits_per_symbol()), "packed sequence")?;
    let sequence = EncodedSequence::from_packed(alphabet, len, packed.to_vec())
        .ok_or_else(|| corrupt("packed sequence has invalid codes or padding"))?;

    let quality = reader.take(len, "quality track")?;
    let quality = QualityTrack::new(quality.to_vec()).map_err(|e| corrupt(e.to_string()))?;

    let id_len = reader.u16("identifier length")? as usize;
    let id = reader.string(id_len, "identifier")?;
    let reference_len = reader.u16("reference length")? as usize;
    let reference = match reference_len {
        0 => None,
        len => Some(reader.string(len, "reference tag")?),
    };
    reader.finish()?;

    let read = QualifiedSequence::new(sequence, quality).map_err(|e| corrupt(e.to_string()))?;
    Ok(PipelineRecord { id, read, reference })
}

/// Largest record or block accepted by default
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20; // 1MB

/// Size of the record starting at `bytes[0]`
///
/// Returns `Ok(None)` while too few bytes are available to tell. The size
/// may exceed `bytes.len()`. Fails on an unknown alphabet tag, or as soon as
/// the header fields show the record would be longer than `max_len`.
pub fn record_frame_len(bytes: &[u8], max_len: usize) -> EngineResult<Option<usize>> {
    let Some(&tag) = bytes.first() else {
        return Ok(None);
    };
    let alphabet =
        Alphabet::from_tag(tag).ok_or_else(|| corrupt(format!("unknown alphabet tag {}", tag)))?;
    let len = match bytes.get(1..5) {
        Some(raw) => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
        None => return Ok(None),
    };
    let check = |at_least: usize| -> EngineResult<()> {
        if at_least > max_len {
            return Err(corrupt(format!(
                "record of at least {} bytes exceeds the {} byte limit",
                at_least, max_len
            )));
        }
        Ok(())
    };

    let read_u16 = |at: usize| {
        bytes
            .get(at..at + 2)
            .map(|raw| u16::from_le_bytes([raw[0], raw[1]]) as usize)
    };

    // Both u16 length fields follow the sequence
    let id_at = packed_len(len, alphabet.bits_per_symbol())
        .saturating_add(len)
        .saturating_add(5);
    check(id_at.saturating_add(4))?;
    let Some(id_len) = read_u16(id_at) else {
        return Ok(None);
    };
    let reference_at = id_at + 2 + id_len;
    check(reference_at + 2)?;
    let Some(reference_len) = read_u16(reference_at) else {
        return Ok(None);
    };
    let total = reference_at + 2 + reference_len;
    check(total)?;
    Ok(Some(total))
}

/// Serialize an alignment result for the sink
pub fn serialize_alignment(record: &AlignedRecord) -> EngineResult<Vec<u8>> {
    let result = &record.result;
    let mut out = Vec::with_capacity(26 + record.id.len() + 5 * result.ops.len());

    out.extend_from_slice(&length_u16(record.id.len(), "identifier")?.to_le_bytes());
    out.extend_from_slice(record.id.as_bytes());
    out.extend_from_slice(&result.score.to_le_bytes());
    for bound in [
        result.query_range.start,
        result.query_range.end,
        result.reference_range.start,
        result.reference_range.end,
    ] {
        out.extend_from_slice(&length_u32(bound, "coordinate")?.to_le_bytes());
    }
    out.extend_from_slice(&length_u32(result.ops.len(), "run count")?.to_le_bytes());
    for run in &result.ops {
        out.push(run.op.tag());
        out.extend_from_slice(&length_u32(run.len, "run length")?.to_le_bytes());
    }
    Ok(out)
}

/// Parse an alignment result written by [`serialize_alignment`]
pub fn deserialize_alignment(bytes: &[u8]) -> EngineResult<AlignedRecord> {
    let mut reader = ByteReader::new(bytes);

    let id_len = reader.u16("identifier length")? as usize;
    let id = reader.string(id_len, "identifier")?;
    let score = reader.i32("score")?;
    let query_range = reader.u32("query start")? as usize..reader.u32("query end")? as usize;
    let reference_start = reader.u32("reference start")? as usize;
    let reference_range = reference_start..reader.u32("reference end")? as usize;
    if query_range.start > query_range.end || reference_range.start > reference_range.end {
        return Err(corrupt("alignment range ends before it starts"));
    }

    let runs = reader.u32("run count")? as usize;
    // Each run takes five bytes, so a bogus count cannot over-allocate
    let mut ops = Vec::with_capacity(runs.min(bytes.len() / 5));
    let (mut query_used, mut reference_used) = (0usize, 0usize);
    for _ in 0..runs {
        let tag = reader.u8("edit op")?;
        let op = EditOp::from_tag(tag)
            .ok_or_else(|| corrupt(format!("unknown edit op tag {}", tag)))?;
        let len = reader.u32("run length")? as usize;
        if len == 0 {
            return Err(corrupt("empty edit run"));
        }
        if op.consumes_query() {
            query_used += len;
        }
        if op.consumes_reference() {
            reference_used += len;
        }
        ops.push(EditRun { op, len });
    }
    reader.finish()?;

    if query_used != query_range.len() || reference_used != reference_range.len() {
        return Err(corrupt("edit script does not cover the declared ranges"));
    }

    Ok(AlignedRecord {
        id,
        result: AlignmentResult {
            score,
            ops,
            query_range,
            reference_range,
        },
    })
}

/// Encode records into a stream
///
/// With `block_payload` set, records are grouped into compressed blocks that
/// close once their payload reaches that many bytes; records never straddle
/// blocks.
pub fn encode_stream(
    records: &[PipelineRecord],
    block_payload: Option<usize>,
) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    let Some(limit) = block_payload else {
        for record in records {
            write_record(record, &mut out)?;
        }
        return Ok(out);
    };

    let mut payload = Vec::new();
    for record in records {
        write_record(record, &mut payload)?;
        if payload.len() >= limit {
            out.extend_from_slice(&compression::compress_block(&payload)?);
            payload.clear();
        }
    }
    if !payload.is_empty() {
        out.extend_from_slice(&compression::compress_block(&payload)?);
    }
    Ok(out)
}

/// Split an inflated block payload into record frames
fn split_block(payload: &[u8], max_len: usize) -> EngineResult<VecDeque<Vec<u8>>> {
    let mut frames = VecDeque::new();
    let mut at = 0;
    while at < payload.len() {
        let rest = &payload[at..];
        let len = match record_frame_len(rest, max_len) {
            Ok(Some(len)) if len <= rest.len() => len,
            Ok(_) => {
                return Err(EngineError::CorruptBlock("block ends inside a record".to_string()))
            }
            Err(e) => return Err(EngineError::CorruptBlock(e.to_string())),
        };
        frames.push_back(rest[..len].to_vec());
        at += len;
    }
    Ok(frames)
}

/// Incremental framer for record streams
///
/// Bytes are pushed in arbitrarily sized chunks; complete record frames come
/// out in stream order. Framing problems (unknown tags, bad blocks) are
/// fatal for the stream; the content of a frame is only checked when it is
/// deserialized.
///
/// Records and blocks declaring more than `max_frame_len` bytes are
/// rejected from their header, so a corrupted length never makes the decoder
/// buffer the rest of the stream.
#[derive(Debug)]
pub struct FrameDecoder {
    compressed: bool,
    max_frame_len: usize,
    buffer: Vec<u8>,
    consumed: usize,
    pending: VecDeque<Vec<u8>>,
}

impl FrameDecoder {
    /// Create a decoder for plain (`false`) or block-compressed streams
    pub fn new(compressed: bool) -> Self {
        Self {
            compressed,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            buffer: Vec::new(),
            consumed: 0,
            pending: VecDeque::new(),
        }
    }

    /// Set the largest record or block accepted
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The largest record or block accepted
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Feed more bytes
    pub fn push(&mut self, bytes: &[u8]) {
        if self.consumed > 0 && self.consumed * 2 >= self.buffer.len() {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet framed
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// Next complete record frame, `None` if more bytes are needed
    pub fn next_frame(&mut self) -> EngineResult<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }

            let available = &self.buffer[self.consumed..];
            if self.compressed {
                let Some(header) = BlockHeader::parse(available) else {
                    return Ok(None);
                };
                let declared = header.compressed_len.max(header.uncompressed_len) as usize;
                if declared > self.max_frame_len {
                    return Err(EngineError::CorruptBlock(format!(
                        "block declares {} bytes, limit is {}",
                        declared, self.max_frame_len
                    )));
                }
                let block_len = header.block_len();
                if available.len() < block_len {
                    return Ok(None);
                }
                let payload = compression::decompress_block(&available[..block_len])?;
                self.consumed += block_len;
                self.pending = split_block(&payload, self.max_frame_len)?;
            } else {
                return match record_frame_len(available, self.max_frame_len)? {
                    Some(len) if len <= available.len() => {
                        let frame = available[..len].to_vec();
                        self.consumed += len;
                        Ok(Some(frame))
                    }
                    _ => Ok(None),
                };
            }
        }
    }

    /// Check that the stream ended on a frame boundary
    pub fn finish(&self) -> EngineResult<()> {
        let leftover = self.buffered();
        if leftover == 0 {
            return Ok(());
        }
        let message = format!("stream ends with {} unframed bytes", leftover);
        if self.compressed {
            Err(EngineError::CorruptBlock(message))
        } else {
            Err(EngineError::CorruptRecord(message))
        }
    }
}
