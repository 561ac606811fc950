//! Pipeline I/O boundaries
//!
//! The pipeline pulls raw bytes from a [`ByteSource`] and hands serialized
//! results to a [`ResultSink`]. Adapters are provided for readers and files,
//! memory-mapped files, writers and in-memory collection.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engines::core::memory::MemoryMapped;
use crate::engines::{EngineError, EngineResult};

// Default buffer sizes
const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 1024; // 1MB
const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024 * 1024; // 1MB

/// Sequential supplier of raw stream bytes
pub trait ByteSource: Send {
    /// Read at most `max_bytes`; `None` signals end of stream
    fn read(&mut self, max_bytes: usize) -> EngineResult<Option<Vec<u8>>>;
}

/// Outcome of offering a payload to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Payload taken
    Accepted,
    /// Payload refused for now; offer it again later
    Backpressure,
}

/// Consumer of serialized results
pub trait ResultSink: Send {
    /// Offer one payload
    fn accept(&mut self, payload: &[u8]) -> EngineResult<SinkStatus>;

    /// Flush buffered output
    fn flush(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Source over any `Read` implementation
pub struct ReadSource<R> {
    reader: R,
    bytes_read: u64,
}

impl<R: Read + Send> ReadSource<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        Self { reader, bytes_read: 0 }
    }

    /// Total bytes delivered so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unwrap the reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl ReadSource<BufReader<File>> {
    /// Buffered source over a file
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::with_capacity(DEFAULT_READ_BUFFER_SIZE, file)))
    }
}

impl ReadSource<Cursor<Vec<u8>>> {
    /// Source over an in-memory buffer
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Send> ByteSource for ReadSource<R> {
    fn read(&mut self, max_bytes: usize) -> EngineResult<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; max_bytes.max(1)];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buffer.truncate(n);
                    self.bytes_read += n as u64;
                    return Ok(Some(buffer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::Io(e)),
            }
        }
    }
}

/// Source over a memory-mapped file
pub struct MmapSource {
    mapped: MemoryMapped,
    position: usize,
}

impl MmapSource {
    /// Map a file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            mapped: MemoryMapped::open(path)?,
            position: 0,
        })
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if everything has been read
    pub fn is_eof(&self) -> bool {
        self.position >= self.mapped.len()
    }
}

impl ByteSource for MmapSource {
    fn read(&mut self, max_bytes: usize) -> EngineResult<Option<Vec<u8>>> {
        if self.is_eof() {
            return Ok(None);
        }
        let end = self.position.saturating_add(max_bytes.max(1));
        let chunk = self.mapped.slice(self.position, end).to_vec();
        self.position += chunk.len();
        Ok(Some(chunk))
    }
}

/// Sink writing `[u32 length][payload]` frames to any `Write`
pub struct WriteSink<W: Write> {
    writer: W,
    bytes_written: u64,
}

impl<W: Write + Send> WriteSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
        }
    }

    /// Total bytes written, including length prefixes
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriteSink<BufWriter<File>> {
    /// Buffered sink creating (or truncating) a file
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::with_capacity(DEFAULT_WRITE_BUFFER_SIZE, file)))
    }
}

impl<W: Write + Send> ResultSink for WriteSink<W> {
    fn accept(&mut self, payload: &[u8]) -> EngineResult<SinkStatus> {
        let len = u32::try_from(payload.len())
            .map_err(|_| {
                EngineError::Sink(format!("payload of {} bytes is too large", payload.len()))
            })?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.bytes_written += 4 + payload.len() as u64;
        Ok(SinkStatus::Accepted)
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Split a buffer written by [`WriteSink`] back into payloads
pub fn read_frames(bytes: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (prefix, body) = rest.split_at(rest.len().min(4));
        if prefix.len() < 4 {
            return Err(EngineError::CorruptRecord("truncated frame length".to_string()));
        }
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if body.len() < len {
            return Err(EngineError::CorruptRecord(format!(
                "frame of {} bytes truncated to {}",
                len,
                body.len()
            )));
        }
        frames.push(body[..len].to_vec());
        rest = &body[len..];
    }
    Ok(frames)
}

/// Sink collecting payloads in memory
///
/// Clones share the same storage, so a handle kept by the caller sees what
/// the pipeline delivered.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads received
    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Check if nothing was received
    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    /// Copy of the received payloads
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    /// Remove and return the received payloads
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.payloads.lock())
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, payload: &[u8]) -> EngineResult<SinkStatus> {
        self.payloads.lock().push(payload.to_vec());
        Ok(SinkStatus::Accepted)
    }
}
