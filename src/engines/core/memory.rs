//! Memory primitives
//!
//! Bit-packed symbol storage for encoded sequences, and read-only memory
//! mapping for large inputs.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

/// Number of bytes needed to hold `len` symbols of `bits` bits each
#[inline]
pub const fn packed_len(len: usize, bits: u8) -> usize {
    (len * bits as usize + 7) / 8
}

/// Immutable bit-packed code storage
///
/// Codes are laid out as a contiguous bit stream, most significant bit
/// first; a code may straddle two bytes. Unused bits of the last byte are
/// always zero, so two storages holding the same codes are byte-identical
/// and can be compared or hashed without unpacking.
///
/// The buffer is shared behind an `Arc` and never mutated, so clones are
/// cheap and may be sent to other threads freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackedCodes {
    data: Arc<[u8]>,
    len: usize,
    bits: u8,
}

impl PackedCodes {
    /// Pack a sequence of codes, each of which must fit in `bits` bits
    pub fn pack<I>(codes: I, bits: u8) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        debug_assert!((1..=8).contains(&bits));
        let mut writer = BitWriter::new(bits);
        for code in codes {
            writer.push(code);
        }
        writer.finish()
    }

    /// Wrap already packed bytes
    ///
    /// Returns `None` if the byte count does not match `len` or if any
    /// padding bit is set.
    pub fn from_raw(data: Vec<u8>, len: usize, bits: u8) -> Option<Self> {
        if data.len() != packed_len(len, bits) {
            return None;
        }
        let used_bits = len * bits as usize;
        let tail = used_bits % 8;
        if tail != 0 {
            let padding_mask = 0xFFu8 >> tail;
            if data[data.len() - 1] & padding_mask != 0 {
                return None;
            }
        }
        Some(Self {
            data: data.into(),
            len,
            bits,
        })
    }

    /// Number of stored codes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no codes are stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits per code
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// The packed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the code at `index`; the caller guarantees `index < len`
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        let bits = self.bits as usize;
        let bit_pos = index * bits;
        let byte = bit_pos / 8;
        let offset = bit_pos % 8;
        // Read two bytes so codes spanning a byte boundary come out whole
        let hi = self.data[byte] as u16;
        let lo = self.data.get(byte + 1).copied().unwrap_or(0) as u16;
        let window = (hi << 8) | lo;
        let shift = 16 - offset - bits;
        ((window >> shift) & ((1u16 << bits) - 1)) as u8
    }

    /// Iterate over the codes in `start..end`
    pub fn iter_range(&self, start: usize, end: usize) -> impl Iterator<Item = u8> + '_ {
        (start..end).map(move |i| self.get(i))
    }

    /// Iterate over all codes
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.iter_range(0, self.len)
    }

    /// Heap bytes used by the packed buffer
    pub fn memory_usage(&self) -> usize {
        self.data.len()
    }
}

/// Incremental MSB-first bit packer
struct BitWriter {
    data: Vec<u8>,
    acc: u32,
    acc_bits: u32,
    len: usize,
    bits: u8,
}

impl BitWriter {
    fn new(bits: u8) -> Self {
        Self {
            data: Vec::new(),
            acc: 0,
            acc_bits: 0,
            len: 0,
            bits,
        }
    }

    #[inline]
    fn push(&mut self, code: u8) {
        let bits = self.bits as u32;
        self.acc = (self.acc << bits) | (code as u32 & ((1 << bits) - 1));
        self.acc_bits += bits;
        while self.acc_bits >= 8 {
            self.acc_bits -= 8;
            self.data.push((self.acc >> self.acc_bits) as u8);
        }
        self.acc &= (1 << self.acc_bits) - 1;
        self.len += 1;
    }

    fn finish(mut self) -> PackedCodes {
        if self.acc_bits > 0 {
            self.data.push((self.acc << (8 - self.acc_bits)) as u8);
        }
        PackedCodes {
            data: self.data.into(),
            len: self.len,
            bits: self.bits,
        }
    }
}

/// Read-only memory-mapped file
pub struct MemoryMapped {
    mmap: Mmap,
    len: usize,
}

impl MemoryMapped {
    /// Map a file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        // SAFETY: the mapping is read-only; callers must not truncate the
        // file while it is mapped.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self { mmap, len })
    }

    /// The mapped bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..self.len]
    }

    /// Length of the mapped data
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the mapped data is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes in `start..end`, clamped to the mapped length
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        let end = end.min(self.len);
        &self.mmap[start.min(end)..end]
    }
}
