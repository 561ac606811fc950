//! Per-position quality scores
//!
//! A quality track holds one Phred-scaled confidence value (0..=93) per
//! sequence position.

use std::ops::Range;
use std::sync::Arc;

use super::sequence::{check_range, SequenceError, SequenceResult};

/// Highest quality value representable in Phred+33 ASCII
pub const MAX_QUALITY: u8 = 93;

/// Offset of the Phred+33 ASCII encoding
pub const PHRED33_OFFSET: u8 = 33;

/// Immutable track of quality values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualityTrack {
    values: Arc<[u8]>,
}

impl QualityTrack {
    /// Create a track from raw quality values
    pub fn new(values: Vec<u8>) -> SequenceResult<Self> {
        let invalid = values.iter().enumerate().find(|&(_, &v)| v > MAX_QUALITY);
        if let Some((position, &value)) = invalid {
            return Err(SequenceError::InvalidQuality { value, position });
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Track with every position set to `value`
    pub fn uniform(len: usize, value: u8) -> SequenceResult<Self> {
        Self::new(vec![value; len])
    }

    /// Parse Phred+33 ASCII (as found in FASTQ)
    pub fn from_phred33(ascii: &[u8]) -> SequenceResult<Self> {
        let mut values = Vec::with_capacity(ascii.len());
        for (position, &c) in ascii.iter().enumerate() {
            if c < PHRED33_OFFSET || c - PHRED33_OFFSET > MAX_QUALITY {
                return Err(SequenceError::InvalidQuality { value: c, position });
            }
            values.push(c - PHRED33_OFFSET);
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Render as Phred+33 ASCII
    pub fn to_phred33(&self) -> Vec<u8> {
        self.values.iter().map(|&q| q + PHRED33_OFFSET).collect()
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the track is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw values
    pub fn as_slice(&self) -> &[u8] {
        &self.values
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<u8> {
        self.values.get(index).copied()
    }

    /// Copy the values in `range` into a new track
    pub fn slice(&self, range: Range<usize>) -> SequenceResult<Self> {
        check_range(&range, self.len())?;
        Ok(Self {
            values: self.values[range].into(),
        })
    }

    /// Track in reverse order
    pub fn reversed(&self) -> Self {
        Self {
            values: self.values.iter().rev().copied().collect(),
        }
    }

    /// Lowest value, `None` for an empty track
    pub fn min(&self) -> Option<u8> {
        self.values.iter().copied().min()
    }

    /// Mean value, `None` for an empty track
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let sum: u64 = self.values.iter().map(|&q| q as u64).sum();
        Some(sum as f64 / self.values.len() as f64)
    }

    /// Longest contiguous range whose values are all `>= threshold`
    ///
    /// The leftmost range wins ties. Returns an empty range (`0..0`) when no
    /// position passes.
    pub fn trim(&self, threshold: u8) -> Range<usize> {
        let mut best = 0..0;
        let mut run_start = None;

        for (i, &q) in self.values.iter().enumerate() {
            match (q >= threshold, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    if i - start > best.len() {
                        best = start..i;
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            if self.values.len() - start > best.len() {
                best = start..self.values.len();
            }
        }

        best
    }

    /// Sliding-window means over windows of `window` positions
    ///
    /// The returned iterator is lazy, yields exactly `len - window + 1`
    /// values, and can be cloned to restart from the same point.
    pub fn windowed_mean(&self, window: usize) -> SequenceResult<WindowedMeans> {
        if window == 0 || window > self.len() {
            return Err(SequenceError::InvalidWindow {
                window,
                len: self.len(),
            });
        }
        Ok(WindowedMeans {
            values: Arc::clone(&self.values),
            window,
            position: 0,
            sum: None,
        })
    }
}

/// Lazy iterator over sliding-window quality means
#[derive(Debug, Clone)]
pub struct WindowedMeans {
    values: Arc<[u8]>,
    window: usize,
    position: usize,
    sum: Option<u32>,
}

impl Iterator for WindowedMeans {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.position + self.window > self.values.len() {
            return None;
        }

        let sum = match self.sum {
            None => self.values[..self.window].iter().map(|&q| q as u32).sum(),
            Some(previous) => {
                previous - self.values[self.position - 1] as u32
                    + self.values[self.position + self.window - 1] as u32
            }
        };
        self.sum = Some(sum);
        self.position += 1;

        Some(sum as f64 / self.window as f64)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.values.len() + 1).saturating_sub(self.position + self.window);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowedMeans {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(QualityTrack::new(vec![0, 40, 93]).is_ok());
        assert_eq!(
            QualityTrack::new(vec![30, 94]).unwrap_err(),
            SequenceError::InvalidQuality { value: 94, position: 1 }
        );
    }

    #[test]
    fn test_phred33() {
        let track = QualityTrack::from_phred33(b"II#!~").unwrap();
        assert_eq!(track.as_slice(), &[40, 40, 2, 0, 93]);
        assert_eq!(track.to_phred33(), b"II#!~");
        assert!(QualityTrack::from_phred33(b"II ").is_err());
    }

    #[test]
    fn test_trim() {
        let track = QualityTrack::new(vec![2, 30, 31, 5, 30, 30, 30, 2]).unwrap();
        assert_eq!(track.trim(20), 4..7);
        assert_eq!(track.trim(0), 0..8);
        assert_eq!(track.trim(50), 0..0);

        // Leftmost of equally long runs
        let tied = QualityTrack::new(vec![30, 30, 1, 30, 30]).unwrap();
        assert_eq!(tied.trim(20), 0..2);

        let empty = QualityTrack::new(Vec::new()).unwrap();
        assert_eq!(empty.trim(10), 0..0);
    }

    #[test]
    fn test_windowed_mean() {
        let track = QualityTrack::new(vec![10, 20, 30, 40]).unwrap();
        let means = track.windowed_mean(2).unwrap();
        assert_eq!(means.len(), 3);

        let restart = means.clone();
        assert_eq!(means.collect::<Vec<_>>(), vec![15.0, 25.0, 35.0]);
        assert_eq!(restart.collect::<Vec<_>>(), vec![15.0, 25.0, 35.0]);

        let whole = track.windowed_mean(4).unwrap().collect::<Vec<_>>();
        assert_eq!(whole, vec![25.0]);
    }

    #[test]
    fn test_windowed_mean_rejects_bad_windows() {
        let track = QualityTrack::uniform(3, 30).unwrap();
        assert_eq!(
            track.windowed_mean(0).unwrap_err(),
            SequenceError::InvalidWindow { window: 0, len: 3 }
        );
        assert!(track.windowed_mean(4).is_err());
    }

    #[test]
    fn test_summary_values() {
        let track = QualityTrack::new(vec![10, 20, 33]).unwrap();
        assert_eq!(track.min(), Some(10));
        assert_eq!(track.mean(), Some(21.0));
        assert_eq!(track.reversed().as_slice(), &[33, 20, 10]);
        assert_eq!(track.slice(1..3).unwrap().as_slice(), &[20, 33]);
        assert_eq!(QualityTrack::new(Vec::new()).unwrap().mean(), None);
    }
}
