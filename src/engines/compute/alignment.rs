//! Sequence alignment algorithms
//!
//! Affine-gap pairwise alignment (Gotoh) in global, local and semi-global
//! flavours, with an optional diagonal band. Scores are plain integers, so
//! results are reproducible bit for bit.
//!
//! Every cell keeps the pair `(score, gap symbols)` and candidates compare
//! by score first and by fewer gap symbols second. Remaining ties are broken
//! by a fixed source priority (diagonal, then deletion, then insertion),
//! which places insertions before deletions in the finished script.

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::scoring::ScoringScheme;
use super::{ComputeError, ComputeResult};
use crate::modules::seq::{EncodedSequence, SequenceError, SequenceResult};

/// Alignment flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlignmentMode {
    /// Both sequences aligned end to end (Needleman-Wunsch)
    #[default]
    Global,
    /// Best-scoring pair of substrings (Smith-Waterman)
    Local,
    /// Whole query placed anywhere along the reference
    SemiGlobal,
}

/// One column type of an edit script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOp {
    /// Identical symbols
    Match,
    /// Different symbols
    Substitution,
    /// Symbol present only in the query
    Insertion,
    /// Symbol present only in the reference
    Deletion,
}

impl EditOp {
    /// CIGAR letter
    pub const fn symbol(self) -> char {
        match self {
            EditOp::Match => '=',
            EditOp::Substitution => 'X',
            EditOp::Insertion => 'I',
            EditOp::Deletion => 'D',
        }
    }

    /// Tag byte used by the wire format
    pub const fn tag(self) -> u8 {
        match self {
            EditOp::Match => 0,
            EditOp::Substitution => 1,
            EditOp::Insertion => 2,
            EditOp::Deletion => 3,
        }
    }

    /// Resolve a wire tag
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EditOp::Match),
            1 => Some(EditOp::Substitution),
            2 => Some(EditOp::Insertion),
            3 => Some(EditOp::Deletion),
            _ => None,
        }
    }

    /// Whether the op consumes a query symbol
    pub const fn consumes_query(self) -> bool {
        !matches!(self, EditOp::Deletion)
    }

    /// Whether the op consumes a reference symbol
    pub const fn consumes_reference(self) -> bool {
        !matches!(self, EditOp::Insertion)
    }

    /// Mirror image with query and reference swapped
    pub const fn transposed(self) -> Self {
        match self {
            EditOp::Insertion => EditOp::Deletion,
            EditOp::Deletion => EditOp::Insertion,
            op => op,
        }
    }
}

/// A run of identical edit operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditRun {
    pub op: EditOp,
    pub len: usize,
}

/// Score, edit script and covered ranges of an alignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentResult {
    /// Alignment score under the scheme used
    pub score: i32,
    /// Run-length encoded edit script, in query/reference order
    pub ops: Vec<EditRun>,
    /// Half-open range of the query covered by the script
    pub query_range: Range<usize>,
    /// Half-open range of the reference covered by the script
    pub reference_range: Range<usize>,
}

impl AlignmentResult {
    /// Zero-score alignment covering nothing
    pub fn empty() -> Self {
        Self {
            score: 0,
            ops: Vec::new(),
            query_range: 0..0,
            reference_range: 0..0,
        }
    }

    /// Whether the script has no columns
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of alignment columns
    pub fn columns(&self) -> usize {
        self.ops.iter().map(|run| run.len).sum()
    }

    /// Columns of the given kind
    pub fn count(&self, op: EditOp) -> usize {
        self.ops.iter().filter(|run| run.op == op).map(|run| run.len).sum()
    }

    /// CIGAR rendering, e.g. `3=1X2I`
    pub fn cigar(&self) -> String {
        let mut cigar = String::new();
        for run in &self.ops {
            let _ = write!(cigar, "{}{}", run.len, run.op.symbol());
        }
        cigar
    }

    /// Fraction of columns that are matches, 0.0 for an empty script
    pub fn identity(&self) -> f64 {
        let columns = self.columns();
        if columns == 0 {
            return 0.0;
        }
        self.count(EditOp::Match) as f64 / columns as f64
    }

    /// The same alignment seen with query and reference swapped
    pub fn transpose(&self) -> Self {
        Self {
            score: self.score,
            ops: self
                .ops
                .iter()
                .map(|run| EditRun {
                    op: run.op.transposed(),
                    len: run.len,
                })
                .collect(),
            query_range: self.reference_range.clone(),
            reference_range: self.query_range.clone(),
        }
    }

    /// Replay the script against both sequences
    ///
    /// Checks that the ranges lie inside the sequences, that the script
    /// consumes exactly those ranges, and that match and substitution runs
    /// agree with the symbols they cover.
    pub fn is_consistent_with(&self, query: &EncodedSequence, reference: &EncodedSequence) -> bool {
        if self.query_range.start > self.query_range.end
            || self.query_range.end > query.len()
            || self.reference_range.start > self.reference_range.end
            || self.reference_range.end > reference.len()
        {
            return false;
        }

        let mut qi = self.query_range.start;
        let mut rj = self.reference_range.start;
        for run in &self.ops {
            if run.len == 0 {
                return false;
            }
            for _ in 0..run.len {
                match run.op {
                    EditOp::Match | EditOp::Substitution => {
                        let (Some(a), Some(b)) = (query.code_at(qi), reference.code_at(rj)) else {
                            return false;
                        };
                        if (a == b) != (run.op == EditOp::Match) {
                            return false;
                        }
                        qi += 1;
                        rj += 1;
                    }
                    EditOp::Insertion => qi += 1,
                    EditOp::Deletion => rj += 1,
                }
            }
        }
        qi == self.query_range.end && rj == self.reference_range.end
    }

    /// Gapped rows of the aligned region, `-` marking gaps
    pub fn aligned_rows(
        &self,
        query: &EncodedSequence,
        reference: &EncodedSequence,
    ) -> SequenceResult<(Vec<u8>, Vec<u8>)> {
        let query_symbols = query.decode(self.query_range.clone())?;
        let reference_symbols = reference.decode(self.reference_range.clone())?;
        let mut query_row = Vec::with_capacity(self.columns());
        let mut reference_row = Vec::with_capacity(self.columns());

        let (mut qi, mut rj) = (0, 0);
        for run in &self.ops {
            for _ in 0..run.len {
                if run.op.consumes_query() {
                    query_row.push(
                        *query_symbols
                            .get(qi)
                            .ok_or_else(|| range_error(&self.query_range, query.len()))?,
                    );
                    qi += 1;
                } else {
                    query_row.push(b'-');
                }
                if run.op.consumes_reference() {
                    reference_row.push(
                        *reference_symbols
                            .get(rj)
                            .ok_or_else(|| range_error(&self.reference_range, reference.len()))?,
                    );
                    rj += 1;
                } else {
                    reference_row.push(b'-');
                }
            }
        }
        Ok((query_row, reference_row))
    }
}

fn range_error(range: &Range<usize>, len: usize) -> SequenceError {
    SequenceError::RangeError {
        start: range.start,
        end: range.end,
        len,
    }
}

/// Reusable alignment configuration
#[derive(Debug, Clone)]
pub struct Aligner {
    scoring: Arc<ScoringScheme>,
    mode: AlignmentMode,
    band: Option<usize>,
}

impl Aligner {
    /// Create an unbanded aligner
    pub fn new(scoring: Arc<ScoringScheme>, mode: AlignmentMode) -> Self {
        Self {
            scoring,
            mode,
            band: None,
        }
    }

    /// Restrict the search to a diagonal band of the given width
    pub fn with_band(mut self, band: Option<usize>) -> Self {
        self.band = band;
        self
    }

    /// The scoring scheme
    pub fn scoring(&self) -> &ScoringScheme {
        &self.scoring
    }

    /// The alignment mode
    pub fn mode(&self) -> AlignmentMode {
        self.mode
    }

    /// The band width, if any
    pub fn band(&self) -> Option<usize> {
        self.band
    }

    /// Align `query` against `reference`
    pub fn align(
        &self,
        query: &EncodedSequence,
        reference: &EncodedSequence,
    ) -> ComputeResult<AlignmentResult> {
        align(query, reference, &self.scoring, self.mode, self.band)
    }
}

/// Align `query` against `reference`
///
/// With a band of width `w`, only cells with `|i·r/q - j| <= w` are visited
/// (rows are widened just enough to stay connected), which may miss the
/// optimum. GLOBAL alignment of an empty sequence fails with
/// [`ComputeError::EmptyInput`]; the other modes return an empty result.
pub fn align(
    query: &EncodedSequence,
    reference: &EncodedSequence,
    scoring: &ScoringScheme,
    mode: AlignmentMode,
    band: Option<usize>,
) -> ComputeResult<AlignmentResult> {
    if query.alphabet() != reference.alphabet() {
        return Err(SequenceError::AlphabetMismatch {
            left: query.alphabet(),
            right: reference.alphabet(),
        }
        .into());
    }
    if scoring.alphabet() != query.alphabet() {
        return Err(SequenceError::AlphabetMismatch {
            left: scoring.alphabet(),
            right: query.alphabet(),
        }
        .into());
    }
    if band == Some(0) {
        return Err(ComputeError::InvalidBand(0));
    }

    if query.is_empty() || reference.is_empty() {
        return match mode {
            AlignmentMode::Global => Err(ComputeError::EmptyInput),
            AlignmentMode::Local | AlignmentMode::SemiGlobal => Ok(AlignmentResult::empty()),
        };
    }

    let query = query.to_codes();
    let reference = reference.to_codes();
    let matrix = DpMatrix::fill(&query, &reference, scoring, mode, band);
    Ok(matrix.traceback(&query, &reference))
}

const NEG_INF: i32 = i32::MIN / 2;

/// Cell value: score, then number of gap symbols on the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Score {
    value: i32,
    gaps: u32,
}

impl Score {
    const NONE: Score = Score { value: NEG_INF, gaps: 0 };
    const ZERO: Score = Score { value: 0, gaps: 0 };

    #[inline]
    fn is_none(self) -> bool {
        self.value <= NEG_INF
    }

    #[inline]
    fn add(self, delta: i32, gaps: u32) -> Score {
        if self.is_none() {
            return Score::NONE;
        }
        Score {
            value: self.value.saturating_add(delta),
            gaps: self.gaps + gaps,
        }
    }

    #[inline]
    fn beats(self, other: Score) -> bool {
        self.value > other.value || (self.value == other.value && self.gaps < other.gaps)
    }
}

// Traceback cell layout: bits 0-1 hold the H source, bit 2 marks an
// extended deletion, bit 3 an extended insertion.
const FROM_DIAGONAL: u8 = 0;
const FROM_DELETION: u8 = 1;
const FROM_INSERTION: u8 = 2;
const FROM_START: u8 = 3;
const SOURCE_MASK: u8 = 0b11;
const DELETION_EXTENDED: u8 = 0b100;
const INSERTION_EXTENDED: u8 = 0b1000;

#[derive(Clone, Copy)]
enum State {
    Best,
    Deletion,
    Insertion,
}

/// First and last reference column visited in each query row
fn band_limits(rows: usize, cols: usize, width: Option<usize>) -> (Vec<usize>, Vec<usize>) {
    let width = match width {
        Some(width) => width,
        None => return (vec![0; rows + 1], vec![cols; rows + 1]),
    };

    let (q, r, w) = (rows as i64, cols as i64, width as i64);
    let mut lo = Vec::with_capacity(rows + 1);
    let mut hi = Vec::with_capacity(rows + 1);
    for i in 0..=q {
        let low = i * r - w * q;
        let high = i * r + w * q;
        lo.push(if low <= 0 { 0 } else { ((low + q - 1) / q).min(r) as usize });
        hi.push((high / q).min(r) as usize);
    }

    // Widen so every row overlaps the next one
    for i in 0..rows {
        if hi[i] < lo[i + 1] {
            hi[i] = lo[i + 1];
        }
    }
    (lo, hi)
}

/// Filled traceback matrix plus the chosen end cell
struct DpMatrix {
    lo: Vec<usize>,
    offsets: Vec<usize>,
    trace: Vec<u8>,
    mode: AlignmentMode,
    end: Option<(Score, usize, usize)>,
}

impl DpMatrix {
    fn fill(
        query: &[u8],
        reference: &[u8],
        scoring: &ScoringScheme,
        mode: AlignmentMode,
        band: Option<usize>,
    ) -> Self {
        let (rows, cols) = (query.len(), reference.len());
        let (lo, hi) = band_limits(rows, cols, band);

        let mut offsets = Vec::with_capacity(rows + 1);
        let mut total = 0;
        for i in 0..=rows {
            offsets.push(total);
            total += hi[i] - lo[i] + 1;
        }
        let mut trace = vec![0u8; total];

        let open = scoring.gap_open();
        let extend = scoring.gap_extend();

        let mut prev_h = vec![Score::NONE; cols + 1];
        let mut prev_f = vec![Score::NONE; cols + 1];
        let mut cur_h = vec![Score::NONE; cols + 1];
        let mut cur_f = vec![Score::NONE; cols + 1];
        let mut end: Option<(Score, usize, usize)> = None;

        for i in 0..=rows {
            let (row_lo, row_hi) = (lo[i], hi[i]);
            let in_prev = |j: usize| i > 0 && j >= lo[i - 1] && j <= hi[i - 1];
            let start = match mode {
                AlignmentMode::Global => None,
                AlignmentMode::Local => Some(Score::ZERO),
                AlignmentMode::SemiGlobal => Some(Score {
                    value: i as i32 * extend,
                    gaps: i as u32,
                }),
            };

            let mut e = Score::NONE;
            let mut left_h = Score::NONE;
            for j in row_lo..=row_hi {
                let mut bits = 0u8;

                e = if j > row_lo {
                    let extended = e.add(extend, 1);
                    let opened = left_h.add(open, 1);
                    if opened.beats(extended) {
                        opened
                    } else {
                        bits |= DELETION_EXTENDED;
                        extended
                    }
                } else {
                    Score::NONE
                };

                let f = if in_prev(j) {
                    let extended = prev_f[j].add(extend, 1);
                    let opened = prev_h[j].add(open, 1);
                    if opened.beats(extended) {
                        opened
                    } else {
                        bits |= INSERTION_EXTENDED;
                        extended
                    }
                } else {
                    Score::NONE
                };

                let d = if j > 0 && in_prev(j - 1) {
                    prev_h[j - 1].add(scoring.score(query[i - 1], reference[j - 1]), 0)
                } else {
                    Score::NONE
                };

                let (mut h, mut source) = (d, FROM_DIAGONAL);
                if e.beats(h) {
                    h = e;
                    source = FROM_DELETION;
                }
                if f.beats(h) {
                    h = f;
                    source = FROM_INSERTION;
                }
                let start = if mode == AlignmentMode::Global && i == 0 && j == 0 {
                    Some(Score::ZERO)
                } else {
                    start
                };
                if let Some(start) = start {
                    // Local alignments clip on ties
                    let clip = match mode {
                        AlignmentMode::Local => !h.beats(start),
                        _ => start.beats(h),
                    };
                    if clip {
                        h = start;
                        source = FROM_START;
                    }
                }

                trace[offsets[i] + j - row_lo] = source | bits;
                cur_h[j] = h;
                cur_f[j] = f;
                left_h = h;

                let candidate = match mode {
                    AlignmentMode::Global => (i == rows && j == cols).then_some(h),
                    AlignmentMode::Local => (h.value > 0).then_some(h),
                    AlignmentMode::SemiGlobal => {
                        let tail = rows - i;
                        Some(h.add(tail as i32 * extend, tail as u32)).filter(|c| !c.is_none())
                    }
                };
                if let Some(candidate) = candidate {
                    if end.map_or(true, |(best, _, _)| candidate.beats(best)) {
                        end = Some((candidate, i, j));
                    }
                }
            }

            std::mem::swap(&mut prev_h, &mut cur_h);
            std::mem::swap(&mut prev_f, &mut cur_f);
        }

        log::trace!(
            "filled {}x{} alignment matrix ({} cells visited, mode {:?})",
            rows + 1,
            cols + 1,
            total,
            mode
        );

        Self {
            lo,
            offsets,
            trace,
            mode,
            end,
        }
    }

    #[inline]
    fn cell(&self, i: usize, j: usize) -> u8 {
        self.trace[self.offsets[i] + j - self.lo[i]]
    }

    fn traceback(&self, query: &[u8], reference: &[u8]) -> AlignmentResult {
        let (score, end_i, end_j) = match self.end {
            Some(end) => end,
            None => return AlignmentResult::empty(),
        };

        // Walk backwards, one op per column
        let mut reversed = Vec::new();
        let tail = query.len() - end_i;
        if self.mode == AlignmentMode::SemiGlobal {
            reversed.extend(std::iter::repeat(EditOp::Insertion).take(tail));
        }

        let (mut i, mut j) = (end_i, end_j);
        let mut state = State::Best;
        loop {
            let cell = self.cell(i, j);
            match state {
                State::Best => match cell & SOURCE_MASK {
                    FROM_DIAGONAL => {
                        reversed.push(if query[i - 1] == reference[j - 1] {
                            EditOp::Match
                        } else {
                            EditOp::Substitution
                        });
                        i -= 1;
                        j -= 1;
                    }
                    FROM_DELETION => state = State::Deletion,
                    FROM_INSERTION => state = State::Insertion,
                    _ => break,
                },
                State::Deletion => {
                    reversed.push(EditOp::Deletion);
                    if cell & DELETION_EXTENDED == 0 {
                        state = State::Best;
                    }
                    j -= 1;
                }
                State::Insertion => {
                    reversed.push(EditOp::Insertion);
                    if cell & INSERTION_EXTENDED == 0 {
                        state = State::Best;
                    }
                    i -= 1;
                }
            }
        }

        let query_start = match self.mode {
            AlignmentMode::SemiGlobal => {
                reversed.extend(std::iter::repeat(EditOp::Insertion).take(i));
                0
            }
            _ => i,
        };
        let query_end = match self.mode {
            AlignmentMode::SemiGlobal => query.len(),
            _ => end_i,
        };

        let ops = reversed
            .into_iter()
            .rev()
            .dedup_with_count()
            .map(|(len, op)| EditRun { op, len })
            .collect();

        AlignmentResult {
            score: score.value,
            ops,
            query_range: query_start..query_end,
            reference_range: j..end_j,
        }
    }
}
