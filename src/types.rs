//! Core types for the ledger pipeline.

use std::fmt;

/// Lowest ledger sequence the pipeline will ever export or serve.
///
/// Sequence 1 is the network genesis ledger and is never replayed or
/// published to consumers.
pub const MIN_LEDGER_SEQUENCE: u32 = 2;

/// A contiguous range of ledger sequences.
///
/// A range is either bounded (`[from, to]`, both inclusive) or unbounded
/// (`[from, ..)`, following the chain tip indefinitely). The unbounded form
/// has no `to` at all, so "unbounded with an end" is not a representable
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LedgerRange {
    from: u32,
    to: Option<u32>,
}

impl LedgerRange {
    /// Create a bounded range covering `from..=to`.
    pub fn bounded(from: u32, to: u32) -> Self {
        Self { from, to: Some(to) }
    }

    /// Create an unbounded range starting at `from`.
    pub fn unbounded(from: u32) -> Self {
        Self { from, to: None }
    }

    /// First sequence of the range.
    pub fn from(&self) -> u32 {
        self.from
    }

    /// Last sequence of the range, if bounded.
    pub fn to(&self) -> Option<u32> {
        self.to
    }

    /// Whether the range has an upper bound.
    pub fn is_bounded(&self) -> bool {
        self.to.is_some()
    }

    /// Whether `sequence` falls inside the range.
    pub fn contains(&self, sequence: u32) -> bool {
        sequence >= self.from && self.to.map_or(true, |to| sequence <= to)
    }

    /// Number of sequences in the range, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.to
            .map(|to| (u64::from(to) + 1).saturating_sub(u64::from(self.from)))
    }

    /// Whether a bounded range covers no sequences at all.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Display for LedgerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {}]", self.from, to),
            None => write!(f, "[{}, latest)", self.from),
        }
    }
}
