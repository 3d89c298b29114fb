// (c) Roel Kluin, 2023, GPL v3

use crate::error::{ensure_config, ScreenResult};
use crate::new_types::base::Base;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// What a filter does with the (already trimmed) part of a read it is given.
/// Ranges are relative to that part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cut {
    Keep,
    Trim(Range<usize>),
    Discard,
}

impl Cut {
    fn from_range(r: Range<usize>, len: usize, min_len: usize) -> Cut {
        if r.is_empty() || r.len() < min_len {
            Cut::Discard
        } else if r.len() == len {
            Cut::Keep
        } else {
            Cut::Trim(r)
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TrimQ {
    /// no quality filtering
    #[default]
    No,
    /// discard reads with any base below minQ
    All,
    /// trim low quality bases from both ends
    Ends,
    /// discard reads with nlowQ or more bases below minQ
    Frac,
    /// trim ends, then apply frac to the remainder
    Endsfrac,
    /// cut a fixed number of bases from both ends
    Global,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TrimN {
    #[default]
    No,
    /// discard reads with any N
    All,
    /// trim N bases from both ends
    Ends,
    /// keep the longest stretch without N
    Strip,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QualityTrim {
    mode: TrimQ,
    // min_q + zero_q, as ASCII
    threshold: u8,
    nlow_q: usize,
    global: (usize, usize),
    min_len: usize,
}

impl QualityTrim {
    pub fn new(mode: TrimQ, min_q: u8, zero_q: u8, nlow_q: usize, global: (usize, usize), min_len: usize) -> ScreenResult<Self> {
        let threshold = zero_q.checked_add(min_q);
        ensure_config!(threshold.is_some(), "minQ {min_q} + zeroQ {zero_q} exceeds the quality range");
        ensure_config!(
            !matches!(mode, TrimQ::Frac | TrimQ::Endsfrac) || nlow_q > 0,
            "nlowQ must be positive for frac modes"
        );
        Ok(QualityTrim {
            mode,
            threshold: threshold.unwrap_or(u8::MAX),
            nlow_q,
            global,
            min_len,
        })
    }
    pub fn mode(&self) -> TrimQ {
        self.mode
    }
    pub fn is_enabled(&self) -> bool {
        self.mode != TrimQ::No
    }

    fn is_low(&self, q: u8) -> bool {
        q < self.threshold
    }

    /// first and one past the last base of good quality
    fn ends(&self, qual: &[u8]) -> Range<usize> {
        let start = qual.iter().position(|&q| !self.is_low(q)).unwrap_or(qual.len());
        let end = qual.iter().rposition(|&q| !self.is_low(q)).map_or(start, |e| e + 1);
        start..end
    }

    pub fn apply(&self, qual: &[u8]) -> Cut {
        let len = qual.len();
        match self.mode {
            TrimQ::No => Cut::Keep,
            TrimQ::All => {
                if qual.iter().any(|&q| self.is_low(q)) {
                    Cut::Discard
                } else {
                    Cut::Keep
                }
            }
            TrimQ::Ends => Cut::from_range(self.ends(qual), len, self.min_len),
            TrimQ::Frac => {
                if qual.iter().filter(|&&q| self.is_low(q)).count() >= self.nlow_q {
                    Cut::Discard
                } else {
                    Cut::Keep
                }
            }
            TrimQ::Endsfrac => {
                let r = self.ends(qual);
                if qual[r.clone()].iter().filter(|&&q| self.is_low(q)).count() >= self.nlow_q {
                    return Cut::Discard;
                }
                Cut::from_range(r, len, self.min_len)
            }
            TrimQ::Global => {
                let (left, right) = self.global;
                if left + right >= len {
                    return Cut::Discard;
                }
                Cut::from_range(left..len - right, len, self.min_len)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NTrim {
    mode: TrimN,
    min_len: usize,
}

impl NTrim {
    pub fn new(mode: TrimN, min_len: usize) -> Self {
        NTrim { mode, min_len }
    }
    pub fn mode(&self) -> TrimN {
        self.mode
    }
    pub fn is_enabled(&self) -> bool {
        self.mode != TrimN::No
    }

    pub fn apply(&self, seq: &[u8]) -> Cut {
        let is_n = |b: &u8| Base::from_ascii(*b).is_ambiguous();
        let len = seq.len();
        match self.mode {
            TrimN::No => Cut::Keep,
            TrimN::All => {
                if seq.iter().any(is_n) {
                    Cut::Discard
                } else {
                    Cut::Keep
                }
            }
            TrimN::Ends => {
                let start = seq.iter().position(|b| !is_n(b)).unwrap_or(len);
                let end = seq.iter().rposition(|b| !is_n(b)).map_or(start, |e| e + 1);
                Cut::from_range(start..end, len, self.min_len)
            }
            TrimN::Strip => {
                // first of the longest stretches
                let mut best = 0..0;
                let mut start = 0;
                for (i, b) in seq.iter().enumerate() {
                    if is_n(b) {
                        if i - start > best.len() {
                            best = start..i;
                        }
                        start = i + 1;
                    }
                }
                if len.saturating_sub(start) > best.len() {
                    best = start..len;
                }
                Cut::from_range(best, len, self.min_len)
            }
        }
    }
}
