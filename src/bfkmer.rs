// (c) Roel Kluin, 2023, GPL v3

use crate::error::{ensure_config, ScreenError, ScreenResult};
use crate::hashlut::HashLut;
use crate::new_types::base::Base;
use arrayvec::ArrayVec;
use std::cmp::Ordering;

/// Upper bound on the number of hash functions.
pub const MAX_HASH_NUM: usize = 32;

pub type Probes = ArrayVec<u64, MAX_HASH_NUM>;
type Sums = ArrayVec<u64, MAX_HASH_NUM>;

/// splitmix64 finalizer
#[inline(always)]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A k-mer window with its per-table hash sums and the derived bit offsets.
#[derive(Clone, Debug)]
pub struct Bfkmer<'a> {
    bases: &'a [u8],
    fw: Sums,
    rc: Sums,
    probes: Probes,
}

impl<'a> Bfkmer<'a> {
    pub fn bases(&self) -> &'a [u8] {
        self.bases
    }
    pub fn probes(&self) -> &[u64] {
        &self.probes
    }
    /// Whether the forward strand is the canonical one. Palindromes are forward.
    pub fn is_forward(&self) -> bool {
        self.fw.iter().cmp(self.rc.iter()) != Ordering::Greater
    }
}

/// Turns windows of a read into probe offsets for a filter of `bfsize_bits`.
#[derive(Clone, Debug)]
pub struct KmerEncoder {
    lut: HashLut,
    bfsize_bits: u64,
    canonical: bool,
}

impl KmerEncoder {
    pub fn new(lut: HashLut, bfsize_bits: u64, canonical: bool) -> ScreenResult<Self> {
        ensure_config!(lut.kmer_size() > 0, "kmer size must be positive");
        ensure_config!(
            lut.hash_num() > 0 && lut.hash_num() <= MAX_HASH_NUM,
            "hashNum {} not in 1..={}",
            lut.hash_num(),
            MAX_HASH_NUM
        );
        ensure_config!(bfsize_bits > 0, "bit array size must be positive");
        Ok(KmerEncoder {
            lut,
            bfsize_bits,
            canonical,
        })
    }
    pub fn kmer_size(&self) -> usize {
        self.lut.kmer_size()
    }
    pub fn hash_num(&self) -> usize {
        self.lut.hash_num()
    }
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// Encode a window of exactly k bases. Non-ACGT symbols are hashed as N.
    pub fn encode<'a>(&self, window: &'a [u8]) -> ScreenResult<Bfkmer<'a>> {
        if window.len() != self.kmer_size() {
            return Err(ScreenError::InvalidLength {
                expected: self.kmer_size(),
                found: window.len(),
            });
        }
        let h = self.hash_num();
        let fw: Sums = (0..h).map(|t| self.lut.sum(t, window)).collect();
        let rc: Sums = (0..h).map(|t| self.lut.sum_rc(t, window)).collect();
        let mut kmer = Bfkmer {
            bases: window,
            fw,
            rc,
            probes: Probes::new(),
        };
        kmer.probes = self.probes(&kmer);
        Ok(kmer)
    }

    /// Bit offsets for each table, reduced modulo the filter size.
    pub fn probes(&self, kmer: &Bfkmer) -> Probes {
        let sums = if !self.canonical || kmer.is_forward() {
            &kmer.fw
        } else {
            &kmer.rc
        };
        sums.iter()
            .map(|&s| mix64(s) % self.bfsize_bits)
            .collect()
    }

    /// Windows of `seq`, left to right.
    pub fn scan<'a>(&'a self, seq: &'a [u8]) -> KmerScan<'a> {
        KmerScan::new(self, seq, false)
    }

    /// Windows of `seq`, right to left.
    pub fn scan_back<'a>(&'a self, seq: &'a [u8]) -> KmerScan<'a> {
        KmerScan::new(self, seq, true)
    }
}

/// Incremental walk over all windows of a sequence; each step is O(hashNum).
pub struct KmerScan<'a> {
    enc: &'a KmerEncoder,
    seq: &'a [u8],
    pos: usize,
    backward: bool,
    done: bool,
    cur: Option<Bfkmer<'a>>,
}

impl<'a> KmerScan<'a> {
    fn new(enc: &'a KmerEncoder, seq: &'a [u8], backward: bool) -> Self {
        let k = enc.kmer_size();
        let pos = if backward {
            seq.len().saturating_sub(k)
        } else {
            0
        };
        KmerScan {
            enc,
            seq,
            pos,
            backward,
            done: seq.len() < k,
            cur: None,
        }
    }

    /// Start position and k-mer of the next window, None when done.
    pub fn next_kmer(&mut self) -> Option<(usize, &Bfkmer<'a>)> {
        let k = self.enc.kmer_size();
        if self.done {
            return None;
        }
        match self.cur.take() {
            None => {
                self.cur = self.enc.encode(&self.seq[self.pos..self.pos + k]).ok();
            }
            Some(mut kmer) => {
                let (leave, enter) = if self.backward {
                    if self.pos == 0 {
                        self.done = true;
                        return None;
                    }
                    self.pos -= 1;
                    (self.seq[self.pos + k], self.seq[self.pos])
                } else {
                    if self.pos + k >= self.seq.len() {
                        self.done = true;
                        return None;
                    }
                    self.pos += 1;
                    (self.seq[self.pos - 1], self.seq[self.pos + k - 1])
                };
                let (leave, enter) = (Base::from_ascii(leave), Base::from_ascii(enter));
                for t in 0..kmer.fw.len() {
                    (kmer.fw[t], kmer.rc[t]) = if self.backward {
                        self.enc.lut.roll_back(t, kmer.fw[t], kmer.rc[t], leave, enter)
                    } else {
                        self.enc.lut.roll_forward(t, kmer.fw[t], kmer.rc[t], leave, enter)
                    };
                }
                kmer.bases = &self.seq[self.pos..self.pos + k];
                kmer.probes = self.enc.probes(&kmer);
                self.cur = Some(kmer);
            }
        }
        let pos = self.pos;
        self.cur.as_ref().map(|kmer| (pos, kmer))
    }
}
