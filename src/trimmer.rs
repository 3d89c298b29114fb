// (c) Roel Kluin, 2023, GPL v3

use crate::adapter::{Adapter, AdapterIndex};
use crate::error::{ensure_config, ScreenError, ScreenResult};
use crate::kmertree::{Orientation, Tag};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::f64::consts::LOG10_2;

/// Default minimal number of adapter bases to trim a read end on.
pub const MIN_OVERLAP: usize = 5;
/// Default number of substitutions an adapter alignment may have.
pub const MISMATCHES: usize = 2;
/// Default alignment score an adapter must exceed.
pub const THRESHOLD: f64 = 1.5;
/// Score of a matching base, log10(4).
const LOG_4: f64 = 2.0 * LOG10_2;
/// Mismatch penalty without base qualities, that of quality 40.
const DEFAULT_PENALTY: f64 = 4.0;

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Clean,
    Trimmed,
    Discarded,
}

/// Retained interval `[retained_start, retained_end)` of a read. `screened`
/// is false for reads shorter than the k-mer size, those are left Clean.
#[derive(Clone, Debug, PartialEq)]
pub struct TrimResult<'a> {
    pub read_id: &'a [u8],
    pub retained_start: usize,
    pub retained_end: usize,
    pub outcome: Outcome,
    pub screened: bool,
    /// adapter that set a boundary, the 3' one if both did
    pub source: Option<u32>,
}

impl<'a> TrimResult<'a> {
    pub fn retained_len(&self) -> usize {
        self.retained_end.saturating_sub(self.retained_start)
    }
}

/// A read is Discarded when less than `min_retained_length` bases remain, or
/// on any adapter hit with `discard_matches`. An alignment of a read stretch
/// to an adapter is accepted with at most `mismatches` substitutions, at
/// least `min_overlap` matching bases and a score above `threshold`: log10(4)
/// per match minus a tenth of the base quality per mismatch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrimConfig {
    pub min_retained_length: usize,
    pub min_overlap: usize,
    pub mismatches: usize,
    pub threshold: f64,
    pub zero_q: u8,
    pub discard_matches: bool,
}

impl TrimConfig {
    pub fn new(min_retained_length: usize, min_overlap: usize) -> ScreenResult<Self> {
        ensure_config!(min_overlap > 0, "minimal adapter overlap must be positive");
        Ok(TrimConfig {
            min_retained_length,
            min_overlap,
            ..Default::default()
        })
    }
    pub fn with_alignment(self, mismatches: usize, threshold: f64, zero_q: u8) -> ScreenResult<Self> {
        ensure_config!(threshold.is_finite(), "adapter score threshold must be finite");
        Ok(TrimConfig {
            mismatches,
            threshold,
            zero_q,
            ..self
        })
    }
    /// Discard reads with an adapter instead of trimming them.
    pub fn discard_matches(self, discard_matches: bool) -> Self {
        TrimConfig {
            discard_matches,
            ..self
        }
    }
}

impl Default for TrimConfig {
    fn default() -> Self {
        TrimConfig {
            min_retained_length: 25,
            min_overlap: MIN_OVERLAP,
            mismatches: MISMATCHES,
            threshold: THRESHOLD,
            zero_q: 33,
            discard_matches: false,
        }
    }
}

/// A confirmed boundary and the adapter it stems from.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Hit {
    pos: usize,
    source: u32,
}

fn leftmost(a: Option<Hit>, b: Option<Hit>) -> Option<Hit> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y.pos < x.pos { y } else { x }),
        (x, y) => x.or(y),
    }
}

fn rightmost(a: Option<Hit>, b: Option<Hit>) -> Option<Hit> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y.pos > x.pos { y } else { x }),
        (x, y) => x.or(y),
    }
}

/// Scans reads against an adapter index. Shared read-only between threads.
pub struct Trimmer {
    index: AdapterIndex,
    config: TrimConfig,
    dual: bool,
}

impl Trimmer {
    pub fn new(index: AdapterIndex, config: TrimConfig) -> Self {
        let dual = index.has_five_prime();
        Trimmer {
            index,
            config,
            dual,
        }
    }
    pub fn index(&self) -> &AdapterIndex {
        &self.index
    }
    pub fn config(&self) -> &TrimConfig {
        &self.config
    }
    pub fn is_dual(&self) -> bool {
        self.dual
    }

    fn check_length(&self, seq: &[u8]) -> ScreenResult<()> {
        let k = self.index.kmer_size();
        if seq.len() < k {
            return Err(ScreenError::InvalidLength {
                expected: k,
                found: seq.len(),
            });
        }
        Ok(())
    }

    /// Trim without base qualities, mismatches cost as much as at quality 40.
    pub fn trim<'a>(&self, read_id: &'a [u8], seq: &[u8]) -> TrimResult<'a> {
        self.screen(read_id, seq, None)
    }

    pub fn trim_with_quality<'a>(&self, read_id: &'a [u8], seq: &[u8], qual: &[u8]) -> TrimResult<'a> {
        self.screen(read_id, seq, Some(qual))
    }

    fn screen<'a>(&self, read_id: &'a [u8], seq: &[u8], qual: Option<&[u8]>) -> TrimResult<'a> {
        let mut res = TrimResult {
            read_id,
            retained_start: 0,
            retained_end: seq.len(),
            outcome: Outcome::Clean,
            screened: true,
            source: None,
        };
        if let Err(e) = self.check_length(seq) {
            dbg_print!("{}: not screened, {e}", String::from_utf8_lossy(read_id));
            res.screened = false;
            return res;
        }
        let seed = self.scan_three_prime(seq).or_else(|| self.partial_tail(seq));
        let limit = seed.map_or(seq.len(), |h| h.pos);
        let end = leftmost(seed, self.align_three_prime(seq, qual, limit));
        let start = if self.dual {
            let seed = self.scan_five_prime(seq).or_else(|| self.partial_head(seq));
            let limit = seed.map_or(0, |h| h.pos);
            rightmost(seed, self.align_five_prime(seq, qual, limit))
        } else {
            None
        };
        if end.is_none() && start.is_none() {
            return res;
        }
        res.retained_start = start.map_or(0, |h| h.pos);
        res.retained_end = end.map_or(seq.len(), |h| h.pos).max(res.retained_start);
        res.source = end.or(start).map(|h| h.source);
        res.outcome = if self.config.discard_matches || res.retained_len() < self.config.min_retained_length {
            Outcome::Discarded
        } else {
            Outcome::Trimmed
        };
        res
    }

    /// Leftmost 3' adapter start. The first confirmed Bloom hit ends the scan.
    fn scan_three_prime(&self, seq: &[u8]) -> Option<Hit> {
        let bloom = self.index.bloom();
        let mut scan = bloom.encoder().scan(seq);
        while let Some((pos, kmer)) = scan.next_kmer() {
            if !bloom.test(kmer) {
                continue;
            }
            let confirmed = self
                .confirm(kmer.bases(), Orientation::ThreePrime)
                .min_by_key(|t| t.offset);
            if let Some(tag) = confirmed {
                return Some(Hit {
                    pos: pos.saturating_sub(tag.offset as usize),
                    source: tag.source,
                });
            }
            dbg_print!("false positive at {pos}");
        }
        None
    }

    /// Rightmost 5' adapter end, scanning from the read end backwards.
    fn scan_five_prime(&self, seq: &[u8]) -> Option<Hit> {
        let bloom = self.index.bloom();
        let mut scan = bloom.encoder().scan_back(seq);
        while let Some((pos, kmer)) = scan.next_kmer() {
            if !bloom.test(kmer) {
                continue;
            }
            let confirmed = self
                .confirm(kmer.bases(), Orientation::FivePrime)
                .max_by_key(|t| t.declared_len - t.offset);
            if let Some(tag) = confirmed {
                let end = pos + (tag.declared_len - tag.offset) as usize;
                return Some(Hit {
                    pos: end.min(seq.len()),
                    source: tag.source,
                });
            }
        }
        None
    }

    fn confirm<'s>(&'s self, kmer: &[u8], ori: Orientation) -> impl Iterator<Item = &'s Tag> {
        self.index
            .kmers()
            .lookup(kmer)
            .into_iter()
            .flat_map(move |p| p.with_orientation(ori))
    }

    /// A 3' adapter of which only the start was sequenced: the read from
    /// some position to its end is an adapter prefix shorter than a k-mer.
    fn partial_tail(&self, seq: &[u8]) -> Option<Hit> {
        let k = self.index.kmer_size();
        let first = (seq.len() + 1).saturating_sub(k);
        let last = seq.len().checked_sub(self.config.min_overlap)?;
        let tails = self.index.tails();
        (first..=last)
            .find(|&p| tails.longest_match_from(seq, p) == seq.len() - p)
            .map(|p| Hit {
                pos: p,
                source: tails.prefix_source(&seq[p..]).unwrap_or_default(),
            })
    }

    /// The mirror image for 5' adapters: the read starts with an adapter
    /// suffix shorter than a k-mer. The head tree holds reversed adapters.
    fn partial_head(&self, seq: &[u8]) -> Option<Hit> {
        let h = (self.index.kmer_size() - 1).min(seq.len());
        if h < self.config.min_overlap {
            return None;
        }
        let rev: Vec<u8> = seq[..h].iter().rev().copied().collect();
        let heads = self.index.heads();
        (self.config.min_overlap..=h)
            .rev()
            .find(|&m| heads.longest_match_from(&rev, h - m) == m)
            .map(|m| Hit {
                pos: m,
                source: heads.prefix_source(&rev[h - m..]).unwrap_or_default(),
            })
    }

    fn with_orientation(&self, ori: Orientation) -> impl Iterator<Item = (u32, &Adapter)> {
        (0_u32..)
            .zip(self.index.adapters())
            .filter(move |(_, ad)| ad.orientation == ori)
    }

    /// Leftmost 3' adapter start before `limit` that aligns with mismatches,
    /// the adapter running on to the read end or ending inside it.
    fn align_three_prime(&self, seq: &[u8], qual: Option<&[u8]>, limit: usize) -> Option<Hit> {
        let last = seq.len().checked_sub(self.config.min_overlap)?;
        (0..limit.min(last + 1)).find_map(|p| {
            self.with_orientation(Orientation::ThreePrime).find_map(|(source, ad)| {
                let n = (seq.len() - p).min(ad.seq.len());
                self.aligns(seq, qual, p, &ad.seq[..n])
                    .then_some(Hit { pos: p, source })
            })
        })
    }

    /// Rightmost 5' adapter end after `limit`, the adapter's last bases
    /// aligned to the read just before it.
    fn align_five_prime(&self, seq: &[u8], qual: Option<&[u8]>, limit: usize) -> Option<Hit> {
        let first = (limit + 1).max(self.config.min_overlap);
        (first..=seq.len()).rev().find_map(|e| {
            self.with_orientation(Orientation::FivePrime).find_map(|(source, ad)| {
                let n = e.min(ad.seq.len());
                self.aligns(seq, qual, e - n, &ad.seq[ad.seq.len() - n..])
                    .then_some(Hit { pos: e, source })
            })
        })
    }

    /// Whether `ad` aligns to the read from `pos` within the mismatch and
    /// score limits.
    fn aligns(&self, seq: &[u8], qual: Option<&[u8]>, pos: usize, ad: &[u8]) -> bool {
        let cfg = &self.config;
        if ad.len() < cfg.min_overlap {
            return false;
        }
        let (mut score, mut matches, mut mismatches) = (0.0, 0, 0);
        for (i, (&b, &a)) in seq[pos..].iter().zip(ad).enumerate() {
            if b.to_ascii_uppercase() == a {
                score += LOG_4;
                matches += 1;
                continue;
            }
            mismatches += 1;
            if mismatches > cfg.mismatches {
                return false;
            }
            score -= qual
                .and_then(|q| q.get(pos + i))
                .map_or(DEFAULT_PENALTY, |&q| f64::from(q.saturating_sub(cfg.zero_q)) / 10.0);
        }
        matches >= cfg.min_overlap && score > cfg.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, DualAdapter};

    fn single(adapter: &[u8], k: usize, min_len: usize) -> Trimmer {
        let ads = vec![Adapter::new("ad", adapter, Orientation::ThreePrime)];
        let index = AdapterIndex::build(ads, k, 0.01).unwrap();
        Trimmer::new(index, TrimConfig::new(min_len, 3).unwrap())
    }

    #[test]
    fn leftmost_boundary() {
        let trimmer = single(b"GGGGTTTT", 4, 5);
        let res = trimmer.trim(b"r1", b"AAAACCCCGGGGTTTT");
        assert_eq!((res.retained_start, res.retained_end), (0, 8));
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!(res.read_id, b"r1");
        assert_eq!(res.source, Some(0));
        assert!(res.screened);
    }
    #[test]
    fn first_occurrence_wins() {
        let trimmer = single(b"GATCGGAAGAGC", 8, 1);
        let read = b"ACACACGATCGGAAGAGCTTTTGATCGGAAGAGC";
        let res = trimmer.trim(b"r", read);
        assert_eq!(res.retained_end, 6);
    }
    #[test]
    fn clean_pass_through() {
        let trimmer = single(b"GGGGTTTT", 4, 5);
        let read = b"ACACACACACACACAC";
        let res = trimmer.trim(b"r", read);
        assert_eq!(res.outcome, Outcome::Clean);
        assert_eq!((res.retained_start, res.retained_end), (0, read.len()));
        assert_eq!(res.source, None);
    }
    #[test]
    fn adapter_with_mismatched_start() {
        // the first two adapter bases differ, the boundary is extended back
        let trimmer = single(b"AGATCGGAAGAGCACACG", 8, 1);
        let res = trimmer.trim(b"r", b"CCCCCCCCCCTTATCGGAAGAGCACACG");
        assert_eq!(res.retained_end, 10);
    }
    #[test]
    fn discard_on_short_remainder() {
        let trimmer = single(b"AGATCGGAAGAGCACACGTC", 8, 10);
        let res = trimmer.trim(b"r", b"TTAGATCGGAAGAGCACACGTC");
        assert_eq!(res.outcome, Outcome::Discarded);
        assert_eq!(res.retained_len(), 2);
    }
    #[test]
    fn short_read_is_unscreened() {
        let trimmer = single(b"AGATCGGAAGAGC", 8, 1);
        assert_eq!(
            trimmer.check_length(b"AGATC"),
            Err(ScreenError::InvalidLength {
                expected: 8,
                found: 5
            })
        );
        let res = trimmer.trim(b"r", b"AGATC");
        assert_eq!(res.outcome, Outcome::Clean);
        assert!(!res.screened);
        assert_eq!(res.retained_len(), 5);
    }
    #[test]
    fn partial_tail_adapter() {
        let ads = vec![Adapter::new("ad", b"AGATCGGAAGAGCACACG", Orientation::ThreePrime)];
        let index = AdapterIndex::build(ads, 10, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(1, 4).unwrap());
        // only 6 adapter bases at the end, fewer than a k-mer
        let res = trimmer.trim(b"r", b"CCCCCCCCCCCCCCAGATCG");
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!(res.retained_end, 14);
        // below the minimal overlap nothing is cut
        let res = trimmer.trim(b"r", b"CCCCCCCCCCCCCCCCCAGA");
        assert_eq!(res.outcome, Outcome::Clean);
    }
    #[test]
    fn read_shorter_than_adapter() {
        let trimmer = single(b"AGATCGGAAGAGCACACGTCTGAACTCCAGTCAC", 8, 5);
        let res = trimmer.trim(b"r", b"TTGCATGCAAGATCGGAAGAGCACA");
        assert_eq!(res.retained_end, 9);
        assert_eq!(res.outcome, Outcome::Trimmed);
    }
    #[test]
    fn dual_symmetric_trim() {
        let dual = DualAdapter::new(b"ACACTCTTTCCCTACACG", b"AGATCGGAAGAGCACACG", None, Some(14)).unwrap();
        let index = AdapterIndex::build(dual.adapters(), 8, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(5, 3).unwrap());
        assert!(trimmer.is_dual());
        let insert = b"TTGGCCAATTGGCCAA";
        let read = [&b"CTTTCCCTACACG"[..], insert, b"AGATCGGAAGAG"].concat();
        let res = trimmer.trim(b"r", &read);
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!((res.retained_start, res.retained_end), (13, 13 + insert.len()));
        assert!(res.retained_start > 0 && res.retained_end < read.len());
    }
    #[test]
    fn dual_partial_head() {
        let dual = DualAdapter::new(b"ACACTCTTTCCCTACACG", b"AGATCGGAAGAGCACACG", None, None).unwrap();
        let index = AdapterIndex::build(dual.adapters(), 10, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(5, 4).unwrap());
        // read starts with the last 6 bases of ad1
        let res = trimmer.trim(b"r", b"TACACGTTGGCCAATTGGCCAATTGG");
        assert_eq!(res.retained_start, 6);
        assert_eq!(res.retained_end, 26);
    }
    #[test]
    fn adjoining_adapters_discard() {
        let dual = DualAdapter::new(b"ACACTCTTTCCCTACACG", b"AGATCGGAAGAGCACACG", None, None).unwrap();
        let index = AdapterIndex::build(dual.adapters(), 8, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(1, 3).unwrap());
        let res = trimmer.trim(b"r", b"TCTTTCCCTACACGAGATCGGAAGAGC");
        assert_eq!(res.outcome, Outcome::Discarded);
        assert_eq!(res.retained_len(), 0);
    }
    #[test]
    fn no_minimum_keeps_empty_remainder() {
        let trimmer = single(b"AGATCGGAAGAGCACACGTC", 8, 0);
        let res = trimmer.trim(b"r", b"AGATCGGAAGAGCACACGTC");
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!(res.retained_len(), 0);
    }
    #[test]
    fn substitutions_in_adapter() {
        let ad = b"AGATCGGAAGAGCACACGTC";
        let trimmer = single(ad, 12, 5);
        let insert = b"CTGACCTTAGGCATTCAGCTTGAC";
        // substitutions at adapter positions 6 and 13, no exact 12-mer left
        let read = [&insert[..], b"AGATCGCAAGAGCTCACGTC"].concat();
        let res = trimmer.trim(b"r", &read);
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!(res.retained_end, insert.len());

        // an 11 base tail with one substitution
        let read = [&insert[..], b"CCCAGATGGGAAGA"].concat();
        let res = trimmer.trim_with_quality(b"r", &read, &vec![b'I'; read.len()]);
        assert_eq!(res.retained_end, insert.len() + 3);

        // a third substitution is too many
        let read = [&insert[..], b"AGTTCGCAAGAGCTCACGTC"].concat();
        assert_eq!(trimmer.trim(b"r", &read).outcome, Outcome::Clean);
    }
    #[test]
    fn mismatch_cost_follows_quality() {
        let ads = vec![Adapter::new("ad", b"AGATCGGAAGAGC", Orientation::ThreePrime)];
        let index = AdapterIndex::build(ads, 12, 0.01).unwrap();
        let config = TrimConfig::new(5, 5).unwrap().with_alignment(1, 1.5, 33).unwrap();
        let trimmer = Trimmer::new(index, config);
        let read = b"CTGACCTTAGGCATTCAGCAGTTCGG";
        // 6 matches and a substitution score 3.61 - Q/10
        let mut qual = vec![b'I'; read.len()];
        assert_eq!(trimmer.trim_with_quality(b"r", read, &qual).outcome, Outcome::Clean);
        qual[21] = b'#';
        let res = trimmer.trim_with_quality(b"r", read, &qual);
        assert_eq!(res.outcome, Outcome::Trimmed);
        assert_eq!(res.retained_end, 19);
        // a stricter threshold rejects it again
        let strict = TrimConfig::new(5, 5).unwrap().with_alignment(1, 4.5, 33).unwrap();
        let trimmer = Trimmer::new(trimmer.index, strict);
        assert_eq!(trimmer.trim_with_quality(b"r", read, &qual).outcome, Outcome::Clean);
        assert!(TrimConfig::default().with_alignment(2, f64::NAN, 33).is_err());
    }
    #[test]
    fn dual_substitutions() {
        let dual = DualAdapter::new(b"ACACTCTTTCCCTACACG", b"AGATCGGAAGAGCACACG", None, None).unwrap();
        let index = AdapterIndex::build(dual.adapters(), 12, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(5, 5).unwrap());
        let insert = b"TTGGCCAATTGGCCAATTGG";
        // ad1 with substitutions at 5 and 11, ad2 at 4 and 10
        let read = [&b"ACACTGTTTCCGTACACG"[..], insert, b"AGATGGGAAGTGCACACG"].concat();
        let res = trimmer.trim(b"r", &read);
        assert_eq!((res.retained_start, res.retained_end), (18, 18 + insert.len()));
    }
    #[test]
    fn discard_matches_instead_of_trimming() {
        let ads = vec![Adapter::new("ad", b"AGATCGGAAGAGC", Orientation::ThreePrime)];
        let index = AdapterIndex::build(ads, 8, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(5, 5).unwrap().discard_matches(true));
        let res = trimmer.trim(b"r", b"CCTTGGAACCTTGGAACCAGATCGGAAGAGC");
        assert_eq!(res.outcome, Outcome::Discarded);
        assert_eq!(res.retained_end, 18);
        let res = trimmer.trim(b"r", b"CCTTGGAACCTTGGAACCTTGG");
        assert_eq!(res.outcome, Outcome::Clean);
    }
}
