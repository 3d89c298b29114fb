// (c) Roel Kluin, 2023, GPL v3

use crate::bfkmer::{Bfkmer, KmerEncoder, MAX_HASH_NUM};
use crate::error::{ensure_config, ScreenResult};
use crate::hashlut::{HashLut, DEFAULT_SEED};
use anyhow::{ensure, Result};
use bincode::{deserialize_from, serialize_into};
use bitvec::prelude::*;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const BITS_PER_BYTE: u64 = 8;

/// How the bit array size and hash count follow from a false positive rate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Sizing {
    /// m = ceil(-n ln p / ln²2) up to a multiple of 8, k = round(m/n ln2)
    #[default]
    Optimal,
    /// m = trunc(-n ln p / ln²2) down to a multiple of 8, k = trunc(-ln p / ln2)
    Truncated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BloomParams {
    pub kmer_size: usize,
    pub bfsize_bits: u64,
    pub hash_num: usize,
    pub false_pos_rate: f64,
    pub nelem: u64,
    pub seed: u64,
    pub canonical: bool,
}

fn round_up_bytes(bits: u64) -> u64 {
    bits.div_ceil(BITS_PER_BYTE).max(1) * BITS_PER_BYTE
}

fn round_down_bytes(bits: u64) -> u64 {
    (bits - bits % BITS_PER_BYTE).max(BITS_PER_BYTE)
}

fn clamp_hash_num(k: f64) -> usize {
    (k as usize).clamp(1, MAX_HASH_NUM)
}

fn check_common(kmer_size: usize, nelem: u64) -> ScreenResult<()> {
    ensure_config!(kmer_size > 0, "kmer size must be positive");
    ensure_config!(nelem > 0, "expected number of elements must be positive");
    Ok(())
}

impl BloomParams {
    /// Size for a target false positive rate and an expected number of k-mers.
    pub fn from_fpr(kmer_size: usize, fpr: f64, nelem: u64, sizing: Sizing) -> ScreenResult<Self> {
        check_common(kmer_size, nelem)?;
        ensure_config!(fpr > 0.0 && fpr < 1.0, "false positive rate {fpr} not in (0, 1)");

        let n = nelem as f64;
        let raw_bits = -n * fpr.ln() / (LN_2 * LN_2);
        let (bfsize_bits, hash_num) = match sizing {
            Sizing::Optimal => {
                let m = round_up_bytes(raw_bits.ceil() as u64);
                (m, clamp_hash_num((m as f64 / n * LN_2).round()))
            }
            Sizing::Truncated => {
                let m = round_down_bytes(raw_bits as u64);
                (m, clamp_hash_num(-fpr.ln() / LN_2))
            }
        };
        Ok(BloomParams {
            kmer_size,
            bfsize_bits,
            hash_num,
            false_pos_rate: fpr,
            nelem,
            seed: DEFAULT_SEED,
            canonical: true,
        })
    }

    /// Size for a given number of hash functions.
    pub fn from_hash_num(kmer_size: usize, hash_num: usize, nelem: u64) -> ScreenResult<Self> {
        check_common(kmer_size, nelem)?;
        ensure_config!(
            hash_num > 0 && hash_num <= MAX_HASH_NUM,
            "hashNum {hash_num} not in 1..={MAX_HASH_NUM}"
        );
        let k = hash_num as f64;
        Ok(BloomParams {
            kmer_size,
            bfsize_bits: round_down_bytes((nelem as f64 * k / LN_2) as u64),
            hash_num,
            false_pos_rate: (-LN_2 * k).exp(),
            nelem,
            seed: DEFAULT_SEED,
            canonical: true,
        })
    }

    /// Hash count for a given bit array size, which must be a multiple of 8.
    pub fn from_size_bits(kmer_size: usize, bfsize_bits: u64, nelem: u64) -> ScreenResult<Self> {
        check_common(kmer_size, nelem)?;
        ensure_config!(
            bfsize_bits > 0 && bfsize_bits % BITS_PER_BYTE == 0,
            "Bloom filter size (bits) has to be a positive multiple of 8, got {bfsize_bits}"
        );
        let hash_num = clamp_hash_num(bfsize_bits as f64 * LN_2 / nelem as f64);
        Ok(BloomParams {
            kmer_size,
            bfsize_bits,
            hash_num,
            false_pos_rate: (-LN_2 * hash_num as f64).exp(),
            nelem,
            seed: DEFAULT_SEED,
            canonical: true,
        })
    }

    pub fn strand_specific(mut self) -> Self {
        self.canonical = false;
        self
    }

    /// (1 - e^(-kn/m))^k
    pub fn expected_fpr(&self) -> f64 {
        let k = self.hash_num as f64;
        (1.0 - (-k * self.nelem as f64 / self.bfsize_bits as f64).exp()).powf(k)
    }

    pub fn bfsize_bytes(&self) -> u64 {
        self.bfsize_bits / BITS_PER_BYTE
    }

    /// The parameters as `name = value` lines.
    pub fn report(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "kmersize = {}", self.kmer_size)?;
        writeln!(out, "hashNum = {}", self.hash_num)?;
        writeln!(out, "bfsizeBits = {}", self.bfsize_bits)?;
        writeln!(out, "falsePosRate = {:.6}", self.false_pos_rate)?;
        writeln!(out, "nelem = {}", self.nelem)?;
        writeln!(out, "seed = {}", self.seed)?;
        writeln!(out, "canonical = {}", self.canonical)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredBloom {
    params: BloomParams,
    bits: BitVec<u8, Lsb0>,
}

/// Bits only ever go from 0 to 1. The words are atomic, so a filter can be
/// filled from several threads through `&self`.
pub struct BloomFilter {
    params: BloomParams,
    encoder: KmerEncoder,
    words: Vec<AtomicU64>,
}

impl BloomFilter {
    /// A zeroed filter for the target false positive rate and expected element count.
    pub fn construct(kmer_size: usize, fpr: f64, nelem: u64) -> ScreenResult<Self> {
        BloomFilter::with_params(BloomParams::from_fpr(kmer_size, fpr, nelem, Sizing::Optimal)?)
    }

    pub fn with_params(params: BloomParams) -> ScreenResult<Self> {
        check_common(params.kmer_size, params.nelem)?;
        ensure_config!(
            params.bfsize_bits % BITS_PER_BYTE == 0,
            "Bloom filter size (bits) has to be a multiple of 8."
        );
        let lut = HashLut::new(params.kmer_size, params.hash_num, params.seed);
        let encoder = KmerEncoder::new(lut, params.bfsize_bits, params.canonical)?;
        let nwords = params.bfsize_bits.div_ceil(64) as usize;
        let words = (0..nwords).map(|_| AtomicU64::new(0)).collect();
        Ok(BloomFilter {
            params,
            encoder,
            words,
        })
    }

    pub fn params(&self) -> &BloomParams {
        &self.params
    }
    pub fn encoder(&self) -> &KmerEncoder {
        &self.encoder
    }
    pub fn kmer_size(&self) -> usize {
        self.params.kmer_size
    }

    #[inline(always)]
    fn word_and_mask(probe: u64) -> (usize, u64) {
        ((probe >> 6) as usize, 1 << (probe & 63))
    }

    pub fn insert(&self, kmer: &Bfkmer) {
        for &p in kmer.probes() {
            let (w, mask) = Self::word_and_mask(p);
            self.words[w].fetch_or(mask, Ordering::Relaxed);
        }
    }

    pub fn test(&self, kmer: &Bfkmer) -> bool {
        kmer.probes().iter().all(|&p| {
            let (w, mask) = Self::word_and_mask(p);
            self.words[w].load(Ordering::Relaxed) & mask != 0
        })
    }

    /// Sets all bits of the k-mer; returns whether they all were set already.
    /// Every bit is read and set in one atomic fetch_or.
    pub fn insert_and_fetch(&self, kmer: &Bfkmer) -> bool {
        kmer.probes().iter().fold(true, |seen, &p| {
            let (w, mask) = Self::word_and_mask(p);
            let old = self.words[w].fetch_or(mask, Ordering::AcqRel);
            seen & (old & mask != 0)
        })
    }

    pub fn count_ones(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }

    fn to_bitvec(&self) -> BitVec<u8, Lsb0> {
        let nbytes = self.params.bfsize_bytes() as usize;
        let bytes: Vec<u8> = self
            .words
            .iter()
            .flat_map(|w| w.load(Ordering::Relaxed).to_le_bytes())
            .take(nbytes)
            .collect();
        BitVec::from_vec(bytes)
    }

    fn from_bitvec(params: BloomParams, bits: &BitSlice<u8, Lsb0>) -> Result<Self> {
        ensure!(
            bits.len() as u64 == params.bfsize_bits,
            "Expected bfsizeBits ({}) != stored bits ({})",
            params.bfsize_bits,
            bits.len()
        );
        let bf = BloomFilter::with_params(params)?;
        for (w, chunk) in bf.words.iter().zip(bits.chunks(64)) {
            w.store(chunk.load_le::<u64>(), Ordering::Relaxed);
        }
        Ok(bf)
    }

    /// Stores `<prefix>.bf` and a readable `<prefix>.bf.txt`.
    pub fn save(&self, prefix: &Path) -> Result<()> {
        let (bf_file, txt_file) = filter_files(prefix);
        ensure!(!bf_file.exists(), "{bf_file:?} already exists!");
        eprintln!("Store a bloom filter in: {bf_file:?} (filter), {txt_file:?} (param)");
        eprintln!("Bloom filter size in bytes, {}", self.params.bfsize_bytes());

        let stored = StoredBloom {
            params: self.params.clone(),
            bits: self.to_bitvec(),
        };
        serialize_into(BufWriter::new(File::create(&bf_file)?), &stored)?;
        let mut txt = BufWriter::new(File::create(txt_file)?);
        self.params.report(&mut txt)?;
        Ok(())
    }

    pub fn load(bf_file: &Path) -> Result<Self> {
        ensure!(bf_file.exists(), "{bf_file:?} does not exist!");
        let stored: StoredBloom = deserialize_from(BufReader::new(File::open(bf_file)?))?;
        eprintln!("Reading a bloom filter from: {bf_file:?}");
        stored.params.report(&mut std::io::stderr())?;
        BloomFilter::from_bitvec(stored.params, &stored.bits)
    }
}

/// `<prefix>.bf` and `<prefix>.bf.txt`
pub fn filter_files(prefix: &Path) -> (PathBuf, PathBuf) {
    let mut bf = prefix.as_os_str().to_owned();
    bf.push(".bf");
    let mut txt = bf.clone();
    txt.push(".txt");
    (PathBuf::from(bf), PathBuf::from(txt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreenError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_kmers(rng: &mut StdRng, n: usize, k: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|_| (0..k).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect())
            .collect()
    }

    #[test]
    fn sizing_textbook() {
        let p = BloomParams::from_fpr(25, 0.01, 1000, Sizing::Optimal).unwrap();
        // -1000 ln(0.01) / ln²2 = 9585.06
        assert_eq!(p.bfsize_bits, 9592);
        assert_eq!(p.hash_num, 7);
        assert!(p.expected_fpr() <= 0.0101);
    }
    #[test]
    fn sizing_truncated() {
        let p = BloomParams::from_fpr(25, 0.01, 1000, Sizing::Truncated).unwrap();
        assert_eq!(p.bfsize_bits, 9584);
        assert_eq!(p.hash_num, 6);
        let p = BloomParams::from_fpr(25, 0.05, 1000, Sizing::Truncated).unwrap();
        assert_eq!(p.bfsize_bits, 6232);
        assert_eq!(p.hash_num, 4);
    }
    #[test]
    fn sizing_alternatives() {
        let p = BloomParams::from_hash_num(25, 4, 1000).unwrap();
        assert_eq!(p.bfsize_bits, 5768);
        assert!((p.false_pos_rate - 0.0625).abs() < 1e-9);
        let p = BloomParams::from_size_bits(25, 8000, 1000).unwrap();
        assert_eq!(p.hash_num, 5);
        assert!(BloomParams::from_size_bits(25, 8001, 1000).is_err());
    }
    #[test]
    fn invalid_config() {
        assert!(matches!(
            BloomFilter::construct(0, 0.01, 10),
            Err(ScreenError::InvalidConfig(_))
        ));
        assert!(BloomFilter::construct(25, 0.0, 10).is_err());
        assert!(BloomFilter::construct(25, 1.0, 10).is_err());
        assert!(BloomFilter::construct(25, 0.01, 0).is_err());
        assert!(BloomParams::from_hash_num(25, 0, 10).is_err());
    }
    #[test]
    fn no_false_negatives_and_monotonic() {
        let mut rng = StdRng::seed_from_u64(7);
        let bf = BloomFilter::construct(21, 0.01, 2000).unwrap();
        let kmers = random_kmers(&mut rng, 2000, 21);
        for (i, kmer) in kmers.iter().enumerate() {
            bf.insert(&bf.encoder().encode(kmer).unwrap());
            // all earlier insertions are still there
            if i % 100 == 0 {
                for old in &kmers[..=i] {
                    assert!(bf.test(&bf.encoder().encode(old).unwrap()));
                }
            }
        }
        for kmer in &kmers {
            assert!(bf.test(&bf.encoder().encode(kmer).unwrap()));
        }
    }
    #[test]
    fn false_positive_rate_bound() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 5000;
        let p = 0.02;
        let bf = BloomFilter::construct(31, p, n as u64).unwrap();
        for kmer in random_kmers(&mut rng, n, 31) {
            bf.insert(&bf.encoder().encode(&kmer).unwrap());
        }
        let queries = random_kmers(&mut rng, 10 * n, 31);
        let fp = queries
            .iter()
            .filter(|kmer| bf.test(&bf.encoder().encode(kmer).unwrap()))
            .count();
        let rate = fp as f64 / queries.len() as f64;
        assert!(rate < 2.0 * p, "false positive rate {rate} exceeds {}", 2.0 * p);
    }
    #[test]
    fn idempotent_insert_and_fetch() {
        let bf = BloomFilter::construct(5, 0.01, 10).unwrap();
        let kmer = bf.encoder().encode(b"ACGTA").unwrap();
        assert!(!bf.test(&kmer));
        assert!(!bf.insert_and_fetch(&kmer));
        let ones = bf.count_ones();
        assert!(bf.test(&kmer));
        assert!(bf.insert_and_fetch(&kmer));
        bf.insert(&kmer);
        assert_eq!(bf.count_ones(), ones);
    }
    #[test]
    fn bitvec_layout() {
        let params = BloomParams::from_size_bits(5, 128, 4).unwrap();
        let bf = BloomFilter::with_params(params.clone()).unwrap();
        bf.insert(&bf.encoder().encode(b"ACGTA").unwrap());
        let bits = bf.to_bitvec();
        assert_eq!(bits.len(), 128);
        assert_eq!(bits.count_ones() as u64, bf.count_ones());
        for &p in bf.encoder().encode(b"ACGTA").unwrap().probes() {
            assert!(bits[p as usize]);
            assert_eq!(bits.as_raw_slice()[p as usize / 8] >> (p % 8) & 1, 1);
        }
        let copy = BloomFilter::from_bitvec(params, &bits).unwrap();
        assert!(copy.test(&copy.encoder().encode(b"ACGTA").unwrap()));
    }
}
