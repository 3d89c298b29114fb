// (c) Roel Kluin, 2023, GPL v3

use crate::bloom::{BloomFilter, BloomParams, Sizing};
use crate::error::{ensure_config, ScreenResult};
use crate::kmertree::{KmerTree, Orientation, Tag};
use crate::new_types::base::has_ambiguous;
use anyhow::Result;
use noodles_fasta as fasta;
use std::io::BufRead;

/// An adapter sequence and the read end it turns up at.
#[derive(Clone, Debug, PartialEq)]
pub struct Adapter {
    pub name: String,
    pub seq: Vec<u8>,
    pub orientation: Orientation,
}

impl Adapter {
    pub fn new(name: impl Into<String>, seq: &[u8], orientation: Orientation) -> Self {
        Adapter {
            name: name.into(),
            seq: seq.to_ascii_uppercase(),
            orientation,
        }
    }
    pub fn declared_len(&self) -> usize {
        self.seq.len()
    }
}

/// Two adapters: ad1 precedes the insert at the 5' end, ad2 follows it at
/// the 3' end. Only the first L1, L2 bases of each are used.
#[derive(Clone, Debug, PartialEq)]
pub struct DualAdapter {
    pub ad1: Vec<u8>,
    pub ad2: Vec<u8>,
    pub l1: usize,
    pub l2: usize,
}

impl DualAdapter {
    pub fn new(ad1: &[u8], ad2: &[u8], l1: Option<usize>, l2: Option<usize>) -> ScreenResult<Self> {
        let l1 = l1.unwrap_or(ad1.len());
        let l2 = l2.unwrap_or(ad2.len());
        ensure_config!(l1 > 0 && l1 <= ad1.len(), "L1 ({l1}) must be in 1..={}", ad1.len());
        ensure_config!(l2 > 0 && l2 <= ad2.len(), "L2 ({l2}) must be in 1..={}", ad2.len());
        Ok(DualAdapter {
            ad1: ad1.to_vec(),
            ad2: ad2.to_vec(),
            l1,
            l2,
        })
    }
    pub fn adapters(&self) -> Vec<Adapter> {
        vec![
            Adapter::new("ad1", &self.ad1[..self.l1], Orientation::FivePrime),
            Adapter::new("ad2", &self.ad2[..self.l2], Orientation::ThreePrime),
        ]
    }
}

/// All entries of a fasta as 3' adapters.
pub fn adapters_from_fasta<T: BufRead>(mut fa: fasta::Reader<T>) -> Result<Vec<Adapter>> {
    let mut adapters = Vec::new();
    for res in fa.records() {
        let record = res?;
        adapters.push(Adapter::new(
            record.name(),
            record.sequence().as_ref(),
            Orientation::ThreePrime,
        ));
    }
    Ok(adapters)
}

/// Bloom filter and confirmation tree over the adapter k-mers, plus trees of
/// whole adapters for matches cut short by the read end: 3' adapters as is,
/// 5' adapters reversed.
pub struct AdapterIndex {
    adapters: Vec<Adapter>,
    bloom: BloomFilter,
    kmers: KmerTree,
    tails: KmerTree,
    heads: KmerTree,
}

impl AdapterIndex {
    pub fn build(adapters: Vec<Adapter>, kmer_size: usize, fpr: f64) -> Result<Self> {
        ensure_config!(!adapters.is_empty(), "no adapters given");
        ensure_config!(
            adapters.iter().all(|a| !a.seq.is_empty()),
            "empty adapter sequence"
        );
        ensure_config!(
            adapters.iter().any(|a| a.seq.len() >= kmer_size),
            "all adapters are shorter than the k-mer size {kmer_size}"
        );
        let nelem: usize = adapters
            .iter()
            .map(|a| (a.seq.len() + 1).saturating_sub(kmer_size))
            .sum();
        let params = BloomParams::from_fpr(kmer_size, fpr, nelem as u64, Sizing::Optimal)?.strand_specific();
        let bloom = BloomFilter::with_params(params)?;

        let mut kmers = KmerTree::new();
        let mut tails = KmerTree::new();
        let mut heads = KmerTree::new();
        for (i, ad) in adapters.iter().enumerate() {
            let source = u32::try_from(i)?;
            if has_ambiguous(&ad.seq) {
                eprintln!("Warning: adapter {} has non-ACGT bases", ad.name);
            }
            let mut scan = bloom.encoder().scan(&ad.seq);
            while let Some((_, kmer)) = scan.next_kmer() {
                bloom.insert(kmer);
            }
            kmers.insert_lmers(&ad.seq, kmer_size, source, ad.orientation)?;

            let whole = Tag::new(source, ad.orientation, u32::try_from(ad.seq.len())?, 0);
            match ad.orientation {
                Orientation::ThreePrime => tails.insert(&ad.seq, whole)?,
                Orientation::FivePrime => {
                    let rev: Vec<u8> = ad.seq.iter().rev().copied().collect();
                    heads.insert(&rev, whole)?
                }
            };
        }
        eprintln!(
            "- Adapter index: {} adapters, {} k-mers of {} bases, {} bits",
            adapters.len(),
            nelem,
            kmer_size,
            bloom.params().bfsize_bits
        );
        Ok(AdapterIndex {
            adapters,
            bloom,
            kmers,
            tails,
            heads,
        })
    }

    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }
    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }
    pub fn kmers(&self) -> &KmerTree {
        &self.kmers
    }
    pub fn tails(&self) -> &KmerTree {
        &self.tails
    }
    pub fn heads(&self) -> &KmerTree {
        &self.heads
    }
    pub fn kmer_size(&self) -> usize {
        self.bloom.kmer_size()
    }
    pub fn has_five_prime(&self) -> bool {
        self.adapters
            .iter()
            .any(|a| a.orientation == Orientation::FivePrime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreenError;

    #[test]
    fn dual_declared_lengths() {
        let dual = DualAdapter::new(b"ACGTACGTAA", b"TTGGCCAATT", Some(8), None).unwrap();
        let ads = dual.adapters();
        assert_eq!(ads[0].seq, b"ACGTACGT".to_vec());
        assert_eq!(ads[0].orientation, Orientation::FivePrime);
        assert_eq!(ads[1].declared_len(), 10);
        assert!(DualAdapter::new(b"ACGT", b"ACGT", Some(5), None).is_err());
        assert!(DualAdapter::new(b"ACGT", b"ACGT", None, Some(0)).is_err());
    }
    #[test]
    fn index_contents() {
        let ads = vec![Adapter::new("a", b"agatcggaagagc", Orientation::ThreePrime)];
        let idx = AdapterIndex::build(ads, 8, 0.01).unwrap();
        assert!(!idx.has_five_prime());
        assert!(!idx.bloom().encoder().is_canonical());
        for w in b"AGATCGGAAGAGC".windows(8) {
            assert!(idx.bloom().test(&idx.bloom().encoder().encode(w).unwrap()));
            assert!(idx.kmers().lookup(w).is_some());
        }
        assert!(idx.tails().lookup(b"AGATCGGAAGAGC").is_some());
        assert!(idx.heads().lookup_prefix(b"A") == false);
    }
    #[test]
    fn index_rejects_bad_input() {
        let err = AdapterIndex::build(vec![], 8, 0.01).err().unwrap();
        assert!(matches!(err.downcast_ref::<ScreenError>(), Some(ScreenError::InvalidConfig(_))));
        let short = vec![Adapter::new("s", b"ACGT", Orientation::ThreePrime)];
        assert!(AdapterIndex::build(short, 8, 0.01).is_err());
    }
}
