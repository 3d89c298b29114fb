// (c) Roel Kluin, 2023, GPL v3

use crate::bloom::BloomFilter;
use crate::error::{ensure_config, ScreenResult};
use crate::kmertree::KmerTree;
use anyhow::Result;
use clap::ValueEnum;
use std::path::Path;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// exact L-mer tree
    Tree,
    /// canonical k-mer Bloom filter
    Bloom,
}

pub enum ContaminantIndex {
    Tree { tree: KmerTree, lmer_len: usize },
    Bloom(BloomFilter),
}

impl ContaminantIndex {
    pub fn load(method: Method, file: &Path, lmer_len: usize) -> Result<Self> {
        Ok(match method {
            Method::Tree => ContaminantIndex::Tree {
                tree: KmerTree::load(file)?,
                lmer_len,
            },
            Method::Bloom => ContaminantIndex::Bloom(BloomFilter::load(file)?),
        })
    }
}

/// Discards reads of which too large a part is found in the index.
pub struct ContaminationFilter {
    index: ContaminantIndex,
    score: f64,
}

impl ContaminationFilter {
    pub fn new(index: ContaminantIndex, score: f64) -> ScreenResult<Self> {
        ensure_config!((0.0..=1.0).contains(&score), "score {score} not in [0, 1]");
        if let ContaminantIndex::Tree { lmer_len, .. } = &index {
            ensure_config!(*lmer_len > 0, "L-mer length must be positive");
        }
        Ok(ContaminationFilter { index, score })
    }

    /// Fraction of the read's windows in the index, 0 if it has none.
    pub fn score(&self, seq: &[u8]) -> f64 {
        match &self.index {
            ContaminantIndex::Tree { tree, lmer_len } => tree.score_read(seq, *lmer_len),
            ContaminantIndex::Bloom(bf) => {
                let nwin = (seq.len() + 1).saturating_sub(bf.kmer_size());
                if nwin == 0 {
                    return 0.0;
                }
                let mut found = 0;
                let mut scan = bf.encoder().scan(seq);
                while let Some((_, kmer)) = scan.next_kmer() {
                    found += bf.test(kmer) as usize;
                }
                found as f64 / nwin as f64
            }
        }
    }

    pub fn is_contaminated(&self, seq: &[u8]) -> bool {
        self.score(seq) > self.score
    }
}
