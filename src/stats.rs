// (c) Roel Kluin, 2023, GPL v3

use crate::trimmer::{Outcome, TrimResult};
use ahash::AHashMap;
use anyhow::{ensure, Result};
use bincode::serialize_into;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const NFILTERS: usize = 4;

/// The filters a read passes, in pipeline order. Also the output file tags.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    #[display(fmt = "adap")]
    Adap,
    #[display(fmt = "cont")]
    Cont,
    #[display(fmt = "lowq")]
    Lowq,
    #[display(fmt = "NNNN")]
    Nnnn,
}

impl Filter {
    pub const ALL: [Filter; NFILTERS] = [Filter::Adap, Filter::Cont, Filter::Lowq, Filter::Nnnn];

    pub fn as_usize(&self) -> usize {
        *self as usize
    }
    fn description(&self) -> &'static str {
        match self {
            Filter::Adap => "adapters",
            Filter::Cont => "contaminations",
            Filter::Lowq => "low quality",
            Filter::Nnnn => "N",
        }
    }
}

/// Per-read events, summed up. One per worker, merged at the end.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsAccumulator {
    pub nreads: u64,
    pub good: u64,
    pub unscreened: u64,
    pub enabled: [bool; NFILTERS],
    pub trimmed: [u64; NFILTERS],
    pub discarded: [u64; NFILTERS],
    pub clean: u64,
    pub adapter_trimmed: u64,
    pub adapter_discarded: u64,
    pub by_adapter: AHashMap<u32, u64>,
}

impl StatsAccumulator {
    pub fn new(enabled: [bool; NFILTERS]) -> Self {
        StatsAccumulator {
            enabled,
            ..Default::default()
        }
    }

    pub fn add_read(&mut self) {
        self.nreads += 1;
    }
    pub fn add_good(&mut self) {
        self.good += 1;
    }
    pub fn add_trimmed(&mut self, f: Filter) {
        self.trimmed[f.as_usize()] += 1;
    }
    pub fn add_discarded(&mut self, f: Filter) {
        self.discarded[f.as_usize()] += 1;
    }

    /// Outcome of the adapter scan of one read.
    pub fn record(&mut self, res: &TrimResult) {
        if !res.screened {
            self.unscreened += 1;
        }
        match res.outcome {
            Outcome::Clean => self.clean += 1,
            Outcome::Trimmed => {
                self.adapter_trimmed += 1;
                self.add_trimmed(Filter::Adap);
            }
            Outcome::Discarded => {
                self.adapter_discarded += 1;
                self.add_discarded(Filter::Adap);
            }
        }
        if let Some(source) = res.source {
            *self.by_adapter.entry(source).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &StatsAccumulator) {
        self.nreads += other.nreads;
        self.good += other.good;
        self.unscreened += other.unscreened;
        for i in 0..NFILTERS {
            self.enabled[i] |= other.enabled[i];
            self.trimmed[i] += other.trimmed[i];
            self.discarded[i] += other.discarded[i];
        }
        self.clean += other.clean;
        self.adapter_trimmed += other.adapter_trimmed;
        self.adapter_discarded += other.adapter_discarded;
        for (&source, &n) in other.by_adapter.iter() {
            *self.by_adapter.entry(source).or_insert(0) += n;
        }
    }

    fn pct(&self, n: u64) -> f64 {
        if self.nreads == 0 {
            0.0
        } else {
            100.0 * n as f64 / self.nreads as f64
        }
    }

    /// Print the summary to stdout; `names` are the adapter names by source.
    pub fn report(&self, names: &[String]) {
        println!("Total number of reads: {}", self.nreads);
        for f in Filter::ALL.iter().filter(|f| self.enabled[f.as_usize()]) {
            let i = f.as_usize();
            println!(
                "Reads trimmed for {}: {} ({:.2} %)",
                f.description(),
                self.trimmed[i],
                self.pct(self.trimmed[i])
            );
            println!(
                "Reads discarded for {}: {} ({:.2} %)",
                f.description(),
                self.discarded[i],
                self.pct(self.discarded[i])
            );
        }
        if self.enabled[Filter::Adap.as_usize()] {
            println!("Reads too short to screen for adapters: {}", self.unscreened);
            let mut hits: Vec<_> = self.by_adapter.iter().collect();
            hits.sort();
            for (&source, &n) in hits {
                let name = names.get(source as usize).map_or("?", |s| s.as_str());
                println!("Adapter {name}: {n}");
            }
        }
        println!("Reads passing all filters: {} ({:.2} %)", self.good, self.pct(self.good));
    }

    /// `<prefix>_summary.bin` and a tab separated `<prefix>_summary.tsv`.
    pub fn save(&self, prefix: &Path) -> Result<()> {
        let (bin_file, tsv_file) = summary_files(prefix);
        ensure!(!bin_file.exists(), "{bin_file:?} already exists!");
        ensure!(!tsv_file.exists(), "{tsv_file:?} already exists!");
        serialize_into(BufWriter::new(File::create(&bin_file)?), self)?;

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&tsv_file)?;
        wtr.write_record(["filter", "enabled", "trimmed", "discarded"])?;
        for f in Filter::ALL {
            let i = f.as_usize();
            wtr.write_record([
                f.to_string(),
                self.enabled[i].to_string(),
                self.trimmed[i].to_string(),
                self.discarded[i].to_string(),
            ])?;
        }
        // second table, same width
        wtr.write_record(["reads", "good", "unscreened", "clean"])?;
        wtr.write_record([self.nreads, self.good, self.unscreened, self.clean].map(|n| n.to_string()))?;
        wtr.flush()?;
        eprintln!("Statistics written to {bin_file:?} and {tsv_file:?}");
        Ok(())
    }
}

pub fn summary_files(prefix: &Path) -> (PathBuf, PathBuf) {
    let p = prefix.to_string_lossy();
    (
        PathBuf::from(format!("{p}_summary.bin")),
        PathBuf::from(format!("{p}_summary.tsv")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: Outcome, screened: bool, source: Option<u32>) -> TrimResult<'static> {
        TrimResult {
            read_id: b"r",
            retained_start: 0,
            retained_end: 10,
            outcome,
            screened,
            source,
        }
    }

    #[test]
    fn record_outcomes() {
        let mut st = StatsAccumulator::new([true, false, false, false]);
        st.record(&result(Outcome::Clean, false, None));
        st.record(&result(Outcome::Trimmed, true, Some(1)));
        st.record(&result(Outcome::Discarded, true, Some(1)));
        assert_eq!(st.unscreened, 1);
        assert_eq!(st.clean, 1);
        assert_eq!(st.trimmed[Filter::Adap.as_usize()], 1);
        assert_eq!(st.discarded[Filter::Adap.as_usize()], 1);
        assert_eq!(st.by_adapter.get(&1), Some(&2));
    }
    #[test]
    fn merge_sums() {
        let mut a = StatsAccumulator::new([true, true, false, false]);
        let mut b = StatsAccumulator::new([true, true, false, false]);
        a.add_read();
        a.add_good();
        b.add_read();
        b.add_discarded(Filter::Cont);
        b.record(&result(Outcome::Trimmed, true, Some(0)));
        a.merge(&b);
        assert_eq!(a.nreads, 2);
        assert_eq!(a.good, 1);
        assert_eq!(a.discarded[Filter::Cont.as_usize()], 1);
        assert_eq!(a.adapter_trimmed, 1);
        assert_eq!(a.by_adapter.get(&0), Some(&1));
    }
    #[test]
    fn filter_tags() {
        assert_eq!(Filter::Nnnn.to_string(), "NNNN");
        assert_eq!(Filter::Lowq.to_string(), "lowq");
        assert_eq!(Filter::ALL.map(|f| f.as_usize()), [0, 1, 2, 3]);
    }
}
