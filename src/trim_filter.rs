// (c) Roel Kluin, 2023, GPL v3

use crate::adapter::{adapters_from_fasta, AdapterIndex, DualAdapter};
use crate::contamination::{ContaminantIndex, ContaminationFilter, Method};
use crate::fastx::{parse_fasta_file, parse_fastq_file, Sinks};
use crate::kmertree::tree_from_fasta;
use crate::qtrim::{Cut, NTrim, QualityTrim, TrimN, TrimQ};
use crate::stats::{summary_files, Filter, StatsAccumulator, NFILTERS};
use crate::trimmer::{Outcome, TrimConfig, Trimmer};
use crate::workers;
use anyhow::{ensure, Result};
use arrayvec::ArrayVec;
use clap::Args;
use noodles_fastq as fastq;
use std::ops::Range;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct TrimFilterCmd {
    /// Reads to screen, fastq, optionally gzipped
    #[arg(short = 'f', long, value_name = "FASTQ", required = true)]
    fastq: PathBuf,

    /// Prefix for the output files
    #[arg(short, long, value_name = "PREFIX", required = true)]
    output: PathBuf,

    /// 3' adapter sequences, fasta
    #[arg(short = 'a', long, value_name = "FASTA", conflicts_with_all = ["ad1", "ad2"])]
    adapters: Option<PathBuf>,

    /// 5' adapter for dual adapter trimming
    #[arg(long, value_name = "SEQ", requires = "ad2")]
    ad1: Option<String>,

    /// 3' adapter for dual adapter trimming
    #[arg(long, value_name = "SEQ", requires = "ad1")]
    ad2: Option<String>,

    /// Number of bases of ad1 to use, all by default
    #[arg(long, requires = "ad1")]
    l1: Option<usize>,

    /// Number of bases of ad2 to use, all by default
    #[arg(long, requires = "ad2")]
    l2: Option<usize>,

    /// k-mer size for adapter scanning
    #[arg(short = 'k', long, default_value = "12")]
    adapter_kmer: usize,

    /// False positive rate of the adapter Bloom filter
    #[arg(long, default_value = "0.01")]
    adapter_fpr: f64,

    /// Minimal number of adapter bases at a read end to trim
    #[arg(long, default_value = "5")]
    min_overlap: usize,

    /// Substitutions allowed in an adapter alignment
    #[arg(long, default_value = "2")]
    mismatches: usize,

    /// Score an adapter alignment must exceed: log10(4) per matching base,
    /// minus a tenth of the base quality per mismatch
    #[arg(long, default_value = "1.5")]
    threshold: f64,

    /// Discard reads with adapters instead of trimming them
    #[arg(long)]
    adapter_rm: bool,

    /// Contaminant index, made with make-tree or make-bloom
    #[arg(short = 'i', long, value_name = "FILE")]
    index: Option<PathBuf>,

    /// Kind of contaminant index
    #[arg(short = 'M', long, value_enum, default_value_t = Method::Tree)]
    method: Method,

    /// Contaminant sequences, fasta; a tree is built from these
    #[arg(short = 'c', long, value_name = "FASTA", conflicts_with = "index")]
    contaminants: Option<PathBuf>,

    /// L-mer length of the contaminant tree
    #[arg(short = 'l', long, default_value = "25")]
    lmer_len: usize,

    /// Discard reads of which a larger fraction is found in the contaminant index
    #[arg(short, long, default_value = "0.5")]
    score: f64,

    /// Quality filter
    #[arg(short = 'q', long, value_enum, default_value_t = TrimQ::No)]
    trim_q: TrimQ,

    /// Minimal base quality
    #[arg(long, default_value = "27")]
    min_q: u8,

    /// ASCII value of quality zero
    #[arg(long, default_value = "33")]
    zero_q: u8,

    /// Number of low quality bases to discard a read for, frac modes
    #[arg(long, default_value = "5")]
    nlow_q: usize,

    /// Bases to cut from the start, global mode
    #[arg(long, default_value = "0")]
    global_left: usize,

    /// Bases to cut from the end, global mode
    #[arg(long, default_value = "0")]
    global_right: usize,

    /// N filter
    #[arg(short = 'n', long, value_enum, default_value_t = TrimN::No)]
    trim_n: TrimN,

    /// Minimal length of a read after trimming
    #[arg(short, long, default_value = "25")]
    min_len: usize,

    /// Number of threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Write uncompressed fastq
    #[arg(short, long)]
    uncompressed: bool,
}

/// The filters, in the order a read passes them.
pub struct Pipeline {
    trimmer: Option<Trimmer>,
    contamination: Option<ContaminationFilter>,
    qtrim: QualityTrim,
    ntrim: NTrim,
}

/// Where a read goes, the part of it kept, and the cuts made on the way,
/// all in coordinates of the read as it was read.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub dest: Option<Filter>,
    pub range: Range<usize>,
    pub cuts: ArrayVec<(Filter, Range<usize>), NFILTERS>,
}

impl Verdict {
    /// ` TRIMA:s:e TRIMQ:s:e ...`, appended to the fastq description.
    pub fn annotation(&self) -> String {
        self.cuts
            .iter()
            .map(|(f, r)| format!(" TRIM{}:{}:{}", trim_tag(*f), r.start, r.end))
            .collect()
    }

    /// Applies a filter's cut; false when it discards the read.
    fn cut(&mut self, filter: Filter, cut: Cut, stats: &mut StatsAccumulator) -> bool {
        let mut range = self.range.clone();
        if !narrow(&mut range, cut) {
            stats.add_discarded(filter);
            self.dest = Some(filter);
            return false;
        }
        if range != self.range {
            stats.add_trimmed(filter);
            self.cuts.push((filter, range.clone()));
            self.range = range;
        }
        true
    }
}

fn trim_tag(filter: Filter) -> char {
    match filter {
        Filter::Adap => 'A',
        Filter::Cont => 'C',
        Filter::Lowq => 'Q',
        Filter::Nnnn => 'N',
    }
}

/// Narrows `range` to the part a cut keeps; false on discard.
fn narrow(range: &mut Range<usize>, cut: Cut) -> bool {
    match cut {
        Cut::Keep => true,
        Cut::Trim(r) => {
            *range = range.start + r.start..range.start + r.end;
            true
        }
        Cut::Discard => false,
    }
}

impl Pipeline {
    pub fn new(
        trimmer: Option<Trimmer>,
        contamination: Option<ContaminationFilter>,
        qtrim: QualityTrim,
        ntrim: NTrim,
    ) -> Self {
        Pipeline {
            trimmer,
            contamination,
            qtrim,
            ntrim,
        }
    }

    pub fn enabled(&self) -> [bool; NFILTERS] {
        [
            self.trimmer.is_some(),
            self.contamination.is_some(),
            self.qtrim.is_enabled(),
            self.ntrim.is_enabled(),
        ]
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.trimmer.as_ref().map_or(Vec::new(), |t| {
            t.index().adapters().iter().map(|a| a.name.clone()).collect()
        })
    }

    /// Runs the read through the filters. A discarded read keeps the cuts of
    /// the filters before the one that discarded it.
    pub fn classify(&self, id: &[u8], seq: &[u8], qual: &[u8], stats: &mut StatsAccumulator) -> Verdict {
        stats.add_read();
        let mut v = Verdict {
            dest: None,
            range: 0..seq.len(),
            cuts: ArrayVec::new(),
        };

        if let Some(trimmer) = &self.trimmer {
            let res = trimmer.trim_with_quality(id, seq, qual);
            stats.record(&res);
            match res.outcome {
                Outcome::Clean => {}
                Outcome::Trimmed => {
                    v.range = res.retained_start..res.retained_end;
                    v.cuts.push((Filter::Adap, v.range.clone()));
                }
                Outcome::Discarded => {
                    v.dest = Some(Filter::Adap);
                    return v;
                }
            }
        }
        if let Some(cf) = &self.contamination {
            if cf.is_contaminated(&seq[v.range.clone()]) {
                stats.add_discarded(Filter::Cont);
                v.dest = Some(Filter::Cont);
                return v;
            }
        }
        let cut = self.qtrim.apply(&qual[v.range.clone()]);
        if !v.cut(Filter::Lowq, cut, stats) {
            return v;
        }
        let cut = self.ntrim.apply(&seq[v.range.clone()]);
        if !v.cut(Filter::Nnnn, cut, stats) {
            return v;
        }
        stats.add_good();
        v
    }

    /// Classify a record and cut it to the retained part. Cuts are noted in
    /// the description.
    pub fn process(&self, mut record: fastq::Record, stats: &mut StatsAccumulator) -> Result<(Option<Filter>, fastq::Record)> {
        let (seq, qual) = (record.sequence(), record.quality_scores());
        ensure!(
            seq.len() == qual.len(),
            "{}: sequence and quality lengths differ",
            String::from_utf8_lossy(record.name())
        );
        let v = self.classify(record.name(), seq, qual, stats);
        if v.cuts.is_empty() {
            return Ok((v.dest, record));
        }
        let Range { start, end } = v.range.clone();
        let seq = record.sequence_mut();
        seq.truncate(end);
        seq.drain(..start);
        let qual = record.quality_scores_mut();
        qual.truncate(end);
        qual.drain(..start);
        record.description_mut().extend_from_slice(v.annotation().as_bytes());
        Ok((v.dest, record))
    }
}

fn adapter_trimmer(cmd: &TrimFilterCmd) -> Result<Option<Trimmer>> {
    let adapters = match (&cmd.adapters, &cmd.ad1, &cmd.ad2) {
        (Some(fa), _, _) => {
            eprintln!("Reading adapters from {fa:?}");
            adapters_from_fasta(parse_fasta_file(fa.clone())?)?
        }
        (None, Some(ad1), Some(ad2)) => DualAdapter::new(ad1.as_bytes(), ad2.as_bytes(), cmd.l1, cmd.l2)?.adapters(),
        _ => return Ok(None),
    };
    let index = AdapterIndex::build(adapters, cmd.adapter_kmer, cmd.adapter_fpr)?;
    let config = TrimConfig::new(cmd.min_len, cmd.min_overlap)?
        .with_alignment(cmd.mismatches, cmd.threshold, cmd.zero_q)?
        .discard_matches(cmd.adapter_rm);
    Ok(Some(Trimmer::new(index, config)))
}

fn contamination_filter(cmd: &TrimFilterCmd) -> Result<Option<ContaminationFilter>> {
    let index = match (&cmd.index, &cmd.contaminants) {
        (Some(file), _) => ContaminantIndex::load(cmd.method, file, cmd.lmer_len)?,
        (None, Some(fa)) => {
            eprintln!("Building a tree of {}-mers from {fa:?}", cmd.lmer_len);
            let tree = tree_from_fasta(parse_fasta_file(fa.clone())?, cmd.lmer_len)?;
            ContaminantIndex::Tree {
                tree,
                lmer_len: cmd.lmer_len,
            }
        }
        (None, None) => return Ok(None),
    };
    Ok(Some(ContaminationFilter::new(index, cmd.score)?))
}

pub fn trim_filter(cmd: TrimFilterCmd) -> Result<()> {
    let qtrim = QualityTrim::new(
        cmd.trim_q,
        cmd.min_q,
        cmd.zero_q,
        cmd.nlow_q,
        (cmd.global_left, cmd.global_right),
        cmd.min_len,
    )?;
    let ntrim = NTrim::new(cmd.trim_n, cmd.min_len);
    let pipeline = Pipeline::new(adapter_trimmer(&cmd)?, contamination_filter(&cmd)?, qtrim, ntrim);
    let enabled = pipeline.enabled();
    ensure!(enabled.iter().any(|&e| e), "No filter was enabled, nothing to do");

    let (bin_file, tsv_file) = summary_files(&cmd.output);
    for file in [bin_file, tsv_file] {
        ensure!(!file.exists(), "{file:?} already exists!");
    }
    let mut sinks = Sinks::create(&cmd.output, enabled, !cmd.uncompressed)?;
    eprintln!("Reading {:?}", cmd.fastq);
    let reader = parse_fastq_file(cmd.fastq.clone())?;
    let stats = workers::run(reader, &pipeline, &mut sinks, cmd.threads)?;
    drop(sinks);

    stats.report(&pipeline.adapter_names());
    stats.save(&cmd.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::kmertree::Orientation;

    fn filters(trim_q: TrimQ, trim_n: TrimN) -> Pipeline {
        let qtrim = QualityTrim::new(trim_q, 27, 33, 3, (0, 0), 4).unwrap();
        Pipeline::new(None, None, qtrim, NTrim::new(trim_n, 4))
    }

    #[test]
    fn quality_then_n() {
        let p = filters(TrimQ::Ends, TrimN::Strip);
        let mut st = StatsAccumulator::new(p.enabled());
        assert_eq!(p.enabled(), [false, false, true, true]);
        let v = p.classify(b"r", b"ACNNACGTAC", b"5IIIIIIII5", &mut st);
        assert_eq!(v.dest, None);
        assert_eq!(v.range, 4..9);
        assert_eq!(v.annotation(), " TRIMQ:1:9 TRIMN:4:9");
        assert_eq!(st.trimmed[Filter::Lowq.as_usize()], 1);
        assert_eq!(st.trimmed[Filter::Nnnn.as_usize()], 1);
        assert_eq!(st.good, 1);

        let v = p.classify(b"r", b"ACGTAC", b"555555", &mut st);
        assert_eq!(v.dest, Some(Filter::Lowq));
        assert!(v.cuts.is_empty());
        assert_eq!(st.nreads, 2);
    }
    #[test]
    fn adapters_first() {
        let ads = vec![Adapter::new("ad", b"AGATCGGAAGAGC", Orientation::ThreePrime)];
        let index = AdapterIndex::build(ads, 8, 0.01).unwrap();
        let trimmer = Trimmer::new(index, TrimConfig::new(4, 3).unwrap());
        let qtrim = QualityTrim::new(TrimQ::All, 27, 33, 3, (0, 0), 4).unwrap();
        let p = Pipeline::new(Some(trimmer), None, qtrim, NTrim::new(TrimN::No, 4));
        let mut st = StatsAccumulator::new(p.enabled());

        // the low quality bases are in the adapter part only
        let record = fastq::Record::new("r1", "CCTTGGAACCAGATCGGAAGAGC", "IIIIIIIIII5555555555555");
        let (dest, cut) = p.process(record, &mut st).unwrap();
        assert_eq!(dest, None);
        assert_eq!(cut.sequence(), b"CCTTGGAACC");
        assert_eq!(cut.quality_scores(), b"IIIIIIIIII");
        assert_eq!(cut.name(), b"r1");
        assert_eq!(cut.description(), b" TRIMA:0:10");

        let record = fastq::Record::new("r2", "CCAGATCGGAAGAGC", "IIIIIIIIIIIIIII");
        let (dest, kept) = p.process(record, &mut st).unwrap();
        assert_eq!(dest, Some(Filter::Adap));
        // discarded reads are written as they came in
        assert_eq!(kept.sequence(), b"CCAGATCGGAAGAGC");
        assert!(kept.description().is_empty());
        assert_eq!(st.adapter_trimmed, 1);
        assert_eq!(st.adapter_discarded, 1);
        assert_eq!(p.adapter_names(), vec!["ad".to_string()]);

        let record = fastq::Record::new("r3", "ACGT", "II");
        assert!(p.process(record, &mut st).is_err());
    }
}
