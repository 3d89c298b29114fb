// (c) Roel Kluin, 2023, GPL v3

use crate::stats::{Filter, NFILTERS};
use anyhow::{anyhow, ensure, Result};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use noodles_fasta as fasta;
use noodles_fastq as fastq;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub type BoxedRead = Box<dyn BufRead + Send>;
pub type BoxedWrite = Box<dyn Write + Send>;

fn is_gzipped(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

/// A buffered reader, decompressing when the name ends in `.gz`.
pub fn open_input(path: &Path) -> Result<BoxedRead> {
    let file = File::open(path).map_err(|e| anyhow!("Error opening {path:?}: {e}"))?;
    Ok(if is_gzipped(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Box::new(BufReader::new(file))
    })
}

pub fn parse_fasta_file(fa: PathBuf) -> Result<fasta::Reader<BoxedRead>> {
    open_input(&fa).map(fasta::Reader::new)
}

pub fn parse_fastq_file(fq: PathBuf) -> Result<fastq::Reader<BoxedRead>> {
    open_input(&fq).map(fastq::Reader::new)
}

/// `<prefix>_<tag>.fq`, with `.gz` appended when compressed.
pub fn output_file(prefix: &Path, tag: &str, gzip: bool) -> PathBuf {
    let p = prefix.to_string_lossy();
    PathBuf::from(format!("{p}_{tag}.fq{}", if gzip { ".gz" } else { "" }))
}

pub fn create_fastq_writer(path: &Path, gzip: bool) -> Result<fastq::Writer<BoxedWrite>> {
    ensure!(!path.exists(), "{path:?} already exists!");
    let file = BufWriter::new(File::create(path)?);
    let inner: BoxedWrite = if gzip {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };
    Ok(fastq::Writer::new(inner))
}

/// Output for reads that pass, and one per enabled filter for the reads it discards.
pub struct Sinks {
    good: fastq::Writer<BoxedWrite>,
    filtered: [Option<fastq::Writer<BoxedWrite>>; NFILTERS],
}

impl Sinks {
    pub fn create(prefix: &Path, enabled: [bool; NFILTERS], gzip: bool) -> Result<Self> {
        let good_file = output_file(prefix, "good", gzip);
        eprintln!("Writing reads that pass to {good_file:?}");
        let good = create_fastq_writer(&good_file, gzip)?;
        let mut filtered: [Option<fastq::Writer<BoxedWrite>>; NFILTERS] = Default::default();
        for f in Filter::ALL.into_iter().filter(|f| enabled[f.as_usize()]) {
            let file = output_file(prefix, &f.to_string(), gzip);
            eprintln!("Writing reads discarded for {f} to {file:?}");
            filtered[f.as_usize()] = Some(create_fastq_writer(&file, gzip)?);
        }
        Ok(Sinks { good, filtered })
    }

    pub fn write(&mut self, dest: Option<Filter>, record: &fastq::Record) -> Result<()> {
        let writer = match dest {
            None => &mut self.good,
            Some(f) => self.filtered[f.as_usize()]
                .as_mut()
                .ok_or_else(|| anyhow!("no output for filter {f}"))?,
        };
        writer.write_record(record)?;
        Ok(())
    }
}
