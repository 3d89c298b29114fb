// (c) Roel Kluin, 2023, GPL v3

use crate::bloom::{filter_files, BloomFilter, BloomParams, Sizing};
use crate::fastx::{parse_fasta_file, BoxedRead};
use crate::hashlut::DEFAULT_SEED;
use crate::new_types::base::has_ambiguous;
use anyhow::{anyhow, ensure, Result};
use clap::Args;
use crossbeam_channel::{bounded, Sender};
use itertools::izip;
use noodles_fasta as fasta;
use std::iter::repeat;
use std::path::{Path, PathBuf};

/// Bases per chunk handed to a thread; chunks overlap by k - 1.
const CHUNK: usize = 1 << 16;

#[derive(Args, Debug)]
pub struct MakeBloomCmd {
    /// Contaminant sequences, fasta, optionally gzipped
    #[arg(short = 'f', long, value_name = "FASTA", required = true)]
    fasta: PathBuf,

    /// Output prefix, <PREFIX>.bf and <PREFIX>.bf.txt are written
    #[arg(short, long, value_name = "PREFIX", required = true)]
    output: PathBuf,

    /// k-mer size
    #[arg(short, long, default_value = "25")]
    kmersize: usize,

    /// False positive rate
    #[arg(short = 'p', long, default_value = "0.05")]
    fal_pos_rate: f64,

    /// Number of hash functions, determines the size
    #[arg(short = 'g', long, conflicts_with = "bfsize_bits")]
    hash_num: Option<usize>,

    /// Size of the bit array, a multiple of 8; determines the hash count
    #[arg(short = 'm', long)]
    bfsize_bits: Option<u64>,

    /// Rounding of the size and hash count for a false positive rate
    #[arg(short, long, value_enum, default_value_t = Sizing::Optimal)]
    sizing: Sizing,

    /// Seed for the hash tables, the filter can only be used with the same seed
    #[arg(short = 'S', long, default_value = "40164")]
    seed: u64,

    /// Number of threads
    #[arg(short, long, default_value = "4")]
    threads: usize,
}

/// Number of k-mer windows in a fasta.
pub fn count_kmers(fasta: &Path, k: usize) -> Result<u64> {
    let mut fa = parse_fasta_file(fasta.to_path_buf())?;
    let mut n = 0_u64;
    for res in fa.records() {
        let record = res?;
        n += (record.sequence().as_ref().len() + 1).saturating_sub(k) as u64;
    }
    Ok(n)
}

fn send_chunks(fa: &mut fasta::Reader<BoxedRead>, tx: &Sender<Vec<u8>>, k: usize) -> Result<()> {
    for res in fa.records() {
        let record = res?;
        let seq = record.sequence().as_ref();
        dbg_print!("Sending {} ({} bases)", record.name(), seq.len());
        for start in (0..seq.len()).step_by(CHUNK) {
            let end = seq.len().min(start + CHUNK + k - 1);
            if end - start < k {
                break;
            }
            tx.send(seq[start..end].to_ascii_uppercase())
                .map_err(|_| anyhow!("Threads stopped early"))?;
        }
    }
    Ok(())
}

/// Insert all k-mers without N; returns the number of k-mers that set a new
/// bit and the number that were present already.
pub fn fill(bf: &BloomFilter, mut fa: fasta::Reader<BoxedRead>, ct: usize) -> Result<(u64, u64)> {
    ensure!(ct > 0, "At least one thread is required");
    let k = bf.kmer_size();
    crossbeam::scope(|s| -> Result<(u64, u64)> {
        let (tx, rx) = bounded::<Vec<u8>>(2 * ct);
        let threads: Vec<_> = izip!(0..ct, repeat(rx))
            .map(|(nr, rx)| {
                s.spawn(move |_| {
                    let (mut added, mut present) = (0_u64, 0_u64);
                    for chunk in rx.iter() {
                        let mut scan = bf.encoder().scan(&chunk);
                        while let Some((_, kmer)) = scan.next_kmer() {
                            if has_ambiguous(kmer.bases()) {
                                continue;
                            }
                            if bf.insert_and_fetch(kmer) {
                                present += 1;
                            } else {
                                added += 1;
                            }
                        }
                    }
                    dbg_print!("Thread {nr}: {added} added, {present} present");
                    (added, present)
                })
            })
            .collect();
        let sent = send_chunks(&mut fa, &tx, k);
        drop(tx);

        let mut counts = (0, 0);
        for t in threads {
            let (added, present) = t.join().map_err(|_| anyhow!("A thread panicked"))?;
            counts.0 += added;
            counts.1 += present;
        }
        sent?;
        Ok(counts)
    })
    .map_err(|_| anyhow!("A thread panicked"))?
}

pub fn make_bloom(cmd: MakeBloomCmd) -> Result<()> {
    let (bf_file, _) = filter_files(&cmd.output);
    ensure!(!bf_file.exists(), "{bf_file:?} already exists!");
    if cmd.seed != DEFAULT_SEED {
        eprintln!("Warning, a filter made with another seed can only be used with that seed.");
    }

    eprintln!("Counting {}-mers in {:?}", cmd.kmersize, cmd.fasta);
    let nelem = dbgf!(count_kmers(&cmd.fasta, cmd.kmersize)?, "{}");
    ensure!(nelem > 0, "{:?} has no sequence of {} bases or more", cmd.fasta, cmd.kmersize);

    let mut params = match (cmd.hash_num, cmd.bfsize_bits) {
        (Some(h), _) => BloomParams::from_hash_num(cmd.kmersize, h, nelem)?,
        (None, Some(m)) => BloomParams::from_size_bits(cmd.kmersize, m, nelem)?,
        (None, None) => BloomParams::from_fpr(cmd.kmersize, cmd.fal_pos_rate, nelem, cmd.sizing)?,
    };
    params.seed = cmd.seed;
    params.report(&mut std::io::stderr())?;
    let bf = BloomFilter::with_params(params)?;

    let fa = parse_fasta_file(cmd.fasta.clone())?;
    let (added, present) = fill(&bf, fa, cmd.threads)?;
    let ones = bf.count_ones();
    println!("{added} k-mers set new bits, {present} were present already");
    println!(
        "{ones} of {} bits set ({:.2}%), expected false positive rate {:.6}",
        bf.params().bfsize_bits,
        100.0 * ones as f64 / bf.params().bfsize_bits as f64,
        bf.params().expected_fpr()
    );
    bf.save(&cmd.output)
}
