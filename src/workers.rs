// (c) Roel Kluin, 2023, GPL v3

use crate::fastx::Sinks;
use crate::stats::{Filter, StatsAccumulator, NFILTERS};
use crate::trim_filter::Pipeline;
use anyhow::{anyhow, ensure, Result};
use crossbeam::thread::ScopedJoinHandle;
use crossbeam_channel::{bounded, Receiver, Sender};
use itertools::izip;
use noodles_fastq as fastq;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::iter::repeat;

/// Reads per batch sent to a worker.
pub const BATCH_SIZE: usize = 4096;

type Batch = (usize, Vec<fastq::Record>);
type Done = (usize, Vec<(Option<Filter>, fastq::Record)>);

fn join<T>(handle: ScopedJoinHandle<Result<T>>) -> Result<T> {
    handle.join().map_err(|_| anyhow!("A thread panicked"))?
}

/// Runs the reads through the pipeline on `ct` threads. Batches are written
/// in the order they were read.
pub fn run<R: BufRead>(
    mut reader: fastq::Reader<R>,
    pipeline: &Pipeline,
    sinks: &mut Sinks,
    ct: usize,
) -> Result<StatsAccumulator> {
    ensure!(ct > 0, "At least one thread is required");
    let enabled = pipeline.enabled();
    eprintln!("Using {ct} threads");

    crossbeam::scope(|s| -> Result<StatsAccumulator> {
        let (tx_batch, rx_batch) = bounded::<Batch>(2 * ct);
        let (tx_done, rx_done) = bounded::<Done>(2 * ct);

        let workers: Vec<_> = izip!(0..ct, repeat(rx_batch), repeat(tx_done))
            .map(|(nr, rx, tx)| s.spawn(move |_| work(nr, pipeline, enabled, rx, tx)))
            .collect();
        let writer = s.spawn(move |_| write_in_order(rx_done, sinks));

        let sent = send_batches(&mut reader, &tx_batch);
        // closes the channel: workers finish, then the writer
        drop(tx_batch);

        let written = join(writer);
        let results: Vec<_> = workers.into_iter().map(join).collect();
        written?;
        let mut stats = StatsAccumulator::new(enabled);
        for res in results {
            stats.merge(&res?);
        }
        let nreads = sent?;
        ensure!(stats.nreads == nreads, "{nreads} reads read, {} processed", stats.nreads);
        Ok(stats)
    })
    .map_err(|_| anyhow!("A thread panicked"))?
}

fn send_batches<R: BufRead>(reader: &mut fastq::Reader<R>, tx: &Sender<Batch>) -> Result<u64> {
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut nr = 0;
    let mut nreads = 0_u64;
    for res in reader.records() {
        batch.push(res?);
        nreads += 1;
        if nreads % 1_000_000 == 0 {
            eprintln!("{nreads} reads..");
        }
        if batch.len() == BATCH_SIZE {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
            tx.send((nr, full)).map_err(|_| anyhow!("Workers stopped early"))?;
            nr += 1;
        }
    }
    if !batch.is_empty() {
        tx.send((nr, batch)).map_err(|_| anyhow!("Workers stopped early"))?;
    }
    Ok(nreads)
}

fn work(
    nr: usize,
    pipeline: &Pipeline,
    enabled: [bool; NFILTERS],
    rx: Receiver<Batch>,
    tx: Sender<Done>,
) -> Result<StatsAccumulator> {
    let mut stats = StatsAccumulator::new(enabled);
    for (batch_nr, records) in rx.iter() {
        let done = records
            .into_iter()
            .map(|record| pipeline.process(record, &mut stats))
            .collect::<Result<Vec<_>>>()?;
        tx.send((batch_nr, done))
            .map_err(|_| anyhow!("Writer stopped early"))?;
    }
    dbg_print!("Worker {} processed {} reads", nr, stats.nreads);
    Ok(stats)
}

fn write_in_order(rx: Receiver<Done>, sinks: &mut Sinks) -> Result<()> {
    let mut pending = BTreeMap::new();
    let mut next = 0;
    for (nr, done) in rx.iter() {
        pending.insert(nr, done);
        while let Some(done) = pending.remove(&next) {
            for (dest, record) in done {
                sinks.write(dest, &record)?;
            }
            next += 1;
        }
    }
    ensure!(pending.is_empty(), "{} batches were not written", pending.len());
    Ok(())
}
