// (c) Roel Kluin, 2023, GPL v3

extern crate fqscreen;

// target/release/fqscreen make-bloom -f phix.fa -o phix -k 25
// target/release/fqscreen trim-filter -f reads.fq.gz -o reads -a adapters.fa -i phix.bf -M bloom -q ends

use anyhow::Result;
use clap::{Parser, Subcommand};
use fqscreen::make_bloom::{self, MakeBloomCmd};
use fqscreen::make_tree::{self, MakeTreeCmd};
use fqscreen::trim_filter::{self, TrimFilterCmd};

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a k-mer Bloom filter of contaminant sequences
    MakeBloom(MakeBloomCmd),

    /// Build an L-mer tree of contaminant sequences
    MakeTree(MakeTreeCmd),

    /// Trim adapters and filter reads for contaminants, quality and N
    TrimFilter(TrimFilterCmd),
}

/// Screen sequence reads for adapters and contaminant k-mers
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Fqscreen {
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> Result<()> {
    let fqscreen = Fqscreen::parse();
    if fqscreen.debug > 0 {
        eprintln!("{:?}", fqscreen.command);
    }

    match fqscreen.command {
        Some(Commands::MakeBloom(cmd)) => make_bloom::make_bloom(cmd),
        Some(Commands::MakeTree(cmd)) => make_tree::make_tree(cmd),
        Some(Commands::TrimFilter(cmd)) => trim_filter::trim_filter(cmd),
        None => Ok(()),
    }
}
