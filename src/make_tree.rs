// (c) Roel Kluin, 2023, GPL v3

use crate::fastx::parse_fasta_file;
use crate::kmertree::tree_from_fasta;
use anyhow::{ensure, Result};
use clap::Args;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct MakeTreeCmd {
    /// Contaminant sequences, fasta, optionally gzipped
    #[arg(short = 'f', long, value_name = "FASTA", required = true)]
    fasta: PathBuf,

    /// Output prefix, <PREFIX>.tree is written
    #[arg(short, long, value_name = "PREFIX", required = true)]
    output: PathBuf,

    /// Length of the L-mers stored
    #[arg(short, long, default_value = "25")]
    lmer_len: usize,
}

/// `<prefix>.tree`
pub fn tree_file(prefix: &Path) -> PathBuf {
    let mut file = prefix.as_os_str().to_owned();
    file.push(".tree");
    PathBuf::from(file)
}

pub fn make_tree(cmd: MakeTreeCmd) -> Result<()> {
    let out = tree_file(&cmd.output);
    ensure!(!out.exists(), "{out:?} already exists!");
    eprintln!("Reading {:?}", cmd.fasta);
    let fa = parse_fasta_file(cmd.fasta)?;
    let tree = tree_from_fasta(fa, dbgx!(cmd.lmer_len))?;
    tree.save(&out)
}
