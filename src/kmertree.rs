// (c) Roel Kluin, 2023, GPL v3

use crate::new_types::base::{revcmp, Base, N_SYMBOLS};
use crate::new_types::node_idx::NodeIdx;
use anyhow::{anyhow, ensure, Result};
use bincode::{deserialize_from, serialize_into};
use derive_new::new;
use noodles_fasta as fasta;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

/// Which end of a read a contaminant is found at.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    FivePrime,
    ThreePrime,
}

/// What an inserted sequence stems from: the adapter (or fasta entry), its
/// end, its declared length and the offset of this sequence within it.
#[derive(new, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub source: u32,
    pub orientation: Orientation,
    pub declared_len: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    tags: SmallVec<[Tag; 2]>,
    refcount: u32,
}

impl Payload {
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
    pub fn with_orientation(&self, ori: Orientation) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(move |t| t.orientation == ori)
    }
    fn merge(&mut self, tag: Tag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self.refcount += 1;
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct Node {
    children: [NodeIdx; N_SYMBOLS],
    // index + 1 in payloads, 0 if not terminal
    payload: u32,
}

/// A trie with single base edges in a node arena; node 0 is the root.
/// It only ever grows.
#[derive(Clone, Serialize, Deserialize)]
pub struct KmerTree {
    nodes: Vec<Node>,
    payloads: Vec<Payload>,
}

impl Default for KmerTree {
    fn default() -> Self {
        KmerTree::new()
    }
}

impl KmerTree {
    pub fn new() -> Self {
        KmerTree {
            nodes: vec![Node::default()],
            payloads: Vec::new(),
        }
    }
    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }
    pub fn nterminals(&self) -> usize {
        self.payloads.len()
    }

    #[inline(always)]
    fn child(&self, node: NodeIdx, b: u8) -> NodeIdx {
        self.nodes[node.as_usize()].children[Base::from_ascii(b).as_usize()]
    }

    fn walk(&self, seq: &[u8]) -> Option<NodeIdx> {
        seq.iter().try_fold(NodeIdx::ROOT, |node, &b| {
            Some(self.child(node, b)).filter(NodeIdx::is_set)
        })
    }

    fn add_node(&mut self) -> Result<NodeIdx> {
        let idx = u32::try_from(self.nodes.len()).map_err(|_| anyhow!("Maximal number of nodes reached"))?;
        self.nodes.push(Node::default());
        Ok(NodeIdx::from(idx))
    }

    /// Add the path for `seq` and attach the tag at its end. Returns false
    /// for an empty sequence, which inserts nothing.
    pub fn insert(&mut self, seq: &[u8], tag: Tag) -> Result<bool> {
        if seq.is_empty() {
            return Ok(false);
        }
        let mut node = NodeIdx::ROOT;
        for &b in seq {
            let next = self.child(node, b);
            node = if next.is_set() {
                next
            } else {
                let new = self.add_node()?;
                self.nodes[node.as_usize()].children[Base::from_ascii(b).as_usize()] = new;
                new
            };
        }
        let n = &mut self.nodes[node.as_usize()];
        if n.payload == 0 {
            self.payloads.push(Payload::default());
            n.payload = self.payloads.len() as u32;
        }
        self.payloads[n.payload as usize - 1].merge(tag);
        Ok(true)
    }

    /// Every window of length `l` of `seq`, tagged with its offset.
    pub fn insert_lmers(&mut self, seq: &[u8], l: usize, source: u32, ori: Orientation) -> Result<usize> {
        if l == 0 || seq.len() < l {
            return Ok(0);
        }
        let declared_len = u32::try_from(seq.len())?;
        let mut n = 0;
        for (offset, lmer) in seq.windows(l).enumerate() {
            let tag = Tag::new(source, ori, declared_len, offset as u32);
            n += self.insert(lmer, tag)? as usize;
        }
        Ok(n)
    }

    /// The payload if `seq` ends exactly on a terminal node.
    pub fn lookup(&self, seq: &[u8]) -> Option<&Payload> {
        if seq.is_empty() {
            return None;
        }
        self.walk(seq).and_then(|node| {
            let p = self.nodes[node.as_usize()].payload;
            (p != 0).then(|| &self.payloads[p as usize - 1])
        })
    }

    /// Whether `prefix` is on a path of the tree, terminal or not.
    pub fn lookup_prefix(&self, prefix: &[u8]) -> bool {
        !prefix.is_empty() && self.walk(prefix).is_some()
    }

    /// Source of the first terminal at or below the end of `prefix`.
    pub fn prefix_source(&self, prefix: &[u8]) -> Option<u32> {
        let mut node = self.walk(prefix)?;
        loop {
            let n = &self.nodes[node.as_usize()];
            if n.payload != 0 {
                return self.payloads[n.payload as usize - 1].tags.first().map(|t| t.source);
            }
            node = *n.children.iter().find(|c| c.is_set())?;
        }
    }

    /// Number of bases of `read` from `position` that follow a path from the
    /// root. If it reaches the read end, the read may end within a contaminant.
    pub fn longest_match_from(&self, read: &[u8], position: usize) -> usize {
        let mut node = NodeIdx::ROOT;
        let mut len = 0;
        for &b in read.iter().skip(position) {
            node = self.child(node, b);
            if !node.is_set() {
                break;
            }
            len += 1;
        }
        len
    }

    /// Fraction of the L-windows of `read` that are paths, on the strand that
    /// scores best. Reads shorter than L are checked as a single prefix.
    pub fn score_read(&self, read: &[u8], l: usize) -> f64 {
        if read.is_empty() || l == 0 {
            return 0.0;
        }
        let strand_score = |seq: &[u8]| {
            let l = l.min(seq.len());
            let nwin = seq.len() - l + 1;
            let found = seq.windows(l).filter(|w| self.lookup_prefix(w)).count();
            found as f64 / nwin as f64
        };
        let fw = strand_score(read);
        if fw >= 1.0 {
            return fw;
        }
        fw.max(strand_score(&revcmp(read)))
    }

    pub fn save(&self, file: &Path) -> Result<()> {
        ensure!(!file.exists(), "{file:?} already exists!");
        eprintln!("- Storing the tree structure in {file:?}");
        eprintln!("- Number of nodes to be stored: {}", self.nnodes());
        serialize_into(BufWriter::new(File::create(file)?), self)?;
        Ok(())
    }

    pub fn load(file: &Path) -> Result<Self> {
        ensure!(file.exists(), "{file:?} does not exist!");
        eprintln!("- Reading a tree structure from {file:?}");
        let tree: KmerTree = deserialize_from(BufReader::new(File::open(file)?))?;
        ensure!(!tree.nodes.is_empty(), "{file:?} holds no root node");
        eprintln!("- {} nodes, {} terminals", tree.nnodes(), tree.nterminals());
        Ok(tree)
    }
}

/// A tree of all L-mers of the entries in a fasta.
pub fn tree_from_fasta<T: BufRead>(mut fa: fasta::Reader<T>, l: usize) -> Result<KmerTree> {
    ensure!(l > 0, "L-mer length must be positive");
    let mut tree = KmerTree::new();
    for (i, res) in fa.records().enumerate() {
        let record = res?;
        let seq = record.sequence().as_ref();
        dbg_print!("Inserting L-mers of {} ({} bases)", record.name(), seq.len());
        tree.insert_lmers(seq, l, u32::try_from(i)?, Orientation::ThreePrime)?;
    }
    eprintln!("- Tree allocated: {} nodes.", tree.nnodes());
    Ok(tree)
}
