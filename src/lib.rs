// (c) Roel Kluin, 2023, GPL v3

#[macro_use]
pub mod rdbg;
pub mod error;
pub mod new_types;
pub mod hashlut;
pub mod bfkmer;
pub mod bloom;
pub mod kmertree;
pub mod adapter;
pub mod trimmer;
pub mod qtrim;
pub mod contamination;
pub mod stats;
pub mod fastx;
pub mod workers;
pub mod make_bloom;
pub mod make_tree;
pub mod trim_filter;
