// (c) Roel Kluin, 2023, GPL v3

pub mod base;
pub mod node_idx;
