// (c) Roel Kluin, 2023, GPL v3

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};

/// Handle of a node in the tree arena. The root is 0, which never is a child,
/// so 0 doubles as "no child".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, From, Into, Serialize, Deserialize)]
pub struct NodeIdx(u32);

impl NodeIdx {
    pub const ROOT: NodeIdx = NodeIdx(0);

    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}
