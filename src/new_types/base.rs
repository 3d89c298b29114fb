// (c) Roel Kluin, 2023, GPL v3

use derive_more::Into;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of symbols: the four nucleotides plus the ambiguous code.
pub const N_SYMBOLS: usize = 5;

const AMBIGUOUS: u8 = 4;

const fn make_ascii_map() -> [u8; 256] {
    let mut map = [AMBIGUOUS; 256];
    map[b'A' as usize] = 0;
    map[b'a' as usize] = 0;
    map[b'C' as usize] = 1;
    map[b'c' as usize] = 1;
    map[b'G' as usize] = 2;
    map[b'g' as usize] = 2;
    map[b'T' as usize] = 3;
    map[b't' as usize] = 3;
    map
}

static ASCII_MAP: [u8; 256] = make_ascii_map();

/// A base symbol: A: 0, C: 1, G: 2, T: 3, anything else (N): 4.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Into, Serialize, Deserialize)]
pub struct Base(u8);

impl Base {
    pub const N: Base = Base(AMBIGUOUS);

    #[inline(always)]
    pub fn from_ascii(b: u8) -> Base {
        Base(ASCII_MAP[b as usize])
    }
    #[inline(always)]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
    #[inline(always)]
    pub fn is_ambiguous(&self) -> bool {
        self.0 == AMBIGUOUS
    }
    /// A<->T, C<->G, N stays N.
    #[inline(always)]
    pub fn complement(&self) -> Base {
        if self.is_ambiguous() {
            *self
        } else {
            Base(3 - self.0)
        }
    }
    pub fn as_ascii(&self) -> u8 {
        b"ACGTN"[self.as_usize()]
    }
}

impl TryFrom<usize> for Base {
    type Error = usize;
    fn try_from(code: usize) -> Result<Base, usize> {
        u8::try_from(code)
            .ok()
            .filter(|&c| (c as usize) < N_SYMBOLS)
            .map(Base)
            .ok_or(code)
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_ascii() as char, self.0)
    }
}

/// True if the ascii sequence has a non-ACGT symbol.
pub fn has_ambiguous(seq: &[u8]) -> bool {
    seq.iter().any(|&b| Base::from_ascii(b).is_ambiguous())
}

/// Reverse complement of an ascii sequence; non-ACGT symbols become N.
pub fn revcmp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| Base::from_ascii(b).complement().as_ascii())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_codes() {
        let codes: Vec<usize> = b"ACGTNacgtx-"
            .iter()
            .map(|&b| Base::from_ascii(b).as_usize())
            .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 4]);
    }
    #[test]
    fn complement_is_involution() {
        for code in 0..N_SYMBOLS {
            let b = Base::try_from(code).unwrap();
            assert_eq!(b.complement().complement(), b);
        }
        assert_eq!(Base::from_ascii(b'A').complement(), Base::from_ascii(b'T'));
        assert_eq!(Base::N.complement(), Base::N);
        assert!(Base::try_from(5).is_err());
    }
    #[test]
    fn test_revcmp() {
        assert_eq!(revcmp(b"AACGTN"), b"NACGTT".to_vec());
        assert!(has_ambiguous(b"ACGNT"));
        assert!(!has_ambiguous(b"acgt"));
    }
}
