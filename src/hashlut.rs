// (c) Roel Kluin, 2023, GPL v3

use crate::new_types::base::{Base, N_SYMBOLS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed for the lookup tables. Filters built with another seed can't be queried with this one.
pub const DEFAULT_SEED: u64 = 40164;

/// Per table: a random value per symbol and an odd multiplier, so the
/// contribution of symbol s at offset p is `r[s] * b^(k-1-p)` (mod 2^64).
///
/// The sum over a k-mer is a polynomial in b. Dropping the first and adding
/// a new last base is then an O(1) update; b is odd so it has an inverse and
/// the reverse complement can be rolled along as well.
#[derive(Clone, Debug)]
pub struct HashLut {
    kmer_size: usize,
    hash_num: usize,
    // [table][offset][symbol]
    tables: Vec<Vec<[u64; N_SYMBOLS]>>,
    mult: Vec<u64>,
    mult_inv: Vec<u64>,
}

/// multiplicative inverse of an odd number modulo 2^64, Newton iteration.
fn inverse_u64(b: u64) -> u64 {
    let mut inv = b;
    for _ in 0..6 {
        inv = inv.wrapping_mul(2_u64.wrapping_sub(b.wrapping_mul(inv)));
    }
    inv
}

impl HashLut {
    pub fn new(kmer_size: usize, hash_num: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tables = Vec::with_capacity(hash_num);
        let mut mult = Vec::with_capacity(hash_num);
        let mut mult_inv = Vec::with_capacity(hash_num);

        for _ in 0..hash_num {
            let b: u64 = rng.gen::<u64>() | 1;
            let mut sym = [0_u64; N_SYMBOLS];
            for s in sym.iter_mut() {
                *s = rng.gen();
            }
            // powers from the last offset backwards: b^0 at k-1.
            let mut table = vec![[0_u64; N_SYMBOLS]; kmer_size];
            let mut pow = 1_u64;
            for row in table.iter_mut().rev() {
                for (cell, r) in row.iter_mut().zip(sym.iter()) {
                    *cell = r.wrapping_mul(pow);
                }
                pow = pow.wrapping_mul(b);
            }
            tables.push(table);
            mult.push(b);
            mult_inv.push(inverse_u64(b));
        }
        HashLut {
            kmer_size,
            hash_num,
            tables,
            mult,
            mult_inv,
        }
    }
    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }
    pub fn hash_num(&self) -> usize {
        self.hash_num
    }

    #[inline(always)]
    pub fn get(&self, table: usize, offset: usize, base: Base) -> u64 {
        self.tables[table][offset][base.as_usize()]
    }

    /// Full sum over the window for one table, forward orientation.
    pub fn sum(&self, table: usize, window: &[u8]) -> u64 {
        window
            .iter()
            .enumerate()
            .fold(0_u64, |acc, (p, &b)| {
                acc.wrapping_add(self.get(table, p, Base::from_ascii(b)))
            })
    }

    /// Full sum of the reverse complement of the window, without building it.
    pub fn sum_rc(&self, table: usize, window: &[u8]) -> u64 {
        let last = self.kmer_size - 1;
        window
            .iter()
            .enumerate()
            .fold(0_u64, |acc, (p, &b)| {
                acc.wrapping_add(self.get(table, last - p, Base::from_ascii(b).complement()))
            })
    }

    /// Slide one base to the right: `leave` drops off the front, `enter` appends.
    #[inline(always)]
    pub fn roll_forward(&self, table: usize, fw: u64, rc: u64, leave: Base, enter: Base) -> (u64, u64) {
        let last = self.kmer_size - 1;
        let fw = fw
            .wrapping_sub(self.get(table, 0, leave))
            .wrapping_mul(self.mult[table])
            .wrapping_add(self.get(table, last, enter));
        let rc = rc
            .wrapping_sub(self.get(table, last, leave.complement()))
            .wrapping_mul(self.mult_inv[table])
            .wrapping_add(self.get(table, 0, enter.complement()));
        (fw, rc)
    }

    /// Slide one base to the left: `leave` drops off the back, `enter` prepends.
    #[inline(always)]
    pub fn roll_back(&self, table: usize, fw: u64, rc: u64, leave: Base, enter: Base) -> (u64, u64) {
        let last = self.kmer_size - 1;
        let fw = fw
            .wrapping_sub(self.get(table, last, leave))
            .wrapping_mul(self.mult_inv[table])
            .wrapping_add(self.get(table, 0, enter));
        let rc = rc
            .wrapping_sub(self.get(table, 0, leave.complement()))
            .wrapping_mul(self.mult[table])
            .wrapping_add(self.get(table, last, enter.complement()));
        (fw, rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_types::base::revcmp;
    use rand::{thread_rng, Rng};

    fn random_seq(len: usize) -> Vec<u8> {
        let mut rng = thread_rng();
        (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    #[test]
    fn inverse() {
        let mut rng = thread_rng();
        for _ in 0..100 {
            let b = rng.gen::<u64>() | 1;
            assert_eq!(b.wrapping_mul(inverse_u64(b)), 1);
        }
    }
    #[test]
    fn deterministic_for_seed() {
        let a = HashLut::new(21, 3, DEFAULT_SEED);
        let b = HashLut::new(21, 3, DEFAULT_SEED);
        let c = HashLut::new(21, 3, DEFAULT_SEED + 1);
        let seq = random_seq(21);
        for t in 0..3 {
            assert_eq!(a.sum(t, &seq), b.sum(t, &seq));
            assert_ne!(a.sum(t, &seq), c.sum(t, &seq));
        }
    }
    #[test]
    fn single_substitution_changes_every_table() {
        let lut = HashLut::new(25, 5, DEFAULT_SEED);
        let mut rng = thread_rng();
        for _ in 0..200 {
            let seq = random_seq(25);
            let mut other = seq.clone();
            let p = rng.gen_range(0..25);
            other[p] = if seq[p] == b'A' { b'C' } else { b'A' };
            for t in 0..5 {
                assert_ne!(lut.sum(t, &seq), lut.sum(t, &other));
            }
        }
    }
    #[test]
    fn rc_sum_matches_revcmp() {
        let lut = HashLut::new(17, 2, DEFAULT_SEED);
        let seq = random_seq(17);
        let rc = revcmp(&seq);
        for t in 0..2 {
            assert_eq!(lut.sum_rc(t, &seq), lut.sum(t, &rc));
        }
    }
    #[test]
    fn rolling_matches_full_sum() {
        let k = 11;
        let lut = HashLut::new(k, 4, DEFAULT_SEED);
        let mut seq = random_seq(80);
        seq[40] = b'N';
        for t in 0..4 {
            let mut fw = lut.sum(t, &seq[..k]);
            let mut rc = lut.sum_rc(t, &seq[..k]);
            for i in 1..=(seq.len() - k) {
                let leave = Base::from_ascii(seq[i - 1]);
                let enter = Base::from_ascii(seq[i + k - 1]);
                (fw, rc) = lut.roll_forward(t, fw, rc, leave, enter);
                assert_eq!(fw, lut.sum(t, &seq[i..i + k]));
                assert_eq!(rc, lut.sum_rc(t, &seq[i..i + k]));
            }
            for i in (0..(seq.len() - k)).rev() {
                let leave = Base::from_ascii(seq[i + k]);
                let enter = Base::from_ascii(seq[i]);
                (fw, rc) = lut.roll_back(t, fw, rc, leave, enter);
                assert_eq!(fw, lut.sum(t, &seq[i..i + k]));
                assert_eq!(rc, lut.sum_rc(t, &seq[i..i + k]));
            }
        }
    }
}
