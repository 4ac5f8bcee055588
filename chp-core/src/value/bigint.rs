//! Minimal arbitrary-precision integer, sign-magnitude over `u32` limbs.
//!
//! `chpsim`'s own `value.c` carries a hand-rolled bignum rather than linking
//! one in; no crate in the corpus is reached for at the simulation-engine
//! layer, so this mirrors that choice instead of inventing a dependency.
//! Limbs are little-endian and always normalized (no trailing zero limb,
//! zero is represented with an empty limb vector and `negative = false`).

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigInt {
    negative: bool,
    limbs: Vec<u32>, // little-endian, base 2^32
}

impl BigInt {
    pub fn zero() -> Self {
        Self { negative: false, limbs: Vec::new() }
    }

    pub fn from_i64(v: i64) -> Self {
        let negative = v < 0;
        let mag = v.unsigned_abs();
        let mut limbs = vec![(mag & 0xFFFF_FFFF) as u32, (mag >> 32) as u32];
        normalize(&mut limbs);
        let mut out = Self { negative, limbs };
        out.fix_sign();
        out
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    /// Collapses to a machine `i64` when representable (used by `int_simplify`).
    pub fn to_i64(&self) -> Option<i64> {
        if self.limbs.len() > 2 {
            return None;
        }
        let mut mag: u128 = 0;
        for (i, limb) in self.limbs.iter().enumerate() {
            mag |= (*limb as u128) << (32 * i);
        }
        if self.negative {
            if mag > (i64::MAX as u128) + 1 {
                return None;
            }
            if mag == (i64::MAX as u128) + 1 {
                return Some(i64::MIN);
            }
            Some(-(mag as i64))
        } else {
            if mag > i64::MAX as u128 {
                return None;
            }
            Some(mag as i64)
        }
    }

    fn fix_sign(&mut self) {
        if self.limbs.is_empty() {
            self.negative = false;
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn magnitude_cmp(a: &[u32], b: &[u32]) -> Ordering {
        if a.len() != b.len() {
            return a.len().cmp(&b.len());
        }
        for i in (0..a.len()).rev() {
            if a[i] != b[i] {
                return a[i].cmp(&b[i]);
            }
        }
        Ordering::Equal
    }

    fn magnitude_add(a: &[u32], b: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(a.len().max(b.len()) + 1);
        let mut carry: u64 = 0;
        for i in 0..a.len().max(b.len()) {
            let x = *a.get(i).unwrap_or(&0) as u64;
            let y = *b.get(i).unwrap_or(&0) as u64;
            let sum = x + y + carry;
            out.push((sum & 0xFFFF_FFFF) as u32);
            carry = sum >> 32;
        }
        if carry > 0 {
            out.push(carry as u32);
        }
        normalize(&mut out);
        out
    }

    /// Requires `a >= b` in magnitude.
    fn magnitude_sub(a: &[u32], b: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(a.len());
        let mut borrow: i64 = 0;
        for i in 0..a.len() {
            let x = a[i] as i64;
            let y = *b.get(i).unwrap_or(&0) as i64;
            let mut d = x - y - borrow;
            if d < 0 {
                d += 1 << 32;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out.push(d as u32);
        }
        normalize(&mut out);
        out
    }

    pub fn add(&self, other: &Self) -> Self {
        if self.negative == other.negative {
            let limbs = Self::magnitude_add(&self.limbs, &other.limbs);
            Self { negative: self.negative && !limbs.is_empty(), limbs }
        } else {
            match Self::magnitude_cmp(&self.limbs, &other.limbs) {
                Ordering::Equal => Self::zero(),
                Ordering::Greater => {
                    let limbs = Self::magnitude_sub(&self.limbs, &other.limbs);
                    Self { negative: self.negative, limbs }
                }
                Ordering::Less => {
                    let limbs = Self::magnitude_sub(&other.limbs, &self.limbs);
                    Self { negative: other.negative, limbs }
                }
            }
        }
    }

    pub fn neg(&self) -> Self {
        if self.is_zero() {
            self.clone()
        } else {
            Self { negative: !self.negative, limbs: self.limbs.clone() }
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        if self.is_zero() || other.is_zero() {
            return Self::zero();
        }
        let mut limbs = vec![0u32; self.limbs.len() + other.limbs.len()];
        for (i, &a) in self.limbs.iter().enumerate() {
            let mut carry: u64 = 0;
            for (j, &b) in other.limbs.iter().enumerate() {
                let idx = i + j;
                let prod = (a as u64) * (b as u64) + limbs[idx] as u64 + carry;
                limbs[idx] = (prod & 0xFFFF_FFFF) as u32;
                carry = prod >> 32;
            }
            let mut k = i + other.limbs.len();
            while carry > 0 {
                let sum = limbs[k] as u64 + carry;
                limbs[k] = (sum & 0xFFFF_FFFF) as u32;
                carry = sum >> 32;
                k += 1;
            }
        }
        normalize(&mut limbs);
        Self { negative: self.negative != other.negative, limbs }
    }

    /// Truncating division: quotient rounds toward zero, remainder has the
    /// sign of the dividend (`%` semantics). `divmod_floor` implements `mod`.
    pub fn divmod_trunc(&self, other: &Self) -> Option<(Self, Self)> {
        if other.is_zero() {
            return None;
        }
        let (q_mag, r_mag) = Self::magnitude_divmod(&self.limbs, &other.limbs);
        let q = Self { negative: (self.negative != other.negative) && !q_mag.is_empty(), limbs: q_mag };
        let r = Self { negative: self.negative && !r_mag.is_empty(), limbs: r_mag };
        Some((q, r))
    }

    /// Floor division: quotient rounds toward negative infinity, remainder
    /// has the sign of the divisor (`mod` semantics).
    pub fn divmod_floor(&self, other: &Self) -> Option<(Self, Self)> {
        let (q, r) = self.divmod_trunc(other)?;
        if !r.is_zero() && (r.negative != other.negative) {
            let q = q.sub(&BigInt::from_i64(1));
            let r = r.add(other);
            Some((q, r))
        } else {
            Some((q, r))
        }
    }

    fn magnitude_divmod(a: &[u32], b: &[u32]) -> (Vec<u32>, Vec<u32>) {
        if Self::magnitude_cmp(a, b) == Ordering::Less {
            return (Vec::new(), a.to_vec());
        }
        // Simple binary long division over bits; adequate for the bit widths
        // CHP programs realistically use (hardware word sizes, not crypto-scale ints).
        let bits = a.len() * 32;
        let mut quotient = vec![0u32; a.len()];
        let mut remainder: Vec<u32> = Vec::new();
        for bit in (0..bits).rev() {
            shl_one(&mut remainder);
            if get_bit(a, bit) {
                set_bit(&mut remainder, 0);
            }
            if Self::magnitude_cmp(&remainder, b) != Ordering::Less {
                remainder = Self::magnitude_sub(&remainder, b);
            } else {
                continue;
            }
            set_bit(&mut quotient, bit);
        }
        normalize(&mut quotient);
        normalize(&mut remainder);
        (quotient, remainder)
    }

    pub fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => Self::magnitude_cmp(&self.limbs, &other.limbs),
            (true, true) => Self::magnitude_cmp(&other.limbs, &self.limbs),
        }
    }

    /// `ceil(log2(x+1))`, used for bit-slice sizing.
    pub fn log2_plus_one(&self) -> u32 {
        let n = self.add(&BigInt::from_i64(1));
        if n.is_zero() {
            return 0;
        }
        let bit_length = n.limbs.len() as u32 * 32 - n.limbs.last().unwrap().leading_zeros();
        let set_bits: u32 = n.limbs.iter().map(|l| l.count_ones()).sum();
        if set_bits == 1 {
            bit_length - 1
        } else {
            bit_length
        }
    }

    pub fn bit(&self, index: u32) -> bool {
        get_bit(&self.limbs, index as usize)
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        // Decimal conversion via repeated division by 10, fine at this scale.
        let mut digits = Vec::new();
        let mut cur = self.limbs.clone();
        while !cur.is_empty() {
            let (q, r) = Self::magnitude_divmod(&cur, &[10]);
            digits.push((r.first().copied().unwrap_or(0)) as u8);
            cur = q;
        }
        if self.negative {
            write!(f, "-")?;
        }
        for d in digits.iter().rev() {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

fn normalize(limbs: &mut Vec<u32>) {
    while limbs.last() == Some(&0) {
        limbs.pop();
    }
}

fn get_bit(limbs: &[u32], index: usize) -> bool {
    let word = index / 32;
    let bit = index % 32;
    limbs.get(word).is_some_and(|w| (w >> bit) & 1 == 1)
}

fn set_bit(limbs: &mut Vec<u32>, index: usize) {
    let word = index / 32;
    let bit = index % 32;
    if limbs.len() <= word {
        limbs.resize(word + 1, 0);
    }
    limbs[word] |= 1 << bit;
}

fn shl_one(limbs: &mut Vec<u32>) {
    let mut carry = 0u32;
    for limb in limbs.iter_mut() {
        let new_carry = *limb >> 31;
        *limb = (*limb << 1) | carry;
        carry = new_carry;
    }
    if carry != 0 {
        limbs.push(carry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_promotes_correctly() {
        let a = BigInt::from_i64(i64::MAX);
        let one = BigInt::from_i64(1);
        let sum = a.add(&one);
        assert_eq!(sum.to_i64(), None);
        assert_eq!(sum.cmp(&a), Ordering::Greater);
    }

    #[test]
    fn roundtrip_small_values() {
        for v in [-12345i64, 0, 1, -1, i64::MIN + 1, i64::MAX] {
            assert_eq!(BigInt::from_i64(v).to_i64(), Some(v));
        }
    }

    #[test]
    fn floor_vs_trunc_division() {
        let a = BigInt::from_i64(-7);
        let b = BigInt::from_i64(2);
        let (tq, tr) = a.divmod_trunc(&b).unwrap();
        assert_eq!(tq.to_i64(), Some(-3));
        assert_eq!(tr.to_i64(), Some(-1));
        let (fq, fr) = a.divmod_floor(&b).unwrap();
        assert_eq!(fq.to_i64(), Some(-4));
        assert_eq!(fr.to_i64(), Some(1));
    }

    #[test]
    fn log2_plus_one_matches_spec_formula() {
        assert_eq!(BigInt::from_i64(0).log2_plus_one(), 0);
        assert_eq!(BigInt::from_i64(1).log2_plus_one(), 1);
        assert_eq!(BigInt::from_i64(7).log2_plus_one(), 3);
        assert_eq!(BigInt::from_i64(8).log2_plus_one(), 4);
    }
}
