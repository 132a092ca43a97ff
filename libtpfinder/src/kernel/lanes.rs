use std::ops::{Add, BitAnd, BitOr, Mul, Not, Shr, Sub};

use crate::constants::LANES_PER_REGISTER;

const LANES: usize = LANES_PER_REGISTER;

/// Sixteen i32 lanes processed in lockstep.
///
/// Every operation is a fixed-length loop over the lanes with no data dependent
/// branches, which the compiler lowers to packed SIMD instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub(crate) struct I32x16(pub [i32; LANES]);

/// Lane mask: each lane is all ones (true) or all zeros (false)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub(crate) struct Mask16(pub [i32; LANES]);

impl I32x16 {
    #[inline(always)]
    pub fn splat(value: i32) -> Self {
        Self([value; LANES])
    }

    #[inline(always)]
    pub fn from_u16(values: &[u16]) -> Self {
        let mut out = [0; LANES];
        for (o, v) in out.iter_mut().zip(values.iter()) {
            *o = *v as i32;
        }
        Self(out)
    }

    /// Build a vector by reading one value per lane
    #[inline(always)]
    pub fn gather(mut lane: impl FnMut(usize) -> i32) -> Self {
        let mut out = [0; LANES];
        for (l, o) in out.iter_mut().enumerate() {
            *o = lane(l);
        }
        Self(out)
    }

    #[inline(always)]
    fn zip(self, rhs: Self, op: impl Fn(i32, i32) -> i32) -> Self {
        let mut out = [0; LANES];
        for l in 0..LANES {
            out[l] = op(self.0[l], rhs.0[l]);
        }
        Self(out)
    }

    #[inline(always)]
    fn compare(self, rhs: Self, op: impl Fn(i32, i32) -> bool) -> Mask16 {
        let mut out = [0; LANES];
        for l in 0..LANES {
            out[l] = -(op(self.0[l], rhs.0[l]) as i32);
        }
        Mask16(out)
    }

    #[inline(always)]
    pub fn min(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a.min(b))
    }

    #[inline(always)]
    pub fn saturating_add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a.saturating_add(b))
    }

    #[inline(always)]
    pub fn saturating_mul(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a.saturating_mul(b))
    }

    #[inline(always)]
    pub fn gt(self, rhs: Self) -> Mask16 {
        self.compare(rhs, |a, b| a > b)
    }

    #[inline(always)]
    pub fn lt(self, rhs: Self) -> Mask16 {
        self.compare(rhs, |a, b| a < b)
    }

    #[inline(always)]
    pub fn ge(self, rhs: Self) -> Mask16 {
        self.compare(rhs, |a, b| a >= b)
    }

    #[inline(always)]
    pub fn le(self, rhs: Self) -> Mask16 {
        self.compare(rhs, |a, b| a <= b)
    }

    /// `mask ? on_true : self`, lane by lane
    #[inline(always)]
    pub fn replace(self, mask: Mask16, on_true: Self) -> Self {
        let mut out = [0; LANES];
        for l in 0..LANES {
            out[l] = (on_true.0[l] & mask.0[l]) | (self.0[l] & !mask.0[l]);
        }
        Self(out)
    }

    /// Add one to every lane set in the mask
    #[inline(always)]
    pub fn increment(self, mask: Mask16) -> Self {
        // a set mask lane is -1
        self.zip(I32x16(mask.0), |a, m| a - m)
    }

    /// Subtract one from every lane set in the mask
    #[inline(always)]
    pub fn decrement(self, mask: Mask16) -> Self {
        self.zip(I32x16(mask.0), |a, m| a + m)
    }
}

impl Add for I32x16 {
    type Output = Self;
    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a + b)
    }
}

impl Sub for I32x16 {
    type Output = Self;
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a - b)
    }
}

impl Mul for I32x16 {
    type Output = Self;
    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a * b)
    }
}

impl Shr<u32> for I32x16 {
    type Output = Self;
    #[inline(always)]
    fn shr(self, rhs: u32) -> Self {
        let mut out = self.0;
        for o in out.iter_mut() {
            *o >>= rhs;
        }
        Self(out)
    }
}

impl Mask16 {
    #[inline(always)]
    pub fn all() -> Self {
        Self([-1; LANES])
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self([0; LANES])
    }

    #[inline(always)]
    pub fn from_bools(values: impl Fn(usize) -> bool) -> Self {
        let mut out = [0; LANES];
        for (l, o) in out.iter_mut().enumerate() {
            *o = -(values(l) as i32);
        }
        Self(out)
    }

    #[inline(always)]
    pub fn test(&self, lane: usize) -> bool {
        self.0[lane] != 0
    }

    #[inline(always)]
    pub fn any(&self) -> bool {
        self.0.iter().fold(0, |acc, m| acc | m) != 0
    }
}

impl BitAnd for Mask16 {
    type Output = Self;
    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (o, r) in out.iter_mut().zip(rhs.0.iter()) {
            *o &= r;
        }
        Self(out)
    }
}

impl BitOr for Mask16 {
    type Output = Self;
    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (o, r) in out.iter_mut().zip(rhs.0.iter()) {
            *o |= r;
        }
        Self(out)
    }
}

impl Not for Mask16 {
    type Output = Self;
    #[inline(always)]
    fn not(self) -> Self {
        let mut out = self.0;
        for o in out.iter_mut() {
            *o = !*o;
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_increment_and_replace() {
        let v = I32x16::gather(|l| l as i32);
        let even = Mask16::from_bools(|l| l % 2 == 0);
        let stepped = v.increment(even).decrement(!even);
        assert_eq!(stepped.0[0], 1);
        assert_eq!(stepped.0[1], 0);
        let zeroed = v.replace(even, I32x16::splat(0));
        assert_eq!(zeroed.0[2], 0);
        assert_eq!(zeroed.0[3], 3);
        assert!(even.any());
        assert!(!Mask16::none().any());
        assert!((even | !even) == Mask16::all());
    }

    #[test]
    fn test_comparisons_and_shift() {
        let a = I32x16::splat(-130);
        let b = I32x16::splat(5);
        assert!(a.lt(b).test(7));
        assert!(!a.gt(b).test(7));
        assert!(b.ge(b).test(0) && b.le(b).test(15));
        // arithmetic shift keeps the sign
        assert_eq!((a >> 6).0[0], -130 >> 6);
        assert_eq!(a.min(b), a);
    }
}
