//! IQ byte pair to complex sample conversion
//!
//! RTL-SDR style front-ends deliver 8-bit unsigned I/Q pairs. Each pair is read
//! as one native-endian `u16` and mapped through a pre-computed table, so the
//! per-sample work is a single indexed load.

use crate::post::Complex32;

/// Number of entries in each lookup table (every possible byte pair)
pub const TABLE_SIZE: usize = 1 << 16;

/// Zero level of an unsigned 8-bit sample
const ZERO_LEVEL: f32 = 127.4;

/// Normalize one unsigned sample byte to roughly [-1, 1)
#[inline(always)]
pub fn normalize(b: u8) -> f32 {
    (b as f32 - ZERO_LEVEL) * (1.0 / 128.0)
}

/// Pre-computed byte pair lookup tables for normal and swapped I/Q order
pub struct IqTable {
    normal: Vec<Complex32>,
    swapped: Vec<Complex32>,
}

impl IqTable {
    /// Build both tables. Index is the raw pair read as a native-endian u16,
    /// so the first byte of the pair always lands in I for the normal table.
    pub fn new() -> Self {
        let mut normal = Vec::with_capacity(TABLE_SIZE);
        let mut swapped = Vec::with_capacity(TABLE_SIZE);

        for index in 0..TABLE_SIZE {
            let [first, second] = (index as u16).to_ne_bytes();
            let a = normalize(first);
            let b = normalize(second);

            normal.push(Complex32::new(a, b));
            swapped.push(Complex32::new(b, a));
        }

        Self { normal, swapped }
    }

    /// Select the table for the current swap mode
    #[inline(always)]
    pub fn table(&self, swap: bool) -> &[Complex32] {
        if swap {
            &self.swapped
        } else {
            &self.normal
        }
    }

    /// Convert a single raw byte pair
    #[inline(always)]
    pub fn lookup(&self, pair: [u8; 2], swap: bool) -> Complex32 {
        self.table(swap)[u16::from_ne_bytes(pair) as usize]
    }
}

impl Default for IqTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts raw blocks into a reusable scratch buffer
pub struct IqDecoder {
    table: IqTable,
    scratch: Vec<Complex32>,
}

impl IqDecoder {
    pub fn new() -> Self {
        Self {
            table: IqTable::new(),
            scratch: Vec::new(),
        }
    }

    /// Decode `bytes` (two per sample) and return the converted samples.
    ///
    /// The scratch buffer is only resized when the sample count changes and
    /// its capacity never shrinks, so steady-state block sizes do not allocate.
    pub fn decode(&mut self, bytes: &[u8], swap: bool) -> &[Complex32] {
        let count = bytes.len() / 2;
        if count > self.scratch.capacity() {
            self.scratch.reserve(count - self.scratch.len());
        }
        if count != self.scratch.len() {
            self.scratch.resize(count, Complex32::new(0.0, 0.0));
        }

        let table = self.table.table(swap);
        for (out, pair) in self.scratch.iter_mut().zip(bytes.chunks_exact(2)) {
            *out = table[u16::from_ne_bytes([pair[0], pair[1]]) as usize];
        }

        &self.scratch
    }

    pub fn capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

impl Default for IqDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Inverse of `normalize`, rounding back to the nearest byte
    fn denormalize(v: f32) -> u8 {
        (v * 128.0 + ZERO_LEVEL).round() as u8
    }

    #[test]
    fn test_boundary_values_normal() {
        let table = IqTable::new();

        let c = table.lookup([0x00, 0xFF], false);
        assert_abs_diff_eq!(c.re, -127.4 / 128.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.im, 127.6 / 128.0, epsilon = 1e-6);

        let c = table.lookup([0xFF, 0x00], false);
        assert_abs_diff_eq!(c.re, 127.6 / 128.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.im, -127.4 / 128.0, epsilon = 1e-6);
    }

    #[test]
    fn test_boundary_values_swapped() {
        let table = IqTable::new();

        let c = table.lookup([0x00, 0xFF], true);
        assert_abs_diff_eq!(c.re, 127.6 / 128.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.im, -127.4 / 128.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pair_round_trip_both_modes() {
        let table = IqTable::new();
        for &(i, q) in &[(0x00u8, 0x00u8), (0xFF, 0xFF), (0x00, 0xFF), (0x7F, 0x80), (0x12, 0xE4)] {
            let c = table.lookup([i, q], false);
            assert_eq!((denormalize(c.re), denormalize(c.im)), (i, q));

            let c = table.lookup([i, q], true);
            assert_eq!((denormalize(c.im), denormalize(c.re)), (i, q));
        }
    }

    #[test]
    fn test_center_is_near_zero() {
        let table = IqTable::new();
        let c = table.lookup([127, 127], false);
        assert!(c.re.abs() < 0.01 && c.im.abs() < 0.01);
    }

    #[test]
    fn test_decode_uses_swap_flag_per_call() {
        let mut decoder = IqDecoder::new();
        let bytes = [0x00, 0xFF, 0x80, 0x10];

        let normal = decoder.decode(&bytes, false).to_vec();
        let swapped = decoder.decode(&bytes, true).to_vec();

        assert_eq!(normal.len(), 2);
        for (n, s) in normal.iter().zip(swapped.iter()) {
            assert_eq!(n.re, s.im);
            assert_eq!(n.im, s.re);
        }
    }

    #[test]
    fn test_scratch_capacity_never_shrinks() {
        let mut decoder = IqDecoder::new();

        decoder.decode(&[127u8; 2048], false);
        let capacity = decoder.capacity();
        assert!(capacity >= 1024);

        assert_eq!(decoder.decode(&[127u8; 16], false).len(), 8);
        assert_eq!(decoder.capacity(), capacity);

        assert_eq!(decoder.decode(&[127u8; 2048], false).len(), 1024);
        assert_eq!(decoder.capacity(), capacity);
    }

    #[test]
    fn test_decode_empty() {
        let mut decoder = IqDecoder::new();
        assert!(decoder.decode(&[], false).is_empty());
    }
}
