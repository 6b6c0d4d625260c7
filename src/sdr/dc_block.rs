//! Streaming DC blocking filter
//!
//! First-order IIR high-pass:
//! `H(z) = g * (1 - z^-1) / (1 - (1 - alpha) * z^-1)`, with `g` chosen for
//! unity gain at Nyquist. Filter state carries over between blocks so a
//! stream split into arbitrary blocks is filtered exactly like one long block.

use crate::post::Complex32;

/// Default cutoff used by the post-processing stage
pub const DEFAULT_ALPHA: f32 = 0.0005;

#[derive(Debug, Clone)]
pub struct DcBlocker {
    pole: f32,
    gain: f32,
    x1: Complex32,
    y1: Complex32,
}

impl DcBlocker {
    /// Create a blocker with normalized cutoff `alpha` (0 < alpha < 1)
    pub fn new(alpha: f32) -> Self {
        let alpha = alpha.clamp(1e-6, 0.5);
        let pole = 1.0 - alpha;
        Self {
            pole,
            gain: (1.0 + pole) / 2.0,
            x1: Complex32::new(0.0, 0.0),
            y1: Complex32::new(0.0, 0.0),
        }
    }

    /// Filter the whole of `input` into `output`, in order.
    ///
    /// Both slices must have the same length; a zero-length block leaves the
    /// state untouched.
    pub fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) {
        debug_assert_eq!(input.len(), output.len());

        for (x, y) in input.iter().zip(output.iter_mut()) {
            let out = (*x - self.x1) * self.gain + self.y1 * self.pole;
            self.x1 = *x;
            self.y1 = out;
            *y = out;
        }
    }
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
