//! Sample blocks flowing through the post-processing stage

use num_complex::Complex;

/// Normalized complex sample, components roughly in [-1, 1)
pub type Complex32 = Complex<f32>;

/// Raw interleaved I/Q bytes as delivered by the radio front-end
#[derive(Debug, Clone, Default)]
pub struct RawBlock {
    /// Center frequency the block was captured at (Hz)
    pub frequency: i64,
    /// Device sample rate (samples/second)
    pub sample_rate: u32,
    /// Interleaved two-channel samples, two bytes per complex sample
    pub bytes: Vec<u8>,
}

impl RawBlock {
    pub fn new(frequency: i64, sample_rate: u32, bytes: Vec<u8>) -> Self {
        Self {
            frequency,
            sample_rate,
            bytes,
        }
    }

    /// Empty block used to wake the dispatcher; processing it is a no-op
    pub fn wakeup() -> Self {
        Self::default()
    }

    /// Number of complex samples carried (a trailing odd byte is ignored)
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}

/// Decoded, DC-corrected complex samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedBlock {
    pub frequency: i64,
    pub sample_rate: u32,
    pub samples: Vec<Complex32>,
}

impl ConvertedBlock {
    pub fn new(frequency: i64, sample_rate: u32, samples: Vec<Complex32>) -> Self {
        Self {
            frequency,
            sample_rate,
            samples,
        }
    }

    /// Overwrite this block in place, keeping the sample allocation
    pub(crate) fn assign(&mut self, frequency: i64, sample_rate: u32, samples: &[Complex32]) {
        self.frequency = frequency;
        self.sample_rate = sample_rate;
        self.samples.clear();
        self.samples.extend_from_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_block_sample_count_ignores_odd_byte() {
        let block = RawBlock::new(100_000_000, 2_000_000, vec![0u8; 9]);
        assert_eq!(block.sample_count(), 4);
        assert!(!block.is_empty());
    }

    #[test]
    fn test_wakeup_is_empty() {
        assert!(RawBlock::wakeup().is_empty());
        assert!(RawBlock::new(1, 1, vec![7]).is_empty());
    }

    #[test]
    fn test_assign_keeps_capacity() {
        let mut block = ConvertedBlock::new(0, 0, vec![Complex32::new(0.0, 0.0); 64]);
        let capacity = block.samples.capacity();

        block.assign(5, 10, &[Complex32::new(1.0, -1.0); 8]);

        assert_eq!(block.frequency, 5);
        assert_eq!(block.sample_rate, 10);
        assert_eq!(block.len(), 8);
        assert_eq!(block.samples.capacity(), capacity);
    }
}
