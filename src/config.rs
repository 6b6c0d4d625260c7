//! Configuration loaded from environment variables

use std::path::PathBuf;

use crate::post::{PostConfig, DEFAULT_VISUAL_SAMPLES};
use crate::sdr::{SdrConfig, DEFAULT_ALPHA};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to rtl_sdr executable
    pub rtl_sdr_path: String,

    /// Replay a cu8 recording instead of live capture
    pub iq_file: Option<PathBuf>,

    /// RTL-SDR device index
    pub device_index: u32,

    /// Initial tuned frequency in Hz
    pub center_freq: i64,

    /// Device sample rate
    pub sample_rate: u32,

    /// Tuner gain in dB
    pub gain_db: f32,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Complex samples per raw block
    pub block_samples: usize,

    /// Samples per visual snapshot
    pub visual_samples: usize,

    /// Swap I and Q channels
    pub swap_iq: bool,

    /// DC blocker cutoff
    pub dc_alpha: f32,

    /// Demodulator frequencies to bind at startup
    pub demod_freqs: Vec<i64>,

    /// Demodulators exempt from out-of-range deactivation
    pub tracking_freqs: Vec<i64>,

    /// Statistics reporting interval in milliseconds
    pub stats_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            rtl_sdr_path: std::env::var("RTL_SDR_PATH")
                .unwrap_or_else(|_| "rtl_sdr".to_string()),

            iq_file: std::env::var("IQ_FILE").ok().map(PathBuf::from),

            device_index: parse_var("DEVICE_INDEX").unwrap_or(0),

            center_freq: parse_var("CENTER_FREQ").unwrap_or(100_000_000),

            sample_rate: parse_var("SAMPLE_RATE").unwrap_or(2_000_000),

            gain_db: parse_var("DEVICE_GAIN").unwrap_or(49.6),

            ppm_error: parse_var("PPM_ERROR").unwrap_or(0),

            block_samples: parse_var("BLOCK_SAMPLES").unwrap_or(16 * 1024),

            visual_samples: parse_var("VIS_SAMPLES").unwrap_or(DEFAULT_VISUAL_SAMPLES),

            swap_iq: std::env::var("SWAP_IQ")
                .map(|s| parse_bool(&s))
                .unwrap_or(false),

            dc_alpha: parse_var("DC_ALPHA").unwrap_or(DEFAULT_ALPHA),

            demod_freqs: std::env::var("DEMOD_FREQS")
                .map(|s| parse_freq_list(&s))
                .unwrap_or_default(),

            tracking_freqs: std::env::var("TRACKING_FREQS")
                .map(|s| parse_freq_list(&s))
                .unwrap_or_default(),

            stats_interval_ms: parse_var("STATS_INTERVAL_MS").unwrap_or(5000),
        }
    }

    pub fn post_config(&self) -> PostConfig {
        PostConfig {
            visual_samples: self.visual_samples,
            swap_iq: self.swap_iq,
            dc_alpha: self.dc_alpha,
            ..PostConfig::default()
        }
    }

    pub fn sdr_config(&self) -> SdrConfig {
        SdrConfig {
            device_index: self.device_index,
            sample_rate: self.sample_rate,
            gain: (self.gain_db * 10.0).round() as i32, // Convert to tenths of dB
            ppm_error: self.ppm_error,
            rtl_sdr_path: self.rtl_sdr_path.clone(),
            iq_file: self.iq_file.clone(),
            block_samples: self.block_samples,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse "100000000, 101.5e6" style lists, skipping unparsable entries
fn parse_freq_list(s: &str) -> Vec<i64> {
    s.split(',')
        .filter_map(|f| f.trim().parse::<f64>().ok())
        .map(|f| f.round() as i64)
        .collect()
}
