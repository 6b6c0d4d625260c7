//! Raw IQ capture via rtl_sdr process or recorded file
//!
//! Spawns rtl_sdr to stream 8-bit IQ samples (or replays a cu8 recording),
//! cuts the stream into fixed-size blocks and hands them to the
//! post-processing input queue.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::post::{RadioContext, RawBlock};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct SdrConfig {
    pub device_index: u32,
    pub sample_rate: u32,
    pub gain: i32,           // Gain in tenths of dB (e.g., 496 = 49.6 dB)
    pub ppm_error: i32,
    pub rtl_sdr_path: String,
    /// Replay this cu8 file instead of opening the device
    pub iq_file: Option<PathBuf>,
    /// Complex samples per raw block
    pub block_samples: usize,
}

impl Default for SdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2_000_000,
            gain: 496,
            ppm_error: 0,
            rtl_sdr_path: "rtl_sdr".to_string(),
            iq_file: None,
            block_samples: 16 * 1024,
        }
    }
}

/// Statistics for capture (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub bytes_captured: AtomicU64,
    pub blocks_sent: AtomicU64,
    pub restarts: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Capture controller
pub struct SdrCapture {
    config: SdrConfig,
    tuner: Arc<dyn RadioContext>,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl SdrCapture {
    pub fn new(config: SdrConfig, tuner: Arc<dyn RadioContext>) -> Self {
        Self {
            config,
            tuner,
            running: Arc::new(AtomicBool::new(false)),
            stats: CaptureStats::new(),
        }
    }

    /// Start capturing into `tx` on a dedicated thread
    pub fn start(&self, tx: Sender<RawBlock>) -> Result<()> {
        info!("  Sample rate: {} sps", self.config.sample_rate);
        info!("  Block size: {} samples", self.config.block_samples);
        match &self.config.iq_file {
            Some(path) => info!("  Source: file {}", path.display()),
            None => info!(
                "  Source: {} (device {}, gain {:.1} dB)",
                self.config.rtl_sdr_path,
                self.config.device_index,
                self.config.gain as f32 / 10.0
            ),
        }

        let config = self.config.clone();
        let tuner = self.tuner.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        running.store(true, Ordering::SeqCst);

        thread::Builder::new()
            .name("sdr-capture".to_string())
            .spawn(move || {
                if let Err(e) = run_capture(&config, tuner.as_ref(), &running, &stats, &tx) {
                    error!("SDR capture error: {:#}", e);
                }
                running.store(false, Ordering::SeqCst);
            })
            .context("Failed to spawn capture thread")?;

        Ok(())
    }

    /// Stop capturing
    pub fn stop(&self) {
        info!("Stopping capture...");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

impl Drop for SdrCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a read session ended
enum SessionEnd {
    Stopped,
    Retune,
}

/// Main capture loop (runs in dedicated thread)
fn run_capture(
    config: &SdrConfig,
    tuner: &dyn RadioContext,
    running: &AtomicBool,
    stats: &CaptureStats,
    tx: &Sender<RawBlock>,
) -> Result<()> {
    if let Some(path) = &config.iq_file {
        let file = File::open(path)
            .with_context(|| format!("Failed to open IQ file {}", path.display()))?;
        let frequency = tuner.frequency();
        let mut reader = BufReader::new(file);
        read_session(&mut reader, config, frequency, None, running, stats, tx)?;
        info!("IQ file replay finished");
        return Ok(());
    }

    while running.load(Ordering::SeqCst) {
        let frequency = tuner.frequency();
        let mut child = spawn_rtl_sdr(config, frequency)?;
        let mut stdout = child
            .stdout
            .take()
            .context("Failed to capture rtl_sdr stdout")?;

        let end = read_session(&mut stdout, config, frequency, Some(tuner), running, stats, tx);

        let _ = child.kill();
        let _ = child.wait();

        match end? {
            SessionEnd::Retune => {
                stats.restarts.fetch_add(1, Ordering::Relaxed);
                info!("Retuning rtl_sdr to {} Hz", tuner.frequency());
            }
            SessionEnd::Stopped => break,
        }
    }

    info!(
        "Capture stopped. Bytes={}, Blocks={}",
        stats.bytes_captured.load(Ordering::Relaxed),
        stats.blocks_sent.load(Ordering::Relaxed)
    );
    Ok(())
}

fn spawn_rtl_sdr(config: &SdrConfig, frequency: i64) -> Result<Child> {
    // rtl_sdr -d <device> -f <freq> -s <rate> -g <gain> -p <ppm> -
    let mut cmd = Command::new(&config.rtl_sdr_path);
    cmd.arg("-d").arg(config.device_index.to_string())
       .arg("-f").arg(frequency.to_string())
       .arg("-s").arg(config.sample_rate.to_string())
       .arg("-g").arg((config.gain as f32 / 10.0).to_string());

    if config.ppm_error != 0 {
        cmd.arg("-p").arg(config.ppm_error.to_string());
    }

    cmd.arg("-");
    cmd.stdout(Stdio::piped())
       .stderr(Stdio::piped());

    info!("Executing: {:?}", cmd);

    let mut child = cmd.spawn()
        .context("Failed to spawn rtl_sdr. Make sure rtl_sdr is installed and in PATH")?;

    // Spawn stderr reader for logging
    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut reader = std::io::BufReader::new(stderr);
            let mut line = String::new();
            while std::io::BufRead::read_line(&mut reader, &mut line).unwrap_or(0) > 0 {
                if !line.trim().is_empty() {
                    info!("[rtl_sdr] {}", line.trim());
                }
                line.clear();
            }
        });
    }

    Ok(child)
}

/// Read blocks until EOF, stop, or (for live capture) a frequency change
fn read_session(
    reader: &mut impl Read,
    config: &SdrConfig,
    frequency: i64,
    tuner: Option<&dyn RadioContext>,
    running: &AtomicBool,
    stats: &CaptureStats,
    tx: &Sender<RawBlock>,
) -> Result<SessionEnd> {
    let block_bytes = config.block_samples.max(1) * 2;
    let mut last_stats_time = Instant::now();
    let mut last_bytes = 0u64;

    while running.load(Ordering::SeqCst) {
        if let Some(tuner) = tuner {
            if tuner.frequency() != frequency {
                return Ok(SessionEnd::Retune);
            }
        }

        let mut buffer = vec![0u8; block_bytes];
        let n_read = match read_block(reader, &mut buffer) {
            Ok(n) => n,
            Err(e) => {
                error!("Error reading IQ stream: {}", e);
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        };

        // Whole sample pairs only
        let n_read = n_read & !1;
        if n_read == 0 {
            warn!("IQ stream closed (EOF)");
            return Ok(SessionEnd::Stopped);
        }
        buffer.truncate(n_read);

        stats.bytes_captured.fetch_add(n_read as u64, Ordering::Relaxed);
        if tx.send(RawBlock::new(frequency, config.sample_rate, buffer)).is_err() {
            warn!("Post-processing input closed, stopping capture");
            return Ok(SessionEnd::Stopped);
        }
        stats.blocks_sent.fetch_add(1, Ordering::Relaxed);

        // Periodic stats logging (every 5 seconds)
        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            let current = stats.bytes_captured.load(Ordering::Relaxed);
            let rate = (current - last_bytes) as f32 / 2.0 / last_stats_time.elapsed().as_secs_f32();
            info!("[Capture] Rate: {:.2} MSPS", rate / 1_000_000.0);
            last_stats_time = Instant::now();
            last_bytes = current;
        }
    }

    Ok(SessionEnd::Stopped)
}

/// Fill `buffer` unless the stream ends first
fn read_block(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
