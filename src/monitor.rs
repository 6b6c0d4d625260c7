//! Example consumers for subscriber queues, visual snapshots and the
//! primary output
//!
//! Each runs on its own thread, polling with a timeout so it can be stopped
//! while the post-processing stage is still alive.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::post::{Complex32, ConvertedBlock, DemodFeed, VisualReceiver};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Floor reported for silent or empty blocks
pub const SILENCE_DBFS: f32 = -120.0;

/// Mean power of `samples` relative to full scale
pub fn mean_power_dbfs(samples: &[Complex32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DBFS;
    }
    let power = samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32;
    if power > 0.0 {
        (10.0 * power.log10()).max(SILENCE_DBFS)
    } else {
        SILENCE_DBFS
    }
}

/// Counters published by a consumer thread
#[derive(Debug)]
pub struct ConsumerStats {
    pub blocks: AtomicU64,
    pub samples: AtomicU64,
    pub idle: AtomicU64,
    level_bits: AtomicU32,
    running: AtomicBool,
}

impl ConsumerStats {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            blocks: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            level_bits: AtomicU32::new(SILENCE_DBFS.to_bits()),
            running: AtomicBool::new(true),
        })
    }

    /// Last measured level in dBFS (peak magnitude for visual monitors)
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    fn record(&self, samples: usize) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Drain a subscriber queue, measuring the level of each block
pub fn spawn_level_meter(
    name: &str,
    rx: Receiver<DemodFeed>,
) -> Result<(Arc<ConsumerStats>, JoinHandle<()>)> {
    let stats = ConsumerStats::new();
    let thread_stats = stats.clone();
    let name = name.to_string();

    let handle = thread::Builder::new()
        .name(format!("meter-{}", name))
        .spawn(move || {
            while thread_stats.is_running() {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(DemodFeed::Samples(lease)) => {
                        let (level, count) = {
                            let block = lease.read();
                            (mean_power_dbfs(&block.samples), block.len())
                        };
                        // Release the shared buffer before the bookkeeping
                        drop(lease);
                        thread_stats.set_level(level);
                        thread_stats.record(count);
                    }
                    Ok(DemodFeed::Idle { frequency, .. }) => {
                        thread_stats.idle.fetch_add(1, Ordering::Relaxed);
                        thread_stats.set_level(SILENCE_DBFS);
                        info!("[{}] Out of range at {} Hz, idle", name, frequency);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("[{}] Level meter stopped", name);
        })
        .context("Failed to spawn level meter thread")?;

    Ok((stats, handle))
}

/// Drain visual snapshots, tracking peak magnitude
pub fn spawn_visual_monitor(rx: VisualReceiver) -> Result<(Arc<ConsumerStats>, JoinHandle<()>)> {
    let stats = ConsumerStats::new();
    let thread_stats = stats.clone();

    let handle = thread::Builder::new()
        .name("visual-monitor".to_string())
        .spawn(move || {
            while thread_stats.is_running() {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(frame) => {
                        let peak = frame.samples.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
                        thread_stats.set_level(peak);
                        thread_stats.record(frame.len());
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Visual monitor stopped");
        })
        .context("Failed to spawn visual monitor thread")?;

    Ok((stats, handle))
}

/// Consume the primary output, counting blocks and samples
pub fn spawn_output_drain(
    rx: Receiver<ConvertedBlock>,
) -> Result<(Arc<ConsumerStats>, JoinHandle<()>)> {
    let stats = ConsumerStats::new();
    let thread_stats = stats.clone();

    let handle = thread::Builder::new()
        .name("output-drain".to_string())
        .spawn(move || {
            while thread_stats.is_running() {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(block) => {
                        thread_stats.set_level(mean_power_dbfs(&block.samples));
                        thread_stats.record(block.len());
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("Failed to spawn output drain thread")?;

    Ok((stats, handle))
}
