//! SDR post-processing service
//!
//! Captures raw IQ from rtl_sdr (or a cu8 recording), converts and DC-blocks
//! it, and fans the stream out to level-meter demodulators, a visual monitor
//! and a primary output consumer.

use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::unbounded;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sdr_post::config::Config;
use sdr_post::monitor::{spawn_level_meter, spawn_output_drain, spawn_visual_monitor};
use sdr_post::sdr::SdrCapture;
use sdr_post::{RadioContext, SdrPost, Subscriber, TunerState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   SDR Post-Processing");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Center frequency: {} Hz", config.center_freq);
    info!("  Sample rate: {} sps", config.sample_rate);
    info!("  Visual samples: {}", config.visual_samples);
    info!("  Swap IQ: {}", config.swap_iq);
    info!("  DC blocker alpha: {}", config.dc_alpha);
    info!("  Demodulators: {:?}", config.demod_freqs);
    info!("  Tracking: {:?}", config.tracking_freqs);

    let tuner = TunerState::new(config.center_freq, config.sample_rate);

    // Post-processing stage and its consumers
    let mut post = SdrPost::new(config.post_config(), tuner.clone());

    let (output_tx, output_rx) = unbounded();
    post.set_output(output_tx);
    let (output_stats, _output_thread) = spawn_output_drain(output_rx)?;

    let (visual_stats, _visual_thread) = spawn_visual_monitor(post.visual_receiver())?;

    let handle = post.handle();
    let mut meters = Vec::new();
    let tracked = config.tracking_freqs.iter().map(|f| (*f, true));
    for (index, (frequency, tracking)) in config
        .demod_freqs
        .iter()
        .map(|f| (*f, false))
        .chain(tracked)
        .enumerate()
    {
        let name = format!("demod{}@{}", index, frequency);
        let (subscriber, rx) = Subscriber::new(name.clone(), frequency);
        subscriber.set_tracking(tracking);
        let (stats, _thread) = spawn_level_meter(&name, rx)?;
        handle.bind(subscriber.clone());
        meters.push((subscriber, stats));
    }

    let post_thread = post.start()?;

    // Start capture into the post-processing input queue
    let capture = SdrCapture::new(config.sdr_config(), tuner.clone());
    capture.start(handle.input())?;

    info!("===========================================");
    info!("  Processing started. Press Ctrl+C to stop.");
    info!("===========================================");

    let mut report = tokio::time::interval(Duration::from_millis(config.stats_interval_ms.max(100)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = report.tick() => {
                info!("[Post] {}", handle.stats());
                info!(
                    "[Output] {} blocks, {:.1} dBFS | [Visual] {} frames, peak {:.3}",
                    output_stats.blocks.load(Ordering::Relaxed),
                    output_stats.level(),
                    visual_stats.blocks.load(Ordering::Relaxed),
                    visual_stats.level()
                );
                for (subscriber, stats) in &meters {
                    info!(
                        "[{}] {} | {} blocks | {:.1} dBFS | idle {}",
                        subscriber.name(),
                        if subscriber.is_active() { "active" } else { "inactive" },
                        stats.blocks.load(Ordering::Relaxed),
                        stats.level(),
                        stats.idle.load(Ordering::Relaxed)
                    );
                }

                if !capture.is_running() {
                    warn!("Capture stopped");
                    break;
                }
            }
        }
    }

    // Cleanup
    capture.stop();
    for (subscriber, _) in &meters {
        handle.unbind(subscriber);
    }
    post_thread.stop()?;

    for (_, stats) in &meters {
        stats.stop();
    }
    output_stats.stop();
    visual_stats.stop();

    info!("Shutdown complete. Tuned to {} Hz, retunes: {}", tuner.frequency(), tuner.retune_count());
    Ok(())
}
