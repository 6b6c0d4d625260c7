//! Post-processing loop: convert, DC-block and fan out raw blocks
//!
//! Each iteration pulls one raw block, converts it through the lookup table,
//! removes DC bias and publishes the result to the primary output, the visual
//! sink and every subscriber whose passband covers the block frequency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::error::{PostError, Result};
use crate::sdr::{DcBlocker, IqDecoder, DEFAULT_ALPHA};

use super::block::{Complex32, ConvertedBlock, RawBlock};
use super::context::RadioContext;
use super::pool::{BlockLease, BufferPool};
use super::registry::{DemodFeed, Subscriber, SubscriberRegistry};
use super::stats::{PostStats, StatsSnapshot};
use super::visual::{VisualReceiver, VisualSink, DEFAULT_VISUAL_SAMPLES};

const THREAD_NAME: &str = "sdr-post";

/// Post-processing configuration
#[derive(Debug, Clone)]
pub struct PostConfig {
    /// Samples copied into each visual snapshot
    pub visual_samples: usize,
    /// Swap I and Q on conversion
    pub swap_iq: bool,
    /// DC blocker cutoff
    pub dc_alpha: f32,
    /// Raw blocks buffered ahead of the dispatcher
    pub input_depth: usize,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            visual_samples: DEFAULT_VISUAL_SAMPLES,
            swap_iq: false,
            dc_alpha: DEFAULT_ALPHA,
            input_depth: 64,
        }
    }
}

/// State shared between the dispatcher thread and its handles
#[derive(Debug)]
struct Shared {
    registry: SubscriberRegistry,
    visual_samples: AtomicUsize,
    swap_iq: AtomicBool,
    terminated: AtomicBool,
    stats: PostStats,
}

/// Cloneable control surface for a running (or not yet started) dispatcher
#[derive(Debug, Clone)]
pub struct PostHandle {
    shared: Arc<Shared>,
    input: Sender<RawBlock>,
}

impl PostHandle {
    pub fn bind(&self, subscriber: Arc<Subscriber>) {
        debug!(
            "Binding subscriber {} (#{}) at {} Hz",
            subscriber.name(),
            subscriber.id(),
            subscriber.frequency()
        );
        self.shared.registry.bind(subscriber);
    }

    pub fn unbind(&self, subscriber: &Arc<Subscriber>) {
        debug!("Unbinding subscriber {} (#{})", subscriber.name(), subscriber.id());
        self.shared.registry.unbind(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn set_num_vis_samples(&self, samples: usize) {
        self.shared.visual_samples.store(samples, Ordering::Relaxed);
    }

    pub fn get_num_vis_samples(&self) -> usize {
        self.shared.visual_samples.load(Ordering::Relaxed)
    }

    pub fn set_swap_iq(&self, swap: bool) {
        self.shared.swap_iq.store(swap, Ordering::Relaxed);
    }

    pub fn get_swap_iq(&self) -> bool {
        self.shared.swap_iq.load(Ordering::Relaxed)
    }

    /// Producer end of the input queue
    pub fn input(&self) -> Sender<RawBlock> {
        self.input.clone()
    }

    /// Request shutdown and wake the dispatcher if it is parked on the queue
    pub fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        // A full queue wakes the dispatcher anyway
        let _ = self.input.try_send(RawBlock::wakeup());
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

/// Dispatcher-thread-exclusive processing state
pub struct Dispatcher {
    shared: Arc<Shared>,
    context: Arc<dyn RadioContext>,
    decoder: IqDecoder,
    dc_blocker: DcBlocker,
    filtered: Vec<Complex32>,
    pool: BufferPool,
    output: Option<Sender<ConvertedBlock>>,
    visual: Option<VisualSink>,
    receivers: Vec<Arc<Subscriber>>,
}

impl Dispatcher {
    fn new(shared: Arc<Shared>, context: Arc<dyn RadioContext>, dc_alpha: f32) -> Self {
        Self {
            shared,
            context,
            decoder: IqDecoder::new(),
            dc_blocker: DcBlocker::new(dc_alpha),
            filtered: Vec::new(),
            pool: BufferPool::new(),
            output: None,
            visual: None,
            receivers: Vec::new(),
        }
    }

    /// Run one iteration for `raw`. Empty blocks are skipped.
    pub fn process(&mut self, raw: &RawBlock) {
        if raw.is_empty() {
            self.shared.stats.record_empty();
            return;
        }

        let swap = self.shared.swap_iq.load(Ordering::Relaxed);
        let converted = self.decoder.decode(&raw.bytes, swap);

        let count = converted.len();
        if count > self.filtered.capacity() {
            self.filtered.reserve(count - self.filtered.len());
        }
        if count != self.filtered.len() {
            self.filtered.resize(count, Complex32::new(0.0, 0.0));
        }
        self.dc_blocker.process(converted, &mut self.filtered);

        trace!(
            "Block {} Hz @ {} sps: {} samples",
            raw.frequency,
            raw.sample_rate,
            count
        );

        if let Some(output) = &self.output {
            // The primary consumer owns its copy; this is the one per-block allocation
            let block = ConvertedBlock::new(raw.frequency, raw.sample_rate, self.filtered.clone());
            if output.try_send(block).is_ok() {
                PostStats::bump(&self.shared.stats.primary_sent);
            } else {
                debug!("Primary output unavailable, block not forwarded");
            }
        }

        if let Some(visual) = &mut self.visual {
            let max_samples = self.shared.visual_samples.load(Ordering::Relaxed);
            let published = visual.offer(raw.frequency, raw.sample_rate, &self.filtered, max_samples);
            self.shared.stats.record_visual(published);
        }

        self.dispatch(raw.frequency, raw.sample_rate);
        self.shared.stats.record_block(count);
    }

    /// Fan the filtered block out to every active subscriber.
    ///
    /// The first pass settles each subscriber's state and collects the
    /// receivers; the pending count is set to exactly that many before the
    /// second pass pushes anything.
    fn dispatch(&mut self, frequency: i64, sample_rate: u32) {
        let shared = Arc::clone(&self.shared);
        let subscribers = shared.registry.lock();
        if subscribers.is_empty() {
            return;
        }

        let half_rate = u64::from(self.context.sample_rate() / 2);

        self.receivers.clear();
        for subscriber in subscribers.iter() {
            if self.update_state(subscriber, frequency, sample_rate, half_rate) {
                self.receivers.push(Arc::clone(subscriber));
            }
        }

        if self.receivers.is_empty() {
            return;
        }

        let buffer = self.pool.acquire();
        shared.stats.pool_size.store(self.pool.len(), Ordering::Relaxed);
        buffer.fill(frequency, sample_rate, &self.filtered);
        buffer.set_pending(self.receivers.len() as i32);

        for subscriber in self.receivers.drain(..) {
            // A failed push drops the lease, which releases its count
            if !subscriber.push(DemodFeed::Samples(BlockLease::new(Arc::clone(&buffer)))) {
                debug!("Subscriber {} queue closed, lease released", subscriber.name());
            }
        }
        PostStats::bump(&shared.stats.demod_dispatches);
    }

    /// Apply the activation rules for one subscriber; returns whether it
    /// receives the current block
    fn update_state(
        &self,
        subscriber: &Arc<Subscriber>,
        frequency: i64,
        sample_rate: u32,
        half_rate: u64,
    ) -> bool {
        let in_window = frequency.abs_diff(subscriber.frequency()) <= half_rate;

        if in_window {
            if !subscriber.is_active() {
                subscriber.set_active(true);
                debug!("Subscriber {} active at {} Hz", subscriber.name(), frequency);
                if self.context.last_active().is_none() {
                    self.context.set_active_subscriber(subscriber);
                }
            }
            // Already in range: follow is satisfied
            if subscriber.is_follow() {
                subscriber.set_follow(false);
            }
        } else {
            if subscriber.is_active() && !subscriber.is_follow() && !subscriber.is_tracking() {
                subscriber.set_active(false);
                debug!(
                    "Subscriber {} out of range ({} Hz vs {} Hz), deactivated",
                    subscriber.name(),
                    subscriber.frequency(),
                    frequency
                );
                subscriber.push(DemodFeed::Idle {
                    frequency,
                    sample_rate,
                });
                PostStats::bump(&self.shared.stats.idle_notifications);
            }

            if subscriber.is_follow() && self.context.frequency() != subscriber.frequency() {
                debug!(
                    "Subscriber {} requests retune to {} Hz",
                    subscriber.name(),
                    subscriber.frequency()
                );
                self.context.set_frequency(subscriber.frequency());
                PostStats::bump(&self.shared.stats.retune_requests);
            }
        }

        subscriber.is_active()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Release pool and visual buffers; nothing is sent afterwards
    fn shutdown(&mut self) {
        self.pool.clear();
        self.shared.stats.pool_size.store(0, Ordering::Relaxed);
        if let Some(visual) = &mut self.visual {
            visual.shutdown();
        }
        self.visual = None;
        self.output = None;
    }
}

/// Post-processing stage, configured before `start`
pub struct SdrPost {
    dispatcher: Dispatcher,
    input_rx: Receiver<RawBlock>,
    input_tx: Sender<RawBlock>,
}

impl SdrPost {
    pub fn new(config: PostConfig, context: Arc<dyn RadioContext>) -> Self {
        let shared = Arc::new(Shared {
            registry: SubscriberRegistry::new(),
            visual_samples: AtomicUsize::new(config.visual_samples),
            swap_iq: AtomicBool::new(config.swap_iq),
            terminated: AtomicBool::new(false),
            stats: PostStats::new(),
        });
        let (input_tx, input_rx) = bounded(config.input_depth.max(1));

        Self {
            dispatcher: Dispatcher::new(shared, context, config.dc_alpha),
            input_rx,
            input_tx,
        }
    }

    pub fn handle(&self) -> PostHandle {
        PostHandle {
            shared: Arc::clone(&self.dispatcher.shared),
            input: self.input_tx.clone(),
        }
    }

    /// Forward converted blocks to the downstream pipeline
    pub fn set_output(&mut self, output: Sender<ConvertedBlock>) {
        self.dispatcher.output = Some(output);
    }

    /// Enable visual snapshots and return the consumer end
    pub fn visual_receiver(&mut self) -> VisualReceiver {
        let (sink, receiver) = VisualSink::new();
        self.dispatcher.visual = Some(sink);
        receiver
    }

    /// Run one iteration on the calling thread
    pub fn process(&mut self, raw: &RawBlock) {
        self.dispatcher.process(raw);
    }

    pub fn pool(&self) -> &BufferPool {
        self.dispatcher.pool()
    }

    /// Spawn the dispatcher thread
    pub fn start(self) -> Result<PostThread> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|source| PostError::Spawn {
                name: THREAD_NAME,
                source,
            })?;

        Ok(PostThread {
            handle,
            join: Some(join),
        })
    }

    /// Blocking pull-process-push loop; returns after terminate or once
    /// every producer has dropped its sender
    pub fn run(self) {
        let SdrPost {
            mut dispatcher,
            input_rx,
            input_tx,
        } = self;
        drop(input_tx);

        info!("SDR post-processing thread started");

        loop {
            let block = match input_rx.recv() {
                Ok(block) => block,
                Err(_) => {
                    warn!("Input queue disconnected");
                    break;
                }
            };

            if dispatcher.shared.terminated.load(Ordering::SeqCst) {
                // Blocks queued ahead of the wakeup are discarded
                if block.is_empty() {
                    dispatcher.shared.stats.record_empty();
                    break;
                }
                // Wakeup was lost to a full queue
                if input_rx.is_empty() {
                    break;
                }
                continue;
            }

            dispatcher.process(&block);
        }

        dispatcher.shutdown();
        info!(
            "SDR post-processing thread done. {}",
            dispatcher.shared.stats.snapshot()
        );
    }
}

/// Running dispatcher thread
pub struct PostThread {
    handle: PostHandle,
    join: Option<JoinHandle<()>>,
}

impl PostThread {
    pub fn handle(&self) -> &PostHandle {
        &self.handle
    }

    /// Terminate and wait for the loop to finish
    pub fn stop(mut self) -> Result<()> {
        self.handle.terminate();
        self.wait()
    }

    /// Wait for the loop to exit on its own
    pub fn join(mut self) -> Result<()> {
        self.wait()
    }

    fn wait(&mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join.join().map_err(|_| PostError::Panicked(THREAD_NAME)),
            None => Ok(()),
        }
    }
}

impl Drop for PostThread {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.handle.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::context::TunerState;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    const FREQ: i64 = 100_000_000;
    const RATE: u32 = 2_000_000;

    fn setup() -> (SdrPost, Arc<TunerState>) {
        let tuner = TunerState::new(FREQ, RATE);
        let post = SdrPost::new(PostConfig::default(), tuner.clone());
        (post, tuner)
    }

    fn block(frequency: i64) -> RawBlock {
        RawBlock::new(frequency, RATE, vec![200, 60, 10, 250, 127, 128, 0, 255])
    }

    fn lease(feed: DemodFeed) -> BlockLease {
        match feed {
            DemodFeed::Samples(lease) => lease,
            DemodFeed::Idle { .. } => panic!("expected samples"),
        }
    }

    #[test]
    fn test_empty_block_is_skipped() {
        let (mut post, _tuner) = setup();
        let (out_tx, out_rx) = unbounded();
        post.set_output(out_tx);

        post.process(&RawBlock::wakeup());

        assert!(out_rx.try_recv().is_err());
        let stats = post.handle().stats();
        assert_eq!(stats.empty_blocks, 1);
        assert_eq!(stats.blocks_processed, 0);
    }

    #[test]
    fn test_primary_output_without_subscribers() {
        let (mut post, _tuner) = setup();
        let (out_tx, out_rx) = unbounded();
        post.set_output(out_tx);

        post.process(&block(FREQ));

        let out = out_rx.try_recv().expect("converted block");
        assert_eq!(out.frequency, FREQ);
        assert_eq!(out.sample_rate, RATE);
        assert_eq!(out.len(), 4);
        assert!(post.pool().is_empty());
    }

    #[test]
    fn test_pending_count_matches_active_subscribers() {
        let (mut post, _tuner) = setup();
        let handle = post.handle();
        let (a, a_rx) = Subscriber::new("a", FREQ);
        let (b, b_rx) = Subscriber::new("b", FREQ + 500_000);
        let (far, far_rx) = Subscriber::new("far", FREQ + 50_000_000);
        handle.bind(a);
        handle.bind(b);
        handle.bind(far);

        post.process(&block(FREQ));

        let buffer = Arc::clone(post.pool().iter().next().expect("buffer"));
        assert_eq!(buffer.pending(), 2);
        assert!(far_rx.try_recv().is_err());

        drop(lease(a_rx.try_recv().expect("a feed")));
        assert_eq!(buffer.pending(), 1);
        drop(lease(b_rx.try_recv().expect("b feed")));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_consumed_buffer_is_reused() {
        let (mut post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("a", FREQ);
        post.handle().bind(sub);

        post.process(&block(FREQ));
        drop(rx.try_recv().expect("feed"));
        post.process(&block(FREQ));

        assert_eq!(post.pool().len(), 1);
    }

    #[test]
    fn test_unconsumed_buffer_forces_growth() {
        let (mut post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("a", FREQ);
        post.handle().bind(sub);

        post.process(&block(FREQ));
        post.process(&block(FREQ));

        assert_eq!(post.pool().len(), 2);
        let first = lease(rx.try_recv().expect("first"));
        let second = lease(rx.try_recv().expect("second"));
        assert!(!Arc::ptr_eq(first.buffer(), second.buffer()));
    }

    #[test]
    fn test_tracking_subscriber_stays_active() {
        let (mut post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("tracker", FREQ);
        sub.set_tracking(true);
        post.handle().bind(sub.clone());

        post.process(&block(FREQ));
        assert!(sub.is_active());
        drop(rx.try_recv().expect("in range"));

        post.process(&block(FREQ + 100_000_000));
        assert!(sub.is_active());
        assert!(matches!(rx.try_recv(), Ok(DemodFeed::Samples(_))));
    }

    #[test]
    fn test_out_of_range_sends_single_idle() {
        let (mut post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("nbfm", FREQ);
        post.handle().bind(sub.clone());

        post.process(&block(FREQ));
        drop(rx.try_recv().expect("samples"));

        for _ in 0..3 {
            post.process(&block(FREQ + 10_000_000));
        }

        assert!(!sub.is_active());
        match rx.try_recv() {
            Ok(DemodFeed::Idle {
                frequency,
                sample_rate,
            }) => {
                assert_eq!(frequency, FREQ + 10_000_000);
                assert_eq!(sample_rate, RATE);
            }
            other => panic!("expected idle notification, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(post.handle().stats().idle_notifications, 1);
    }

    #[test]
    fn test_window_edge_is_inclusive() {
        let (mut post, _tuner) = setup();
        let (sub, _rx) = Subscriber::new("edge", FREQ + i64::from(RATE / 2));
        post.handle().bind(sub.clone());

        post.process(&block(FREQ));
        assert!(sub.is_active());

        sub.set_frequency(FREQ + i64::from(RATE / 2) + 1);
        post.process(&block(FREQ));
        assert!(!sub.is_active());
    }

    #[test]
    fn test_follow_requests_retune_once() {
        let (mut post, tuner) = setup();
        let target = FREQ + 20_000_000;
        let (sub, rx) = Subscriber::new("follow", target);
        sub.set_follow(true);
        post.handle().bind(sub.clone());

        post.process(&block(FREQ));
        post.process(&block(FREQ));

        assert_eq!(tuner.frequency(), target);
        assert_eq!(tuner.retune_count(), 1);
        assert!(sub.is_follow());
        assert!(!sub.is_active());
        assert!(rx.try_recv().is_err());

        post.process(&block(target));
        assert!(sub.is_active());
        assert!(!sub.is_follow());
        assert!(matches!(rx.try_recv(), Ok(DemodFeed::Samples(_))));
    }

    #[test]
    fn test_active_follow_subscriber_not_deactivated() {
        let (mut post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("follow", FREQ);
        post.handle().bind(sub.clone());
        post.process(&block(FREQ));
        drop(rx.try_recv().expect("samples"));

        sub.set_frequency(FREQ + 30_000_000);
        sub.set_follow(true);
        post.process(&block(FREQ));

        assert!(sub.is_active());
        assert!(matches!(rx.try_recv(), Ok(DemodFeed::Samples(_))));
    }

    #[test]
    fn test_first_activation_becomes_last_active() {
        let (mut post, tuner) = setup();
        let (a, _a_rx) = Subscriber::new("a", FREQ);
        let (b, _b_rx) = Subscriber::new("b", FREQ);
        post.handle().bind(a.clone());
        post.handle().bind(b.clone());

        post.process(&block(FREQ));

        let last = tuner.last_active().expect("default subscriber");
        assert!(Arc::ptr_eq(&last, &a));
    }

    #[test]
    fn test_disconnected_subscriber_releases_count() {
        let (mut post, _tuner) = setup();
        let (gone, gone_rx) = Subscriber::new("gone", FREQ);
        let (alive, alive_rx) = Subscriber::new("alive", FREQ);
        drop(gone_rx);
        post.handle().bind(gone);
        post.handle().bind(alive);

        post.process(&block(FREQ));

        let buffer = Arc::clone(post.pool().iter().next().expect("buffer"));
        assert_eq!(buffer.pending(), 1);
        drop(alive_rx.try_recv().expect("feed"));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_visual_drops_when_busy() {
        let (mut post, _tuner) = setup();
        let visual = post.visual_receiver();
        post.handle().set_num_vis_samples(2);

        post.process(&block(FREQ));
        post.process(&block(FREQ));

        let frame = visual.try_recv().expect("snapshot");
        assert_eq!(frame.len(), 2);
        assert!(visual.try_recv().is_none());

        let stats = post.handle().stats();
        assert_eq!(stats.visual_published, 1);
        assert_eq!(stats.visual_dropped, 1);
    }

    #[test]
    fn test_swap_flag_applies_between_blocks() {
        let (mut post, _tuner) = setup();
        let (out_tx, out_rx) = unbounded();
        post.set_output(out_tx);
        let handle = post.handle();
        assert!(!handle.get_swap_iq());

        post.process(&block(FREQ));
        handle.set_swap_iq(true);
        assert!(handle.get_swap_iq());
        post.process(&block(FREQ));

        let normal = out_rx.try_recv().expect("normal");
        let swapped = out_rx.try_recv().expect("swapped");
        assert_ne!(normal.samples[0], swapped.samples[0]);
    }

    #[test]
    fn test_terminate_unblocks_thread() {
        let (post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("a", FREQ);
        let handle = post.handle();
        handle.bind(sub);

        let running = post.start().expect("spawn");
        running.handle().input().send(block(FREQ)).expect("send");

        let feed = rx.recv_timeout(Duration::from_secs(5)).expect("feed");
        drop(feed);

        running.stop().expect("join");
        assert!(handle.is_terminated());
        let stats = handle.stats();
        assert_eq!(stats.blocks_processed, 1);
        assert_eq!(stats.empty_blocks, 1);
        assert_eq!(stats.pool_size, 0);
    }

    #[test]
    fn test_terminate_discards_queued_blocks() {
        let (post, _tuner) = setup();
        let (sub, rx) = Subscriber::new("a", FREQ);
        let handle = post.handle();
        handle.bind(sub);

        for _ in 0..3 {
            handle.input().send(block(FREQ)).expect("send");
        }
        handle.terminate();

        let running = post.start().expect("spawn");
        running.join().expect("join");

        let stats = handle.stats();
        assert_eq!(stats.blocks_processed, 0);
        assert_eq!(stats.empty_blocks, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminate_with_full_queue_still_exits() {
        let tuner = TunerState::new(FREQ, RATE);
        let config = PostConfig {
            input_depth: 2,
            ..PostConfig::default()
        };
        let post = SdrPost::new(config, tuner);
        let handle = post.handle();

        handle.input().send(block(FREQ)).expect("send");
        handle.input().send(block(FREQ)).expect("send");
        handle.terminate();

        let running = post.start().expect("spawn");
        running.join().expect("join");

        let stats = handle.stats();
        assert_eq!(stats.blocks_processed, 0);
        assert_eq!(stats.empty_blocks, 0);
    }
}
