//! Post-processing stage between the radio front-end and the demodulators
//!
//! Raw I/Q blocks are converted through a lookup table, DC-blocked once, then
//! fanned out:
//! 1. Primary output queue (full converted block)
//! 2. Visual sink (single-slot snapshot, dropped when busy)
//! 3. Subscribers in range of the block frequency (shared pooled buffer)

mod block;
mod context;
mod dispatch;
mod pool;
mod registry;
mod stats;
mod visual;

pub use block::{Complex32, ConvertedBlock, RawBlock};
pub use context::{RadioContext, TunerState};
pub use dispatch::{Dispatcher, PostConfig, PostHandle, PostThread, SdrPost};
pub use pool::{BlockLease, BufferPool, PooledBuffer};
pub use registry::{DemodFeed, Subscriber, SubscriberRegistry};
pub use stats::{PostStats, StatsSnapshot};
pub use visual::{VisualFrame, VisualReceiver, VisualSink, DEFAULT_VISUAL_SAMPLES};
