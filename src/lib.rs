//! SDR post-processing - IQ conversion, DC blocking and demodulator fan-out
//!
//! Sits between an RTL-SDR style front-end and any number of demodulators,
//! a downstream pipeline consumer and a display consumer.

pub mod config;
pub mod error;
pub mod monitor;
pub mod post;
pub mod sdr;

pub use error::{PostError, Result};
pub use post::{
    BlockLease, ConvertedBlock, DemodFeed, PostConfig, PostHandle, PostThread, RadioContext,
    RawBlock, SdrPost, Subscriber, TunerState,
};
