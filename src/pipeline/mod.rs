//! Dual-stage pipeline: the real-time sampler domain, the bounded queues
//! between domains, and the I/O sink domain.

pub mod queues;
pub mod sampler;
pub mod sink;

pub use queues::{channels, DropRateMonitor, PipelineChannels};
pub use sampler::{watchdog, Sampler, SamplerShared};
pub use sink::{EventSink, SinkStats};
