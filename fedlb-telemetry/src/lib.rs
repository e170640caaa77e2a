//! Telemetry sampler (C7): periodic counter snapshots into a bounded ring
//! buffer, CSV encoding matching §6's schema, and the drain HTTP endpoint
//! that serves the dump and arms process exit.

pub mod drain;
pub mod error;
pub mod ring_buffer;
pub mod sampler;

pub use drain::run_drain_server;
pub use error::TelemetryError;
pub use ring_buffer::RingBuffer;
pub use sampler::{Sample, Sampler, DEFAULT_CAPACITY};
