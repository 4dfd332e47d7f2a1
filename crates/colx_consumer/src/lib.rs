//! Consumption of chunks from batch and stream producers.
//!
//! A `ChunkSource` hides which producer flavor is on the other side. Both
//! hand out borrowed columns for one chunk at a time, releasing the chunk
//! before the next one is pulled.
pub mod driver;
pub mod dump;
pub mod source;

pub use driver::{ChunkSink, ConsumeSummary, Consumer, StatsSink};
pub use dump::DumpSink;
pub use source::{BatchPullSource, ChunkSource, ColumnRef, StreamSource};
