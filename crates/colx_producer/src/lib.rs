//! Synthetic producers for the interchange ABI.
//!
//! Both producers emit the same deterministic payload. The batch producer
//! hands out N independent top-level columns per pull, the stream producer
//! wraps them as children of one struct chunk.
pub mod batch;
pub mod config;
pub mod payload;
pub mod stream;

pub use batch::{colx_batch_producer_free, colx_batch_producer_new, colx_batch_pull, BatchProducer};
pub use config::{ProducerConfig, ValidityPolicy};
pub use stream::{colx_stream_init, init_stream_with, try_new_stream, SyntheticStream};
