//! Drives a chunk source to completion, or until abandoned.
use colx_error::{ColxError, Result};
use tracing::{debug, info};

use crate::source::{ChunkSource, ColumnRef};

/// Receives every chunk a consumer pulls.
pub trait ChunkSink {
    /// Handle a chunk. Column memory is released after this returns.
    fn push_chunk(&mut self, chunk_idx: usize, columns: &[ColumnRef<'_>]) -> Result<()>;

    /// Called once the end of data is reached. Not called when consumption is
    /// abandoned early.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What a consumer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeSummary {
    pub chunks: usize,
    pub rows: usize,
    /// If the end of data was reached.
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Consumer {
    max_chunks: Option<usize>,
}

impl Consumer {
    pub fn new() -> Self {
        Consumer { max_chunks: None }
    }

    /// Stop after `max_chunks` chunks without waiting for the end of data.
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    /// Pull chunks from `source` into `sink`.
    ///
    /// Any error from the source or the sink stops consumption immediately.
    pub fn run(&self, source: &mut dyn ChunkSource, sink: &mut dyn ChunkSink) -> Result<ConsumeSummary> {
        let mut summary = ConsumeSummary::default();

        loop {
            if let Some(max) = self.max_chunks {
                if summary.chunks >= max {
                    info!(chunks = summary.chunks, "abandoning consumption early");
                    return Ok(summary);
                }
            }

            let chunk_idx = summary.chunks;
            let mut rows = 0;
            let more = source.next_chunk(&mut |columns| {
                rows = chunk_rows(columns)?;
                sink.push_chunk(chunk_idx, columns)
            })?;
            if !more {
                break;
            }

            summary.chunks += 1;
            summary.rows += rows;
            debug!(chunk_idx, rows, "consumed chunk");
        }

        sink.finish()?;
        summary.completed = true;

        Ok(summary)
    }
}

fn chunk_rows(columns: &[ColumnRef<'_>]) -> Result<usize> {
    let rows = columns.first().map(|c| c.len()).unwrap_or(0);
    if let Some(col) = columns.iter().find(|c| c.len() != rows) {
        return Err(ColxError::new(format!(
            "Column '{}' has {} rows, expected {rows}",
            col.name,
            col.len()
        )));
    }
    Ok(rows)
}

/// Sink collecting simple statistics, useful for checking what a producer
/// emitted without printing it.
#[derive(Debug, Clone, Default)]
pub struct StatsSink {
    pub chunk_lengths: Vec<usize>,
    pub column_names: Vec<String>,
    /// First value of each column per chunk, as u64. None for nulls.
    pub first_values: Vec<Vec<Option<u64>>>,
    /// Nulls per column across all chunks.
    pub null_counts: Vec<usize>,
    pub finished: bool,
}

impl StatsSink {
    pub fn total_rows(&self) -> usize {
        self.chunk_lengths.iter().sum()
    }
}

impl ChunkSink for StatsSink {
    fn push_chunk(&mut self, _chunk_idx: usize, columns: &[ColumnRef<'_>]) -> Result<()> {
        if self.column_names.is_empty() {
            self.column_names = columns.iter().map(|c| c.name.to_string()).collect();
            self.null_counts = vec![0; columns.len()];
        }

        self.chunk_lengths.push(chunk_rows(columns)?);

        let mut firsts = Vec::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            firsts.push(col.array.value(0)?.as_u64());
            self.null_counts[idx] += col.array.compute_null_count()?;
        }
        self.first_values.push(firsts);

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
