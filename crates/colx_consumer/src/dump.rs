//! Text dump of pulled chunks, one tab separated table per chunk.
use std::io::Write;

use colx_error::Result;

use crate::driver::ChunkSink;
use crate::source::ColumnRef;

/// Sink writing every chunk as tab separated text.
///
/// ```text
///
/// chunk 0:
///     [col1]  [col2]
/// [0] 10000   null
/// ```
#[derive(Debug)]
pub struct DumpSink<W> {
    writer: W,
}

impl<W: Write> DumpSink<W> {
    pub fn new(writer: W) -> Self {
        DumpSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ChunkSink for DumpSink<W> {
    fn push_chunk(&mut self, chunk_idx: usize, columns: &[ColumnRef<'_>]) -> Result<()> {
        write!(self.writer, "\nchunk {chunk_idx}:\n\t")?;
        for col in columns {
            write!(self.writer, "[{}]\t", col.name)?;
        }
        writeln!(self.writer)?;

        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for row in 0..rows {
            write!(self.writer, "[{row}]\t")?;
            for col in columns {
                write!(self.writer, "{}\t", col.array.value(row)?)?;
            }
            writeln!(self.writer)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
