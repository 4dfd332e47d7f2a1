//! Deterministic synthetic columns.
//!
//! Row `r` of column `c` in a chunk starting at `rows_emitted` holds
//! `(c + 1) * 10000 + rows_emitted + r`, wrapped to the column type.
use colx_abi::array::{ArrayChunk, NullCount};
use colx_abi::bitmap::Bitmap;
use colx_abi::buffer::{AlignedBuffer, MemoryTracker};
use colx_abi::datatype::DataType;
use colx_abi::field::Field;
use colx_abi::scalar::encode_wrapping;
use colx_error::{ColxError, Result};

use crate::config::ProducerConfig;

/// Multiplier separating each column's value range.
pub const COLUMN_VALUE_STRIDE: u64 = 10_000;

/// Value expected at a row, before wrapping to the column type.
///
/// Wraps at `u64` as well, the column type wraps it further anyway.
pub const fn expected_value(column: usize, rows_emitted: usize, row: usize) -> u64 {
    (column as u64)
        .wrapping_add(1)
        .wrapping_mul(COLUMN_VALUE_STRIDE)
        .wrapping_add(rows_emitted as u64)
        .wrapping_add(row as u64)
}

/// Progress through the configured rows, owned by a single producer.
#[derive(Debug)]
pub struct Payload {
    config: ProducerConfig,
    tracker: MemoryTracker,
    total_rows: usize,
    rows_emitted: usize,
}

impl Payload {
    pub fn try_new(config: ProducerConfig, tracker: MemoryTracker) -> Result<Self> {
        config.validate()?;
        Ok(Payload {
            total_rows: config.total_rows()?,
            config,
            tracker,
            rows_emitted: 0,
        })
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    pub fn is_exhausted(&self) -> bool {
        self.rows_emitted >= self.total_rows
    }

    /// Rows in the next chunk, zero if exhausted.
    pub fn next_chunk_len(&self) -> usize {
        let remaining = self.total_rows - self.rows_emitted;
        remaining.min(self.config.rows_per_batch)
    }

    pub fn column_field(&self, column: usize) -> Field {
        Field::new(
            self.config.column_name(column),
            self.config.datatype.clone(),
            true,
        )
    }

    /// Struct type with every column as a child.
    pub fn struct_datatype(&self) -> DataType {
        DataType::new_struct((0..self.config.column_count).map(|c| self.column_field(c)))
    }

    /// Build one column for the next chunk without advancing.
    pub fn build_column(&self, column: usize, null_count: NullCountMode) -> Result<ArrayChunk> {
        let len = self.next_chunk_len();
        if len == 0 {
            return Err(ColxError::new("No rows remaining to build a column from"));
        }

        let alignment = self.config.alignment;
        let datatype = &self.config.datatype;
        let width = match datatype.byte_width() {
            Some(width) => width,
            None => {
                return Err(ColxError::new(format!(
                    "Cannot synthesize values for {datatype}"
                )))
            }
        };

        let bitmap = self
            .config
            .validity
            .pattern(column)
            .map(|pattern| Bitmap::repeated_byte(len, pattern));
        let validity = match &bitmap {
            Some(bitmap) => Some(bitmap.try_to_aligned_buffer(alignment, &self.tracker)?),
            None => None,
        };

        let byte_len = len.checked_mul(width).ok_or_else(|| {
            ColxError::new(format!("Values for {len} rows of {datatype} overflow"))
        })?;
        let mut values = AlignedBuffer::try_new_zeroed(byte_len, alignment, &self.tracker)?;
        let out = values.as_mut_slice();
        for row in 0..len {
            let v = expected_value(column, self.rows_emitted, row);
            if encode_wrapping(datatype, v, &mut out[row * width..(row + 1) * width]).is_none() {
                return Err(ColxError::new(format!("Failed to encode {datatype} value")));
            }
        }

        let null_count = match null_count {
            NullCountMode::Known => NullCount::Known(match &bitmap {
                Some(bitmap) => bitmap.len() - bitmap.popcnt(),
                None => 0,
            }),
            NullCountMode::Unknown => NullCount::Unknown,
        };

        ArrayChunk::try_new(
            datatype.clone(),
            len,
            null_count,
            vec![validity, Some(values)],
            Vec::new(),
        )
    }

    /// Build every column for the next chunk without advancing.
    ///
    /// Columns built before a failure are released before the error is
    /// returned.
    pub fn build_columns(&self, null_count: NullCountMode) -> Result<Vec<ArrayChunk>> {
        (0..self.config.column_count)
            .map(|column| self.build_column(column, null_count))
            .collect()
    }

    /// Mark the next chunk as emitted.
    pub fn advance(&mut self) {
        self.rows_emitted += self.next_chunk_len();
    }
}

/// Whether built columns report their null count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullCountMode {
    Known,
    Unknown,
}
