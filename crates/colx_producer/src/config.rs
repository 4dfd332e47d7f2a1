use colx_abi::buffer::DEFAULT_ALIGNMENT;
use colx_abi::datatype::DataType;
use colx_error::{ColxError, Result};

/// How validity bitmaps are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidityPolicy {
    /// Every byte of column `c`'s bitmap is a fixed pattern picked by
    /// `c % 3`: all valid, odd rows valid, even rows valid.
    #[default]
    Alternating,
    /// Omit validity bitmaps entirely.
    AllValid,
}

impl ValidityPolicy {
    /// Bitmap byte pattern for a column, None if the bitmap is omitted.
    pub const fn pattern(&self, column: usize) -> Option<u8> {
        match self {
            Self::Alternating => Some(match column % 3 {
                0 => 0xFF,
                1 => 0xAA,
                _ => 0x55,
            }),
            Self::AllValid => None,
        }
    }
}

/// Shape of the synthetic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub column_count: usize,
    pub batch_count: usize,
    pub rows_per_batch: usize,
    /// Type of every column, must be a fixed width primitive.
    pub datatype: DataType,
    /// Column names, defaults to `col1..colN` if None.
    pub column_names: Option<Vec<String>>,
    pub validity: ValidityPolicy,
    pub alignment: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            column_count: 3,
            batch_count: 5,
            rows_per_batch: 10,
            datatype: DataType::UInt32,
            column_names: None,
            validity: ValidityPolicy::Alternating,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.column_count == 0 {
            return Err(ColxError::new("Column count must be greater than zero"));
        }
        if self.rows_per_batch == 0 {
            return Err(ColxError::new(
                "Rows per batch must be greater than zero, zero length is reserved for end of data",
            ));
        }
        self.total_rows()?;
        if !self.datatype.is_primitive() {
            return Err(ColxError::new(format!(
                "Column type must be a fixed width primitive, got {}",
                self.datatype
            )));
        }
        if let Some(names) = &self.column_names {
            if names.len() != self.column_count {
                return Err(ColxError::new(format!(
                    "Expected {} column names, got {}",
                    self.column_count,
                    names.len()
                )));
            }
        }
        if !self.alignment.is_power_of_two() {
            return Err(ColxError::new(format!(
                "Alignment must be a power of two, got {}",
                self.alignment
            )));
        }
        Ok(())
    }

    /// Rows across every batch, erroring if that can't be counted.
    pub fn total_rows(&self) -> Result<usize> {
        self.batch_count
            .checked_mul(self.rows_per_batch)
            .ok_or_else(|| {
                ColxError::new(format!(
                    "Total rows overflow, {} batches of {} rows",
                    self.batch_count, self.rows_per_batch
                ))
            })
    }

    pub fn column_name(&self, column: usize) -> String {
        match &self.column_names {
            Some(names) => names[column].clone(),
            None => format!("col{}", column + 1),
        }
    }
}
