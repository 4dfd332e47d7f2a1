//! Demo harness pulling synthetic chunks across the interchange boundary and
//! dumping them to stdout.

use std::ffi::c_void;
use std::io::Write;

use clap::{Parser, ValueEnum};
use colx_abi::buffer::{MemoryTracker, DEFAULT_ALIGNMENT};
use colx_abi::datatype::DataType;
use colx_abi::ffi::{BatchPullFn, FfiArrayStream, Status};
use colx_abi::stream::StreamReader;
use colx_consumer::{BatchPullSource, ChunkSource, ConsumeSummary, Consumer, DumpSink};
use colx_error::{ColxError, Result, ResultExt};
use colx_producer::batch::BatchProducer;
use colx_producer::config::{ProducerConfig, ValidityPolicy};
use colx_producer::stream::init_stream_with;
use colx_producer::{colx_batch_producer_free, colx_batch_pull};
use logutil::LogFormat;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Pull N independent columns per call.
    Batch,
    /// Read struct-of-columns chunks from a stream.
    Stream,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(long, value_enum, default_value_t = Mode::Stream)]
    mode: Mode,

    #[arg(long, default_value_t = 3)]
    columns: usize,

    #[arg(long, default_value_t = 5)]
    batches: usize,

    #[arg(long, default_value_t = 10)]
    rows: usize,

    /// Column type, either a name (`uint32`) or a format string (`I`).
    #[arg(long, default_value = "uint32", value_parser = parse_datatype)]
    datatype: DataType,

    /// Omit validity bitmaps.
    #[arg(long)]
    all_valid: bool,

    /// Release the producer after this many chunks.
    #[arg(long)]
    abandon_after: Option<usize>,

    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Refuse buffer allocations past this many live bytes.
    #[arg(long)]
    memory_limit: Option<usize>,
}

impl Arguments {
    fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            column_count: self.columns,
            batch_count: self.batches,
            rows_per_batch: self.rows,
            datatype: self.datatype.clone(),
            column_names: None,
            validity: if self.all_valid {
                ValidityPolicy::AllValid
            } else {
                ValidityPolicy::Alternating
            },
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    fn tracker(&self) -> MemoryTracker {
        match self.memory_limit {
            Some(limit) => MemoryTracker::with_limit(limit),
            None => MemoryTracker::new(),
        }
    }

    fn consumer(&self) -> Consumer {
        match self.abandon_after {
            Some(n) => Consumer::new().with_max_chunks(n),
            None => Consumer::new(),
        }
    }
}

fn parse_datatype(s: &str) -> std::result::Result<DataType, String> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "int8" => DataType::Int8,
        "int16" => DataType::Int16,
        "int32" => DataType::Int32,
        "int64" => DataType::Int64,
        "uint8" => DataType::UInt8,
        "uint16" => DataType::UInt16,
        "uint32" => DataType::UInt32,
        "uint64" => DataType::UInt64,
        _ => DataType::try_from_primitive_format(s).map_err(|e| e.get_msg().to_string())?,
    })
}

/// Owned batch producer handle, freed on drop.
struct ProducerHandle(*mut c_void);

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        // SAFETY: Created by `BatchProducer::into_raw`, only freed here.
        unsafe { colx_batch_producer_free(self.0) };
    }
}

fn main() {
    let args = Arguments::parse();
    logutil::configure_global_logger(tracing::Level::INFO, args.log_format);

    if let Err(e) = inner(&args) {
        println!("----");
        println!("ERROR");
        println!("{e}");
        std::process::exit(1);
    }
}

fn inner(args: &Arguments) -> Result<()> {
    let config = args.producer_config();
    let tracker = args.tracker();
    let stdout = std::io::stdout();
    let mut sink = DumpSink::new(stdout.lock());

    let summary = match args.mode {
        Mode::Batch => {
            let producer = BatchProducer::try_new(config.clone(), tracker.clone())
                .context("Failed to initialize batch producer")?;
            let handle = ProducerHandle(producer.into_raw());
            let pull: BatchPullFn = colx_batch_pull;
            // SAFETY: Handle outlives the source, dropped after it below.
            let mut source = unsafe { BatchPullSource::new(pull, handle.0, config.column_count) };
            run(args.consumer(), &mut source, &mut sink)?
        }
        Mode::Stream => {
            let mut raw = FfiArrayStream::empty();
            // SAFETY: `raw` is valid storage.
            let code = unsafe { init_stream_with(&mut raw, config.clone(), tracker.clone()) };
            if code != Status::Ok.code() {
                return Err(ColxError::new(format!(
                    "Failed to initialize stream, status code {code}"
                )));
            }
            // SAFETY: Initialized by the stream factory.
            let reader = unsafe { StreamReader::try_from_raw(raw) }?;
            let mut source = colx_consumer::StreamSource::try_new(reader)
                .context("Failed to read stream schema")?;
            run(args.consumer(), &mut source, &mut sink)?
        }
    };

    sink.into_inner().flush()?;

    info!(
        chunks = summary.chunks,
        rows = summary.rows,
        completed = summary.completed,
        total_allocations = tracker.total_allocations(),
        "consumption finished"
    );
    if tracker.live_buffers() != 0 {
        return Err(ColxError::new(format!(
            "{} buffers ({} bytes) still live after release",
            tracker.live_buffers(),
            tracker.live_bytes()
        )));
    }

    Ok(())
}

fn run<W: Write>(
    consumer: Consumer,
    source: &mut dyn ChunkSource,
    sink: &mut DumpSink<W>,
) -> Result<ConsumeSummary> {
    consumer
        .run(source, sink)
        .context("Consumption aborted mid-stream")
}
