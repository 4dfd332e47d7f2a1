use colx_abi::array::ChunkResult;
use colx_abi::bitmap::Bitmap;
use colx_abi::buffer::MemoryTracker;
use colx_abi::datatype::DataType;
use colx_abi::ffi::{FfiArrayStream, Status};
use colx_abi::scalar::ScalarValue;
use colx_abi::stream::{StatusError, StreamReader};
use colx_consumer::{BatchPullSource, ChunkSource, Consumer, StatsSink, StreamSource};
use colx_producer::batch::BatchProducer;
use colx_producer::config::ProducerConfig;
use colx_producer::stream::{init_stream_with, try_new_stream};
use colx_producer::{colx_batch_producer_free, colx_batch_pull, colx_stream_init};

fn stream_reader(config: ProducerConfig, tracker: &MemoryTracker) -> StreamReader {
    let raw = try_new_stream(config, tracker.clone()).unwrap();
    unsafe { StreamReader::try_from_raw(raw) }.unwrap()
}

#[test]
fn batch_five_chunks_then_end() {
    logutil::init_test();

    let tracker = MemoryTracker::new();
    let handle = BatchProducer::try_new(ProducerConfig::default(), tracker.clone())
        .unwrap()
        .into_raw();
    let mut source = unsafe { BatchPullSource::new(colx_batch_pull, handle, 3) };
    let mut sink = StatsSink::default();

    let summary = Consumer::new().run(&mut source, &mut sink).unwrap();
    assert_eq!(5, summary.chunks);
    assert_eq!(50, summary.rows);
    assert!(summary.completed);

    assert_eq!(vec![10; 5], sink.chunk_lengths);
    assert_eq!(vec!["col1", "col2", "col3"], sink.column_names);
    // Column 0 row 0 of chunk 0.
    assert_eq!(Some(10_000), sink.first_values[0][0]);
    // Column 1 starts with a null, column 2 with a value.
    assert_eq!(None, sink.first_values[0][1]);
    assert_eq!(Some(30_000), sink.first_values[0][2]);
    assert_eq!(Some(10_040), sink.first_values[4][0]);

    // Nothing after the end.
    assert!(!source.next_chunk(&mut |_| panic!("chunk after end")).unwrap());
    assert_eq!(0, tracker.live_buffers());

    drop(source);
    unsafe { colx_batch_producer_free(handle) };
}

#[test]
fn stream_schema_and_chunks() {
    logutil::init_test();

    let tracker = MemoryTracker::new();
    let mut reader = stream_reader(ProducerConfig::default(), &tracker);

    let schema = reader.schema().unwrap();
    let field = schema.to_field().unwrap();
    assert!(matches!(field.datatype, DataType::Struct(_)));
    let names: Vec<_> = field.children().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(vec!["col1", "col2", "col3"], names);

    let mut lengths = Vec::new();
    for _ in 0..6 {
        match reader.next_chunk().unwrap() {
            ChunkResult::Chunk(chunk) => {
                assert_eq!(&field.datatype, chunk.datatype());
                lengths.push(chunk.len());
            }
            ChunkResult::EndOfStream => lengths.push(0),
        }
    }
    assert_eq!(vec![10, 10, 10, 10, 10, 0], lengths);

    schema.release();
    reader.release();
    assert_eq!(0, tracker.live_buffers());
}

#[test]
fn stream_abandoned_after_first_chunk() {
    logutil::init_test();

    let tracker = MemoryTracker::new();
    let reader = stream_reader(ProducerConfig::default(), &tracker);
    let mut source = StreamSource::try_new(reader).unwrap();
    let mut sink = StatsSink::default();

    let summary = Consumer::new()
        .with_max_chunks(1)
        .run(&mut source, &mut sink)
        .unwrap();
    assert_eq!(1, summary.chunks);
    assert!(!summary.completed);

    source.release();
    assert_eq!(0, tracker.live_buffers());
    assert_eq!(0, tracker.live_bytes());
    assert_eq!(6, tracker.total_allocations());
}

#[test]
fn stream_abandoned_with_chunk_outstanding() {
    let tracker = MemoryTracker::new();
    let mut reader = stream_reader(ProducerConfig::default(), &tracker);
    let chunk = reader.next_chunk().unwrap().into_chunk().unwrap();

    // Chunk owns its memory independently of the stream.
    reader.release();
    assert_eq!(6, tracker.live_buffers());
    assert!(chunk.view().child(0).unwrap().is_valid(0).unwrap());

    chunk.release();
    assert_eq!(0, tracker.live_buffers());
}

#[test]
fn stream_through_factory_entry_point() {
    let mut raw = FfiArrayStream::empty();
    assert_eq!(0, unsafe { colx_stream_init(&mut raw) });
    let reader = unsafe { StreamReader::try_from_raw(raw) }.unwrap();
    let mut source = StreamSource::try_new(reader).unwrap();
    let mut sink = StatsSink::default();

    let summary = Consumer::new().run(&mut source, &mut sink).unwrap();
    assert_eq!(50, summary.rows);
    assert_eq!(50, sink.total_rows());
}

#[test]
fn release_marks_records_released() {
    let tracker = MemoryTracker::new();
    let mut raw = try_new_stream(ProducerConfig::default(), tracker.clone()).unwrap();

    let get_next = raw.get_next.unwrap();
    let mut array = colx_abi::ffi::FfiArray::empty();
    assert_eq!(0, unsafe { get_next(&mut raw, &mut array) });
    assert_eq!(3, array.n_children);

    let release = array.release.unwrap();
    unsafe { release(&mut array) };
    assert!(array.is_released());
    assert!(array.private_data.is_null());
    assert_eq!(0, tracker.live_buffers());

    // Second release through a stale callback is detected and ignored.
    unsafe { release(&mut array) };
    assert_eq!(0, tracker.live_buffers());

    let release = raw.release.unwrap();
    unsafe { release(&mut raw) };
    assert!(raw.is_released());
    unsafe { release(&mut raw) };
}

#[test]
fn nested_children_match_descriptor() {
    let config = ProducerConfig {
        column_count: 5,
        ..Default::default()
    };
    let tracker = MemoryTracker::new();
    let mut reader = stream_reader(config, &tracker);
    let schema = reader.schema().unwrap();
    let chunk = reader.next_chunk().unwrap().into_chunk().unwrap();

    let view = chunk.view();
    assert_eq!(schema.view().num_children(), view.num_children());
    for idx in 0..view.num_children() {
        assert_eq!(view.len(), view.child(idx).unwrap().len());
    }
}

#[test]
fn validity_agrees_with_reference_decoder() {
    let tracker = MemoryTracker::new();
    let mut reader = stream_reader(ProducerConfig::default(), &tracker);
    let chunk = reader.next_chunk().unwrap().into_chunk().unwrap();
    let view = chunk.view();

    // Column 1 is all 0xAA.
    let child = view.child(1).unwrap();
    let reference = Bitmap::repeated_byte(10, 0xAA);
    for row in 0..child.len() {
        assert_eq!(reference.value(row), child.is_valid(row).unwrap(), "row {row}");
        let expected = if row % 2 == 1 {
            ScalarValue::UInt32(20_000 + row as u32)
        } else {
            ScalarValue::Null
        };
        assert_eq!(expected, child.value(row).unwrap());
    }
    assert_eq!(5, child.compute_null_count().unwrap());
}

#[test]
fn allocation_failure_is_transient() {
    // Room for exactly one chunk.
    let tracker = MemoryTracker::with_limit(6 * 64);
    let mut raw = FfiArrayStream::empty();
    let code = unsafe { init_stream_with(&mut raw, ProducerConfig::default(), tracker.clone()) };
    assert_eq!(0, code);
    let mut reader = unsafe { StreamReader::try_from_raw(raw) }.unwrap();

    let first = reader.next_chunk().unwrap().into_chunk().unwrap();
    let err = reader.next_chunk().unwrap_err();
    let status = err.downcast_source::<StatusError>().unwrap();
    assert_eq!(Some(Status::NoMemory), status.status());

    // Failed pull didn't consume any rows.
    first.release();
    let second = reader.next_chunk().unwrap().into_chunk().unwrap();
    let col = second.view().child(0).unwrap();
    assert_eq!(
        ScalarValue::UInt32(10_010),
        col.value(0).unwrap()
    );
}

#[test]
fn producer_failure_surfaces_status() {
    let tracker = MemoryTracker::with_limit(64);
    let mut reader = stream_reader(ProducerConfig::default(), &tracker);
    let schema = reader.schema().unwrap();
    assert_eq!(3, schema.view().num_children());

    let mut source = StreamSource::try_new(reader).unwrap();
    let mut sink = StatsSink::default();
    let err = Consumer::new().run(&mut source, &mut sink).unwrap_err();

    let status = err.downcast_source::<StatusError>().unwrap();
    assert_eq!(Some(Status::NoMemory), status.status());
    assert!(status.message.is_some());
    assert!(sink.chunk_lengths.is_empty());
    assert_eq!(0, tracker.live_buffers());
}
