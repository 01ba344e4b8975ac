use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_compress::{Algorithm, Compression};
use arbor_error::ArborError;
use arbor_io::{FileSink, Locator, MemorySink, ReadAt, RecordSink, SharedFile};
use bytes::Bytes;
use rstest::rstest;
use tempfile::NamedTempFile;

use crate::metrics::{ArborMetrics, BASKETS_DECODED, BASKETS_FLUSHED, ENTRIES_READ};
use crate::*;

fn write_i32s<S: RecordSink>(writer: &mut TreeWriter<S>, name: &str, values: &[i32]) {
    let field = writer.branch::<i32>(name, Shape::Scalar).unwrap();
    for &v in values {
        writer.set_value(&field, v).unwrap();
        writer.write().unwrap();
    }
}

fn read_all<T: Element>(reader: &mut TreeReader<'_>, binding: &Binding<T>) -> Vec<T> {
    let mut values = Vec::new();
    while reader.next().unwrap().is_some() {
        values.extend_from_slice(reader.values(binding));
    }
    values
}

/// Four `i32` entries of the branch `x` of the tree `events-2024-01`, stored as one basket
/// record of 86 bytes right after 304 reserved bytes.
fn single_basket() -> (Tree, Arc<dyn ReadAt>) {
    let mut sink = MemorySink::with_reserved(304);
    let mut writer = TreeWriter::new("events-2024-01", &mut sink, WriteOptions::default());
    write_i32s(&mut writer, "x", &[10, 20, 30, 40]);
    let (tree, _) = writer.close().unwrap();
    (tree, Arc::new(sink.into_bytes()))
}

#[test]
fn scenario_a_and_b_cover_the_requested_entries() {
    let mut branch = Branch::new("x", "x/I".to_string(), Vec::new(), Compression::NONE, 32000, 0, 10);
    branch.push_basket(100, 10, 2).unwrap();
    branch.push_basket(200, 10, 3).unwrap();
    branch.entries = 5;
    assert_eq!(find_baskets(&branch.spans().unwrap(), 0, 5), Some(0..2));

    branch.push_basket(300, 10, 5).unwrap();
    branch.entries = 10;
    assert_eq!(branch.basket_entry(), &[0, 2, 5, 10]);
    assert_eq!(find_baskets(&branch.spans().unwrap(), 2, 6), Some(1..3));
}

#[test]
fn scenario_c_prefetches_a_single_basket() {
    let (tree, reader) = single_basket();
    let branch = tree.branch(tree.find_branch("x").unwrap()).unwrap();
    assert_eq!(branch.basket_seek(), &[304]);
    assert_eq!(branch.basket_bytes(), &[86]);
    assert_eq!(branch.basket_entry(), &[0, 4]);

    let spans = branch.spans().unwrap();
    let source = BasketSource::new(reader, branch, ArborMetrics::default());
    let mut prefetch = Prefetcher::spawn(source, &spans, 0..4, Concurrency::from_i64(10)).unwrap();
    let mut seen = Vec::new();
    while let Some(ready) = prefetch.read().unwrap() {
        assert_eq!(ready.basket.entries(), 4);
        seen.push(ready.span);
    }
    assert_eq!(seen, vec![Span::new(0, 4, 304, 86)]);
    prefetch.close();
    prefetch.close();
}

#[test]
fn scenario_d_writes_and_reads_back_five_rows() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default());
    write_i32s(&mut writer, "x", &[3, 1, 4, 1, 5]);
    let (tree, _) = writer.close().unwrap();

    let branch = tree.branch(tree.find_branch("x").unwrap()).unwrap();
    assert_eq!(branch.write_basket(), 1);
    assert_eq!(branch.basket_entry(), &[0, 5]);
    assert_eq!(tree.entries(), 5);

    let mut reader =
        TreeReader::new(Arc::new(sink.into_bytes()), &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<i32>("x").unwrap();
    assert_eq!(read_all(&mut reader, &x), vec![3, 1, 4, 1, 5]);
    assert!(reader.next().unwrap().is_none());
}

#[test]
fn scenario_e_entries_past_the_last_basket_are_missing() {
    let (tree, reader) = single_basket();
    let mut reader = TreeReader::new(reader, &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<i32>("x").unwrap();

    assert!(reader.read_entry(2).unwrap());
    assert_eq!(reader.value(&x), 30);
    assert!(!reader.read_entry(4).unwrap());

    let err = reader.read_entry(5).unwrap_err();
    assert!(err.is_missing_basket());
    assert!(err.to_string().contains("no basket for entry 5"));
}

#[rstest]
#[case(Concurrency::from_i64(1))]
#[case(Concurrency::from_i64(3))]
#[case(Concurrency::Auto)]
fn many_baskets_are_read_in_order(#[case] concurrency: Concurrency) {
    let metrics = ArborMetrics::default();
    let mut sink = MemorySink::new();
    let options = WriteOptions::default()
        .with_basket_size(64)
        .with_metrics(metrics.clone());
    let mut writer = TreeWriter::new("t", &mut sink, options);
    let n = writer.branch::<i64>("n", Shape::Scalar).unwrap();
    for v in 0..100i64 {
        writer.set_value(&n, v * v).unwrap();
        writer.write().unwrap();
    }
    let (tree, record) = writer.close().unwrap();

    let branch = tree.branch(tree.find_branch("n").unwrap()).unwrap();
    assert_eq!(branch.write_basket(), 13);
    assert!(branch.max_baskets() >= 14);
    assert_eq!(metrics.counter(BASKETS_FLUSHED).count(), 13);
    assert!(tree.zip_bytes() > 0);

    let decoded = Tree::decode(TREE_CLASS, &record).unwrap();
    let options = ReadOptions::default()
        .with_concurrency(concurrency)
        .with_metrics(metrics.clone());
    let mut reader = TreeReader::new(Arc::new(sink.into_bytes()), &decoded, options).unwrap();
    let n = reader.bind::<i64>("n").unwrap();
    let expected = (0..100i64).map(|v| v * v).collect::<Vec<_>>();
    assert_eq!(read_all(&mut reader, &n), expected);
    assert_eq!(metrics.counter(BASKETS_DECODED).count(), 13);
    assert_eq!(metrics.counter(ENTRIES_READ).count(), 100);
}

#[test]
fn sub_ranges_and_random_access() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_basket_size(16));
    write_i32s(&mut writer, "x", &(0..20).collect::<Vec<_>>());
    let (tree, _) = writer.close().unwrap();
    let bytes: Arc<dyn ReadAt> = Arc::new(sink.into_bytes());

    let options = ReadOptions::default().with_range(6..11);
    let mut reader = TreeReader::new(bytes.clone(), &tree, options).unwrap();
    let x = reader.bind::<i32>("x").unwrap();
    let mut entries = Vec::new();
    while let Some(entry) = reader.next().unwrap() {
        assert_eq!(i64::from(reader.value(&x)), i64::try_from(entry).unwrap());
        entries.push(entry);
    }
    assert_eq!(entries, (6..11).collect::<Vec<_>>());

    let mut reader = TreeReader::new(bytes, &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<i32>("x").unwrap();
    for entry in [17u64, 3, 4, 19, 0] {
        assert!(reader.read_entry(entry).unwrap());
        assert_eq!(i64::from(reader.value(&x)), i64::try_from(entry).unwrap());
    }
}

#[rstest]
#[case(Range { start: 3, end: 2 })]
#[case(0..6)]
fn invalid_ranges_are_rejected_before_reading(#[case] range: Range<u64>) {
    let tree = single_basket().0;
    // no byte is available: any read would fail with an IO error
    let empty: Arc<dyn ReadAt> = Arc::new(Bytes::new());
    let err = TreeReader::new(empty, &tree, ReadOptions::default().with_range(range)).unwrap_err();
    assert!(matches!(err.root(), ArborError::Range(..)));
}

#[test]
fn variable_length_branches_follow_their_counts() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_basket_size(128));
    let n = writer.branch::<i32>("n", Shape::Scalar).unwrap();
    let x = writer.branch::<f64>("x", Shape::Var(n.id())).unwrap();
    let rows = (0..40)
        .map(|k| vec![f64::from(k); usize::try_from(k % 4).unwrap()])
        .collect::<Vec<_>>();
    for row in &rows {
        writer.set_value(&n, i32::try_from(row.len()).unwrap()).unwrap();
        writer.set(&x, row).unwrap();
        writer.write().unwrap();
    }
    let (tree, record) = writer.close().unwrap();

    let x_leaf = tree.leaf(tree.find_leaf("x").unwrap()).unwrap();
    assert_eq!(x_leaf.count(), tree.find_leaf("n"));
    assert_eq!(tree.leaf(tree.find_leaf("n").unwrap()).unwrap().imax(), 3);
    assert_eq!(
        tree.branch(tree.find_branch("x").unwrap()).unwrap().title(),
        "x[n]/D"
    );

    let decoded = Tree::decode(TREE_CLASS, &record).unwrap();
    let mut reader =
        TreeReader::new(Arc::new(sink.into_bytes()), &decoded, ReadOptions::default()).unwrap();
    // only the variable-length leaf is bound: its counting leaf is read implicitly
    let x = reader.bind::<f64>("x").unwrap();
    let mut back = Vec::new();
    while reader.next().unwrap().is_some() {
        back.push(reader.values(&x).to_vec());
    }
    assert_eq!(back, rows);
    assert_eq!(reader.branches()[0], decoded.find_branch("n").unwrap());
}

#[test]
fn rows_with_the_wrong_number_of_values_are_rejected() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default());
    let n = writer.branch::<u8>("n", Shape::Scalar).unwrap();
    let x = writer.branch::<f32>("x", Shape::Var(n.id())).unwrap();
    let a = writer.branch::<i16>("a", Shape::Array(3)).unwrap();

    writer.set_value(&n, 2).unwrap();
    writer.set(&x, &[1.0]).unwrap();
    writer.set(&a, &[1, 2, 3]).unwrap();
    assert!(writer.write().is_err());
    writer.set(&x, &[1.0, 2.0]).unwrap();
    writer.set(&a, &[1, 2]).unwrap();
    assert!(writer.write().is_err());
    writer.set(&a, &[1, 2, 3]).unwrap();
    assert!(writer.write().unwrap() > 0);
    assert_eq!(writer.tree().entries(), 1);

    assert!(writer.branch::<i32>("late", Shape::Scalar).is_err());
}

#[test]
fn declarations_are_validated() {
    let mut writer = TreeWriter::new("t", MemorySink::new(), WriteOptions::default());
    let f = writer.branch::<f32>("f", Shape::Scalar).unwrap();
    assert!(writer.branch::<i32>("f", Shape::Scalar).is_err());
    assert!(writer.branch::<f64>("v", Shape::Var(f.id())).is_err());
    assert!(writer.branch::<String>("s", Shape::Array(2)).is_err());
    assert!(
        writer
            .branch_as::<f64>("d", ElementKind::F32, Shape::Scalar)
            .is_err()
    );
}

#[test]
fn fixed_arrays_strings_and_narrow_floats() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_basket_size(100));
    let a = writer.branch::<u16>("a", Shape::Array(3)).unwrap();
    let s = writer.branch::<String>("s", Shape::Scalar).unwrap();
    let h = writer
        .branch_as::<f32>("h", ElementKind::Float16, Shape::Scalar)
        .unwrap();
    let d = writer
        .branch_as::<f64>("d", ElementKind::Double32, Shape::Scalar)
        .unwrap();
    let b = writer.branch::<bool>("b", Shape::Scalar).unwrap();

    let halves = [1.5f32, -2.0, 0.25, 3.0];
    for k in 0..12u16 {
        writer.set(&a, &[k, k + 1, u16::MAX - k]).unwrap();
        writer.set_value(&s, format!("row-{k}")).unwrap();
        writer.set_value(&h, halves[usize::from(k % 4)]).unwrap();
        writer.set_value(&d, f64::from(k) + 0.5).unwrap();
        writer.set_value(&b, k % 3 == 0).unwrap();
        writer.write().unwrap();
    }
    let (tree, record) = writer.close().unwrap();
    assert_eq!(tree.branch(tree.find_branch("h").unwrap()).unwrap().title(), "h/f");
    assert_eq!(tree.branch(tree.find_branch("a").unwrap()).unwrap().title(), "a[3]/s");

    let decoded = Tree::decode(TREE_CLASS, &record).unwrap();
    let mut reader =
        TreeReader::new(Arc::new(sink.into_bytes()), &decoded, ReadOptions::default()).unwrap();
    let a = reader.bind::<u16>("a").unwrap();
    let s = reader.bind::<String>("s").unwrap();
    let h = reader.bind::<f32>("h").unwrap();
    let d = reader.bind::<f64>("d").unwrap();
    let b = reader.bind::<bool>("b").unwrap();
    let mut k = 0u16;
    while reader.next().unwrap().is_some() {
        assert_eq!(reader.values(&a), &[k, k + 1, u16::MAX - k]);
        assert_eq!(reader.value(&s), format!("row-{k}"));
        assert_eq!(reader.value(&h), halves[usize::from(k % 4)]);
        assert_eq!(reader.value(&d), f64::from(k) + 0.5);
        assert_eq!(reader.value(&b), k % 3 == 0);
        k += 1;
    }
    assert_eq!(k, 12);
}

#[test]
fn leaves_record_their_extrema() {
    let mut writer = TreeWriter::new("t", MemorySink::new(), WriteOptions::default());
    let x = writer.branch::<i32>("x", Shape::Scalar).unwrap();
    let u = writer.branch::<u32>("u", Shape::Scalar).unwrap();
    for v in [7, -3, 12, 5] {
        writer.set_value(&x, v).unwrap();
        writer.set_value(&u, u32::try_from(v + 3).unwrap()).unwrap();
        writer.write().unwrap();
    }
    let (tree, _) = writer.close().unwrap();
    let x = tree.leaf(tree.find_leaf("x").unwrap()).unwrap();
    assert_eq!(x.extrema(), Extrema::I32(-3, 12));
    let u = tree.leaf(tree.find_leaf("u").unwrap()).unwrap();
    assert!(u.is_unsigned());
    assert_eq!(u.extrema(), Extrema::I32(0, 15));
}

#[rstest]
#[case(Compression::ZLIB_DEFAULT)]
#[case(Compression::new(Algorithm::Zstd, 5).unwrap())]
#[case(Compression::NONE)]
fn compressed_baskets_round_trip(#[case] compression: Compression) {
    let mut sink = MemorySink::new();
    let options = WriteOptions::default()
        .with_basket_size(4096)
        .with_compression(compression);
    let mut writer = TreeWriter::new("t", &mut sink, options);
    let x = writer.branch::<i64>("x", Shape::Scalar).unwrap();
    for v in 0..2000i64 {
        writer.set_value(&x, v % 17).unwrap();
        writer.write().unwrap();
    }
    let (tree, _) = writer.close().unwrap();
    if compression.is_none() {
        assert_eq!(tree.zip_bytes(), tree.tot_bytes());
    } else {
        assert!(tree.zip_bytes() < tree.tot_bytes());
    }

    let mut reader =
        TreeReader::new(Arc::new(sink.into_bytes()), &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<i64>("x").unwrap();
    let expected = (0..2000i64).map(|v| v % 17).collect::<Vec<_>>();
    assert_eq!(read_all(&mut reader, &x), expected);
}

#[test]
fn signed_leaves_bind_to_unsigned_destinations() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default());
    write_i32s(&mut writer, "x", &[-1, 7]);
    let (tree, _) = writer.close().unwrap();

    let mut reader =
        TreeReader::new(Arc::new(sink.into_bytes()), &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<u32>("x").unwrap();
    assert_eq!(read_all(&mut reader, &x), vec![u32::MAX, 7]);
}

#[test]
fn incompatible_bindings_fail_at_bind_time() {
    let (tree, bytes) = single_basket();
    let mut reader = TreeReader::new(bytes, &tree, ReadOptions::default()).unwrap();

    for err in [
        reader.bind::<f64>("x").map(|_| ()).unwrap_err(),
        reader.bind::<i64>("x").map(|_| ()).unwrap_err(),
        reader.bind::<i32>("missing").map(|_| ()).unwrap_err(),
    ] {
        assert!(matches!(err.root(), ArborError::Binding(..)));
    }

    let x = reader.bind::<i32>("x").unwrap();
    assert_eq!(reader.next().unwrap(), Some(0));
    assert_eq!(reader.value(&x), 10);
    assert!(reader.bind::<u32>("x").is_err());
}

#[test]
fn snapshots_read_unflushed_entries_from_memory() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_basket_size(16));
    let x = writer.branch::<i32>("x", Shape::Scalar).unwrap();
    let n = writer.branch::<i32>("n", Shape::Scalar).unwrap();
    let v = writer.branch::<i16>("v", Shape::Var(n.id())).unwrap();
    for k in 0..6i32 {
        writer.set_value(&x, k * 10).unwrap();
        writer.set_value(&n, k % 3).unwrap();
        writer
            .set(&v, &vec![i16::try_from(k).unwrap(); usize::try_from(k % 3).unwrap()])
            .unwrap();
        writer.write().unwrap();
    }

    let snapshot = writer.snapshot().unwrap();
    let branch = snapshot.branch(snapshot.find_branch("x").unwrap()).unwrap();
    assert_eq!(branch.write_basket(), 1);
    assert_eq!(
        branch.spans().unwrap().last(),
        Some(&Span::new(4, 6, 0, 0))
    );

    let decoded = Tree::decode(TREE_CLASS, &snapshot.encode().unwrap()).unwrap();
    let bytes = Bytes::copy_from_slice(writer.sink().as_slice());
    let mut reader = TreeReader::new(Arc::new(bytes), &decoded, ReadOptions::default()).unwrap();
    let x = reader.bind::<i32>("x").unwrap();
    let v = reader.bind::<i16>("v").unwrap();
    let mut k = 0i32;
    while reader.next().unwrap().is_some() {
        assert_eq!(reader.value(&x), k * 10);
        assert_eq!(reader.values(&v).len(), usize::try_from(k % 3).unwrap());
        k += 1;
    }
    assert_eq!(k, 6);
}

#[test]
fn file_backed_round_trip() {
    let tmp = NamedTempFile::new().unwrap();
    let sink = FileSink::create(tmp.path()).unwrap();
    let mut writer = TreeWriter::new("t", sink, WriteOptions::default().with_basket_size(32));
    let x = writer.branch::<f32>("x", Shape::Array(2)).unwrap();
    for k in 0..50u16 {
        let k = f32::from(k);
        writer.set(&x, &[k, -k]).unwrap();
        writer.write().unwrap();
    }
    let (tree, record) = writer.close().unwrap();
    let tree = Tree::decode(TREE_CLASS, &record).unwrap();

    let file = SharedFile::open(tmp.path()).unwrap();
    let mut reader = TreeReader::new(Arc::new(file), &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<f32>("x").unwrap();
    let values = read_all(&mut reader, &x);
    assert_eq!(values.len(), 100);
    assert_eq!(&values[98..], &[49.0, -49.0]);
}

#[test]
fn tree_records_are_stable() {
    let mut sink = MemorySink::new();
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_title("a tree"));
    let n = writer.branch::<i32>("n", Shape::Scalar).unwrap();
    let x = writer.branch::<f64>("x", Shape::Var(n.id())).unwrap();
    for k in 0..3 {
        writer.set_value(&n, k).unwrap();
        writer
            .set(&x, &vec![0.5; usize::try_from(k).unwrap()])
            .unwrap();
        writer.write().unwrap();
    }
    let (tree, record) = writer.close().unwrap();

    let decoded = Tree::decode(TREE_CLASS, &record).unwrap();
    assert_eq!(decoded.title(), "a tree");
    assert_eq!(decoded.entries(), 3);
    assert_eq!(decoded.tot_bytes(), tree.tot_bytes());
    assert_eq!(decoded.encode().unwrap(), record);
}

#[test]
fn corrupted_baskets_report_their_branch() {
    let (tree, bytes) = single_basket();
    let mut data = bytes.read_byte_range(0..bytes.size().unwrap()).unwrap().to_vec();
    // the class name of the basket key
    data[304 + 27] = b'X';
    let mut reader =
        TreeReader::new(Arc::new(Bytes::from(data)), &tree, ReadOptions::default()).unwrap();
    reader.bind::<i32>("x").unwrap();
    let err = reader.next().unwrap_err();
    assert!(err.to_string().contains("prefetching basket 0 of x"));
    assert!(matches!(err.root(), ArborError::InvalidSerde(..)));
}

/// A memory sink whose writes fail while `fail` is set.
struct FlakySink {
    inner: MemorySink,
    fail: Arc<AtomicBool>,
}

impl RecordSink for FlakySink {
    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<Locator> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.inner.write_record(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[test]
fn failed_basket_writes_keep_the_row_pending() {
    let fail = Arc::new(AtomicBool::new(false));
    let mut sink = FlakySink {
        inner: MemorySink::new(),
        fail: fail.clone(),
    };
    let mut writer = TreeWriter::new("t", &mut sink, WriteOptions::default().with_basket_size(16));
    let x = writer.branch::<i32>("x", Shape::Scalar).unwrap();
    let y = writer.branch::<i32>("y", Shape::Scalar).unwrap();
    for k in 0..4 {
        writer.set_value(&x, k).unwrap();
        writer.set_value(&y, -k).unwrap();
        writer.write().unwrap();
    }

    fail.store(true, Ordering::SeqCst);
    writer.set_value(&x, 4).unwrap();
    writer.set_value(&y, -4).unwrap();
    let err = writer.write().unwrap_err();
    assert!(err.to_string().contains("branch x: writing basket at 0"));
    assert!(matches!(err.root(), ArborError::IOError(..)));

    let tree = writer.tree();
    assert_eq!(tree.entries(), 4);
    for name in ["x", "y"] {
        let branch = tree.branch(tree.find_branch(name).unwrap()).unwrap();
        assert_eq!(branch.entries(), 4);
        assert_eq!(branch.write_basket(), 0);
    }

    fail.store(false, Ordering::SeqCst);
    writer.write().unwrap();
    let (tree, _) = writer.close().unwrap();
    assert_eq!(tree.entries(), 5);

    let mut reader =
        TreeReader::new(Arc::new(sink.inner.into_bytes()), &tree, ReadOptions::default()).unwrap();
    let x = reader.bind::<i32>("x").unwrap();
    let y = reader.bind::<i32>("y").unwrap();
    let mut rows = Vec::new();
    while reader.next().unwrap().is_some() {
        rows.push((reader.value(&x), reader.value(&y)));
    }
    assert_eq!(rows, (0..5).map(|k| (k, -k)).collect::<Vec<_>>());
}

#[test]
fn full_baskets_are_flushed_by_the_next_row() {
    let metrics = ArborMetrics::default();
    let options = WriteOptions::default()
        .with_basket_size(16)
        .with_metrics(metrics.clone());
    let mut writer = TreeWriter::new("t", MemorySink::new(), options);
    write_i32s(&mut writer, "x", &[1, 2, 3, 4]);
    // exactly 16 bytes pending: the basket is full but not exceeded
    assert_eq!(metrics.counter(BASKETS_FLUSHED).count(), 0);

    let tree = writer.tree();
    let branch = tree.branch(tree.find_branch("x").unwrap()).unwrap();
    assert_eq!(branch.write_basket(), 0);
    assert_eq!(branch.entries(), 4);

    writer.write().unwrap();
    assert_eq!(metrics.counter(BASKETS_FLUSHED).count(), 1);
    let tree = writer.tree();
    let branch = tree.branch(tree.find_branch("x").unwrap()).unwrap();
    assert_eq!(branch.basket_entry(), &[0, 4]);
    assert_eq!(branch.entries(), 5);
}

#[test]
fn leaves_are_bound_at_most_once() {
    let (tree, bytes) = single_basket();
    let mut reader = TreeReader::new(bytes, &tree, ReadOptions::default()).unwrap();
    let first = reader.bind::<i32>("x").unwrap();
    let err = reader.bind::<i64>("x").map(|_| ()).unwrap_err();
    assert!(matches!(err.root(), ArborError::Binding(..)));
    assert!(err.to_string().contains("leaf x is already bound"));
    assert!(reader.bind::<i32>("x").is_err());

    assert_eq!(read_all(&mut reader, &first), vec![10, 20, 30, 40]);
}
