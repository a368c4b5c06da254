use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use stream_core::{EngineConfig, StreamError, Value};
use stream_operators::predicate::MinMaxFramePredicate;
use stream_operators::{
    AggregateColumn, AggregateConfig, AggregationFunction, Collect, CollectHandle, Frame,
    Generator, GeneratorConfig, Multiplex, MultiplexMode, OrderedAggregate, Print,
    ProgressingMerge, Scan, ScanSource, Window, WindowPolicy,
};
use stream_runtime::{Operator, OperatorRole, OperatorState, PhysicalQueryPlan};

fn generator(id: &str, seed: u64, count: Option<u64>) -> Generator {
    let config = GeneratorConfig::default()
        .with_seed(seed)
        .with_count(count)
        .with_max_step(4.0);
    Generator::new(id, config).unwrap()
}

struct FramedRun {
    rows: CollectHandle,
    framed: CollectHandle,
}

/// generator -> frame(minmax k=15 on value) -> multiplex -> {aggregate(avg) -> rows, framed}
fn run_framed_average(seed: u64) -> FramedRun {
    let mut plan = PhysicalQueryPlan::new(EngineConfig::default().with_page_size(16));
    let source = generator("gen", seed, Some(2_000));
    let schema = Generator::output_schema_for().unwrap();

    let frame = Frame::new("frame", &schema, Box::new(MinMaxFramePredicate::new(1, 15.0))).unwrap();
    let mux = Multiplex::new("mux", &schema, MultiplexMode::Broadcast).unwrap();
    let aggregate = OrderedAggregate::new(
        "avg",
        &schema,
        AggregateConfig::new(vec![], vec![AggregateColumn::new(AggregationFunction::Avg, 1)]),
    )
    .unwrap();
    let (rows_sink, rows) = Collect::new("rows", aggregate.output_schema());
    let (framed_sink, framed) = Collect::new("framed", &schema);

    plan.add_operator_as(Box::new(source), OperatorRole::Source).unwrap();
    plan.add_operator(Box::new(frame)).unwrap();
    plan.add_operator(Box::new(mux)).unwrap();
    plan.add_operator(Box::new(aggregate)).unwrap();
    plan.add_operator_as(Box::new(rows_sink), OperatorRole::Sink).unwrap();
    plan.add_operator_as(Box::new(framed_sink), OperatorRole::Sink).unwrap();

    plan.add_stream("gen", "frame").unwrap();
    plan.add_stream("frame", "mux").unwrap();
    plan.add_stream("mux", "avg").unwrap();
    plan.add_stream("mux", "framed").unwrap();
    plan.add_stream("avg", "rows").unwrap();

    plan.execute().unwrap();
    for name in ["gen", "frame", "mux", "avg", "rows", "framed"] {
        assert_eq!(plan.operator_state(name), Some(OperatorState::Stopped));
    }
    FramedRun { rows, framed }
}

#[test]
fn test_frame_average_one_row_per_segment() {
    let run = run_framed_average(42);

    assert!(run.rows.saw_eos());
    assert!(run.framed.saw_eos());
    assert_eq!(run.framed.len(), 2_000);

    let punctuations = run.framed.punctuations();
    assert!(punctuations.len() > 1, "expected the walk to cut several frames");
    let rows = run.rows.tuples();
    assert_eq!(rows.len(), punctuations.len());

    // Recompute the averages from the tagged tuples.
    let mut sums: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
    for tuple in run.framed.tuples() {
        let segment = *tuple.segment_ids().iter().next().unwrap();
        let value = tuple.value(1).and_then(Value::as_f64).unwrap();
        let entry = sums.entry(segment).or_default();
        entry.0 += value;
        entry.1 += 1;
    }
    assert_eq!(sums.len(), rows.len());

    for (row, (segment, (sum, count))) in rows.iter().zip(&sums) {
        assert!(row.segment_ids().contains(segment));
        let avg = row.value(0).and_then(Value::as_f64).unwrap();
        assert!((avg - sum / *count as f64).abs() < 1e-9);
    }

    // Reported bounds are the punctuated frame ranges.
    for (row, punctuation) in rows.iter().zip(&punctuations) {
        let (start, end) = punctuation.absolute_bounds();
        assert_eq!(row.value(1), Some(&Value::Int64(start)));
        assert_eq!(row.value(2), Some(&Value::Int64(end)));
    }
}

#[test]
fn test_same_seed_gives_identical_output() {
    let first = run_framed_average(7).rows.tuples();
    let second = run_framed_average(7).rows.tuples();
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let other = run_framed_average(8).rows.tuples();
    assert_ne!(first, other);
}

#[test]
fn test_tumbling_window_counts() {
    let config = EngineConfig::default()
        .with_page_size(4)
        .with_stream_capacity(Some(2));
    let mut plan = PhysicalQueryPlan::new(config);
    let schema = Generator::output_schema_for().unwrap();

    let window = Window::new("window", &schema, WindowPolicy::tumbling(10_000)).unwrap();
    let count = OrderedAggregate::new(
        "count",
        &schema,
        AggregateConfig::new(vec![], vec![AggregateColumn::new(AggregationFunction::Count, 1)]),
    )
    .unwrap();
    let (sink, rows) = Collect::new("sink", count.output_schema());

    plan.add_operator_as(Box::new(generator("gen", 1, Some(95))), OperatorRole::Source)
        .unwrap();
    plan.add_operator(Box::new(window)).unwrap();
    plan.add_operator(Box::new(count)).unwrap();
    plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
    plan.add_stream("gen", "window").unwrap();
    plan.add_stream("window", "count").unwrap();
    plan.add_stream("count", "sink").unwrap();
    plan.execute().unwrap();

    let rows = rows.tuples();
    assert_eq!(rows.len(), 10);
    for (k, row) in rows.iter().enumerate() {
        let expected = if k < 9 { 10 } else { 5 };
        assert_eq!(row.value(0), Some(&Value::Int64(expected)));
        assert_eq!(row.value(1), Some(&Value::Int64(k as i64 * 10_000)));
        assert_eq!(row.value(2), Some(&Value::Int64((k as i64 + 1) * 10_000)));
    }
}

#[test]
fn test_round_robin_then_merge_restores_order() {
    let mut plan = PhysicalQueryPlan::new(EngineConfig::default().with_page_size(8));
    let schema = Generator::output_schema_for().unwrap();

    let mux = Multiplex::new("mux", &schema, MultiplexMode::RoundRobin).unwrap();
    let merge = ProgressingMerge::new("merge", &[schema.clone(), schema.clone()]).unwrap();
    let (sink, collected) = Collect::new("sink", &schema);

    plan.add_operator_as(Box::new(generator("gen", 3, Some(500))), OperatorRole::Source)
        .unwrap();
    plan.add_operator(Box::new(mux)).unwrap();
    plan.add_operator(Box::new(merge)).unwrap();
    plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
    plan.add_stream("gen", "mux").unwrap();
    plan.add_stream("mux", "merge").unwrap();
    plan.add_stream("mux", "merge").unwrap();
    plan.add_stream("merge", "sink").unwrap();
    plan.execute().unwrap();

    let timestamps: Vec<i64> = collected
        .tuples()
        .iter()
        .map(|t| t.value(0).and_then(Value::as_i64).unwrap())
        .collect();
    let expected: Vec<i64> = (0..500).map(|n| n * 1000).collect();
    assert_eq!(timestamps, expected);
    assert!(collected.saw_eos());
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_print_limit_shuts_down_unbounded_source() {
    let mut plan = PhysicalQueryPlan::new(EngineConfig::default());
    let schema = Generator::output_schema_for().unwrap();
    let buffer = SharedBuffer::default();
    let print = Print::with_writer("print", &schema, Box::new(buffer.clone())).with_limit(25);

    plan.add_operator_as(Box::new(generator("gen", 5, None)), OperatorRole::Source)
        .unwrap();
    plan.add_operator_as(Box::new(print), OperatorRole::Sink).unwrap();
    plan.add_stream("gen", "print").unwrap();
    plan.execute().unwrap();

    let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
    // schema header plus the limited tuples
    assert_eq!(text.lines().count(), 26);
    assert_eq!(plan.operator_state("gen"), Some(OperatorState::Stopped));
}

#[test]
fn test_failing_operator_fails_the_plan() {
    let mut plan = PhysicalQueryPlan::new(EngineConfig::default());
    let schema = Generator::output_schema_for().unwrap();
    let missing = PathBuf::from("/nonexistent/readings.csv");
    let scan = Scan::new("scan", schema.clone(), ScanSource::File(missing)).unwrap();
    let (sink, collected) = Collect::new("sink", &schema);

    plan.add_operator_as(Box::new(scan), OperatorRole::Source).unwrap();
    plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
    plan.add_stream("scan", "sink").unwrap();

    match plan.execute() {
        Err(StreamError::OperatorFailed { operator, source }) => {
            assert_eq!(operator, "scan");
            assert!(matches!(*source, StreamError::Io(_)));
        }
        other => panic!("expected operator failure, got {:?}", other),
    }
    assert!(collected.is_empty());
    assert_eq!(plan.operator_state("sink"), Some(OperatorState::Stopped));
}

#[test]
fn test_plan_without_source_or_sink_does_not_start() {
    let schema = Generator::output_schema_for().unwrap();

    let mut no_sink = PhysicalQueryPlan::new(EngineConfig::default());
    no_sink
        .add_operator_as(Box::new(generator("gen", 1, Some(10))), OperatorRole::Source)
        .unwrap();
    assert!(matches!(no_sink.execute(), Err(StreamError::Configuration(_))));
    assert_eq!(no_sink.operator_state("gen"), Some(OperatorState::Created));

    let mut no_source = PhysicalQueryPlan::new(EngineConfig::default());
    let (sink, _) = Collect::new("sink", &schema);
    no_source
        .add_operator_as(Box::new(sink), OperatorRole::Sink)
        .unwrap();
    assert!(matches!(no_source.execute(), Err(StreamError::Configuration(_))));
    assert_eq!(no_source.operator_state("sink"), Some(OperatorState::Created));
}
