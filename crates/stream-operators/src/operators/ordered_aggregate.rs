use crate::aggregate::{AggregateColumn, GroupedStreamSegment};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use stream_core::{
    Attribute, ControlTuple, DataTuple, DataType, Result, Schema, StreamError, Value,
};
use stream_runtime::{Arity, Emitter, Operator};
use tracing::{debug, trace};

/// Ordering applied to the rows of a reported segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    /// Name of an output attribute
    pub attribute: String,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            descending: false,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateConfig {
    pub group_by: Vec<usize>,
    pub aggregates: Vec<AggregateColumn>,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl AggregateConfig {
    pub fn new(group_by: Vec<usize>, aggregates: Vec<AggregateColumn>) -> Self {
        Self {
            group_by,
            aggregates,
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Grouped aggregation over the segments assigned by an upstream frame or
/// window operator.
///
/// Each segment is reported once its closing punctuation arrives, or at end
/// of stream for segments never punctuated, lowest id first. A report holds
/// one row per group: the group attributes, one column per aggregate and the
/// segment bounds.
pub struct OrderedAggregate {
    id: String,
    schema: Schema,
    config: AggregateConfig,
    progressing: Option<usize>,
    /// Output position to sort reported rows by
    sort_index: Option<usize>,
    segments: BTreeMap<i64, GroupedStreamSegment>,
    reported: u64,
}

impl OrderedAggregate {
    pub fn new(id: impl Into<String>, input: &Schema, config: AggregateConfig) -> Result<Self> {
        let id = id.into();
        let schema = Self::validate(&id, input, &config)?;
        let sort_index = match &config.sort {
            Some(sort) => Some(schema.index_of(&sort.attribute).map_err(|_| {
                StreamError::Configuration(format!(
                    "aggregate '{}': cannot sort by unknown attribute '{}' of {}",
                    id, sort.attribute, schema
                ))
            })?),
            None => None,
        };
        Ok(Self {
            id,
            schema,
            progressing: input.progressing_attribute(),
            config,
            sort_index,
            segments: BTreeMap::new(),
            reported: 0,
        })
    }

    /// Checks the attribute sets and derives the output schema.
    fn validate(id: &str, input: &Schema, config: &AggregateConfig) -> Result<Schema> {
        if config.aggregates.is_empty() {
            return Err(StreamError::Configuration(format!(
                "aggregate '{}' needs at least one aggregate column",
                id
            )));
        }
        for &index in &config.group_by {
            input.check_index(index)?;
        }
        for column in &config.aggregates {
            input.check_index(column.attribute)?;
        }

        let grouped: BTreeSet<usize> = config.group_by.iter().copied().collect();
        let aggregated: BTreeSet<usize> = config.aggregates.iter().map(|c| c.attribute).collect();
        if let Some(progressing) = input.progressing_attribute() {
            if grouped.contains(&progressing) || aggregated.contains(&progressing) {
                return Err(StreamError::Configuration(format!(
                    "aggregate '{}': progressing attribute '{}' cannot be grouped or aggregated",
                    id,
                    input.names()[progressing]
                )));
            }
        }
        if let Some(shared) = grouped.intersection(&aggregated).next() {
            return Err(StreamError::Configuration(format!(
                "aggregate '{}': attribute '{}' is both grouped and aggregated",
                id,
                input.names()[*shared]
            )));
        }

        let mut attributes = Vec::with_capacity(config.group_by.len() + config.aggregates.len() + 2);
        for &index in &config.group_by {
            attributes.push(Attribute::new(
                input.names()[index],
                input.data_type(index)?,
            ));
        }
        for column in &config.aggregates {
            let data_type = column.function.output_type(input.data_type(column.attribute)?)?;
            let name = format!("{}_{}", column.function.name(), input.names()[column.attribute]);
            if attributes.iter().any(|a| a.name() == name) {
                return Err(StreamError::Configuration(format!(
                    "aggregate '{}': duplicate output column '{}'",
                    id, name
                )));
            }
            attributes.push(Attribute::new(name, data_type));
        }
        attributes.push(Attribute::new("segment_start", DataType::Int64));
        attributes.push(Attribute::new("segment_end", DataType::Int64));
        Schema::new(attributes).with_progressing("segment_end")
    }

    pub fn open_segments(&self) -> usize {
        self.segments.len()
    }

    /// Emits the rows of one finished segment.
    fn report(
        &mut self,
        segment: GroupedStreamSegment,
        bounds: Option<(i64, i64)>,
        out: &mut Emitter,
    ) -> Result<()> {
        let (start, end) = match bounds {
            Some((start, end)) => (Value::Int64(start), Value::Int64(end)),
            None => (Value::Null, Value::Null),
        };
        let mut rows = segment.results();

        if let Some(index) = self.sort_index {
            let descending = self.config.sort.as_ref().is_some_and(|s| s.descending);
            // Stable, so ties keep the order groups first appeared in.
            rows.sort_by(|a, b| {
                let ordering = compare_rows(a, b, index);
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = self.config.limit {
            rows.truncate(limit);
        }

        debug!(
            operator = %self.id,
            segment = segment.id(),
            groups = segment.group_count(),
            tuples = segment.tuple_count(),
            rows = rows.len(),
            "reporting segment"
        );
        for mut values in rows {
            values.push(start.clone());
            values.push(end.clone());
            let mut tuple = DataTuple::new(values);
            tuple.metadata_mut().add_segment(segment.id());
            out.emit(tuple)?;
        }
        self.reported += 1;
        Ok(())
    }
}

impl Operator for OrderedAggregate {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "ordered_aggregate"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, _out: &mut Emitter) -> Result<()> {
        for &segment_id in tuple.segment_ids() {
            self.segments
                .entry(segment_id)
                .or_insert_with(|| {
                    trace!(operator = %self.id, segment = segment_id, "segment opened");
                    GroupedStreamSegment::new(
                        segment_id,
                        &self.config.group_by,
                        &self.config.aggregates,
                    )
                })
                .insert(&tuple, self.progressing);
        }
        Ok(())
    }

    fn process_forward_control(
        &mut self,
        _input: usize,
        control: ControlTuple,
        out: &mut Emitter,
    ) -> Result<()> {
        match control {
            ControlTuple::Eos => Ok(()),
            ControlTuple::Punctuation(p) => match self.segments.remove(&p.segment_id) {
                Some(segment) => self.report(segment, Some(p.absolute_bounds()), out),
                None => {
                    trace!(operator = %self.id, segment = p.segment_id, "punctuation for empty segment");
                    Ok(())
                }
            },
        }
    }

    /// Reports every segment still open, lowest id first.
    fn drain(&mut self, out: &mut Emitter) -> Result<()> {
        while let Some((_, segment)) = self.segments.pop_first() {
            let bounds = segment.observed_bounds();
            self.report(segment, bounds, out)?;
        }
        debug!(operator = %self.id, segments = self.reported, "aggregate drained");
        Ok(())
    }
}

impl std::fmt::Debug for OrderedAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedAggregate")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("open_segments", &self.segments.len())
            .finish()
    }
}

fn compare_rows(a: &[Value], b: &[Value], index: usize) -> Ordering {
    match (a.get(index), b.get(index)) {
        (Some(x), Some(y)) => x.compare_for_sort(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationFunction;
    use std::sync::Arc;
    use stream_core::{PunctuationControl, StreamElement};
    use proptest::prelude::*;
    use stream_runtime::{Direction, Pull, Stream};

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::new("ts", DataType::Int64),
            Attribute::new("sensor", DataType::Utf8),
            Attribute::new("value", DataType::Float64),
        ])
        .with_progressing("ts")
        .unwrap()
    }

    fn reading(ts: i64, sensor: &str, value: f64, segment: i64) -> DataTuple {
        let mut tuple = DataTuple::new(vec![
            Value::Int64(ts),
            Value::from(sensor),
            Value::Float64(value),
        ]);
        tuple.metadata_mut().add_segment(segment);
        tuple
    }

    fn rows(stream: &Stream) -> Vec<DataTuple> {
        let mut seen = Vec::new();
        while let Pull::Element(e) = stream.try_pull(Direction::Forward) {
            match e {
                StreamElement::Data(t) => seen.push(t),
                other => panic!("unexpected {:?}", other),
            }
        }
        seen
    }

    fn avg_by_sensor() -> AggregateConfig {
        AggregateConfig::new(
            vec![1],
            vec![AggregateColumn::new(AggregationFunction::Avg, 2)],
        )
    }

    #[test]
    fn test_output_schema() {
        let aggregate = OrderedAggregate::new("agg", &schema(), avg_by_sensor()).unwrap();
        let out = aggregate.output_schema();
        assert_eq!(out.names(), vec!["sensor", "avg_value", "segment_start", "segment_end"]);
        assert_eq!(out.progressing_attribute(), Some(3));
        assert_eq!(out.data_type(1).unwrap(), DataType::Float64);
    }

    #[test]
    fn test_rejects_invalid_attribute_sets() {
        let progressing_grouped = AggregateConfig::new(
            vec![0],
            vec![AggregateColumn::new(AggregationFunction::Avg, 2)],
        );
        assert!(matches!(
            OrderedAggregate::new("a", &schema(), progressing_grouped),
            Err(StreamError::Configuration(_))
        ));

        let progressing_aggregated = AggregateConfig::new(
            vec![],
            vec![AggregateColumn::new(AggregationFunction::Max, 0)],
        );
        assert!(OrderedAggregate::new("a", &schema(), progressing_aggregated).is_err());

        let overlapping = AggregateConfig::new(
            vec![2],
            vec![AggregateColumn::new(AggregationFunction::Sum, 2)],
        );
        assert!(matches!(
            OrderedAggregate::new("a", &schema(), overlapping),
            Err(StreamError::Configuration(_))
        ));

        let non_numeric = AggregateConfig::new(
            vec![],
            vec![AggregateColumn::new(AggregationFunction::Avg, 1)],
        );
        assert!(OrderedAggregate::new("a", &schema(), non_numeric).is_err());

        let bad_sort = avg_by_sensor().with_sort(SortOrder::ascending("missing"));
        assert!(matches!(
            OrderedAggregate::new("a", &schema(), bad_sort),
            Err(StreamError::Configuration(_))
        ));
    }

    #[test]
    fn test_reports_segment_on_punctuation() {
        let mut aggregate = OrderedAggregate::new("agg", &schema(), avg_by_sensor()).unwrap();
        let stream = Arc::new(Stream::new(0, "agg", "o", None));
        let mut out = Emitter::new(&[stream.clone()], 8, vec![]);

        aggregate.process_tuple(0, reading(1, "a", 2.0, 0), &mut out).unwrap();
        aggregate.process_tuple(0, reading(2, "b", 10.0, 0), &mut out).unwrap();
        aggregate.process_tuple(0, reading(3, "a", 4.0, 0), &mut out).unwrap();
        aggregate.process_tuple(0, reading(4, "a", 9.0, 1), &mut out).unwrap();
        assert_eq!(aggregate.open_segments(), 2);

        aggregate
            .process_forward_control(
                0,
                ControlTuple::Punctuation(PunctuationControl::frame(0, 1, 3)),
                &mut out,
            )
            .unwrap();
        out.flush().unwrap();

        let reported = rows(&stream);
        assert_eq!(reported.len(), 2);
        assert_eq!(
            reported[0].values(),
            &[Value::from("a"), Value::Float64(3.0), Value::Int64(1), Value::Int64(3)]
        );
        assert_eq!(reported[1].value(1), Some(&Value::Float64(10.0)));
        assert!(reported[0].segment_ids().contains(&0));
        assert_eq!(aggregate.open_segments(), 1);

        aggregate.drain(&mut out).unwrap();
        out.flush().unwrap();
        let rest = rows(&stream);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].value(2), Some(&Value::Int64(4)));
        assert_eq!(rest[0].value(3), Some(&Value::Int64(4)));
        assert_eq!(aggregate.open_segments(), 0);
    }

    #[test]
    fn test_sort_and_limit() {
        let config = AggregateConfig::new(
            vec![1],
            vec![AggregateColumn::new(AggregationFunction::Sum, 2)],
        )
        .with_sort(SortOrder::descending("sum_value"))
        .with_limit(2);
        let mut aggregate = OrderedAggregate::new("agg", &schema(), config).unwrap();
        let stream = Arc::new(Stream::new(0, "agg", "o", None));
        let mut out = Emitter::new(&[stream.clone()], 8, vec![]);

        for (sensor, value) in [("a", 1.0), ("b", 5.0), ("c", 3.0), ("a", 1.5)] {
            aggregate
                .process_tuple(0, reading(0, sensor, value, 7), &mut out)
                .unwrap();
        }
        aggregate.drain(&mut out).unwrap();
        out.flush().unwrap();

        let sensors: Vec<String> = rows(&stream)
            .iter()
            .map(|t| t.value(0).and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(sensors, vec!["b", "c"]);
    }

    #[test]
    fn test_sort_ties_keep_first_seen_order() {
        let config = AggregateConfig::new(
            vec![1],
            vec![AggregateColumn::new(AggregationFunction::Count, 2)],
        )
        .with_sort(SortOrder::ascending("count_value"));
        let mut aggregate = OrderedAggregate::new("agg", &schema(), config).unwrap();
        let stream = Arc::new(Stream::new(0, "agg", "o", None));
        let mut out = Emitter::new(&[stream.clone()], 8, vec![]);

        for sensor in ["z", "y", "x", "y"] {
            aggregate
                .process_tuple(0, reading(0, sensor, 1.0, 0), &mut out)
                .unwrap();
        }
        aggregate.drain(&mut out).unwrap();
        out.flush().unwrap();

        let sensors: Vec<String> = rows(&stream)
            .iter()
            .map(|t| t.value(0).and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(sensors, vec!["z", "x", "y"]);
    }

    fn group_sums(readings: &[(u8, i32)]) -> Vec<f64> {
        let mut sums: Vec<(u8, f64)> = Vec::new();
        for (sensor, value) in readings {
            match sums.iter_mut().find(|(s, _)| s == sensor) {
                Some((_, sum)) => *sum += f64::from(*value),
                None => sums.push((*sensor, f64::from(*value))),
            }
        }
        sums.into_iter().map(|(_, sum)| sum).collect()
    }

    proptest! {
        #[test]
        fn test_sort_limit_reports_top_groups_in_order(
            readings in prop::collection::vec((0u8..8, -100i32..100), 1..60),
            limit in 1usize..10,
            descending in any::<bool>(),
        ) {
            let order = if descending {
                SortOrder::descending("sum_value")
            } else {
                SortOrder::ascending("sum_value")
            };
            let config = AggregateConfig::new(
                vec![1],
                vec![AggregateColumn::new(AggregationFunction::Sum, 2)],
            )
            .with_sort(order)
            .with_limit(limit);
            let mut aggregate = OrderedAggregate::new("agg", &schema(), config).unwrap();
            let stream = Arc::new(Stream::new(0, "agg", "o", None));
            let mut out = Emitter::new(&[stream.clone()], 8, vec![]);

            for (n, (sensor, value)) in readings.iter().enumerate() {
                let tuple = reading(n as i64, &format!("s{}", sensor), f64::from(*value), 0);
                aggregate.process_tuple(0, tuple, &mut out).unwrap();
            }
            aggregate
                .process_forward_control(
                    0,
                    ControlTuple::Punctuation(PunctuationControl::frame(0, 0, readings.len() as i64)),
                    &mut out,
                )
                .unwrap();
            out.flush().unwrap();

            let reported: Vec<f64> = rows(&stream)
                .iter()
                .map(|t| t.value(1).and_then(Value::as_f64).unwrap())
                .collect();

            let mut expected = group_sums(&readings);
            expected.sort_by(|a, b| a.total_cmp(b));
            if descending {
                expected.reverse();
            }
            expected.truncate(limit);

            prop_assert!(reported.len() <= limit);
            prop_assert_eq!(reported, expected);
        }
    }
}
