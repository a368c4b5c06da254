use super::function::{AggregationFunction, Aggregator};
use ahash::AHashMap;
use stream_core::{DataTuple, Value};

/// One aggregate column: a function applied to an input attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateColumn {
    pub function: AggregationFunction,
    pub attribute: usize,
}

impl AggregateColumn {
    pub fn new(function: AggregationFunction, attribute: usize) -> Self {
        Self {
            function,
            attribute,
        }
    }
}

struct GroupRow {
    key: Vec<Value>,
    aggregators: Vec<Box<dyn Aggregator>>,
}

/// The open state of one segment: one row of aggregators per distinct
/// group key, kept in order of first appearance.
pub struct GroupedStreamSegment {
    id: i64,
    group_attributes: Vec<usize>,
    aggregates: Vec<AggregateColumn>,
    index: AHashMap<Vec<Value>, usize>,
    rows: Vec<GroupRow>,
    tuples: u64,
    progress: Option<(i64, i64)>,
}

impl GroupedStreamSegment {
    pub fn new(id: i64, group_attributes: &[usize], aggregates: &[AggregateColumn]) -> Self {
        Self {
            id,
            group_attributes: group_attributes.to_vec(),
            aggregates: aggregates.to_vec(),
            index: AHashMap::new(),
            rows: Vec::new(),
            tuples: 0,
            progress: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Folds `tuple` into the row of its group, creating the row on first
    /// sight. `progressing` is the position of the progressing attribute,
    /// used to track the range of the segment.
    pub fn insert(&mut self, tuple: &DataTuple, progressing: Option<usize>) {
        let key: Vec<Value> = self
            .group_attributes
            .iter()
            .map(|&i| tuple.value(i).cloned().unwrap_or(Value::Null))
            .collect();

        let row = match self.index.get(&key) {
            Some(&row) => row,
            None => {
                let row = self.rows.len();
                self.rows.push(GroupRow {
                    key: key.clone(),
                    aggregators: self
                        .aggregates
                        .iter()
                        .map(|a| a.function.create_aggregator())
                        .collect(),
                });
                self.index.insert(key, row);
                row
            }
        };

        let row = &mut self.rows[row];
        for (aggregator, column) in row.aggregators.iter_mut().zip(&self.aggregates) {
            if let Some(value) = tuple.value(column.attribute) {
                aggregator.update(value);
            }
        }

        self.tuples += 1;
        if let Some(position) = progressing.and_then(|i| tuple.value(i)).and_then(Value::as_i64) {
            self.progress = Some(match self.progress {
                Some((low, high)) => (low.min(position), high.max(position)),
                None => (position, position),
            });
        }
    }

    pub fn group_count(&self) -> usize {
        self.rows.len()
    }

    pub fn tuple_count(&self) -> u64 {
        self.tuples
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Smallest and largest progressing value inserted so far.
    pub fn observed_bounds(&self) -> Option<(i64, i64)> {
        self.progress
    }

    /// One row per group: the group values followed by the aggregate
    /// results, in order of first appearance of the group.
    pub fn results(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                let mut values = row.key.clone();
                values.extend(row.aggregators.iter().map(|a| a.result()));
                values
            })
            .collect()
    }
}
