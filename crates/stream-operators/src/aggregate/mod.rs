//! Incremental aggregation: aggregator functions and the per-segment group
//! container used by the ordered aggregate operator.

mod function;
mod segment;

pub use function::{AggregationFunction, Aggregator};
pub use segment::{AggregateColumn, GroupedStreamSegment};
