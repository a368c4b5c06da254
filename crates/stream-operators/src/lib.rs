//! Operator library of the continuous-query engine: selection and framing
//! predicates, incremental aggregation, and the concrete operators wired
//! into a `PhysicalQueryPlan`.

pub mod aggregate;
pub mod operators;
pub mod predicate;
pub mod registry;

pub use aggregate::{AggregateColumn, AggregationFunction, Aggregator, GroupedStreamSegment};
pub use operators::{
    AggregateConfig, Collect, CollectHandle, Derive, Expression, Frame, Generator,
    GeneratorConfig, Multiplex, MultiplexMode, OrderedAggregate, Print, ProgressingMerge, Scan,
    ScanSource, Selection, SortOrder, Window, WindowPolicy,
};
pub use predicate::{Predicate, PredicateSpec};
pub use registry::builtin_registry;
