//! Concrete operators.

mod collect;
mod derive;
mod frame;
mod generator;
mod merge;
mod multiplex;
mod ordered_aggregate;
mod print;
mod scan;
mod selection;
mod window;

pub use collect::{Collect, CollectHandle};
pub use derive::{ArithmeticOp, Derive, Expression};
pub use frame::Frame;
pub use generator::{Generator, GeneratorConfig};
pub use merge::ProgressingMerge;
pub use multiplex::{Multiplex, MultiplexMode};
pub use ordered_aggregate::{AggregateConfig, OrderedAggregate, SortOrder};
pub use print::Print;
pub use scan::{Scan, ScanSource};
pub use selection::Selection;
pub use window::{Window, WindowPolicy};
