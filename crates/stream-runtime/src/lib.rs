//! Execution runtime of the continuous-query engine.
//!
//! A [`PhysicalQueryPlan`] owns a DAG of [`Operator`]s connected by
//! bidirectional [`Stream`]s. Every operator runs on its own thread; data
//! and control flow FORWARD, end-of-stream acknowledgements flow BACKWARD.

pub mod operator;
pub mod plan;
pub mod registry;
mod runner;
pub mod stats;
pub mod stream;

pub use operator::{Arity, Emitter, Operator, OperatorControl, OperatorState, Production};
pub use plan::{OperatorRole, PhysicalQueryPlan, PlanTerminator};
pub use registry::{FactoryContext, OperatorFactory, OperatorRegistry, Parameter};
pub use stats::{
    OperatorListener, OperatorReport, OperatorStatistics, PlanStatistics, StatisticsListener,
};
pub use stream::{Direction, Pull, Stream};
