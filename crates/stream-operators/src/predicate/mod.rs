//! Tuple predicates.
//!
//! Selection predicates decide whether a tuple passes. Frame predicates keep
//! a small running state per attribute and return true when the current
//! segment must be cut after the evaluated tuple.

mod comparison;
mod frame;
mod logical;

pub use comparison::{ComparisonOp, ComparisonPredicate, LambdaPredicate};
pub use frame::{
    BinningFramePredicate, MaxRmsPredicate, MinMaxFramePredicate, SumFramePredicate,
    TimeEqualityPredicate,
};
pub use logical::{LogicalOp, LogicalPredicate};

use stream_core::{AttributeRef, DataTuple, Result, Schema, StreamError};
use stream_runtime::Parameter;

pub trait Predicate: Send {
    /// Checks that the attributes this predicate reads exist in `schema` and
    /// have a usable type.
    fn is_applicable(&self, schema: &Schema) -> bool;

    /// Evaluates the predicate on one tuple, updating any running state.
    fn evaluate(&mut self, tuple: &DataTuple) -> bool;
}

/// Declarative description of a predicate, as found in plan descriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateSpec {
    Comparison {
        attribute: AttributeRef,
        op: ComparisonOp,
        value: f64,
    },
    Not(Box<PredicateSpec>),
    And(Box<PredicateSpec>, Box<PredicateSpec>),
    Or(Box<PredicateSpec>, Box<PredicateSpec>),
    MinMax {
        attribute: AttributeRef,
        k: f64,
    },
    Sum {
        attribute: AttributeRef,
        k: f64,
    },
    Binning {
        attribute: AttributeRef,
        size: f64,
        offset: f64,
    },
    MaxRms {
        attribute: AttributeRef,
        max_error: f64,
        include_satisfying_tuple: bool,
    },
    TimeEquality {
        attribute: AttributeRef,
        hour: u32,
        minute: u32,
        second: u32,
    },
}

impl PredicateSpec {
    pub fn min_max(attribute: impl Into<AttributeRef>, k: f64) -> Self {
        Self::MinMax {
            attribute: attribute.into(),
            k,
        }
    }

    pub fn sum(attribute: impl Into<AttributeRef>, k: f64) -> Self {
        Self::Sum {
            attribute: attribute.into(),
            k,
        }
    }

    pub fn comparison(attribute: impl Into<AttributeRef>, op: ComparisonOp, value: f64) -> Self {
        Self::Comparison {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    /// Parses a predicate from a parameter map with a `type` key, e.g.
    /// `{"type": "minmax", "attribute": 1, "k": 15.0}`.
    pub fn from_parameter(params: &Parameter) -> Result<Self> {
        let kind = params.require("type")?.as_str()?.to_lowercase();
        let attribute = || params.require("attribute")?.as_attribute();
        let operand = |key: &str| -> Result<Box<PredicateSpec>> {
            Ok(Box::new(Self::from_parameter(params.require(key)?)?))
        };

        let spec = match kind.as_str() {
            "comparison" => Self::Comparison {
                attribute: attribute()?,
                op: params.require("op")?.as_str()?.parse()?,
                value: params.require("value")?.as_f64()?,
            },
            "not" => Self::Not(operand("operand")?),
            "and" => Self::And(operand("left")?, operand("right")?),
            "or" => Self::Or(operand("left")?, operand("right")?),
            "minmax" | "min_max" => Self::MinMax {
                attribute: attribute()?,
                k: params.require("k")?.as_f64()?,
            },
            "sum" => Self::Sum {
                attribute: attribute()?,
                k: params.require("k")?.as_f64()?,
            },
            "binning" => Self::Binning {
                attribute: attribute()?,
                size: params.require("size")?.as_f64()?,
                offset: params.f64_or("offset", 0.0)?,
            },
            "maxrms" | "max_rms" => Self::MaxRms {
                attribute: attribute()?,
                max_error: params.require("max_error")?.as_f64()?,
                include_satisfying_tuple: params.bool_or("include_satisfying_tuple", true)?,
            },
            "time_equality" | "timeequality" => Self::TimeEquality {
                attribute: attribute()?,
                hour: time_field(params, "hour", 23)?,
                minute: time_field(params, "minute", 59)?,
                second: time_field(params, "second", 59)?,
            },
            other => {
                return Err(StreamError::Configuration(format!(
                    "unknown predicate type '{}'",
                    other
                )))
            }
        };
        Ok(spec)
    }

    /// Builds the predicate for tuples of `schema`, failing if it cannot be
    /// applied to that schema.
    pub fn build(&self, schema: &Schema) -> Result<Box<dyn Predicate>> {
        let predicate: Box<dyn Predicate> = match self {
            PredicateSpec::Comparison {
                attribute,
                op,
                value,
            } => Box::new(ComparisonPredicate::new(attribute.resolve(schema)?, *op, *value)),
            PredicateSpec::Not(operand) => Box::new(LogicalPredicate::new(
                LogicalOp::Not,
                vec![operand.build(schema)?],
            )?),
            PredicateSpec::And(left, right) => Box::new(LogicalPredicate::new(
                LogicalOp::And,
                vec![left.build(schema)?, right.build(schema)?],
            )?),
            PredicateSpec::Or(left, right) => Box::new(LogicalPredicate::new(
                LogicalOp::Or,
                vec![left.build(schema)?, right.build(schema)?],
            )?),
            PredicateSpec::MinMax { attribute, k } => {
                Box::new(MinMaxFramePredicate::new(attribute.resolve(schema)?, *k))
            }
            PredicateSpec::Sum { attribute, k } => {
                Box::new(SumFramePredicate::new(attribute.resolve(schema)?, *k))
            }
            PredicateSpec::Binning {
                attribute,
                size,
                offset,
            } => Box::new(BinningFramePredicate::new(
                attribute.resolve(schema)?,
                *size,
                *offset,
            )?),
            PredicateSpec::MaxRms {
                attribute,
                max_error,
                include_satisfying_tuple,
            } => Box::new(MaxRmsPredicate::new(
                attribute.resolve(schema)?,
                *max_error,
                *include_satisfying_tuple,
            )),
            PredicateSpec::TimeEquality {
                attribute,
                hour,
                minute,
                second,
            } => Box::new(TimeEqualityPredicate::new(
                attribute.resolve(schema)?,
                *hour,
                *minute,
                *second,
            )?),
        };

        if !predicate.is_applicable(schema) {
            return Err(StreamError::Configuration(format!(
                "predicate {:?} is not applicable to schema {}",
                self, schema
            )));
        }
        Ok(predicate)
    }
}

fn time_field(params: &Parameter, key: &str, max: u32) -> Result<u32> {
    let value = params.usize_or(key, 0)?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| StreamError::Configuration(format!("{} must be at most {}", key, max)))
}

/// Numeric view of attribute `index` of `tuple`; `None` for nulls and
/// non-numeric values.
pub(crate) fn numeric(tuple: &DataTuple, index: usize) -> Option<f64> {
    tuple.value(index).and_then(|v| v.as_f64())
}

pub(crate) fn is_numeric_attribute(schema: &Schema, index: usize) -> bool {
    schema
        .data_type(index)
        .map(|t| t.is_numeric())
        .unwrap_or(false)
}
