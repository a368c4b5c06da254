use super::{is_numeric_attribute, numeric, Predicate};
use std::fmt;
use std::str::FromStr;
use stream_core::{DataTuple, Schema, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Gt,
    Leq,
    Geq,
    Neq,
    Eq,
}

impl ComparisonOp {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOp::Lt => left < right,
            ComparisonOp::Gt => left > right,
            ComparisonOp::Leq => left <= right,
            ComparisonOp::Geq => left >= right,
            ComparisonOp::Neq => left != right,
            ComparisonOp::Eq => left == right,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Leq => "<=",
            ComparisonOp::Geq => ">=",
            ComparisonOp::Neq => "!=",
            ComparisonOp::Eq => "==",
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LT" | "<" => Ok(ComparisonOp::Lt),
            "GT" | ">" => Ok(ComparisonOp::Gt),
            "LEQ" | "<=" => Ok(ComparisonOp::Leq),
            "GEQ" | ">=" => Ok(ComparisonOp::Geq),
            "NEQ" | "!=" | "<>" => Ok(ComparisonOp::Neq),
            "EQ" | "==" | "=" => Ok(ComparisonOp::Eq),
            other => Err(StreamError::Configuration(format!(
                "unknown comparison operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Compares a numeric attribute with a constant. Null values never match.
#[derive(Debug, Clone)]
pub struct ComparisonPredicate {
    attribute: usize,
    op: ComparisonOp,
    constant: f64,
}

impl ComparisonPredicate {
    pub fn new(attribute: usize, op: ComparisonOp, constant: f64) -> Self {
        Self {
            attribute,
            op,
            constant,
        }
    }
}

impl Predicate for ComparisonPredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        is_numeric_attribute(schema, self.attribute)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        numeric(tuple, self.attribute)
            .map(|value| self.op.apply(value, self.constant))
            .unwrap_or(false)
    }
}

type TupleTest = Box<dyn FnMut(&DataTuple) -> bool + Send>;
type SchemaTest = Box<dyn Fn(&Schema) -> bool + Send>;

/// Predicate backed by a closure.
pub struct LambdaPredicate {
    test: TupleTest,
    applicable: SchemaTest,
}

impl LambdaPredicate {
    /// A closure predicate applicable to every schema.
    pub fn new<F>(test: F) -> Self
    where
        F: FnMut(&DataTuple) -> bool + Send + 'static,
    {
        Self {
            test: Box::new(test),
            applicable: Box::new(|_| true),
        }
    }

    /// Restricts the schemas this predicate accepts.
    pub fn with_schema_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Schema) -> bool + Send + 'static,
    {
        self.applicable = Box::new(check);
        self
    }
}

impl Predicate for LambdaPredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        (self.applicable)(schema)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        (self.test)(tuple)
    }
}
