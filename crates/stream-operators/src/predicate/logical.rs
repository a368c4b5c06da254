use super::Predicate;
use stream_core::{DataTuple, Result, Schema, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    Not,
    And,
    Or,
}

impl LogicalOp {
    pub fn arity(&self) -> usize {
        match self {
            LogicalOp::Not => 1,
            LogicalOp::And | LogicalOp::Or => 2,
        }
    }
}

/// NOT/AND/OR over sub-predicates, evaluated left to right with
/// short-circuiting. A skipped operand does not see the tuple, so its running
/// state is not updated.
pub struct LogicalPredicate {
    op: LogicalOp,
    operands: Vec<Box<dyn Predicate>>,
}

impl LogicalPredicate {
    pub fn new(op: LogicalOp, operands: Vec<Box<dyn Predicate>>) -> Result<Self> {
        if operands.len() != op.arity() {
            return Err(StreamError::Configuration(format!(
                "{:?} takes {} operands, got {}",
                op,
                op.arity(),
                operands.len()
            )));
        }
        Ok(Self { op, operands })
    }
}

impl Predicate for LogicalPredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        self.operands.iter().all(|p| p.is_applicable(schema))
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        match self.op {
            LogicalOp::Not => !self.operands[0].evaluate(tuple),
            LogicalOp::And => self.operands.iter_mut().all(|p| p.evaluate(tuple)),
            LogicalOp::Or => self.operands.iter_mut().any(|p| p.evaluate(tuple)),
        }
    }
}
