use crate::predicate::Predicate;
use stream_core::{DataTuple, Result, Schema, StreamError};
use stream_runtime::{Arity, Emitter, Operator};

/// Forwards the tuples that satisfy a predicate.
pub struct Selection {
    id: String,
    schema: Schema,
    predicate: Box<dyn Predicate>,
}

impl Selection {
    pub fn new(id: impl Into<String>, input: &Schema, predicate: Box<dyn Predicate>) -> Result<Self> {
        let id = id.into();
        if !predicate.is_applicable(input) {
            return Err(StreamError::Configuration(format!(
                "selection '{}': predicate does not apply to {}",
                id, input
            )));
        }
        Ok(Self {
            id,
            schema: input.clone(),
            predicate,
        })
    }
}

impl Operator for Selection {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "selection"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        if self.predicate.evaluate(&tuple) {
            out.emit(tuple)?;
        }
        Ok(())
    }
}
