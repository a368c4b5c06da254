use std::collections::VecDeque;
use stream_core::{ControlTuple, DataTuple, Result, Schema, StreamError, Value};
use stream_runtime::{Arity, Emitter, Operator};
use tracing::debug;

/// Merges inputs that are each ordered by the progressing attribute into one
/// ordered output.
///
/// A tuple is released only once every input that has not ended has a tuple
/// waiting, so the smallest head is known to be globally smallest. Ties go
/// to the lower input index.
pub struct ProgressingMerge {
    id: String,
    schema: Schema,
    progressing: usize,
    buffers: Vec<VecDeque<DataTuple>>,
    ended: Vec<bool>,
}

impl ProgressingMerge {
    pub fn new(id: impl Into<String>, inputs: &[Schema]) -> Result<Self> {
        let id = id.into();
        let Some(first) = inputs.first() else {
            return Err(StreamError::Configuration(format!(
                "merge '{}' needs at least one input",
                id
            )));
        };
        let progressing = first.progressing_attribute().ok_or_else(|| {
            StreamError::Configuration(format!(
                "merge '{}' needs a progressing attribute in {}",
                id, first
            ))
        })?;
        for schema in &inputs[1..] {
            if schema != first {
                return Err(StreamError::Configuration(format!(
                    "merge '{}': input schema {} differs from {}",
                    id, schema, first
                )));
            }
        }
        Ok(Self {
            id,
            schema: first.clone(),
            progressing,
            buffers: vec![VecDeque::new(); inputs.len()],
            ended: vec![false; inputs.len()],
        })
    }

    fn head_position(&self, input: usize) -> Option<&Value> {
        self.buffers[input]
            .front()
            .and_then(|t| t.value(self.progressing))
    }

    /// Emits tuples while the smallest buffered head is known.
    fn release(&mut self, out: &mut Emitter) -> Result<()> {
        loop {
            let waiting = (0..self.buffers.len())
                .any(|i| !self.ended[i] && self.buffers[i].is_empty());
            if waiting {
                return Ok(());
            }

            let mut best: Option<usize> = None;
            for input in 0..self.buffers.len() {
                if self.buffers[input].is_empty() {
                    continue;
                }
                best = match best {
                    None => Some(input),
                    Some(current) => {
                        let (Some(candidate), Some(held)) =
                            (self.head_position(input), self.head_position(current))
                        else {
                            continue;
                        };
                        if candidate.compare_for_sort(held).is_lt() {
                            Some(input)
                        } else {
                            Some(current)
                        }
                    }
                };
            }

            let Some(input) = best else {
                return Ok(());
            };
            if let Some(tuple) = self.buffers[input].pop_front() {
                out.emit(tuple)?;
            }
        }
    }
}

impl Operator for ProgressingMerge {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "merge"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(self.buffers.len())
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    /// Waits on the first live input with nothing buffered.
    fn select_input(&self) -> Option<usize> {
        (0..self.buffers.len()).find(|&i| !self.ended[i] && self.buffers[i].is_empty())
    }

    fn process_tuple(&mut self, input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        self.buffers[input].push_back(tuple);
        self.release(out)
    }

    fn process_forward_control(
        &mut self,
        input: usize,
        control: ControlTuple,
        out: &mut Emitter,
    ) -> Result<()> {
        match control {
            ControlTuple::Eos => {
                debug!(operator = %self.id, input, "merge input ended");
                self.ended[input] = true;
                self.release(out)
            }
            // Segments of different inputs do not line up after merging.
            ControlTuple::Punctuation(_) => Ok(()),
        }
    }

    fn drain(&mut self, out: &mut Emitter) -> Result<()> {
        self.ended.iter_mut().for_each(|e| *e = true);
        self.release(out)
    }
}
