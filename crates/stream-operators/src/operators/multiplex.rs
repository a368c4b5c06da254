use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use stream_core::{DataTuple, Result, Schema, StreamError};
use stream_runtime::{Arity, Emitter, Operator};

/// How a multiplexer picks the output of a data tuple. Control elements
/// always go to every output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiplexMode {
    /// Every tuple to every output
    Broadcast,
    /// Tuples dealt to the outputs in turn
    RoundRobin,
    /// Equal key attribute values always reach the same output
    Hash(Vec<usize>),
}

pub struct Multiplex {
    id: String,
    schema: Schema,
    mode: MultiplexMode,
    hasher: RandomState,
    next: usize,
}

impl Multiplex {
    pub fn new(id: impl Into<String>, input: &Schema, mode: MultiplexMode) -> Result<Self> {
        let id = id.into();
        if let MultiplexMode::Hash(keys) = &mode {
            if keys.is_empty() {
                return Err(StreamError::Configuration(format!(
                    "multiplex '{}': hash routing needs key attributes",
                    id
                )));
            }
            for key in keys {
                input.check_index(*key)?;
            }
        }
        Ok(Self {
            id,
            schema: input.clone(),
            mode,
            // Fixed seeds keep the routing stable across runs.
            hasher: RandomState::with_seeds(0x5eed, 0xcafe, 0xf00d, 0xbeef),
            next: 0,
        })
    }

    fn route(&self, tuple: &DataTuple, outputs: usize, keys: &[usize]) -> usize {
        let mut hasher = self.hasher.build_hasher();
        for &key in keys {
            tuple.value(key).hash(&mut hasher);
        }
        (hasher.finish() % outputs as u64) as usize
    }
}

impl Operator for Multiplex {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "multiplex"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        let outputs = out.output_count();
        if outputs == 0 {
            return Ok(());
        }
        match &self.mode {
            MultiplexMode::Broadcast => out.emit(tuple),
            MultiplexMode::RoundRobin => {
                let output = self.next % outputs;
                self.next = self.next.wrapping_add(1);
                out.emit_to(output, tuple)
            }
            MultiplexMode::Hash(keys) => {
                let output = self.route(&tuple, outputs, keys);
                out.emit_to(output, tuple)
            }
        }
    }
}
