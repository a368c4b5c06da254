use parking_lot::Mutex;
use std::sync::Arc;
use stream_core::{ControlTuple, DataTuple, PunctuationControl, Result, Schema};
use stream_runtime::{Arity, Emitter, Operator};

#[derive(Debug, Default)]
struct Collected {
    tuples: Vec<DataTuple>,
    punctuations: Vec<PunctuationControl>,
    eos: bool,
}

/// Read side of a [`Collect`] sink, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct CollectHandle {
    inner: Arc<Mutex<Collected>>,
}

impl CollectHandle {
    pub fn tuples(&self) -> Vec<DataTuple> {
        self.inner.lock().tuples.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn punctuations(&self) -> Vec<PunctuationControl> {
        self.inner.lock().punctuations.clone()
    }

    /// Whether the sink received end of stream.
    pub fn saw_eos(&self) -> bool {
        self.inner.lock().eos
    }
}

/// Sink keeping everything it receives in memory.
pub struct Collect {
    id: String,
    schema: Schema,
    inner: Arc<Mutex<Collected>>,
}

impl Collect {
    pub fn new(id: impl Into<String>, input: &Schema) -> (Self, CollectHandle) {
        let handle = CollectHandle::default();
        let collect = Self {
            id: id.into(),
            schema: input.clone(),
            inner: handle.inner.clone(),
        };
        (collect, handle)
    }
}

impl Operator for Collect {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "collect"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_arity(&self) -> Arity {
        Arity::Exactly(0)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, _out: &mut Emitter) -> Result<()> {
        self.inner.lock().tuples.push(tuple);
        Ok(())
    }

    fn process_forward_control(
        &mut self,
        _input: usize,
        control: ControlTuple,
        _out: &mut Emitter,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        match control {
            ControlTuple::Eos => inner.eos = true,
            ControlTuple::Punctuation(p) => inner.punctuations.push(p),
        }
        Ok(())
    }
}
