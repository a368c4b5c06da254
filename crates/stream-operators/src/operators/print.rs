use std::io::Write;
use stream_core::{ControlTuple, DataTuple, Result, Schema};
use stream_runtime::{Arity, Emitter, Operator};
use tracing::info;

/// Sink writing one line per tuple, prefixed by the tuple's segments.
pub struct Print {
    id: String,
    schema: Schema,
    writer: Box<dyn Write + Send>,
    limit: Option<u64>,
    printed: u64,
    show_punctuation: bool,
}

impl Print {
    pub fn new(id: impl Into<String>, input: &Schema) -> Self {
        Self::with_writer(id, input, Box::new(std::io::stdout()))
    }

    pub fn with_writer(id: impl Into<String>, input: &Schema, writer: Box<dyn Write + Send>) -> Self {
        Self {
            id: id.into(),
            schema: input.clone(),
            writer,
            limit: None,
            printed: 0,
            show_punctuation: false,
        }
    }

    /// Stops consuming after `limit` tuples, releasing the upstream plan.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_punctuation(mut self, show: bool) -> Self {
        self.show_punctuation = show;
        self
    }

    fn header(&mut self) -> Result<()> {
        writeln!(self.writer, "# {}", self.schema)?;
        Ok(())
    }
}

impl Operator for Print {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "print"
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

    fn open(&mut self) -> Result<()> {
        self.header()
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, _out: &mut Emitter) -> Result<()> {
        if !self.wants_more() {
            return Ok(());
        }
        let segments = tuple.segment_ids();
        if segments.is_empty() {
            writeln!(self.writer, "{}", tuple)?;
        } else {
            let ids: Vec<String> = segments.iter().map(i64::to_string).collect();
            writeln!(self.writer, "[{}] {}", ids.join(","), tuple)?;
        }
        self.printed += 1;
        Ok(())
    }

    fn process_forward_control(
        &mut self,
        _input: usize,
        control: ControlTuple,
        _out: &mut Emitter,
    ) -> Result<()> {
        if let ControlTuple::Punctuation(p) = control {
            if self.show_punctuation {
                let (start, end) = p.absolute_bounds();
                writeln!(
                    self.writer,
                    "-- {:?} segment {} [{}, {}]",
                    p.punctuation_type, p.segment_id, start, end
                )?;
            }
        }
        Ok(())
    }

    fn wants_more(&self) -> bool {
        self.limit.map_or(true, |limit| self.printed < limit)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        info!(operator = %self.id, tuples = self.printed, "print finished");
        Ok(())
    }
}
