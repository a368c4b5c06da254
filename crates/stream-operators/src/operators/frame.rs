use crate::predicate::Predicate;
use stream_core::{ControlTuple, DataTuple, PunctuationControl, Result, Schema, StreamError};
use stream_runtime::{Arity, Emitter, Operator};
use tracing::{debug, trace};

/// Splits the stream into consecutive frames cut by a predicate.
///
/// Every tuple is tagged with the id of the frame it belongs to. When the
/// predicate fires, the tuple stays in the current frame and a FRAME
/// punctuation carrying the frame's progressing range follows it. Segments
/// assigned upstream are replaced.
pub struct Frame {
    id: String,
    schema: Schema,
    predicate: Box<dyn Predicate>,
    progressing: Option<usize>,
    segment_id: i64,
    /// Progressing range of the open frame, if it holds any tuple
    open: Option<(i64, i64)>,
    position: i64,
}

impl Frame {
    pub fn new(id: impl Into<String>, input: &Schema, predicate: Box<dyn Predicate>) -> Result<Self> {
        let id = id.into();
        if !predicate.is_applicable(input) {
            return Err(StreamError::Configuration(format!(
                "frame '{}': predicate does not apply to {}",
                id, input
            )));
        }
        Ok(Self {
            id,
            schema: input.clone(),
            predicate,
            progressing: input.progressing_attribute(),
            segment_id: 0,
            open: None,
            position: 0,
        })
    }

    /// Position of a tuple on the progressing axis; the arrival ordinal when
    /// the schema has no progressing attribute.
    fn position_of(&self, tuple: &DataTuple) -> i64 {
        self.progressing
            .and_then(|i| tuple.value(i))
            .and_then(|v| v.as_i64())
            .unwrap_or(self.position)
    }

    fn close_frame(&mut self, out: &mut Emitter) -> Result<()> {
        if let Some((start, end)) = self.open.take() {
            trace!(operator = %self.id, segment = self.segment_id, start, end, "frame closed");
            out.emit_control(ControlTuple::Punctuation(PunctuationControl::frame(
                self.segment_id,
                start,
                end,
            )))?;
            self.segment_id += 1;
        }
        Ok(())
    }
}

impl Operator for Frame {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "frame"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, mut tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        let position = self.position_of(&tuple);
        self.position += 1;
        self.open = Some(match self.open {
            Some((start, _)) => (start, position),
            None => (position, position),
        });

        let cut = self.predicate.evaluate(&tuple);
        let metadata = tuple.metadata_mut();
        metadata.clear_segments();
        metadata.add_segment(self.segment_id);
        out.emit(tuple)?;

        if cut {
            self.close_frame(out)?;
        }
        Ok(())
    }

    fn process_forward_control(
        &mut self,
        _input: usize,
        control: ControlTuple,
        _out: &mut Emitter,
    ) -> Result<()> {
        if let ControlTuple::Punctuation(p) = control {
            debug!(operator = %self.id, segment = p.segment_id, "dropping upstream punctuation");
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Emitter) -> Result<()> {
        self.close_frame(out)
    }
}
