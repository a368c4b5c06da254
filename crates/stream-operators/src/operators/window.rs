use std::collections::BTreeSet;
use stream_core::{ControlTuple, DataTuple, PunctuationControl, Result, Schema, StreamError};
use stream_runtime::{Arity, Emitter, Operator};
use tracing::{trace, warn};

/// How a window operator assigns tuples to windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Windows `[origin + k*slide, origin + k*slide + size)` over the
    /// progressing attribute. Overlapping when `slide < size`.
    Time { size: i64, slide: i64, origin: i64 },
    /// Tumbling windows of `size` consecutive tuples.
    Count { size: i64 },
}

impl WindowPolicy {
    pub fn tumbling(size: i64) -> Self {
        Self::Time {
            size,
            slide: size,
            origin: 0,
        }
    }

    pub fn sliding(size: i64, slide: i64) -> Self {
        Self::Time {
            size,
            slide,
            origin: 0,
        }
    }

    pub fn count(size: i64) -> Self {
        Self::Count { size }
    }

    fn validate(&self) -> Result<()> {
        let valid = match self {
            WindowPolicy::Time { size, slide, .. } => *size > 0 && *slide > 0,
            WindowPolicy::Count { size } => *size > 0,
        };
        if valid {
            Ok(())
        } else {
            Err(StreamError::Configuration(format!(
                "window sizes must be positive: {:?}",
                self
            )))
        }
    }
}

/// Assigns tuples to fixed-size windows and punctuates every window once it
/// can no longer receive tuples.
pub struct Window {
    id: String,
    schema: Schema,
    policy: WindowPolicy,
    progressing: Option<usize>,
    /// Windows holding at least one tuple that are not punctuated yet
    open: BTreeSet<i64>,
    count: i64,
}

impl Window {
    pub fn new(id: impl Into<String>, input: &Schema, policy: WindowPolicy) -> Result<Self> {
        let id = id.into();
        policy.validate()?;
        let progressing = input.progressing_attribute();
        if matches!(policy, WindowPolicy::Time { .. }) && progressing.is_none() {
            return Err(StreamError::Configuration(format!(
                "time window '{}' needs a progressing attribute in {}",
                id, input
            )));
        }
        Ok(Self {
            id,
            schema: input.clone(),
            policy,
            progressing,
            open: BTreeSet::new(),
            count: 0,
        })
    }

    fn punctuation(&self, window: i64) -> ControlTuple {
        let punctuation = match self.policy {
            WindowPolicy::Time {
                size,
                slide,
                origin,
            } => PunctuationControl::window(window, origin, origin + size, slide),
            WindowPolicy::Count { size } => PunctuationControl::window(window, 0, size, size),
        };
        ControlTuple::Punctuation(punctuation)
    }

    /// Punctuates every open window that ends at or before `position`.
    fn close_until(&mut self, position: i64, out: &mut Emitter) -> Result<()> {
        let WindowPolicy::Time {
            size,
            slide,
            origin,
        } = self.policy
        else {
            return Ok(());
        };
        while let Some(&window) = self.open.first() {
            if origin + window * slide + size > position {
                break;
            }
            self.open.remove(&window);
            trace!(operator = %self.id, window, "window closed");
            out.emit_control(self.punctuation(window))?;
        }
        Ok(())
    }

    fn process_time(&mut self, mut tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        let WindowPolicy::Time {
            size,
            slide,
            origin,
        } = self.policy
        else {
            return Ok(());
        };
        let position = self
            .progressing
            .and_then(|i| tuple.value(i))
            .and_then(|v| v.as_i64());
        let Some(position) = position else {
            warn!(operator = %self.id, "dropping tuple without progressing value");
            return Ok(());
        };

        self.close_until(position, out)?;

        let offset = position - origin;
        let last = offset.div_euclid(slide);
        let first = (offset - size).div_euclid(slide) + 1;
        let metadata = tuple.metadata_mut();
        metadata.clear_segments();
        for window in first..=last {
            metadata.add_segment(window);
            self.open.insert(window);
        }
        out.emit(tuple)
    }

    fn process_count(&mut self, mut tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        let WindowPolicy::Count { size } = self.policy else {
            return Ok(());
        };
        let window = self.count / size;
        let metadata = tuple.metadata_mut();
        metadata.clear_segments();
        metadata.add_segment(window);
        self.open.insert(window);
        self.count += 1;
        out.emit(tuple)?;

        if self.count % size == 0 {
            self.open.remove(&window);
            out.emit_control(self.punctuation(window))?;
        }
        Ok(())
    }
}

impl Operator for Window {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "window"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        match self.policy {
            WindowPolicy::Time { .. } => self.process_time(tuple, out),
            WindowPolicy::Count { .. } => self.process_count(tuple, out),
        }
    }

    fn process_forward_control(
        &mut self,
        _input: usize,
        _control: ControlTuple,
        _out: &mut Emitter,
    ) -> Result<()> {
        // Upstream segments are replaced by this operator's windows.
        Ok(())
    }

    /// Punctuates the windows still open at end of stream.
    fn drain(&mut self, out: &mut Emitter) -> Result<()> {
        while let Some(window) = self.open.pop_first() {
            out.emit_control(self.punctuation(window))?;
        }
        Ok(())
    }
}
