//! The operator contract and the output side handed to operator callbacks.

use crate::stats::OperatorListener;
use crate::stream::{Direction, Stream};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_core::{
    ControlTuple, DataTuple, Page, Result, Schema, StreamElement, StreamError,
};

/// Number of streams an operator accepts on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn min(&self) -> usize {
        match self {
            Arity::Exactly(n) | Arity::AtLeast(n) => *n,
        }
    }

    pub fn max(&self) -> Option<usize> {
        match self {
            Arity::Exactly(n) => Some(*n),
            Arity::AtLeast(_) => None,
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min() && self.max().map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// What a source reports after one `produce` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Production {
    /// More tuples will follow
    Continue,
    /// The source has emitted everything it ever will
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Created,
    Running,
    Stopped,
}

/// Shared handle used to observe and stop a running operator.
#[derive(Debug)]
pub struct OperatorControl {
    running: AtomicBool,
    state: Mutex<OperatorState>,
}

impl OperatorControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            state: Mutex::new(OperatorState::Created),
        }
    }

    /// Requests a cooperative stop. The operator exits at its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> OperatorState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: OperatorState) {
        *self.state.lock() = state;
    }
}

impl Default for OperatorControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of execution in a query plan.
///
/// Every operator runs on its own thread. The runtime pulls elements from the
/// input streams and dispatches them to the callbacks below; operators write
/// results through the [`Emitter`]. End-of-stream handling, including the
/// final FORWARD EOS and the BACKWARD acknowledgements, is done by the
/// runtime.
pub trait Operator: Send {
    /// Unique name of this operator within its plan.
    fn name(&self) -> &str;

    /// Operator type identifier, e.g. `"selection"`.
    fn kind(&self) -> &'static str;

    fn input_arity(&self) -> Arity;

    fn output_arity(&self) -> Arity {
        Arity::AtLeast(0)
    }

    /// Schema of the tuples this operator emits. Known before it runs.
    fn output_schema(&self) -> &Schema;

    /// Called on the operator thread before any other callback.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Emits the next batch of tuples. Only called on operators without
    /// inputs.
    fn produce(&mut self, _out: &mut Emitter) -> Result<Production> {
        Err(StreamError::InvalidOperation(format!(
            "operator '{}' is not a source",
            self.name()
        )))
    }

    /// Input the operator needs next, or `None` to take whichever input has
    /// data.
    fn select_input(&self) -> Option<usize> {
        None
    }

    fn process_tuple(&mut self, _input: usize, _tuple: DataTuple, _out: &mut Emitter) -> Result<()> {
        Err(StreamError::InvalidOperation(format!(
            "operator '{}' does not accept input tuples",
            self.name()
        )))
    }

    /// Handles a control element from `input`. EOS is delivered once per
    /// input; every other control element is forwarded unchanged unless the
    /// operator overrides this.
    fn process_forward_control(
        &mut self,
        _input: usize,
        control: ControlTuple,
        out: &mut Emitter,
    ) -> Result<()> {
        match control {
            ControlTuple::Eos => Ok(()),
            other => out.emit_control(other),
        }
    }

    /// Flushes buffered state once every input has ended. The runtime emits
    /// FORWARD EOS right after.
    fn drain(&mut self, _out: &mut Emitter) -> Result<()> {
        Ok(())
    }

    /// Returning false makes the runtime stop consuming input and wind the
    /// operator down as if every input had ended.
    fn wants_more(&self) -> bool {
        true
    }

    /// Called on the operator thread after it stopped, whatever the reason.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct OutputPort {
    stream: Arc<Stream>,
    page: Page,
}

/// Output side of a running operator.
///
/// Data tuples are buffered in one [`Page`] per output stream and pushed
/// as a unit when the page fills up, before any control element, and before
/// the operator blocks for input.
pub struct Emitter {
    ports: Vec<OutputPort>,
    listeners: Vec<Box<dyn OperatorListener>>,
}

impl Emitter {
    pub fn new(
        outputs: &[Arc<Stream>],
        page_size: usize,
        listeners: Vec<Box<dyn OperatorListener>>,
    ) -> Self {
        let ports = outputs
            .iter()
            .map(|stream| OutputPort {
                stream: stream.clone(),
                page: Page::new(page_size),
            })
            .collect();
        Self { ports, listeners }
    }

    pub fn output_count(&self) -> usize {
        self.ports.len()
    }

    /// Sends the tuple to every output.
    pub fn emit(&mut self, tuple: DataTuple) -> Result<()> {
        let count = self.ports.len();
        if count == 0 {
            return Ok(());
        }
        for output in 0..count - 1 {
            self.put(output, tuple.clone())?;
        }
        self.put(count - 1, tuple)
    }

    /// Sends the tuple to one output only.
    pub fn emit_to(&mut self, output: usize, tuple: DataTuple) -> Result<()> {
        self.check_output(output)?;
        self.put(output, tuple)
    }

    /// Sends a control element to every output, after the data emitted
    /// before it.
    pub fn emit_control(&mut self, control: ControlTuple) -> Result<()> {
        for output in 0..self.ports.len() {
            self.send_control(output, control.clone())?;
        }
        Ok(())
    }

    pub fn emit_control_to(&mut self, output: usize, control: ControlTuple) -> Result<()> {
        self.check_output(output)?;
        self.send_control(output, control)
    }

    /// Pushes every partially filled page.
    pub fn flush(&mut self) -> Result<()> {
        for output in 0..self.ports.len() {
            self.flush_port(output)?;
        }
        Ok(())
    }

    fn check_output(&self, output: usize) -> Result<()> {
        if output < self.ports.len() {
            Ok(())
        } else {
            Err(StreamError::InvalidOperation(format!(
                "output {} does not exist ({} outputs)",
                output,
                self.ports.len()
            )))
        }
    }

    fn put(&mut self, output: usize, tuple: DataTuple) -> Result<()> {
        for listener in &mut self.listeners {
            listener.on_output_tuple();
        }
        if let Err(tuple) = self.ports[output].page.put(tuple) {
            self.flush_port(output)?;
            self.ports[output].page.put(tuple).map_err(|_| {
                StreamError::Execution("page rejected a tuple after flushing".to_string())
            })?;
        }
        if self.ports[output].page.is_full() {
            self.flush_port(output)?;
        }
        Ok(())
    }

    fn send_control(&mut self, output: usize, control: ControlTuple) -> Result<()> {
        self.flush_port(output)?;
        let waited = self.ports[output]
            .stream
            .push_element(Direction::Forward, StreamElement::Control(control))?;
        self.record_wait(waited);
        Ok(())
    }

    fn flush_port(&mut self, output: usize) -> Result<()> {
        let port = &mut self.ports[output];
        if port.page.is_empty() {
            return Ok(());
        }
        let elements = port
            .page
            .drain()
            .into_iter()
            .map(StreamElement::Data)
            .collect();
        let waited = port.stream.push_elements(Direction::Forward, elements)?;
        self.record_wait(waited);
        Ok(())
    }

    fn record_wait(&mut self, waited: Duration) {
        if waited > Duration::ZERO {
            for listener in &mut self.listeners {
                listener.on_waited(waited);
            }
        }
    }

    pub(crate) fn notify_input(&mut self) {
        for listener in &mut self.listeners {
            listener.on_input_tuple();
        }
    }

    pub(crate) fn notify_blocked(&mut self, elapsed: Duration) {
        for listener in &mut self.listeners {
            listener.on_blocked(elapsed);
        }
    }

    pub(crate) fn notify_busy(&mut self, elapsed: Duration) {
        for listener in &mut self.listeners {
            listener.on_busy(elapsed);
        }
    }

    pub(crate) fn notify_shutdown(&mut self) {
        for listener in &mut self.listeners {
            listener.on_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsListener;
    use crate::stream::Pull;
    use stream_core::Value;

    fn tuple(i: i64) -> DataTuple {
        DataTuple::new(vec![Value::Int64(i)])
    }

    #[test]
    fn test_arity() {
        assert!(Arity::Exactly(0).accepts(0));
        assert!(!Arity::Exactly(0).accepts(1));
        assert!(Arity::AtLeast(2).accepts(5));
        assert!(!Arity::AtLeast(2).accepts(1));
        assert_eq!(Arity::AtLeast(1).max(), None);
    }

    #[test]
    fn test_control_stop_flag() {
        let control = OperatorControl::new();
        assert!(control.is_running());
        assert_eq!(control.state(), OperatorState::Created);
        control.stop();
        control.stop();
        assert!(!control.is_running());
    }

    #[test]
    fn test_emitter_pages_until_full() {
        let stream = Arc::new(Stream::new(0, "a", "b", None));
        let mut emitter = Emitter::new(&[stream.clone()], 3, vec![]);

        emitter.emit(tuple(1)).unwrap();
        emitter.emit(tuple(2)).unwrap();
        assert_eq!(stream.pending(Direction::Forward), 0);

        emitter.emit(tuple(3)).unwrap();
        assert_eq!(stream.pending(Direction::Forward), 3);

        emitter.emit(tuple(4)).unwrap();
        emitter.flush().unwrap();
        assert_eq!(stream.pending(Direction::Forward), 4);
    }

    #[test]
    fn test_control_follows_buffered_data() {
        let stream = Arc::new(Stream::new(0, "a", "b", None));
        let mut emitter = Emitter::new(&[stream.clone()], 16, vec![]);

        emitter.emit(tuple(1)).unwrap();
        emitter.emit_control(ControlTuple::Eos).unwrap();

        assert_eq!(
            stream.try_pull(Direction::Forward),
            Pull::Element(StreamElement::Data(tuple(1)))
        );
        assert_eq!(
            stream.try_pull(Direction::Forward),
            Pull::Element(StreamElement::eos())
        );
    }

    #[test]
    fn test_emit_to_single_output() {
        let left = Arc::new(Stream::new(0, "m", "l", None));
        let right = Arc::new(Stream::new(1, "m", "r", None));
        let (listener, slot) = StatisticsListener::new();
        let mut emitter = Emitter::new(&[left.clone(), right.clone()], 1, vec![Box::new(listener)]);

        emitter.emit_to(1, tuple(7)).unwrap();
        emitter.emit(tuple(8)).unwrap();
        assert!(emitter.emit_to(2, tuple(9)).is_err());
        emitter.notify_shutdown();

        assert_eq!(left.pending(Direction::Forward), 1);
        assert_eq!(right.pending(Direction::Forward), 2);
        assert_eq!(slot.lock().tuples_out, 3);
    }
}
