//! Thread body of an operator: the pull/dispatch loop and the two-phase EOS
//! handshake.
//!
//! Termination protocol:
//! 1. once every input delivered FORWARD EOS (or the operator is a source
//!    and is exhausted) the operator drains its state and emits FORWARD EOS
//!    on every output;
//! 2. it then waits for BACKWARD EOS on every output, unless it is a sink;
//! 3. finally it sends BACKWARD EOS on every input and stops.
//!
//! If every output acknowledges with BACKWARD EOS early, the operator skips
//! straight to step 3.

use crate::operator::{Emitter, Operator, OperatorControl, OperatorState, Production};
use crate::stream::{Direction, Pull, Stream};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_core::{ControlTuple, Result, StreamElement, StreamError};
use tracing::{debug, warn};

enum Flow {
    /// Inputs are exhausted; finish with the EOS handshake
    Finished,
    /// Every consumer released this operator
    Released,
    /// Stop was requested
    Stopped,
}

pub(crate) struct OperatorRunner {
    operator: Box<dyn Operator>,
    inputs: Vec<Arc<Stream>>,
    outputs: Vec<Arc<Stream>>,
    is_sink: bool,
    control: Arc<OperatorControl>,
    emitter: Emitter,
    poll_interval: Duration,
    input_ended: Vec<bool>,
    output_released: Vec<bool>,
    cursor: usize,
}

impl OperatorRunner {
    pub(crate) fn new(
        operator: Box<dyn Operator>,
        inputs: Vec<Arc<Stream>>,
        outputs: Vec<Arc<Stream>>,
        is_sink: bool,
        control: Arc<OperatorControl>,
        emitter: Emitter,
        poll_interval: Duration,
    ) -> Self {
        let input_ended = vec![false; inputs.len()];
        let output_released = vec![false; outputs.len()];
        Self {
            operator,
            inputs,
            outputs,
            is_sink,
            control,
            emitter,
            poll_interval,
            input_ended,
            output_released,
            cursor: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.operator.name()
    }

    /// Runs the operator to completion. Streams are closed on every exit
    /// path, panics included, so neighbouring operators never wait on a
    /// dead peer.
    pub(crate) fn run(mut self) -> Result<()> {
        self.control.set_state(OperatorState::Running);
        debug!(operator = self.operator.name(), "operator started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|payload| Err(panic_error(payload)));
        let closed = panic::catch_unwind(AssertUnwindSafe(|| self.operator.close()))
            .unwrap_or_else(|payload| Err(panic_error(payload)));

        self.close_streams();
        self.emitter.notify_shutdown();
        self.control.set_state(OperatorState::Stopped);
        debug!(operator = self.operator.name(), "operator stopped");

        result.and(closed)
    }

    fn execute(&mut self) -> Result<()> {
        self.operator.open()?;

        let flow = if self.inputs.is_empty() {
            self.run_source()?
        } else {
            self.run_consumer()?
        };

        match flow {
            Flow::Stopped => {
                debug!(operator = self.operator.name(), "stop requested");
                return Ok(());
            }
            Flow::Released => {
                debug!(
                    operator = self.operator.name(),
                    "released by every consumer"
                );
            }
            Flow::Finished => {
                let started = Instant::now();
                self.operator.drain(&mut self.emitter)?;
                self.emitter.notify_busy(started.elapsed());
                self.emitter.emit_control(ControlTuple::Eos)?;
                debug!(operator = self.operator.name(), "forward EOS sent");

                if !self.is_sink && !self.await_backward_eos() {
                    return Ok(());
                }
            }
        }

        for input in &self.inputs {
            input.push_element(Direction::Backward, StreamElement::eos())?;
        }
        debug!(operator = self.operator.name(), "backward EOS sent");
        Ok(())
    }

    fn run_source(&mut self) -> Result<Flow> {
        loop {
            if !self.control.is_running() {
                return Ok(Flow::Stopped);
            }
            if self.consumers_released() {
                return Ok(Flow::Released);
            }

            let started = Instant::now();
            let production = self.operator.produce(&mut self.emitter)?;
            self.emitter.notify_busy(started.elapsed());

            if production == Production::Exhausted {
                return Ok(Flow::Finished);
            }
        }
    }

    fn run_consumer(&mut self) -> Result<Flow> {
        loop {
            if !self.control.is_running() {
                return Ok(Flow::Stopped);
            }
            if self.input_ended.iter().all(|ended| *ended) || !self.operator.wants_more() {
                return Ok(Flow::Finished);
            }
            if self.consumers_released() {
                return Ok(Flow::Released);
            }

            let Some((input, pulled)) = self.next_element()? else {
                continue;
            };

            let started = Instant::now();
            match pulled {
                Pull::Element(StreamElement::Data(tuple)) => {
                    self.emitter.notify_input();
                    self.operator
                        .process_tuple(input, tuple, &mut self.emitter)?;
                }
                Pull::Element(StreamElement::Control(ControlTuple::Eos)) => {
                    self.end_input(input)?;
                }
                Pull::Element(StreamElement::Control(control)) => {
                    self.operator
                        .process_forward_control(input, control, &mut self.emitter)?;
                }
                Pull::Closed => {
                    warn!(
                        operator = self.operator.name(),
                        input, "input closed without EOS"
                    );
                    self.end_input(input)?;
                }
                Pull::Timeout => {}
            }
            self.emitter.notify_busy(started.elapsed());
        }
    }

    fn end_input(&mut self, input: usize) -> Result<()> {
        self.input_ended[input] = true;
        self.operator
            .process_forward_control(input, ControlTuple::Eos, &mut self.emitter)
    }

    /// Picks the next element to process. Returns `None` when nothing arrived
    /// within one poll interval.
    fn next_element(&mut self) -> Result<Option<(usize, Pull)>> {
        let wanted = self
            .operator
            .select_input()
            .filter(|&i| i < self.inputs.len() && !self.input_ended[i]);

        let input = match wanted {
            Some(input) => {
                if let pulled @ (Pull::Element(_) | Pull::Closed) =
                    self.inputs[input].try_pull(Direction::Forward)
                {
                    return Ok(Some((input, pulled)));
                }
                input
            }
            None => {
                let count = self.inputs.len();
                let mut waiting_on = None;
                for offset in 0..count {
                    let input = (self.cursor + offset) % count;
                    if self.input_ended[input] {
                        continue;
                    }
                    match self.inputs[input].try_pull(Direction::Forward) {
                        Pull::Timeout => {
                            waiting_on.get_or_insert(input);
                        }
                        pulled => {
                            self.cursor = (input + 1) % count;
                            return Ok(Some((input, pulled)));
                        }
                    }
                }
                match waiting_on {
                    Some(input) => {
                        self.cursor = (input + 1) % count;
                        input
                    }
                    None => return Ok(None),
                }
            }
        };

        // About to block: downstream must see everything emitted so far.
        self.emitter.flush()?;
        let started = Instant::now();
        let pulled = self.inputs[input].pull_timeout(Direction::Forward, self.poll_interval);
        self.emitter.notify_blocked(started.elapsed());

        match pulled {
            Pull::Timeout => Ok(None),
            pulled => Ok(Some((input, pulled))),
        }
    }

    /// Polls the backward direction of every output without blocking.
    /// Returns true once every output has been released.
    fn consumers_released(&mut self) -> bool {
        if self.outputs.is_empty() {
            return false;
        }
        for (output, stream) in self.outputs.iter().enumerate() {
            if self.output_released[output] {
                continue;
            }
            loop {
                match stream.try_pull(Direction::Backward) {
                    Pull::Element(element) if element.is_eos() => {
                        self.output_released[output] = true;
                        break;
                    }
                    Pull::Element(_) => continue,
                    Pull::Closed => {
                        self.output_released[output] = true;
                        break;
                    }
                    Pull::Timeout => break,
                }
            }
        }
        self.output_released.iter().all(|released| *released)
    }

    /// Waits for BACKWARD EOS on every output. Returns false if a stop was
    /// requested while waiting.
    fn await_backward_eos(&mut self) -> bool {
        for output in 0..self.outputs.len() {
            while !self.output_released[output] {
                if !self.control.is_running() {
                    return false;
                }
                match self.outputs[output].pull_timeout(Direction::Backward, self.poll_interval) {
                    Pull::Element(element) if element.is_eos() => {
                        self.output_released[output] = true;
                    }
                    Pull::Closed => {
                        self.output_released[output] = true;
                    }
                    Pull::Element(_) | Pull::Timeout => {}
                }
            }
        }
        true
    }

    fn close_streams(&self) {
        for input in &self.inputs {
            input.close_consumer(Direction::Forward);
            input.close_producer(Direction::Backward);
        }
        for output in &self.outputs {
            output.close_producer(Direction::Forward);
            output.close_consumer(Direction::Backward);
        }
    }
}

/// Converts a panic payload into an execution error.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> StreamError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    StreamError::Execution(format!("operator panicked: {}", message))
}
