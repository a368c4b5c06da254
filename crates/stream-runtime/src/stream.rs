//! Bidirectional channel connecting two operators.
//!
//! A stream owns two independent FIFO queues. FORWARD carries data and
//! control elements from the upstream operator to the downstream one;
//! BACKWARD carries control elements (EOS acknowledgements) the other way.
//! Each direction has exactly one producer and one consumer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use stream_core::{Result, StreamElement, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Upstream to downstream
    Forward,
    /// Downstream to upstream
    Backward,
}

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    Element(StreamElement),
    /// Nothing arrived before the deadline; the producer is still alive
    Timeout,
    /// The producer has shut down and every element has been consumed
    Closed,
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<StreamElement>,
    producer_closed: bool,
    consumer_closed: bool,
}

#[derive(Debug)]
struct Channel {
    state: Mutex<ChannelState>,
    readable: Condvar,
    writable: Condvar,
    capacity: Option<usize>,
}

impl Channel {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// Appends all elements as one unit. Returns how long the producer had to
    /// wait for room.
    fn push_all(&self, elements: Vec<StreamElement>) -> Result<Duration> {
        let mut state = self.state.lock();
        if state.producer_closed {
            return Err(StreamError::StreamClosed);
        }

        let mut waited = Duration::ZERO;
        if let Some(capacity) = self.capacity {
            if state.queue.len() >= capacity && !state.consumer_closed {
                let started = Instant::now();
                while state.queue.len() >= capacity && !state.consumer_closed {
                    self.writable.wait(&mut state);
                }
                waited = started.elapsed();
            }
        }

        // Nobody will ever read these.
        if state.consumer_closed {
            return Ok(waited);
        }

        state.queue.extend(elements);
        self.readable.notify_one();
        Ok(waited)
    }

    fn pull(&self, timeout: Option<Duration>) -> Pull {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(element) = state.queue.pop_front() {
                self.writable.notify_one();
                return Pull::Element(element);
            }
            if state.producer_closed {
                return Pull::Closed;
            }
            match deadline {
                None => self.readable.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Pull::Timeout;
                    }
                    self.readable.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn close_producer(&self) {
        let mut state = self.state.lock();
        state.producer_closed = true;
        self.readable.notify_all();
    }

    fn close_consumer(&self) {
        let mut state = self.state.lock();
        state.consumer_closed = true;
        state.queue.clear();
        self.writable.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.producer_closed && state.queue.is_empty()
    }
}

pub struct Stream {
    id: usize,
    source: String,
    destination: String,
    forward: Channel,
    backward: Channel,
}

impl Stream {
    /// Creates a stream from operator `source` to operator `destination`.
    /// `capacity` bounds each direction separately.
    pub fn new(
        id: usize,
        source: impl Into<String>,
        destination: impl Into<String>,
        capacity: Option<usize>,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            destination: destination.into(),
            forward: Channel::new(capacity),
            backward: Channel::new(capacity),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    fn channel(&self, direction: Direction) -> &Channel {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// Enqueues one element, blocking only while a bounded direction is full.
    /// Returns the time spent waiting for room.
    pub fn push_element(&self, direction: Direction, element: StreamElement) -> Result<Duration> {
        self.channel(direction).push_all(vec![element])
    }

    /// Enqueues a batch atomically: the consumer sees either none or all of
    /// it, in order.
    pub fn push_elements(
        &self,
        direction: Direction,
        elements: Vec<StreamElement>,
    ) -> Result<Duration> {
        if elements.is_empty() {
            return Ok(Duration::ZERO);
        }
        self.channel(direction).push_all(elements)
    }

    /// Blocks until an element arrives. Returns `None` once the producer has
    /// shut down and the direction is drained.
    pub fn pull_element(&self, direction: Direction) -> Option<StreamElement> {
        match self.channel(direction).pull(None) {
            Pull::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn pull_timeout(&self, direction: Direction, timeout: Duration) -> Pull {
        self.channel(direction).pull(Some(timeout))
    }

    pub fn try_pull(&self, direction: Direction) -> Pull {
        self.channel(direction).pull(Some(Duration::ZERO))
    }

    /// Marks the producer of `direction` as gone. Pending elements can still
    /// be pulled; after that pulls report [`Pull::Closed`].
    pub fn close_producer(&self, direction: Direction) {
        self.channel(direction).close_producer();
    }

    /// Marks the consumer of `direction` as gone. Pending elements are
    /// discarded and later pushes are dropped instead of blocking.
    pub fn close_consumer(&self, direction: Direction) {
        self.channel(direction).close_consumer();
    }

    pub fn pending(&self, direction: Direction) -> usize {
        self.channel(direction).len()
    }

    pub fn is_closed(&self, direction: Direction) -> bool {
        self.channel(direction).is_closed()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("forward_pending", &self.forward.len())
            .field("backward_pending", &self.backward.len())
            .finish()
    }
}
