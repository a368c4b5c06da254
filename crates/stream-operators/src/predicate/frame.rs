//! Segmenting predicates used by the frame operator. `evaluate` returns true
//! when the current segment ends with the evaluated tuple. Tuples whose
//! attribute is null leave the running state untouched and never cut.

use super::{is_numeric_attribute, numeric, Predicate};
use chrono::Timelike;
use stream_core::{DataTuple, DataType, Result, Schema, StreamError};

/// Cuts once the spread of values since the last cut exceeds `k`.
#[derive(Debug, Clone)]
pub struct MinMaxFramePredicate {
    attribute: usize,
    k: f64,
    range: Option<(f64, f64)>,
}

impl MinMaxFramePredicate {
    pub fn new(attribute: usize, k: f64) -> Self {
        Self {
            attribute,
            k,
            range: None,
        }
    }
}

impl Predicate for MinMaxFramePredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        is_numeric_attribute(schema, self.attribute)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        let Some(value) = numeric(tuple, self.attribute) else {
            return false;
        };
        let (min, max) = match self.range {
            Some((min, max)) => (min.min(value), max.max(value)),
            None => (value, value),
        };
        if max - min > self.k {
            self.range = Some((value, value));
            true
        } else {
            self.range = Some((min, max));
            false
        }
    }
}

/// Cuts once the running sum since the last cut reaches `k`.
#[derive(Debug, Clone)]
pub struct SumFramePredicate {
    attribute: usize,
    k: f64,
    sum: f64,
}

impl SumFramePredicate {
    pub fn new(attribute: usize, k: f64) -> Self {
        Self {
            attribute,
            k,
            sum: 0.0,
        }
    }
}

impl Predicate for SumFramePredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        is_numeric_attribute(schema, self.attribute)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        let Some(value) = numeric(tuple, self.attribute) else {
            return false;
        };
        self.sum += value;
        if self.sum >= self.k {
            self.sum = 0.0;
            true
        } else {
            false
        }
    }
}

/// Cuts whenever `floor((value - offset) / size)` differs from the bin of
/// the previous tuple.
#[derive(Debug, Clone)]
pub struct BinningFramePredicate {
    attribute: usize,
    size: f64,
    offset: f64,
    previous: Option<i64>,
}

impl BinningFramePredicate {
    pub fn new(attribute: usize, size: f64, offset: f64) -> Result<Self> {
        if !(size > 0.0) || !size.is_finite() {
            return Err(StreamError::Configuration(format!(
                "bin size must be positive, got {}",
                size
            )));
        }
        Ok(Self {
            attribute,
            size,
            offset,
            previous: None,
        })
    }

    fn bin(&self, value: f64) -> i64 {
        ((value - self.offset) / self.size).floor() as i64
    }
}

impl Predicate for BinningFramePredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        is_numeric_attribute(schema, self.attribute)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        let Some(value) = numeric(tuple, self.attribute) else {
            return false;
        };
        let bin = self.bin(value);
        let changed = self.previous.is_some_and(|previous| previous != bin);
        self.previous = Some(bin);
        changed
    }
}

/// Cuts when the root mean square deviation of the buffered values from the
/// running average exceeds `max_error`.
///
/// The running average follows `avg = (avg + value) / n` where `n` is the
/// buffer length after adding `value`. This is not the arithmetic mean; the
/// recurrence is kept as is so segment boundaries stay compatible with
/// existing results.
#[derive(Debug, Clone)]
pub struct MaxRmsPredicate {
    attribute: usize,
    max_error: f64,
    include_satisfying_tuple: bool,
    buffer: Vec<f64>,
    average: f64,
}

impl MaxRmsPredicate {
    pub fn new(attribute: usize, max_error: f64, include_satisfying_tuple: bool) -> Self {
        Self {
            attribute,
            max_error,
            include_satisfying_tuple,
            buffer: Vec::new(),
            average: 0.0,
        }
    }

    fn rms(&self) -> f64 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        let squares: f64 = self
            .buffer
            .iter()
            .map(|v| (v - self.average) * (v - self.average))
            .sum();
        (squares / self.buffer.len() as f64).sqrt()
    }
}

impl Predicate for MaxRmsPredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        is_numeric_attribute(schema, self.attribute)
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        let Some(value) = numeric(tuple, self.attribute) else {
            return false;
        };
        self.buffer.push(value);
        self.average = (self.average + value) / self.buffer.len() as f64;

        if self.rms() <= self.max_error {
            return false;
        }
        self.buffer.clear();
        if self.include_satisfying_tuple {
            self.buffer.push(value);
            self.average = value;
        } else {
            self.average = 0.0;
        }
        true
    }
}

/// Cuts on tuples whose timestamp has exactly the configured time of day.
#[derive(Debug, Clone)]
pub struct TimeEqualityPredicate {
    attribute: usize,
    hour: u32,
    minute: u32,
    second: u32,
}

impl TimeEqualityPredicate {
    pub fn new(attribute: usize, hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(StreamError::Configuration(format!(
                "invalid time of day {:02}:{:02}:{:02}",
                hour, minute, second
            )));
        }
        Ok(Self {
            attribute,
            hour,
            minute,
            second,
        })
    }
}

impl Predicate for TimeEqualityPredicate {
    fn is_applicable(&self, schema: &Schema) -> bool {
        matches!(schema.data_type(self.attribute), Ok(DataType::Timestamp))
    }

    fn evaluate(&mut self, tuple: &DataTuple) -> bool {
        tuple
            .value(self.attribute)
            .and_then(|v| v.as_timestamp())
            .map(|ts| {
                ts.hour() == self.hour && ts.minute() == self.minute && ts.second() == self.second
            })
            .unwrap_or(false)
    }
}
