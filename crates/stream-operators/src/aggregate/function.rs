use std::fmt;
use std::str::FromStr;
use stream_core::{DataType, Result, StreamError, Value};

/// Incremental accumulator for one aggregate of one group.
pub trait Aggregator: Send {
    /// Folds one value in. Nulls are ignored.
    fn update(&mut self, value: &Value);

    /// Current result; `Value::Null` when no value was folded in, except
    /// for counts.
    fn result(&self) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Variance,
    StdDev,
    First,
    Last,
}

impl AggregationFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationFunction::Count => "count",
            AggregationFunction::Sum => "sum",
            AggregationFunction::Avg => "avg",
            AggregationFunction::Min => "min",
            AggregationFunction::Max => "max",
            AggregationFunction::Variance => "variance",
            AggregationFunction::StdDev => "stddev",
            AggregationFunction::First => "first",
            AggregationFunction::Last => "last",
        }
    }

    /// Whether the function only makes sense over numeric input.
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            AggregationFunction::Sum
                | AggregationFunction::Avg
                | AggregationFunction::Variance
                | AggregationFunction::StdDev
        )
    }

    /// Result type for an input attribute of type `input`.
    pub fn output_type(&self, input: DataType) -> Result<DataType> {
        if self.requires_numeric() && !input.is_numeric() {
            return Err(StreamError::TypeMismatch {
                expected: format!("numeric input for {}", self.name()),
                found: input.to_string(),
            });
        }
        Ok(match self {
            AggregationFunction::Count => DataType::Int64,
            AggregationFunction::Sum
            | AggregationFunction::Avg
            | AggregationFunction::Variance
            | AggregationFunction::StdDev => DataType::Float64,
            AggregationFunction::Min
            | AggregationFunction::Max
            | AggregationFunction::First
            | AggregationFunction::Last => input,
        })
    }

    pub fn create_aggregator(&self) -> Box<dyn Aggregator> {
        match self {
            AggregationFunction::Count => Box::new(CountAggregator::default()),
            AggregationFunction::Sum => Box::new(SumAggregator::default()),
            AggregationFunction::Avg => Box::new(AvgAggregator::default()),
            AggregationFunction::Min => Box::new(ExtremeAggregator::min()),
            AggregationFunction::Max => Box::new(ExtremeAggregator::max()),
            AggregationFunction::Variance => Box::new(VarianceAggregator::variance()),
            AggregationFunction::StdDev => Box::new(VarianceAggregator::std_dev()),
            AggregationFunction::First => Box::new(FirstAggregator::default()),
            AggregationFunction::Last => Box::new(LastAggregator::default()),
        }
    }
}

impl FromStr for AggregationFunction {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(AggregationFunction::Count),
            "sum" => Ok(AggregationFunction::Sum),
            "avg" | "mean" | "average" => Ok(AggregationFunction::Avg),
            "min" => Ok(AggregationFunction::Min),
            "max" => Ok(AggregationFunction::Max),
            "variance" | "var" => Ok(AggregationFunction::Variance),
            "stddev" | "std" => Ok(AggregationFunction::StdDev),
            "first" => Ok(AggregationFunction::First),
            "last" => Ok(AggregationFunction::Last),
            other => Err(StreamError::Configuration(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kahan-compensated running sum.
#[derive(Debug, Clone, Copy, Default)]
struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }
}

#[derive(Debug, Default)]
struct CountAggregator {
    count: i64,
}

impl Aggregator for CountAggregator {
    fn update(&mut self, value: &Value) {
        if !value.is_null() {
            self.count += 1;
        }
    }

    fn result(&self) -> Value {
        Value::Int64(self.count)
    }
}

#[derive(Debug, Default)]
struct SumAggregator {
    sum: CompensatedSum,
    seen: bool,
}

impl Aggregator for SumAggregator {
    fn update(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum.add(v);
            self.seen = true;
        }
    }

    fn result(&self) -> Value {
        if self.seen {
            Value::Float64(self.sum.sum)
        } else {
            Value::Null
        }
    }
}

#[derive(Debug, Default)]
struct AvgAggregator {
    sum: CompensatedSum,
    count: u64,
}

impl Aggregator for AvgAggregator {
    fn update(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum.add(v);
            self.count += 1;
        }
    }

    fn result(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float64(self.sum.sum / self.count as f64)
        }
    }
}

#[derive(Debug)]
struct ExtremeAggregator {
    keep: std::cmp::Ordering,
    current: Option<Value>,
}

impl ExtremeAggregator {
    fn min() -> Self {
        Self {
            keep: std::cmp::Ordering::Less,
            current: None,
        }
    }

    fn max() -> Self {
        Self {
            keep: std::cmp::Ordering::Greater,
            current: None,
        }
    }
}

impl Aggregator for ExtremeAggregator {
    fn update(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        let replace = match &self.current {
            None => true,
            Some(current) => value.compare_for_sort(current) == self.keep,
        };
        if replace {
            self.current = Some(value.clone());
        }
    }

    fn result(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

/// Welford's online variance (population).
#[derive(Debug)]
struct VarianceAggregator {
    count: u64,
    mean: f64,
    m2: f64,
    std_dev: bool,
}

impl VarianceAggregator {
    fn variance() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            std_dev: false,
        }
    }

    fn std_dev() -> Self {
        Self {
            std_dev: true,
            ..Self::variance()
        }
    }
}

impl Aggregator for VarianceAggregator {
    fn update(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.count += 1;
            let delta = v - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (v - self.mean);
        }
    }

    fn result(&self) -> Value {
        if self.count == 0 {
            return Value::Null;
        }
        let variance = self.m2 / self.count as f64;
        if self.std_dev {
            Value::Float64(variance.sqrt())
        } else {
            Value::Float64(variance)
        }
    }
}

#[derive(Debug, Default)]
struct FirstAggregator {
    first: Option<Value>,
}

impl Aggregator for FirstAggregator {
    fn update(&mut self, value: &Value) {
        if self.first.is_none() && !value.is_null() {
            self.first = Some(value.clone());
        }
    }

    fn result(&self) -> Value {
        self.first.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct LastAggregator {
    last: Option<Value>,
}

impl Aggregator for LastAggregator {
    fn update(&mut self, value: &Value) {
        if !value.is_null() {
            self.last = Some(value.clone());
        }
    }

    fn result(&self) -> Value {
        self.last.clone().unwrap_or(Value::Null)
    }
}
