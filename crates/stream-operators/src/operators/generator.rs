use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stream_core::{Attribute, DataTuple, DataType, Result, Schema, StreamError, Value};
use stream_runtime::{Arity, Emitter, Operator, Production};
use tracing::debug;

/// Settings of the synthetic sensor source.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Number of tuples to emit; `None` runs until stopped
    pub count: Option<u64>,
    pub seed: u64,
    /// Timestamp of the first reading
    pub start: i64,
    /// Distance between consecutive timestamps
    pub interval: i64,
    pub initial_value: f64,
    /// Largest change of the value between two readings
    pub max_step: f64,
    /// Sensor names assigned to readings
    pub keys: Vec<String>,
    /// Tuples emitted per produce step
    pub batch_size: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: Some(1000),
            seed: 42,
            start: 0,
            interval: 1000,
            initial_value: 50.0,
            max_step: 5.0,
            keys: vec!["s0".to_string()],
            batch_size: 64,
        }
    }
}

impl GeneratorConfig {
    pub fn with_count(mut self, count: Option<u64>) -> Self {
        self.count = count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step;
        self
    }
}

/// Source of random-walk sensor readings `(timestamp, value, sensor)`.
/// Output is fully determined by the configuration, seed included.
pub struct Generator {
    id: String,
    schema: Schema,
    config: GeneratorConfig,
    rng: StdRng,
    emitted: u64,
    value: f64,
}

impl Generator {
    pub fn new(id: impl Into<String>, config: GeneratorConfig) -> Result<Self> {
        if config.keys.is_empty() {
            return Err(StreamError::Configuration(
                "generator needs at least one sensor key".to_string(),
            ));
        }
        if config.max_step < 0.0 || !config.max_step.is_finite() {
            return Err(StreamError::Configuration(format!(
                "generator step must be a non-negative number, got {}",
                config.max_step
            )));
        }
        Ok(Self {
            id: id.into(),
            schema: Self::output_schema_for()?,
            rng: StdRng::seed_from_u64(config.seed),
            emitted: 0,
            value: config.initial_value,
            config,
        })
    }

    /// `(timestamp: long [progressing], value: double, sensor: string)`
    pub fn output_schema_for() -> Result<Schema> {
        Schema::new(vec![
            Attribute::new("timestamp", DataType::Int64),
            Attribute::new("value", DataType::Float64),
            Attribute::new("sensor", DataType::Utf8),
        ])
        .with_progressing_index(0)
    }

    fn next_tuple(&mut self) -> DataTuple {
        let timestamp = self.config.start + self.emitted as i64 * self.config.interval;
        if self.emitted > 0 && self.config.max_step > 0.0 {
            self.value += self.rng.gen_range(-self.config.max_step..=self.config.max_step);
        }
        let key = &self.config.keys[self.rng.gen_range(0..self.config.keys.len())];
        self.emitted += 1;
        DataTuple::new(vec![
            Value::Int64(timestamp),
            Value::Float64(self.value),
            Value::Utf8(key.clone()),
        ])
    }
}

impl Operator for Generator {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "generator"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(0)
    }

    fn output_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn produce(&mut self, out: &mut Emitter) -> Result<Production> {
        for _ in 0..self.config.batch_size.max(1) {
            if self.config.count.is_some_and(|count| self.emitted >= count) {
                debug!(operator = %self.id, tuples = self.emitted, "generator exhausted");
                return Ok(Production::Exhausted);
            }
            let tuple = self.next_tuple();
            out.emit(tuple)?;
        }
        Ok(Production::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(config: GeneratorConfig, n: usize) -> Vec<DataTuple> {
        let mut generator = Generator::new("g", config).unwrap();
        (0..n).map(|_| generator.next_tuple()).collect()
    }

    #[test]
    fn test_same_seed_same_readings() {
        let config = GeneratorConfig::default().with_keys(vec!["a".into(), "b".into()]);
        assert_eq!(readings(config.clone(), 50), readings(config, 50));
    }

    #[test]
    fn test_different_seed_differs() {
        let a = readings(GeneratorConfig::default().with_seed(1), 20);
        let b = readings(GeneratorConfig::default().with_seed(2), 20);
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamps_and_steps() {
        let config = GeneratorConfig::default().with_max_step(2.0);
        let tuples = readings(config, 100);

        assert_eq!(tuples[0].value(0), Some(&Value::Int64(0)));
        assert_eq!(tuples[0].value(1), Some(&Value::Float64(50.0)));
        assert_eq!(tuples[3].value(0), Some(&Value::Int64(3000)));
        for pair in tuples.windows(2) {
            let a = pair[0].value(1).and_then(Value::as_f64).unwrap();
            let b = pair[1].value(1).and_then(Value::as_f64).unwrap();
            assert!((a - b).abs() <= 2.0 + 1e-9);
        }
    }

    #[test]
    fn test_schema_has_progressing_timestamp() {
        let generator = Generator::new("g", GeneratorConfig::default()).unwrap();
        assert_eq!(generator.output_schema().progressing_attribute(), Some(0));
        assert_eq!(generator.output_schema().len(), 3);
    }

    #[test]
    fn test_rejects_empty_keys() {
        let config = GeneratorConfig::default().with_keys(vec![]);
        assert!(Generator::new("g", config).is_err());
    }
}
