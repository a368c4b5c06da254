//! Physical query plan: owns operators and the streams between them, runs
//! every operator on its own thread and reports the outcome.

use crate::operator::{Emitter, Operator, OperatorControl, OperatorState};
use crate::runner::{panic_error, OperatorRunner};
use crate::stats::{
    resident_memory, OperatorListener, OperatorReport, OperatorStatistics, PlanStatistics,
    StatisticsListener,
};
use crate::stream::Stream;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use stream_core::{EngineConfig, Result, Schema, StreamError};
use tracing::{debug, error, info};

/// Explicit role of an operator within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorRole {
    Source,
    Sink,
}

/// Stops every operator of a plan. Cloneable, so a plan can be terminated
/// from another thread while `execute` is running.
#[derive(Debug, Clone)]
pub struct PlanTerminator {
    signal: Arc<AbortSignal>,
}

impl PlanTerminator {
    pub fn terminate(&self) {
        self.signal.trigger();
    }
}

#[derive(Debug, Default)]
struct AbortSignal {
    triggered: AtomicBool,
    controls: Mutex<Vec<Arc<OperatorControl>>>,
}

impl AbortSignal {
    fn register(&self, control: Arc<OperatorControl>) {
        self.controls.lock().push(control);
    }

    fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            debug!("stopping every operator");
        }
        for control in self.controls.lock().iter() {
            control.stop();
        }
    }
}

struct PlanNode {
    name: String,
    kind: &'static str,
    operator: Option<Box<dyn Operator>>,
    inputs: Vec<Arc<Stream>>,
    outputs: Vec<Arc<Stream>>,
    control: Arc<OperatorControl>,
    statistics: Option<Arc<Mutex<OperatorStatistics>>>,
}

pub struct PhysicalQueryPlan {
    config: EngineConfig,
    nodes: Vec<PlanNode>,
    index: HashMap<String, usize>,
    streams: Vec<Arc<Stream>>,
    sources: BTreeSet<usize>,
    sinks: BTreeSet<usize>,
    statistics_enabled: bool,
    executed: bool,
    signal: Arc<AbortSignal>,
    statistics: Option<PlanStatistics>,
}

impl PhysicalQueryPlan {
    pub fn new(config: EngineConfig) -> Self {
        let statistics_enabled = config.statistics_enabled;
        Self {
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            streams: Vec::new(),
            sources: BTreeSet::new(),
            sinks: BTreeSet::new(),
            statistics_enabled,
            executed: false,
            signal: Arc::new(AbortSignal::default()),
            statistics: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers an operator without an explicit role.
    pub fn add_operator(&mut self, operator: Box<dyn Operator>) -> Result<()> {
        self.register(operator).map(|_| ())
    }

    pub fn add_operator_as(&mut self, operator: Box<dyn Operator>, role: OperatorRole) -> Result<()> {
        let index = self.register(operator)?;
        match role {
            OperatorRole::Source => self.sources.insert(index),
            OperatorRole::Sink => self.sinks.insert(index),
        };
        Ok(())
    }

    fn register(&mut self, operator: Box<dyn Operator>) -> Result<usize> {
        self.check_not_executed()?;
        let name = operator.name().to_string();
        if self.index.contains_key(&name) {
            return Err(StreamError::DuplicateOperator(name));
        }

        let index = self.nodes.len();
        let control = Arc::new(OperatorControl::new());
        self.signal.register(control.clone());
        debug!(operator = %name, kind = operator.kind(), "operator registered");

        self.nodes.push(PlanNode {
            name: name.clone(),
            kind: operator.kind(),
            operator: Some(operator),
            inputs: Vec::new(),
            outputs: Vec::new(),
            control,
            statistics: None,
        });
        self.index.insert(name, index);
        Ok(index)
    }

    /// Connects the next output of `from` to the next input of `to`.
    pub fn add_stream(&mut self, from: &str, to: &str) -> Result<Arc<Stream>> {
        self.check_not_executed()?;
        let from_index = self.node_index(from)?;
        let to_index = self.node_index(to)?;
        if from_index == to_index {
            return Err(StreamError::Configuration(format!(
                "operator '{}' cannot be connected to itself",
                from
            )));
        }

        let (output_arity, input_arity) = {
            let producer = self.operator_ref(from_index)?;
            let consumer = self.operator_ref(to_index)?;
            (producer.output_arity(), consumer.input_arity())
        };

        let outputs = self.nodes[from_index].outputs.len() + 1;
        if output_arity.max().is_some_and(|max| outputs > max) {
            return Err(StreamError::InvalidOperation(format!(
                "operator '{}' accepts {} output streams",
                from, output_arity
            )));
        }
        let inputs = self.nodes[to_index].inputs.len() + 1;
        if input_arity.max().is_some_and(|max| inputs > max) {
            return Err(StreamError::InvalidOperation(format!(
                "operator '{}' accepts {} input streams",
                to, input_arity
            )));
        }

        let stream = Arc::new(Stream::new(
            self.streams.len(),
            from,
            to,
            self.config.stream_capacity,
        ));
        self.nodes[from_index].outputs.push(stream.clone());
        self.nodes[to_index].inputs.push(stream.clone());
        self.streams.push(stream.clone());
        debug!(from, to, stream = stream.id(), "stream added");
        Ok(stream)
    }

    pub fn set_statistics_enabled(&mut self, enabled: bool) {
        self.statistics_enabled = enabled;
    }

    pub fn operator_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Output schema of a registered operator that has not started yet.
    pub fn output_schema(&self, name: &str) -> Result<Schema> {
        let index = self.node_index(name)?;
        Ok(self.operator_ref(index)?.output_schema().clone())
    }

    pub fn operator_state(&self, name: &str) -> Option<OperatorState> {
        self.index
            .get(name)
            .map(|&index| self.nodes[index].control.state())
    }

    pub fn terminator(&self) -> PlanTerminator {
        PlanTerminator {
            signal: self.signal.clone(),
        }
    }

    /// Cooperative stop of every operator. Safe to call any number of times.
    pub fn terminate(&self) {
        self.signal.trigger();
    }

    /// Statistics of the last run, if they were enabled.
    pub fn statistics(&self) -> Option<&PlanStatistics> {
        self.statistics.as_ref()
    }

    pub fn print_statistics(&self, out: &mut dyn Write) -> Result<()> {
        match &self.statistics {
            Some(statistics) => statistics.write_report(out)?,
            None => writeln!(out, "no statistics collected")?,
        }
        Ok(())
    }

    /// Runs the plan until every operator has stopped.
    ///
    /// Configuration problems are reported before any thread is started.
    /// If an operator fails, every other operator is stopped and the failure
    /// of the operator registered first is returned.
    pub fn execute(&mut self) -> Result<()> {
        self.check_not_executed()?;
        self.validate()?;
        self.executed = true;

        let started = Instant::now();
        let memory_before = if self.statistics_enabled {
            resident_memory()
        } else {
            None
        };

        info!(
            operators = self.nodes.len(),
            streams = self.streams.len(),
            "executing plan"
        );

        let mut handles: Vec<(usize, JoinHandle<Result<()>>)> = Vec::with_capacity(self.nodes.len());
        let mut spawn_error = None;
        for index in 0..self.nodes.len() {
            match self.spawn(index) {
                Ok(handle) => handles.push((index, handle)),
                Err(e) => {
                    error!(operator = %self.nodes[index].name, error = %e, "failed to start operator");
                    self.signal.trigger();
                    spawn_error = Some((index, e));
                    break;
                }
            }
        }

        // Sources first: once they are done the rest winds down through the
        // EOS handshake.
        handles.sort_by_key(|(index, _)| !self.sources.contains(index));

        let mut failures: Vec<(usize, StreamError)> = spawn_error.into_iter().collect();
        for (index, handle) in handles {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(payload) => Err(panic_error(payload)),
            };
            if let Err(e) = outcome {
                failures.push((index, e));
            }
        }

        if self.statistics_enabled {
            self.statistics = Some(PlanStatistics {
                execution_time: started.elapsed(),
                memory_before,
                memory_after: resident_memory(),
                operators: self
                    .nodes
                    .iter()
                    .map(|node| OperatorReport {
                        name: node.name.clone(),
                        kind: node.kind.to_string(),
                        statistics: node
                            .statistics
                            .as_ref()
                            .map(|slot| slot.lock().clone())
                            .unwrap_or_default(),
                    })
                    .collect(),
            });
        }

        failures.sort_by_key(|(index, _)| *index);
        match failures.into_iter().next() {
            None => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "plan finished");
                Ok(())
            }
            Some((index, source)) => {
                self.terminate();
                let operator = self.nodes[index].name.clone();
                error!(operator = %operator, error = %source, "plan failed");
                Err(StreamError::OperatorFailed {
                    operator,
                    source: Box::new(source),
                })
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(StreamError::Configuration(
                "plan has no source operator".to_string(),
            ));
        }
        if self.sinks.is_empty() {
            return Err(StreamError::Configuration(
                "plan has no sink operator".to_string(),
            ));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let operator = self.operator_ref(index)?;
            if self.sources.contains(&index) && !node.inputs.is_empty() {
                return Err(StreamError::Configuration(format!(
                    "source operator '{}' has input streams",
                    node.name
                )));
            }
            let input_arity = operator.input_arity();
            if !input_arity.accepts(node.inputs.len()) {
                return Err(StreamError::InvalidOperation(format!(
                    "operator '{}' needs {} input streams, has {}",
                    node.name,
                    input_arity,
                    node.inputs.len()
                )));
            }
            let output_arity = operator.output_arity();
            if !output_arity.accepts(node.outputs.len()) {
                return Err(StreamError::InvalidOperation(format!(
                    "operator '{}' needs {} output streams, has {}",
                    node.name,
                    output_arity,
                    node.outputs.len()
                )));
            }
        }
        Ok(())
    }

    fn spawn(&mut self, index: usize) -> Result<JoinHandle<Result<()>>> {
        let is_sink = self.sinks.contains(&index);
        let page_size = self.config.page_size;
        let poll_interval = self.config.poll_interval();
        let statistics_enabled = self.statistics_enabled;
        let signal = self.signal.clone();

        let node = &mut self.nodes[index];
        let operator = node.operator.take().ok_or_else(|| {
            StreamError::InvalidOperation(format!("operator '{}' already started", node.name))
        })?;

        let mut listeners: Vec<Box<dyn OperatorListener>> = Vec::new();
        if statistics_enabled {
            let (listener, slot) = StatisticsListener::new();
            listeners.push(Box::new(listener));
            node.statistics = Some(slot);
        }

        let emitter = Emitter::new(&node.outputs, page_size, listeners);
        let runner = OperatorRunner::new(
            operator,
            node.inputs.clone(),
            node.outputs.clone(),
            is_sink,
            node.control.clone(),
            emitter,
            poll_interval,
        );

        let handle = thread::Builder::new()
            .name(format!("op-{}", node.name))
            .spawn(move || {
                let name = runner.name().to_string();
                let outcome = runner.run();
                if let Err(e) = &outcome {
                    error!(operator = %name, error = %e, "operator failed");
                    signal.trigger();
                }
                outcome
            })?;
        Ok(handle)
    }

    fn node_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StreamError::OperatorNotFound(name.to_string()))
    }

    fn operator_ref(&self, index: usize) -> Result<&dyn Operator> {
        let node = &self.nodes[index];
        node.operator.as_deref().ok_or_else(|| {
            StreamError::InvalidOperation(format!("operator '{}' already started", node.name))
        })
    }

    fn check_not_executed(&self) -> Result<()> {
        if self.executed {
            Err(StreamError::InvalidOperation(
                "plan has already been executed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{Arity, Production};
    use std::time::Duration;
    use stream_core::{Attribute, ControlTuple, DataTuple, DataType, Value};

    fn schema() -> Schema {
        Schema::new(vec![Attribute::new("n", DataType::Int64)])
    }

    struct Counter {
        name: String,
        schema: Schema,
        next: i64,
        limit: Option<i64>,
    }

    impl Counter {
        fn new(name: &str, limit: Option<i64>) -> Self {
            Self {
                name: name.to_string(),
                schema: schema(),
                next: 0,
                limit,
            }
        }
    }

    impl Operator for Counter {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> &'static str {
            "counter"
        }

        fn input_arity(&self) -> Arity {
            Arity::Exactly(0)
        }

        fn output_schema(&self) -> &Schema {
            &self.schema
        }

        fn produce(&mut self, out: &mut Emitter) -> Result<Production> {
            if self.limit.is_some_and(|limit| self.next >= limit) {
                return Ok(Production::Exhausted);
            }
            out.emit(DataTuple::new(vec![Value::Int64(self.next)]))?;
            self.next += 1;
            Ok(Production::Continue)
        }
    }

    enum Behaviour {
        Pass,
        FailAt(i64),
        PanicAt(i64),
    }

    struct Relay {
        name: String,
        schema: Schema,
        behaviour: Behaviour,
    }

    impl Relay {
        fn new(name: &str, behaviour: Behaviour) -> Self {
            Self {
                name: name.to_string(),
                schema: schema(),
                behaviour,
            }
        }
    }

    impl Operator for Relay {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> &'static str {
            "relay"
        }

        fn input_arity(&self) -> Arity {
            Arity::Exactly(1)
        }

        fn output_schema(&self) -> &Schema {
            &self.schema
        }

        fn process_tuple(&mut self, _input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
            let n = tuple.value(0).and_then(Value::as_i64).unwrap_or_default();
            match self.behaviour {
                Behaviour::FailAt(at) if n == at => {
                    Err(StreamError::Execution(format!("cannot handle {}", n)))
                }
                Behaviour::PanicAt(at) if n == at => panic!("relay exploded at {}", n),
                _ => out.emit(tuple),
            }
        }
    }

    struct Gather {
        name: String,
        schema: Schema,
        seen: Arc<Mutex<Vec<i64>>>,
        eos: Arc<AtomicBool>,
    }

    impl Operator for Gather {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> &'static str {
            "gather"
        }

        fn input_arity(&self) -> Arity {
            Arity::AtLeast(1)
        }

        fn output_arity(&self) -> Arity {
            Arity::Exactly(0)
        }

        fn output_schema(&self) -> &Schema {
            &self.schema
        }

        fn process_tuple(&mut self, _input: usize, tuple: DataTuple, _out: &mut Emitter) -> Result<()> {
            if let Some(n) = tuple.value(0).and_then(Value::as_i64) {
                self.seen.lock().push(n);
            }
            Ok(())
        }

        fn process_forward_control(
            &mut self,
            _input: usize,
            control: ControlTuple,
            _out: &mut Emitter,
        ) -> Result<()> {
            if control.is_eos() {
                self.eos.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn gather(name: &str) -> (Gather, Arc<Mutex<Vec<i64>>>, Arc<AtomicBool>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let eos = Arc::new(AtomicBool::new(false));
        let op = Gather {
            name: name.to_string(),
            schema: schema(),
            seen: seen.clone(),
            eos: eos.clone(),
        };
        (op, seen, eos)
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_page_size(4)
            .with_poll_interval(Duration::from_millis(2))
    }

    fn linear_plan(relay: Behaviour, limit: Option<i64>) -> (PhysicalQueryPlan, Arc<Mutex<Vec<i64>>>, Arc<AtomicBool>) {
        let mut plan = PhysicalQueryPlan::new(config());
        let (sink, seen, eos) = gather("sink");
        plan.add_operator_as(Box::new(Counter::new("source", limit)), OperatorRole::Source)
            .unwrap();
        plan.add_operator(Box::new(Relay::new("relay", relay))).unwrap();
        plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
        plan.add_stream("source", "relay").unwrap();
        plan.add_stream("relay", "sink").unwrap();
        (plan, seen, eos)
    }

    #[test]
    fn test_linear_plan_runs_to_completion() {
        let (mut plan, seen, eos) = linear_plan(Behaviour::Pass, Some(10));
        plan.execute().unwrap();

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert!(eos.load(Ordering::SeqCst));
        assert_eq!(plan.operator_state("source"), Some(OperatorState::Stopped));
        assert_eq!(plan.operator_state("relay"), Some(OperatorState::Stopped));
        assert_eq!(plan.operator_state("sink"), Some(OperatorState::Stopped));
    }

    #[test]
    fn test_fan_in_sink_sees_every_input() {
        let mut plan = PhysicalQueryPlan::new(config());
        let (sink, seen, _) = gather("sink");
        plan.add_operator_as(Box::new(Counter::new("a", Some(5))), OperatorRole::Source)
            .unwrap();
        plan.add_operator_as(Box::new(Counter::new("b", Some(7))), OperatorRole::Source)
            .unwrap();
        plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
        plan.add_stream("a", "sink").unwrap();
        plan.add_stream("b", "sink").unwrap();
        plan.execute().unwrap();

        assert_eq!(seen.lock().len(), 12);
    }

    #[test]
    fn test_duplicate_operator_rejected() {
        let mut plan = PhysicalQueryPlan::new(config());
        plan.add_operator(Box::new(Counter::new("x", Some(1)))).unwrap();
        let err = plan.add_operator(Box::new(Counter::new("x", Some(1)))).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateOperator(name) if name == "x"));
    }

    #[test]
    fn test_stream_requires_registered_endpoints() {
        let mut plan = PhysicalQueryPlan::new(config());
        plan.add_operator(Box::new(Counter::new("x", Some(1)))).unwrap();
        let err = plan.add_stream("x", "missing").unwrap_err();
        assert!(matches!(err, StreamError::OperatorNotFound(_)));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_input_arity_enforced_on_connect() {
        let mut plan = PhysicalQueryPlan::new(config());
        plan.add_operator(Box::new(Counter::new("a", Some(1)))).unwrap();
        plan.add_operator(Box::new(Counter::new("b", Some(1)))).unwrap();
        let err = plan.add_stream("a", "b").unwrap_err();
        assert!(matches!(err, StreamError::InvalidOperation(_)));
    }

    #[test]
    fn test_missing_source_or_sink_fails_before_start() {
        let mut plan = PhysicalQueryPlan::new(config());
        let (sink, _, _) = gather("sink");
        plan.add_operator(Box::new(Counter::new("source", Some(1)))).unwrap();
        plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
        plan.add_stream("source", "sink").unwrap();

        let err = plan.execute().unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(plan.operator_state("source"), Some(OperatorState::Created));

        let mut plan = PhysicalQueryPlan::new(config());
        plan.add_operator_as(Box::new(Counter::new("source", Some(1))), OperatorRole::Source)
            .unwrap();
        assert!(plan.execute().unwrap_err().is_configuration_error());
        assert_eq!(plan.operator_state("source"), Some(OperatorState::Created));
    }

    #[test]
    fn test_unconnected_input_fails_validation() {
        let mut plan = PhysicalQueryPlan::new(config());
        let (sink, _, _) = gather("sink");
        plan.add_operator_as(Box::new(Counter::new("source", Some(1))), OperatorRole::Source)
            .unwrap();
        plan.add_operator(Box::new(Relay::new("relay", Behaviour::Pass))).unwrap();
        plan.add_operator_as(Box::new(sink), OperatorRole::Sink).unwrap();
        plan.add_stream("source", "sink").unwrap();

        assert!(matches!(plan.execute(), Err(StreamError::InvalidOperation(_))));
    }

    #[test]
    fn test_operator_error_is_propagated() {
        let (mut plan, _, _) = linear_plan(Behaviour::FailAt(3), None);
        let err = plan.execute().unwrap_err();

        match err {
            StreamError::OperatorFailed { operator, source } => {
                assert_eq!(operator, "relay");
                assert!(matches!(*source, StreamError::Execution(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(plan.operator_state("source"), Some(OperatorState::Stopped));
    }

    #[test]
    fn test_operator_panic_is_propagated() {
        let (mut plan, _, _) = linear_plan(Behaviour::PanicAt(2), None);
        let err = plan.execute().unwrap_err();
        assert!(err.to_string().contains("relay exploded at 2"));
    }

    #[test]
    fn test_terminate_from_another_thread() {
        let (mut plan, _, _) = linear_plan(Behaviour::Pass, None);
        let terminator = plan.terminator();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            terminator.terminate();
            terminator.terminate();
        });

        plan.execute().unwrap();
        stopper.join().unwrap();
        assert_eq!(plan.operator_state("sink"), Some(OperatorState::Stopped));
    }

    #[test]
    fn test_second_execute_rejected() {
        let (mut plan, _, _) = linear_plan(Behaviour::Pass, Some(1));
        plan.execute().unwrap();
        assert!(matches!(plan.execute(), Err(StreamError::InvalidOperation(_))));
    }

    #[test]
    fn test_statistics_collected() {
        let (mut plan, _, _) = linear_plan(Behaviour::Pass, Some(25));
        plan.set_statistics_enabled(true);
        plan.execute().unwrap();

        let statistics = plan.statistics().unwrap();
        assert_eq!(statistics.operator("source").unwrap().tuples_out, 25);
        assert_eq!(statistics.operator("relay").unwrap().tuples_in, 25);
        assert_eq!(statistics.operator("relay").unwrap().tuples_out, 25);
        assert_eq!(statistics.operator("sink").unwrap().tuples_in, 25);

        let mut out = Vec::new();
        plan.print_statistics(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("relay (relay)"));
    }
}
