//! Operator factories keyed by operator type name.
//!
//! Plan loaders describe every operator by a type name, an id, the schemas
//! of its inputs and a nested [`Parameter`] tree. The registry turns such a
//! description into a configured [`Operator`].

use crate::operator::Operator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use stream_core::{AttributeRef, EngineConfig, Result, Schema, StreamError};

/// Generic configuration tree handed to operator factories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Parameter {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Parameter>),
    Map(BTreeMap<String, Parameter>),
}

impl Parameter {
    /// An empty map.
    pub fn map() -> Self {
        Parameter::Map(BTreeMap::new())
    }

    /// Adds `key` to a map parameter. Other parameter kinds are turned into
    /// a map first.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Self {
        if !matches!(self, Parameter::Map(_)) {
            self = Parameter::map();
        }
        if let Parameter::Map(entries) = &mut self {
            entries.insert(key.into(), value.into());
        }
        self
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Parameter::Null)
    }

    /// Entry of a map parameter. Missing keys and explicit nulls are `None`.
    pub fn get(&self, key: &str) -> Option<&Parameter> {
        match self {
            Parameter::Map(entries) => entries.get(key).filter(|p| !p.is_null()),
            _ => None,
        }
    }

    pub fn require(&self, key: &str) -> Result<&Parameter> {
        self.get(key)
            .ok_or_else(|| StreamError::Configuration(format!("missing parameter '{}'", key)))
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Parameter::Number(n) => Ok(*n),
            Parameter::Text(s) => s.trim().parse().map_err(|_| self.mismatch("number")),
            _ => Err(self.mismatch("number")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        let n = self.as_f64()?;
        if n.fract() != 0.0 || !n.is_finite() {
            return Err(self.mismatch("integer"));
        }
        Ok(n as i64)
    }

    pub fn as_usize(&self) -> Result<usize> {
        let n = self.as_i64()?;
        usize::try_from(n).map_err(|_| self.mismatch("non-negative integer"))
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Parameter::Bool(b) => Ok(*b),
            Parameter::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Ok(true),
                "false" | "no" => Ok(false),
                _ => Err(self.mismatch("boolean")),
            },
            _ => Err(self.mismatch("boolean")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Parameter::Text(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    /// A list parameter; a single value is treated as a one-element list.
    pub fn as_list(&self) -> Vec<&Parameter> {
        match self {
            Parameter::List(items) => items.iter().collect(),
            Parameter::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// An attribute given by position (number) or by name (string).
    pub fn as_attribute(&self) -> Result<AttributeRef> {
        match self {
            Parameter::Number(_) => Ok(AttributeRef::Index(self.as_usize()?)),
            Parameter::Text(name) => Ok(AttributeRef::Name(name.clone())),
            _ => Err(self.mismatch("attribute index or name")),
        }
    }

    /// Resolves the attribute under `key` against `schema`.
    pub fn attribute(&self, key: &str, schema: &Schema) -> Result<usize> {
        self.require(key)?.as_attribute()?.resolve(schema)
    }

    /// Resolves every attribute listed under `key`. A missing key yields an
    /// empty list.
    pub fn attributes(&self, key: &str, schema: &Schema) -> Result<Vec<usize>> {
        match self.get(key) {
            Some(list) => list
                .as_list()
                .into_iter()
                .map(|p| p.as_attribute()?.resolve(schema))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        self.get(key).map_or(Ok(default), Parameter::as_f64)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64> {
        self.get(key).map_or(Ok(default), Parameter::as_i64)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        self.get(key).map_or(Ok(default), Parameter::as_usize)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        self.get(key).map_or(Ok(default), Parameter::as_bool)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        self.get(key).map_or(Ok(default), Parameter::as_str)
    }

    fn mismatch(&self, expected: &str) -> StreamError {
        StreamError::TypeMismatch {
            expected: expected.to_string(),
            found: self.to_string(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<bool> for Parameter {
    fn from(b: bool) -> Self {
        Parameter::Bool(b)
    }
}

impl From<f64> for Parameter {
    fn from(n: f64) -> Self {
        Parameter::Number(n)
    }
}

impl From<i64> for Parameter {
    fn from(n: i64) -> Self {
        Parameter::Number(n as f64)
    }
}

impl From<i32> for Parameter {
    fn from(n: i32) -> Self {
        Parameter::Number(n as f64)
    }
}

impl From<usize> for Parameter {
    fn from(n: usize) -> Self {
        Parameter::Number(n as f64)
    }
}

impl From<&str> for Parameter {
    fn from(s: &str) -> Self {
        Parameter::Text(s.to_string())
    }
}

impl From<String> for Parameter {
    fn from(s: String) -> Self {
        Parameter::Text(s)
    }
}

impl<T: Into<Parameter>> From<Vec<T>> for Parameter {
    fn from(items: Vec<T>) -> Self {
        Parameter::List(items.into_iter().map(Into::into).collect())
    }
}

/// Everything a factory needs to build one operator.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    pub id: String,
    pub input_schemas: Vec<Schema>,
    pub parameters: Parameter,
    pub config: EngineConfig,
}

impl FactoryContext {
    pub fn new(id: impl Into<String>, input_schemas: Vec<Schema>, parameters: Parameter) -> Self {
        Self {
            id: id.into(),
            input_schemas,
            parameters,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn input_schema(&self, index: usize) -> Result<&Schema> {
        self.input_schemas.get(index).ok_or_else(|| {
            StreamError::Configuration(format!(
                "operator '{}' has no input {} ({} inputs)",
                self.id,
                index,
                self.input_schemas.len()
            ))
        })
    }

    /// The only input schema of a single-input operator.
    pub fn single_input(&self) -> Result<&Schema> {
        if self.input_schemas.len() != 1 {
            return Err(StreamError::Configuration(format!(
                "operator '{}' needs exactly one input, has {}",
                self.id,
                self.input_schemas.len()
            )));
        }
        self.input_schema(0)
    }
}

pub type OperatorFactory =
    Arc<dyn Fn(&FactoryContext) -> Result<Box<dyn Operator>> + Send + Sync>;

/// Registry mapping operator type names to factories.
#[derive(Default, Clone)]
pub struct OperatorRegistry {
    factories: HashMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory. Type names are case-insensitive; a later
    /// registration replaces an earlier one.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&FactoryContext) -> Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_lowercase(), Arc::new(factory));
    }

    pub fn get(&self, kind: &str) -> Option<OperatorFactory> {
        self.factories.get(&kind.to_lowercase()).cloned()
    }

    pub fn create(&self, kind: &str, context: &FactoryContext) -> Result<Box<dyn Operator>> {
        let factory = self.get(kind).ok_or_else(|| {
            StreamError::Configuration(format!("unknown operator type '{}'", kind))
        })?;
        factory(context)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("kinds", &self.names())
            .finish()
    }
}
