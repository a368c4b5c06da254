use crate::error::{Result, StreamError};
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    data_type: DataType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Ordered attribute list with an optional progressing attribute, the
/// monotonic ordering key of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    attributes: Vec<Attribute>,
    progressing: Option<usize>,
}

impl Schema {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            progressing: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Designates the named attribute as the progressing attribute.
    pub fn with_progressing(self, name: &str) -> Result<Self> {
        let index = self.index_of(name)?;
        self.with_progressing_index(index)
    }

    pub fn with_progressing_index(mut self, index: usize) -> Result<Self> {
        self.check_index(index)?;
        self.progressing = Some(index);
        Ok(self)
    }

    pub fn progressing_attribute(&self) -> Option<usize> {
        self.progressing
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, index: usize) -> Option<&Attribute> {
        self.attributes.get(index)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.attributes
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| StreamError::AttributeNotFound(name.to_string()))
    }

    pub fn data_type(&self, index: usize) -> Result<DataType> {
        self.attribute(index)
            .map(|a| a.data_type())
            .ok_or_else(|| StreamError::AttributeNotFound(format!("#{}", index)))
    }

    pub fn check_index(&self, index: usize) -> Result<()> {
        if index < self.attributes.len() {
            Ok(())
        } else {
            Err(StreamError::AttributeNotFound(format!(
                "#{} (schema has {} attributes)",
                index,
                self.attributes.len()
            )))
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name()).collect()
    }

    /// Schema holding the attributes at `indices`, in that order. The
    /// progressing attribute survives only if it is projected.
    pub fn project(&self, indices: &[usize]) -> Result<Schema> {
        let mut attributes = Vec::with_capacity(indices.len());
        let mut progressing = None;
        for (position, &index) in indices.iter().enumerate() {
            self.check_index(index)?;
            attributes.push(self.attributes[index].clone());
            if self.progressing == Some(index) {
                progressing = Some(position);
            }
        }
        Ok(Schema {
            attributes,
            progressing,
        })
    }

    /// Schema with `extra` appended after the existing attributes.
    pub fn extend(&self, extra: Vec<Attribute>) -> Schema {
        let mut attributes = self.attributes.clone();
        attributes.extend(extra);
        Schema {
            attributes,
            progressing: self.progressing,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", attr.name(), attr.data_type())?;
            if self.progressing == Some(i) {
                f.write_str(" [progressing]")?;
            }
        }
        f.write_str(")")
    }
}

/// Reference to an attribute in operator configuration, either by position
/// or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeRef {
    Index(usize),
    Name(String),
}

impl AttributeRef {
    pub fn resolve(&self, schema: &Schema) -> Result<usize> {
        match self {
            AttributeRef::Index(index) => {
                schema.check_index(*index)?;
                Ok(*index)
            }
            AttributeRef::Name(name) => schema.index_of(name),
        }
    }
}

impl From<usize> for AttributeRef {
    fn from(index: usize) -> Self {
        AttributeRef::Index(index)
    }
}

impl From<&str> for AttributeRef {
    fn from(name: &str) -> Self {
        AttributeRef::Name(name.to_string())
    }
}

impl From<String> for AttributeRef {
    fn from(name: String) -> Self {
        AttributeRef::Name(name)
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeRef::Index(index) => write!(f, "#{}", index),
            AttributeRef::Name(name) => f.write_str(name),
        }
    }
}
