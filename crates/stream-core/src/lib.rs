//! Data model shared by every part of the continuous-query engine: values,
//! schemas, tuples, pages, value conversion, configuration and errors.

pub mod config;
pub mod convert;
pub mod error;
pub mod page;
pub mod schema;
pub mod tuple;
pub mod types;

pub use config::EngineConfig;
pub use convert::{convert, convert_or_null};
pub use error::{Result, StreamError};
pub use page::Page;
pub use schema::{Attribute, AttributeRef, Schema};
pub use tuple::{
    ControlTuple, DataTuple, ElementMetadata, PunctuationControl, PunctuationType, StreamElement,
};
pub use types::{DataType, Value};
