//! Factories for the built-in operators, keyed by the type names used in
//! plan descriptions.

use crate::aggregate::{AggregateColumn, AggregationFunction};
use crate::operators::{
    AggregateConfig, Derive, Frame, Generator, GeneratorConfig, Multiplex, MultiplexMode,
    OrderedAggregate, Print, ProgressingMerge, Scan, ScanSource, Selection, SortOrder, Window,
    WindowPolicy,
};
use crate::predicate::PredicateSpec;
use std::path::PathBuf;
use stream_core::{Attribute, DataType, Result, Schema, StreamError};
use stream_runtime::{FactoryContext, Operator, OperatorRegistry, Parameter};

/// A registry holding every built-in operator type.
pub fn builtin_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    registry.register("generator", generator);
    registry.register("scan", scan);
    registry.register("selection", selection);
    registry.register("frame", frame);
    registry.register("window", window);
    registry.register("derive", derive);
    registry.register("multiplex", multiplex);
    registry.register("merge", merge);
    registry.register("progressing_merge", merge);
    registry.register("ordered_aggregate", ordered_aggregate);
    registry.register("aggregate", ordered_aggregate);
    registry.register("print", print);
    registry
}

/// `{"count": 1000 | "unbounded", "seed": .., "keys": [..], ..}`
fn generator(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let p = &ctx.parameters;
    let defaults = GeneratorConfig::default();
    let count = match p.get("count") {
        Some(Parameter::Text(text)) if text.eq_ignore_ascii_case("unbounded") => None,
        Some(count) => Some(count.as_usize().map_err(|_| {
            StreamError::Configuration(format!(
                "generator '{}' count must be a non-negative integer",
                ctx.id
            ))
        })? as u64),
        None => defaults.count,
    };
    let keys = match p.get("keys") {
        Some(keys) => keys
            .as_list()
            .into_iter()
            .map(|k| k.as_str().map(str::to_string))
            .collect::<Result<Vec<_>>>()?,
        None => defaults.keys.clone(),
    };
    let config = GeneratorConfig {
        count,
        seed: p.i64_or("seed", defaults.seed as i64)? as u64,
        start: p.i64_or("start", defaults.start)?,
        interval: p.i64_or("interval", defaults.interval)?,
        initial_value: p.f64_or("initial_value", defaults.initial_value)?,
        max_step: p.f64_or("max_step", defaults.max_step)?,
        keys,
        batch_size: p.usize_or("batch_size", ctx.config.page_size)?,
    };
    Ok(Box::new(Generator::new(&ctx.id, config)?))
}

/// `{"schema": [{"name": "ts", "type": "long"}, ..], "progressing": "ts"}`
fn schema_parameter(params: &Parameter) -> Result<Schema> {
    let attributes = params
        .require("schema")?
        .as_list()
        .into_iter()
        .map(|a| {
            Ok(Attribute::new(
                a.require("name")?.as_str()?,
                DataType::from_name(a.require("type")?.as_str()?)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let schema = Schema::new(attributes);
    match params.get("progressing") {
        Some(attribute) => {
            let index = attribute.as_attribute()?.resolve(&schema)?;
            schema.with_progressing_index(index)
        }
        None => Ok(schema),
    }
}

fn scan(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let p = &ctx.parameters;
    let schema = schema_parameter(p)?;
    let source = match (p.get("path"), p.get("lines")) {
        (Some(path), _) => ScanSource::File(PathBuf::from(path.as_str()?)),
        (None, Some(lines)) => ScanSource::Lines(
            lines
                .as_list()
                .into_iter()
                .map(|l| l.as_str().map(str::to_string))
                .collect::<Result<Vec<_>>>()?,
        ),
        (None, None) => {
            return Err(StreamError::Configuration(format!(
                "scan '{}' needs a 'path' or 'lines' parameter",
                ctx.id
            )))
        }
    };
    let delimiter = p.str_or("delimiter", ",")?;
    let mut chars = delimiter.chars();
    let delimiter = match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => c as u8,
        _ => {
            return Err(StreamError::Configuration(format!(
                "scan delimiter must be a single ASCII character, got '{}'",
                delimiter
            )))
        }
    };
    let scan = Scan::new(&ctx.id, schema, source)?
        .with_delimiter(delimiter)
        .with_header(p.bool_or("header", false)?);
    Ok(Box::new(scan))
}

fn predicate_spec(ctx: &FactoryContext) -> Result<PredicateSpec> {
    PredicateSpec::from_parameter(ctx.parameters.require("predicate")?)
}

fn selection(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let input = ctx.single_input()?;
    let predicate = predicate_spec(ctx)?.build(input)?;
    Ok(Box::new(Selection::new(&ctx.id, input, predicate)?))
}

fn frame(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let input = ctx.single_input()?;
    let predicate = predicate_spec(ctx)?.build(input)?;
    Ok(Box::new(Frame::new(&ctx.id, input, predicate)?))
}

/// `{"policy": "tumbling"|"sliding"|"count", "size": .., "slide": .., "origin": ..}`
fn window(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let p = &ctx.parameters;
    let size = p.require("size")?.as_i64()?;
    let policy = match p.str_or("policy", "tumbling")?.to_lowercase().as_str() {
        "tumbling" | "time" | "sliding" => WindowPolicy::Time {
            size,
            slide: p.i64_or("slide", size)?,
            origin: p.i64_or("origin", 0)?,
        },
        "count" => WindowPolicy::Count { size },
        other => {
            return Err(StreamError::Configuration(format!(
                "unknown window policy '{}'",
                other
            )))
        }
    };
    Ok(Box::new(Window::new(&ctx.id, ctx.single_input()?, policy)?))
}

fn derive(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    Ok(Box::new(Derive::from_parameters(
        &ctx.id,
        ctx.single_input()?,
        &ctx.parameters,
    )?))
}

fn multiplex(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let input = ctx.single_input()?;
    let p = &ctx.parameters;
    let mode = match p.str_or("mode", "broadcast")?.to_lowercase().as_str() {
        "broadcast" => MultiplexMode::Broadcast,
        "round_robin" | "roundrobin" => MultiplexMode::RoundRobin,
        "hash" => MultiplexMode::Hash(p.attributes("keys", input)?),
        other => {
            return Err(StreamError::Configuration(format!(
                "unknown multiplex mode '{}'",
                other
            )))
        }
    };
    Ok(Box::new(Multiplex::new(&ctx.id, input, mode)?))
}

fn merge(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    Ok(Box::new(ProgressingMerge::new(&ctx.id, &ctx.input_schemas)?))
}

/// `{"group_by": [..], "aggregates": [{"function": "avg", "attribute": ..}],
///   "sort": {"attribute": .., "descending": false}, "limit": ..}`
fn ordered_aggregate(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let input = ctx.single_input()?;
    let p = &ctx.parameters;
    let aggregates = p
        .require("aggregates")?
        .as_list()
        .into_iter()
        .map(|a| {
            let function: AggregationFunction = a.require("function")?.as_str()?.parse()?;
            Ok(AggregateColumn::new(function, a.attribute("attribute", input)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut config = AggregateConfig::new(p.attributes("group_by", input)?, aggregates);
    if let Some(sort) = p.get("sort").filter(|s| !s.is_null()) {
        config = config.with_sort(SortOrder {
            attribute: sort.require("attribute")?.as_str()?.to_string(),
            descending: sort.bool_or("descending", false)?,
        });
    }
    if let Some(limit) = p.get("limit") {
        config = config.with_limit(limit.as_usize()?);
    }
    Ok(Box::new(OrderedAggregate::new(&ctx.id, input, config)?))
}

fn print(ctx: &FactoryContext) -> Result<Box<dyn Operator>> {
    let p = &ctx.parameters;
    let mut print = Print::new(&ctx.id, ctx.single_input()?)
        .with_punctuation(p.bool_or("punctuation", false)?);
    if let Some(limit) = p.get("limit") {
        print = print.with_limit(limit.as_usize()? as u64);
    }
    Ok(Box::new(print))
}
