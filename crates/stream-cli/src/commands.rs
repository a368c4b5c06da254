use crate::loader::PlanDescription;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use std::path::Path;
use std::time::{Duration, Instant};
use stream_core::EngineConfig;
use stream_operators::predicate::MinMaxFramePredicate;
use stream_operators::{
    builtin_registry, AggregateColumn, AggregateConfig, AggregationFunction, Frame, Generator,
    GeneratorConfig, OrderedAggregate, Print,
};
use stream_runtime::{Operator, OperatorRole, PhysicalQueryPlan, PlanStatistics};
use tracing::info;

pub fn run_plan(path: &Path, config: EngineConfig) -> Result<()> {
    println!("{} Loading plan {}", "→".bright_blue(), path.display());
    let description = PlanDescription::from_file(path)?;
    let plan = description.build(&builtin_registry(), config)?;
    execute(plan)
}

/// generator -> frame(minmax) -> avg/min/max per frame -> print
pub fn run_demo(seed: u64, tuples: u64, threshold: f64, config: EngineConfig) -> Result<()> {
    let generator = Generator::new(
        "generator",
        GeneratorConfig::default()
            .with_seed(seed)
            .with_count(Some(tuples)),
    )?;
    let schema = generator.output_schema().clone();
    let frame = Frame::new(
        "frame",
        &schema,
        Box::new(MinMaxFramePredicate::new(1, threshold)),
    )?;
    let aggregate = OrderedAggregate::new(
        "aggregate",
        &schema,
        AggregateConfig::new(
            vec![],
            vec![
                AggregateColumn::new(AggregationFunction::Avg, 1),
                AggregateColumn::new(AggregationFunction::Min, 1),
                AggregateColumn::new(AggregationFunction::Max, 1),
                AggregateColumn::new(AggregationFunction::Count, 1),
            ],
        ),
    )?;
    let print = Print::new("print", aggregate.output_schema());

    let mut plan = PhysicalQueryPlan::new(config);
    plan.add_operator_as(Box::new(generator), OperatorRole::Source)?;
    plan.add_operator(Box::new(frame))?;
    plan.add_operator(Box::new(aggregate))?;
    plan.add_operator_as(Box::new(print), OperatorRole::Sink)?;
    plan.add_stream("generator", "frame")?;
    plan.add_stream("frame", "aggregate")?;
    plan.add_stream("aggregate", "print")?;

    println!(
        "{} Demo: {} readings, seed {}, frame threshold {}",
        "→".bright_blue(),
        tuples,
        seed,
        threshold
    );
    execute(plan)
}

pub fn write_config(path: &Path, config: &EngineConfig) -> Result<()> {
    config
        .save(path)
        .with_context(|| format!("cannot write configuration {}", path.display()))?;
    println!(
        "{} Configuration written to {}",
        "✓".bright_green(),
        path.display()
    );
    Ok(())
}

pub fn list_operators() -> Result<()> {
    let registry = builtin_registry();
    let mut table = Table::new();
    table.set_header(vec![Cell::new("Operator type").fg(Color::Cyan)]);
    for name in registry.names() {
        table.add_row(vec![name]);
    }
    println!("{}", table);
    Ok(())
}

fn execute(mut plan: PhysicalQueryPlan) -> Result<()> {
    let started = Instant::now();
    info!(operators = plan.operator_count(), "starting plan");
    plan.execute()?;
    println!(
        "{} Plan finished in {:.2}ms",
        "✓".bright_green(),
        millis(started.elapsed())
    );

    if let Some(statistics) = plan.statistics() {
        print_statistics(statistics);
    }
    Ok(())
}

fn print_statistics(statistics: &PlanStatistics) {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Operator").fg(Color::Cyan),
        Cell::new("Kind").fg(Color::Cyan),
        Cell::new("In").fg(Color::Yellow),
        Cell::new("Out").fg(Color::Yellow),
        Cell::new("Blocked").fg(Color::Magenta),
        Cell::new("Blocked ms").fg(Color::Magenta),
        Cell::new("Waited").fg(Color::Magenta),
        Cell::new("Waited ms").fg(Color::Magenta),
        Cell::new("Busy ms").fg(Color::Green),
        Cell::new("Wall ms").fg(Color::Green),
        Cell::new("CPU ms").fg(Color::Green),
        Cell::new("User ms").fg(Color::Green),
    ]);

    for report in &statistics.operators {
        let s = &report.statistics;
        table.add_row(vec![
            report.name.clone(),
            report.kind.clone(),
            s.tuples_in.to_string(),
            s.tuples_out.to_string(),
            s.blocked_count.to_string(),
            format!("{:.2}", millis(s.blocked_time)),
            s.waited_count.to_string(),
            format!("{:.2}", millis(s.waited_time)),
            format!("{:.2}", millis(s.busy_time)),
            format!("{:.2}", millis(s.wall_time)),
            optional(s.cpu_time),
            optional(s.user_time),
        ]);
    }

    println!("{}", table);
    println!(
        "{} {:.2}ms",
        "Execution time:".bright_yellow(),
        millis(statistics.execution_time)
    );
    match statistics.memory_delta() {
        Some(delta) => println!("{} {} bytes", "Memory delta:".bright_yellow(), delta),
        None => println!("{} n/a", "Memory delta:".bright_yellow()),
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn optional(d: Option<Duration>) -> String {
    d.map(|d| format!("{:.2}", millis(d)))
        .unwrap_or_else(|| "n/a".to_string())
}
