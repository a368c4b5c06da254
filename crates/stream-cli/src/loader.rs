//! JSON plan descriptions.
//!
//! ```json
//! {
//!   "operators": [
//!     {"id": "gen", "type": "generator", "parameters": {"count": 1000}},
//!     {"id": "avg", "type": "ordered_aggregate", "inputs": ["gen"], "parameters": {..}}
//!   ]
//! }
//! ```
//!
//! Operators without inputs are sources and operators nobody reads from are
//! sinks unless a `role` says otherwise.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use stream_core::EngineConfig;
use stream_runtime::{FactoryContext, OperatorRegistry, OperatorRole, Parameter, PhysicalQueryPlan};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Source,
    Sink,
    Inner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<RoleName>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub parameters: Parameter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanDescription {
    pub operators: Vec<OperatorDescription>,
}

impl PlanDescription {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read plan {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Role of an operator, inferred from the wiring when not given.
    fn role_of(&self, operator: &OperatorDescription, consumed: &HashSet<&str>) -> Option<OperatorRole> {
        match operator.role {
            Some(RoleName::Source) => Some(OperatorRole::Source),
            Some(RoleName::Sink) => Some(OperatorRole::Sink),
            Some(RoleName::Inner) => None,
            None if operator.inputs.is_empty() => Some(OperatorRole::Source),
            None if !consumed.contains(operator.id.as_str()) => Some(OperatorRole::Sink),
            None => None,
        }
    }

    /// Instantiates every operator through `registry` and wires the streams.
    ///
    /// Operators are created once all of their inputs exist, since their
    /// input schemas are the output schemas of those inputs.
    pub fn build(&self, registry: &OperatorRegistry, config: EngineConfig) -> Result<PhysicalQueryPlan> {
        let mut ids = HashSet::new();
        for operator in &self.operators {
            if !ids.insert(operator.id.as_str()) {
                bail!("operator '{}' is declared twice", operator.id);
            }
        }
        for operator in &self.operators {
            for input in &operator.inputs {
                if !ids.contains(input.as_str()) {
                    bail!("operator '{}' reads from unknown operator '{}'", operator.id, input);
                }
            }
        }
        let consumed: HashSet<&str> = self
            .operators
            .iter()
            .flat_map(|o| o.inputs.iter().map(String::as_str))
            .collect();

        let mut plan = PhysicalQueryPlan::new(config.clone());
        let mut pending: Vec<&OperatorDescription> = self.operators.iter().collect();
        while !pending.is_empty() {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|o| o.inputs.iter().all(|input| plan.contains(input)));
            if ready.is_empty() {
                let stuck: Vec<&str> = waiting.iter().map(|o| o.id.as_str()).collect();
                bail!("plan has a cycle through {}", stuck.join(", "));
            }

            for description in ready {
                let input_schemas = description
                    .inputs
                    .iter()
                    .map(|input| plan.output_schema(input))
                    .collect::<stream_core::Result<Vec<_>>>()?;
                let context = FactoryContext::new(
                    &description.id,
                    input_schemas,
                    description.parameters.clone(),
                )
                .with_config(config.clone());
                let operator = registry
                    .create(&description.kind, &context)
                    .with_context(|| format!("cannot create operator '{}'", description.id))?;

                match self.role_of(description, &consumed) {
                    Some(role) => plan.add_operator_as(operator, role)?,
                    None => plan.add_operator(operator)?,
                }
                debug!(operator = %description.id, kind = %description.kind, "operator created");
            }
            pending = waiting;
        }

        // Input order decides input positions, e.g. for merges.
        for operator in &self.operators {
            for input in &operator.inputs {
                plan.add_stream(input, &operator.id)?;
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_operators::builtin_registry;
    use stream_runtime::OperatorState;

    const PLAN: &str = r#"{
        "operators": [
            {"id": "print", "type": "print", "inputs": ["avg"], "parameters": {"limit": 0}},
            {"id": "avg", "type": "ordered_aggregate", "inputs": ["frame"],
             "parameters": {"aggregates": [{"function": "avg", "attribute": "value"}]}},
            {"id": "frame", "type": "frame", "inputs": ["gen"],
             "parameters": {"predicate": {"type": "minmax", "attribute": 1, "k": 15.0}}},
            {"id": "gen", "type": "generator", "parameters": {"count": 100, "seed": 1}}
        ]
    }"#;

    #[test]
    fn test_builds_out_of_declaration_order() {
        let description = PlanDescription::from_json(PLAN).unwrap();
        let plan = description
            .build(&builtin_registry(), EngineConfig::default())
            .unwrap();
        assert_eq!(plan.operator_count(), 4);
        assert_eq!(plan.streams().len(), 3);
        assert_eq!(
            plan.output_schema("avg").unwrap().names(),
            vec!["avg_value", "segment_start", "segment_end"]
        );
        assert_eq!(plan.operator_state("gen"), Some(OperatorState::Created));
    }

    #[test]
    fn test_inferred_roles_allow_execution() {
        let description = PlanDescription::from_json(PLAN).unwrap();
        let mut plan = description
            .build(&builtin_registry(), EngineConfig::default())
            .unwrap();
        plan.execute().unwrap();
        assert_eq!(plan.operator_state("print"), Some(OperatorState::Stopped));
    }

    #[test]
    fn test_rejects_cycles_and_unknown_inputs() {
        let cycle = PlanDescription::from_json(
            r#"{"operators": [
                {"id": "a", "type": "selection", "inputs": ["b"]},
                {"id": "b", "type": "selection", "inputs": ["a"]}
            ]}"#,
        )
        .unwrap();
        let err = cycle
            .build(&builtin_registry(), EngineConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("cycle"));

        let unknown = PlanDescription::from_json(
            r#"{"operators": [{"id": "a", "type": "print", "inputs": ["ghost"]}]}"#,
        )
        .unwrap();
        assert!(unknown
            .build(&builtin_registry(), EngineConfig::default())
            .is_err());

        let unknown_type = PlanDescription::from_json(
            r#"{"operators": [{"id": "a", "type": "teleport"}]}"#,
        )
        .unwrap();
        assert!(unknown_type
            .build(&builtin_registry(), EngineConfig::default())
            .is_err());
    }
}
