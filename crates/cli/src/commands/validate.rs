// Workflow definition validation
//
// A definition file holds `{name?, steps: [{id, executor, name?, config}]}`.
// Each step is checked the way the engine checks it at definition time:
// known executor id, unique step id, required fields, typed config parse.

use crate::output::{print_table_header, print_table_row, OutputFormat};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use stepwise_core::Step;
use stepwise_executors::ExecutorRegistry;

#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step_id: String,
    pub executor: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Load a definition, detecting the format by extension
pub fn load_definition(path: &str) -> Result<WorkflowFile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))?;

    let definition = if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse YAML: {}", path))?
    } else if path.ends_with(".json") {
        serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON: {}", path))?
    } else {
        serde_yaml::from_str(&content)
            .or_else(|_| serde_json::from_str(&content))
            .with_context(|| format!("Failed to parse file (tried YAML and JSON): {}", path))?
    };
    Ok(definition)
}

pub fn validate_definition(definition: &WorkflowFile) -> Vec<StepReport> {
    let mut seen = HashSet::new();
    definition
        .steps
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let step_id = raw
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("#{}", index + 1));
            let executor = raw
                .get("executor")
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string();

            let outcome = serde_json::from_value::<Step>(raw.clone())
                .map_err(|e| e.to_string())
                .and_then(|step| {
                    if !seen.insert(step.id.clone()) {
                        return Err(format!("duplicate step id '{}'", step.id));
                    }
                    ExecutorRegistry::validate_step(&step).map_err(|e| e.to_string())
                });

            StepReport {
                step_id,
                executor,
                valid: outcome.is_ok(),
                error: outcome.err(),
            }
        })
        .collect()
}

pub fn run(path: &str, output: OutputFormat, quiet: bool) -> Result<()> {
    let definition = load_definition(path)?;
    let reports = validate_definition(&definition);
    let invalid = reports.iter().filter(|r| !r.valid).count();
    tracing::debug!(path, steps = reports.len(), invalid, "Validated workflow definition");

    if output.is_text() {
        if !quiet {
            let name = definition.name.as_deref().unwrap_or(path);
            println!("{}: {} steps", name, reports.len());
            print_table_header(&[("STEP", 24), ("EXECUTOR", 24), ("RESULT", 60)]);
            for report in &reports {
                let result = report.error.as_deref().unwrap_or("ok");
                print_table_row(&[(&report.step_id, 24), (&report.executor, 24), (result, 60)]);
            }
        }
    } else {
        output.print_value(&json!({
            "name": definition.name,
            "steps": reports,
            "invalid": invalid,
        }))?;
    }

    if definition.steps.is_empty() {
        bail!("Definition has no steps: {}", path);
    }
    if invalid > 0 {
        bail!("{} of {} steps are invalid", invalid, reports.len());
    }
    Ok(())
}
