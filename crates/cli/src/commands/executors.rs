// Executor catalog commands

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde_json::json;
use stepwise_executors::{ExecutorCatalog, ExecutorMetadata};

#[derive(Subcommand)]
pub enum ExecutorsCommand {
    /// List built-in executors
    List {
        /// Only show one category (e.g. funnel, control_flow)
        #[arg(long, short)]
        category: Option<String>,
    },

    /// Show the config schema of one executor
    Describe {
        /// Executor id, e.g. deal_webhook_trigger
        executor_id: String,
    },
}

pub fn run(command: ExecutorsCommand, output: OutputFormat) -> Result<()> {
    let catalog = ExecutorCatalog::builtin();
    match command {
        ExecutorsCommand::List { category } => list(catalog, category.as_deref(), output),
        ExecutorsCommand::Describe { executor_id } => {
            let metadata = catalog
                .get_by_name(&executor_id)
                .ok_or_else(|| anyhow!("Unknown executor: {}", executor_id))?;
            describe(metadata, output)
        }
    }
}

fn list(catalog: &ExecutorCatalog, category: Option<&str>, output: OutputFormat) -> Result<()> {
    let entries: Vec<&ExecutorMetadata> = catalog
        .iter()
        .filter(|m| category.map_or(true, |c| m.category.as_str() == c))
        .collect();

    if !output.is_text() {
        return output.print_value(&json!({ "data": entries, "total": entries.len() }));
    }

    if entries.is_empty() {
        println!("No executors found");
        return Ok(());
    }

    print_table_header(&[("ID", 24), ("NAME", 24), ("CATEGORY", 12), ("DESCRIPTION", 50)]);
    for m in &entries {
        print_table_row(&[
            (m.id.as_str(), 24),
            (m.display_name, 24),
            (m.category.as_str(), 12),
            (m.description, 50),
        ]);
    }
    Ok(())
}

fn describe(metadata: &ExecutorMetadata, output: OutputFormat) -> Result<()> {
    if !output.is_text() {
        return output.print_value(metadata);
    }

    print_field("ID", metadata.id.as_str());
    print_field("Name", metadata.display_name);
    print_field("Category", metadata.category.as_str());
    print_field("Description", metadata.description);
    let overridable = if metadata.overridable_fields.is_empty() {
        "-".to_string()
    } else {
        metadata.overridable_fields.join(", ")
    };
    print_field("Tenant overridable", &overridable);

    println!();
    print_table_header(&[("FIELD", 22), ("TYPE", 8), ("REQUIRED", 8), ("DESCRIPTION", 56)]);
    for field in &metadata.config_schema {
        print_table_row(&[
            (field.name, 22),
            (field.field_type.as_str(), 8),
            (if field.required { "yes" } else { "no" }, 8),
            (field.description, 56),
        ]);
    }
    Ok(())
}
