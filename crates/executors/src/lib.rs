// Workflow Step Executors
//
// Concrete executors for every step kind, plus the two registries around
// them: ExecutorCatalog (static metadata, shallow config checks, tenant
// overrides) and ExecutorRegistry (one shared instance per ExecutorId).
//
// Key design decisions:
// - One Executor trait; executors hold a Runtime and nothing else mutable
// - Every path settles into an ActionExecutionResult, never an Err or a panic
// - Step configs are typed serde structs, parsed at definition time by
//   ExecutorRegistry::validate_step and again on every execution
// - Control-flow executors only read the BranchLedger; the scheduler owns it

pub mod actions;
pub mod campaign;
pub mod catalog;
pub mod control;
pub mod decision;
pub mod executor;
pub mod funnel;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod triggers;

// Re-exports for convenience
pub use catalog::{ConfigField, ExecutorCatalog, ExecutorMetadata, FieldType};
pub use executor::{Executor, StepConfig};
pub use registry::{ExecutorRegistry, RegistryError};
