// Workflow Execution Core
//
// This crate provides the host-agnostic building blocks the step executors
// are written against: the data model a step runs with, the runtime
// capabilities a host supplies, and the routing primitives shared by every
// branch-style executor.
//
// Key design decisions:
// - Capabilities (Database, Notifier, AiProvider, ExternalConnector,
//   WebhookClient, FunnelExitHooks, Logger) are traits injected through Runtime
// - Executors never see a concrete database or HTTP client
// - Results are values, never errors: every failure funnels into ActionExecutionResult
// - Branch/loop bookkeeping is an explicit BranchLedger owned by the outer scheduler
// - Best-effort notifications go through NotificationDispatcher (bounded queue)

pub mod conditions;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod http;
pub mod notify;
pub mod openai;
pub mod result;
pub mod retry;
pub mod runtime;
pub mod scope;
pub mod step;
pub mod telemetry;
pub mod traits;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use conditions::{select_branch, Branch, Condition, Operator};
pub use config::EngineConfig;
pub use context::{BranchLedger, ExecutionContext, InputData};
pub use entities::{
    Campaign, Deal, DealClosure, DealStatus, LegalEntity, Pipeline, RoutingMode, ScopeType,
    Stage, Store, Team, UserAssignment,
};
pub use error::{ConfigError, Result, RuntimeError};
pub use http::HttpWebhookClient;
pub use notify::NotificationDispatcher;
pub use openai::OpenAiChatProvider;
pub use result::{ActionExecutionResult, ErrorCode};
pub use retry::RetryPolicy;
pub use runtime::{Runtime, RuntimeBuilder};
pub use scope::{validate_user_scope, ScopeCheck};
pub use step::{ExecutorCategory, ExecutorId, Step};
pub use telemetry::{init_tracing, TracingConfig};
pub use traits::{
    AiProvider, AiRequestContext, AiResponse, AiSettings, ConnectorCallContext,
    ConnectorCredentials, Database, ExternalConnector, FunnelExitHooks, LogLevel, Logger,
    LoggingExitHooks, Notification, NotificationChannel, NotificationPriority, Notifier, TracingLogger,
    WebhookClient, WebhookRequest,
};
