// Typed executor registry
//
// Maps each ExecutorId to one shared executor instance, built once at
// startup. Dispatch is by enum, so a step can only name an executor that
// exists; the remaining failure is an id that was never registered, which
// settles into a VALIDATION_ERROR result like any other bad step.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;

use stepwise_core::{
    ActionExecutionResult, ConfigError, ExecutionContext, ExecutorId, InputData, Runtime, Step,
};

use crate::actions::{
    AutoApprovalConfig, AutoApprovalExecutor, ConnectorActionConfig, ConnectorActionExecutor,
    RequestApprovalConfig, RequestApprovalExecutor, SendEmailConfig, SendEmailExecutor,
    SendNotificationConfig, SendNotificationExecutor,
};
use crate::campaign::{CampaignLeadIntakeConfig, CampaignLeadIntakeExecutor};
use crate::catalog::ExecutorCatalog;
use crate::control::{
    JoinSyncConfig, JoinSyncExecutor, ParallelForkConfig, ParallelForkExecutor, SwitchCaseConfig,
    SwitchCaseExecutor, WhileLoopConfig, WhileLoopExecutor,
};
use crate::decision::{
    AiDecisionConfig, AiDecisionExecutor, EvaluateConditionConfig, EvaluateConditionExecutor,
};
use crate::executor::{parse_config, Executor};
use crate::funnel::{
    AiFunnelOrchestratorConfig, AiFunnelOrchestratorExecutor, DealWebhookConfig,
    DealWebhookTriggerExecutor, FunnelExitConfig, FunnelExitExecutor, PipelineTransitionConfig,
    PipelineTransitionExecutor, StageTransitionConfig, StageTransitionExecutor,
};
use crate::pipeline::{PipelineAssignmentConfig, PipelineAssignmentExecutor};
use crate::routing::{EntityRouter, RouterConfig};
use crate::triggers::{
    FormTriggerConfig, FormTriggerExecutor, TaskEventTriggerConfig, TaskEventTriggerExecutor,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// A wire id that names no executor
    #[error("unknown executor: {0}")]
    UnknownExecutor(String),

    /// A known executor with no instance in this registry
    #[error("executor not registered: {0}")]
    NotRegistered(ExecutorId),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ExecutorId, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in executor bound to `runtime`
    pub fn with_builtins(runtime: Runtime) -> Self {
        let mut registry = Self::new();
        registry
            .register(SendEmailExecutor::new(runtime.clone()))
            .register(SendNotificationExecutor::new(runtime.clone()))
            .register(RequestApprovalExecutor::new(runtime.clone()))
            .register(AutoApprovalExecutor::new(runtime.clone()))
            .register(ConnectorActionExecutor::new(runtime.clone()))
            .register(EvaluateConditionExecutor::new())
            .register(AiDecisionExecutor::new(runtime.clone()))
            .register(FormTriggerExecutor::new())
            .register(TaskEventTriggerExecutor::new())
            .register(EntityRouter::lead())
            .register(EntityRouter::deal())
            .register(EntityRouter::customer())
            .register(CampaignLeadIntakeExecutor::new(runtime.clone()))
            .register(PipelineAssignmentExecutor::new(runtime.clone()))
            .register(StageTransitionExecutor::new(runtime.clone()))
            .register(PipelineTransitionExecutor::new(runtime.clone()))
            .register(AiFunnelOrchestratorExecutor::new(runtime.clone()))
            .register(FunnelExitExecutor::new(runtime.clone()))
            .register(DealWebhookTriggerExecutor::new(runtime))
            .register(SwitchCaseExecutor::new())
            .register(WhileLoopExecutor::new())
            .register(ParallelForkExecutor::new())
            .register(JoinSyncExecutor::new());
        registry
    }

    /// Register an executor under its own id, replacing any previous one
    pub fn register<E: Executor + 'static>(&mut self, executor: E) -> &mut Self {
        self.executors.insert(executor.id(), Arc::new(executor));
        self
    }

    pub fn get(&self, id: ExecutorId) -> Option<Arc<dyn Executor>> {
        self.executors.get(&id).cloned()
    }

    /// Resolve a wire id such as "lead_router"
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        let id: ExecutorId = name
            .parse()
            .map_err(|_| RegistryError::UnknownExecutor(name.to_string()))?;
        self.get(id).ok_or(RegistryError::NotRegistered(id))
    }

    pub fn has(&self, id: ExecutorId) -> bool {
        self.executors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Registered ids in catalog order
    pub fn registered(&self) -> Vec<ExecutorId> {
        let mut ids: Vec<ExecutorId> = self.executors.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Run one step through the executor bound to `step.executor`
    pub async fn execute(
        &self,
        step: &Step,
        input: &InputData,
        context: &ExecutionContext,
    ) -> ActionExecutionResult {
        let span = tracing::info_span!(
            "executor.execute",
            step_id = %step.id,
            executor = %step.executor,
            tenant_id = %context.tenant_id,
            instance_id = %context.instance_id,
        );

        async {
            let Some(executor) = self.executors.get(&step.executor) else {
                tracing::warn!("No executor registered");
                return ActionExecutionResult::validation_error(format!(
                    "Executor {} is not registered",
                    step.executor
                ));
            };

            let result = executor.execute(step, input, context).await;
            if result.success {
                tracing::debug!(
                    decision = result.decision.as_deref(),
                    next_action = result.next_action.as_deref(),
                    "Step succeeded"
                );
            } else {
                tracing::warn!(
                    error = result.error.as_deref(),
                    message = %result.message,
                    "Step failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Definition-time check of a step: required fields first, then the
    /// executor's typed config parse and constraints.
    pub fn validate_step(step: &Step) -> Result<(), RegistryError> {
        ExecutorCatalog::builtin().validate_executor_config(step.executor, &step.config)?;

        match step.executor {
            ExecutorId::SendEmail => parse_config::<SendEmailConfig>(step).map(drop),
            ExecutorId::SendNotification => parse_config::<SendNotificationConfig>(step).map(drop),
            ExecutorId::RequestApproval => parse_config::<RequestApprovalConfig>(step).map(drop),
            ExecutorId::AutoApproval => parse_config::<AutoApprovalConfig>(step).map(drop),
            ExecutorId::ConnectorAction => parse_config::<ConnectorActionConfig>(step).map(drop),
            ExecutorId::EvaluateCondition => {
                parse_config::<EvaluateConditionConfig>(step).map(drop)
            }
            ExecutorId::AiDecision => parse_config::<AiDecisionConfig>(step).map(drop),
            ExecutorId::FormTrigger => parse_config::<FormTriggerConfig>(step).map(drop),
            ExecutorId::TaskEventTrigger => parse_config::<TaskEventTriggerConfig>(step).map(drop),
            ExecutorId::LeadRouter | ExecutorId::DealRouter | ExecutorId::CustomerRouter => {
                parse_config::<RouterConfig>(step).map(drop)
            }
            ExecutorId::CampaignLeadIntake => {
                parse_config::<CampaignLeadIntakeConfig>(step).map(drop)
            }
            ExecutorId::PipelineAssignment => {
                parse_config::<PipelineAssignmentConfig>(step).map(drop)
            }
            ExecutorId::StageTransition => parse_config::<StageTransitionConfig>(step).map(drop),
            ExecutorId::PipelineTransition => {
                parse_config::<PipelineTransitionConfig>(step).map(drop)
            }
            ExecutorId::AiFunnelOrchestrator => {
                parse_config::<AiFunnelOrchestratorConfig>(step).map(drop)
            }
            ExecutorId::FunnelExit => parse_config::<FunnelExitConfig>(step).map(drop),
            ExecutorId::DealWebhookTrigger => parse_config::<DealWebhookConfig>(step).map(drop),
            ExecutorId::SwitchCase => parse_config::<SwitchCaseConfig>(step).map(drop),
            ExecutorId::WhileLoop => parse_config::<WhileLoopConfig>(step).map(drop),
            ExecutorId::ParallelFork => parse_config::<ParallelForkConfig>(step).map(drop),
            ExecutorId::JoinSync => parse_config::<JoinSyncConfig>(step).map(drop),
        }?;
        Ok(())
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.registered().iter().map(|id| id.as_str()).collect();
        f.debug_struct("ExecutorRegistry")
            .field("executors", &names)
            .finish()
    }
}
