// Runtime: the capability bundle injected into every executor
//
// One Runtime per host application. Executors hold a clone (all fields are
// Arcs) and never reach outside it.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Result, RuntimeError};
use crate::http::HttpWebhookClient;
use crate::notify::NotificationDispatcher;
use crate::traits::{
    AiProvider, Database, ExternalConnector, FunnelExitHooks, Logger, LoggingExitHooks, Notifier,
    TracingLogger, WebhookClient,
};

#[derive(Clone)]
pub struct Runtime {
    pub logger: Arc<dyn Logger>,
    pub notifications: Arc<dyn Notifier>,
    pub ai: Arc<dyn AiProvider>,
    pub external_connector: Arc<dyn ExternalConnector>,
    pub database: Arc<dyn Database>,
    pub webhooks: Arc<dyn WebhookClient>,
    pub exit_hooks: Arc<dyn FunnelExitHooks>,
    /// Non-blocking queue in front of `notifications`
    pub dispatcher: NotificationDispatcher,
    pub config: EngineConfig,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Runtime`]
///
/// Database, notifier, AI provider and external connector are required.
/// Logger, webhook client and exit hooks default to TracingLogger,
/// HttpWebhookClient and LoggingExitHooks.
#[derive(Default)]
pub struct RuntimeBuilder {
    logger: Option<Arc<dyn Logger>>,
    notifications: Option<Arc<dyn Notifier>>,
    ai: Option<Arc<dyn AiProvider>>,
    external_connector: Option<Arc<dyn ExternalConnector>>,
    database: Option<Arc<dyn Database>>,
    webhooks: Option<Arc<dyn WebhookClient>>,
    exit_hooks: Option<Arc<dyn FunnelExitHooks>>,
    config: Option<EngineConfig>,
}

impl RuntimeBuilder {
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn notifications(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifications = Some(notifier);
        self
    }

    pub fn ai(mut self, ai: Arc<dyn AiProvider>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn external_connector(mut self, connector: Arc<dyn ExternalConnector>) -> Self {
        self.external_connector = Some(connector);
        self
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn webhooks(mut self, webhooks: Arc<dyn WebhookClient>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    pub fn exit_hooks(mut self, hooks: Arc<dyn FunnelExitHooks>) -> Self {
        self.exit_hooks = Some(hooks);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Assemble the runtime and start the notification worker.
    ///
    /// Returns a configuration error when called outside a tokio runtime.
    pub fn build(self) -> Result<Runtime> {
        let config = self.config.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger) as Arc<dyn Logger>);

        let notifications = require(self.notifications, "notifications")?;
        let ai = require(self.ai, "ai")?;
        let external_connector = require(self.external_connector, "external_connector")?;
        let database = require(self.database, "database")?;

        let webhooks = self.webhooks.unwrap_or_else(|| {
            Arc::new(HttpWebhookClient::new(config.webhook_timeout())) as Arc<dyn WebhookClient>
        });
        let exit_hooks = self
            .exit_hooks
            .unwrap_or_else(|| Arc::new(LoggingExitHooks) as Arc<dyn FunnelExitHooks>);

        let dispatcher = NotificationDispatcher::spawn(
            notifications.clone(),
            logger.clone(),
            config.notification_queue_capacity,
        )?;

        Ok(Runtime {
            logger,
            notifications,
            ai,
            external_connector,
            database,
            webhooks,
            exit_hooks,
            dispatcher,
            config,
        })
    }
}

fn require<T: ?Sized>(capability: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
    capability.ok_or_else(|| {
        RuntimeError::configuration(format!("runtime capability '{}' was not provided", name))
    })
}
