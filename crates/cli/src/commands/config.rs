// Effective engine configuration

use crate::output::{print_field, OutputFormat};
use anyhow::Result;
use stepwise_core::EngineConfig;

pub fn run(output: OutputFormat) -> Result<()> {
    let config = EngineConfig::from_env();
    if !output.is_text() {
        return output.print_value(&config);
    }

    print_field("Auto-assign threshold", &config.auto_assign_threshold.to_string());
    print_field(
        "Notification queue",
        &config.notification_queue_capacity.to_string(),
    );
    print_field(
        "Webhook timeout",
        &format!("{}s", config.webhook_timeout_secs),
    );
    print_field("Default AI model", &config.default_ai_model);
    print_field("Default AI max tokens", &config.default_ai_max_tokens.to_string());
    print_field(
        "Default AI temperature",
        &config.default_ai_temperature.to_string(),
    );
    print_field("Default AI decision", &config.default_ai_decision);
    Ok(())
}
