//! Sends a login command shortly after connecting
//!
//! ```json
//! { "enabled": true, "loginCommand": "/login secret", "delayMs": 1500 }
//! ```

use herald_host::extension::{Extension, ExtensionError};
use herald_host::lifecycle::ENVIRONMENT_CONNECTED;
use herald_host::ExtensionContext;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "auto-login";

fn default_delay_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoLoginConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub login_command: Option<String>,
    #[serde(default = "default_delay_ms", alias = "delay")]
    pub delay_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoLogin;

impl Extension for AutoLogin {
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        let config: AutoLoginConfig = ctx.config().deserialize()?;
        if !config.enabled {
            tracing::info!(extension = %ctx.name(), "Auto-login disabled");
            return Ok(());
        }
        let Some(command) = config.login_command.filter(|c| !c.trim().is_empty()) else {
            return Err(ExtensionError::Config(
                "loginCommand is required when auto-login is enabled".into(),
            ));
        };

        let env = ctx.environment().clone();
        let delay = Duration::from_millis(config.delay_ms);
        let sent = Arc::new(AtomicBool::new(false));
        ctx.lifecycle().subscribe(ENVIRONMENT_CONNECTED, move |_| {
            if sent.swap(true, Ordering::SeqCst) {
                return;
            }
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::error!("No async runtime, cannot schedule login command");
                return;
            };
            tracing::info!(delay_ms = delay.as_millis() as u64, "Connected, scheduling login command");
            let env = env.clone();
            let command = command.clone();
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                tracing::info!("Sending login command");
                env.send_message(&command);
            });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_api::testing::RecordingEnvironment;
    use herald_host::permission::PermissionStore;
    use herald_host::{ExtensionConfig, Services};
    use serde_json::{json, Value};

    fn register(config: Value) -> (Arc<RecordingEnvironment>, Services, Result<(), ExtensionError>) {
        let env = Arc::new(RecordingEnvironment::new("herald"));
        let services = Services::new(env.clone(), Arc::new(PermissionStore::default()));
        let ctx = ExtensionContext::new(NAME, ExtensionConfig::from_value(config), services.clone());
        let result = AutoLogin.register(&ctx);
        (env, services, result)
    }

    #[test]
    fn test_disabled_subscribes_nothing() {
        let (_, services, result) = register(json!({ "loginCommand": "/login x" }));
        assert!(result.is_ok());
        assert_eq!(services.lifecycle.listener_count(ENVIRONMENT_CONNECTED), 0);
    }

    #[test]
    fn test_enabled_without_command_is_config_error() {
        let (_, services, result) = register(json!({ "enabled": true }));
        assert!(matches!(result, Err(ExtensionError::Config(_))));
        assert_eq!(services.lifecycle.listener_count(ENVIRONMENT_CONNECTED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_once_after_delay() {
        let (env, services, result) =
            register(json!({ "enabled": true, "loginCommand": "/login hunter2", "delay": 200 }));
        result.unwrap();

        services.lifecycle.emit(ENVIRONMENT_CONNECTED, Value::Null);
        services.lifecycle.emit(ENVIRONMENT_CONNECTED, Value::Null);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(env.messages().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(env.messages(), vec!["/login hunter2".to_string()]);
    }
}
