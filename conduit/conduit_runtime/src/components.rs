//! Built-in components every node can run.

use async_trait::async_trait;
use conduit_core::ServiceError;
use conduit_workflow::{Component, ComponentFactory, ComponentInstantiation, OutputBinding};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Component id of [`DelayComponent`].
pub const DELAY_COMPONENT: &str = "delay";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DelaySettings {
    duration_ms: u64,
    fail: bool,
}

/// Waits for a configured time, then succeeds or fails as configured.
///
/// Configuration: `{ "duration_ms": 250, "fail": false }`.
pub struct DelayComponent {
    name: String,
    settings: DelaySettings,
}

#[async_trait]
impl Component for DelayComponent {
    async fn prepare(&self, outputs: &[OutputBinding]) -> Result<(), ServiceError> {
        for binding in outputs {
            debug!(
                "{}.{} feeds {}.{} on {}",
                self.name, binding.output, binding.target.name, binding.input, binding.target.node
            );
        }
        Ok(())
    }

    async fn run(&self) -> Result<(), ServiceError> {
        info!("{} running for {} ms", self.name, self.settings.duration_ms);
        tokio::time::sleep(Duration::from_millis(self.settings.duration_ms)).await;
        if self.settings.fail {
            return Err(ServiceError::Failed(format!("{} was configured to fail", self.name)));
        }
        Ok(())
    }
}

pub struct DelayComponentFactory;

impl ComponentFactory for DelayComponentFactory {
    fn create(
        &self,
        instantiation: &ComponentInstantiation,
    ) -> Result<Arc<dyn Component>, ServiceError> {
        let configuration = &instantiation.component.configuration;
        let settings = if configuration.is_null() {
            DelaySettings::default()
        } else {
            serde_json::from_value(configuration.clone()).map_err(|e| {
                ServiceError::InvalidArguments(format!(
                    "configuration of {}: {}",
                    instantiation.name, e
                ))
            })?
        };
        Ok(Arc::new(DelayComponent {
            name: instantiation.name.clone(),
            settings,
        }))
    }
}
