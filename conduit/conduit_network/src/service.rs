//! Service calls: the payload carried by `serviceCall` requests and the
//! terminal handler that executes them on the destination node.

use crate::model::{self, NetworkRequest, NetworkResponse};
use async_trait::async_trait;
use conduit_core::{NodeIdentifier, ServiceError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Description of one remote method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub target_node: NodeIdentifier,
    pub calling_node: NodeIdentifier,
    pub service: String,
    pub method: String,
    pub arguments: Vec<Value>,
}

/// A local object whose methods can be invoked through service calls.
#[async_trait]
pub trait RemotableService: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError>;
}

/// Decode argument `index` of a service call.
pub fn argument<T: DeserializeOwned>(arguments: &[Value], index: usize) -> Result<T, ServiceError> {
    let value = arguments.get(index).cloned().ok_or_else(|| {
        ServiceError::InvalidArguments(format!("missing argument {}", index))
    })?;
    serde_json::from_value(value)
        .map_err(|e| ServiceError::InvalidArguments(format!("argument {}: {}", index, e)))
}

/// Encode a service method's return value.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::Failed(format!("Result is not serializable: {}", e)))
}

/// Services published by this node, keyed by name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<dyn RemotableService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, service: Arc<dyn RemotableService>) {
        let key = key.into();
        debug!("Registering service {}", key);
        self.services.insert(key, service);
    }

    pub fn unregister(&self, key: &str) -> bool {
        debug!("Unregistering service {}", key);
        self.services.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn RemotableService>> {
        self.services.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }
}

/// Terminal stage for a request that has reached its destination node.
#[async_trait]
pub trait RequestPayloadHandler: Send + Sync {
    async fn handle_request(&self, request: &NetworkRequest) -> NetworkResponse;
}

/// Executes [`ServiceCall`]s against the local [`ServiceRegistry`].
pub struct ServiceCallPayloadHandler {
    services: Arc<ServiceRegistry>,
    slow_call_threshold: Duration,
}

impl ServiceCallPayloadHandler {
    pub fn new(services: Arc<ServiceRegistry>, slow_call_threshold: Duration) -> Self {
        Self {
            services,
            slow_call_threshold,
        }
    }

    async fn execute(&self, call: &ServiceCall) -> Result<Value, ServiceError> {
        let service = self
            .services
            .get(&call.service)
            .ok_or_else(|| ServiceError::UnknownService(call.service.clone()))?;

        let started = Instant::now();
        let result = service
            .invoke(&call.method, call.arguments.clone(), &call.calling_node)
            .await;
        let elapsed = started.elapsed();
        if elapsed > self.slow_call_threshold {
            warn!(
                "Slow service call: {}.{} from {} took {} ms",
                call.service,
                call.method,
                call.calling_node,
                elapsed.as_millis()
            );
        } else {
            debug!(
                "Service call {}.{} from {} took {} ms",
                call.service,
                call.method,
                call.calling_node,
                elapsed.as_millis()
            );
        }
        result
    }
}

#[async_trait]
impl RequestPayloadHandler for ServiceCallPayloadHandler {
    async fn handle_request(&self, request: &NetworkRequest) -> NetworkResponse {
        let call: ServiceCall = match model::deserialize(&request.content) {
            Ok(call) => call,
            Err(e) => {
                warn!("Received an undecodable service call: {}", e);
                return NetworkResponse::exception_at_destination(
                    request,
                    &ServiceError::InvalidArguments(e.to_string()),
                );
            }
        };

        match self.execute(&call).await {
            Ok(value) => match model::serialize(&value) {
                Ok(content) => NetworkResponse::success(request, content),
                Err(e) => NetworkResponse::exception_at_destination(
                    request,
                    &ServiceError::Failed(e.to_string()),
                ),
            },
            Err(fault) => {
                debug!(
                    "Service call {}.{} failed: {}",
                    call.service, call.method, fault
                );
                NetworkResponse::exception_at_destination(request, &fault)
            }
        }
    }
}
