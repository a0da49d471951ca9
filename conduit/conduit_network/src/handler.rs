//! Ordered request-handler chain.
//!
//! Incoming requests are matched against `(predicate, handler)` entries in
//! registration order; the first entry whose predicate accepts the request
//! handles it.

use crate::model::{NetworkRequest, NetworkResponse};
use async_trait::async_trait;
use conduit_core::{CommunicationError, NodeIdentifier};
use parking_lot::RwLock;
use std::sync::Arc;

/// Handles requests selected by a chain entry.
#[async_trait]
pub trait NetworkRequestHandler: Send + Sync {
    async fn handle_request(
        &self,
        request: &NetworkRequest,
        source: &NodeIdentifier,
    ) -> Result<NetworkResponse, CommunicationError>;
}

/// Decides whether an entry applies to a request.
pub type RequestPredicate = Arc<dyn Fn(&NetworkRequest) -> bool + Send + Sync>;

/// Predicate selecting requests of one metadata category.
pub fn category_predicate(category: &'static str) -> RequestPredicate {
    Arc::new(move |request: &NetworkRequest| request.category() == Some(category))
}

struct HandlerEntry {
    name: String,
    predicate: RequestPredicate,
    handler: Arc<dyn NetworkRequestHandler>,
}

#[derive(Default)]
pub struct RequestHandlerChain {
    entries: RwLock<Vec<HandlerEntry>>,
}

impl RequestHandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        name: impl Into<String>,
        predicate: RequestPredicate,
        handler: Arc<dyn NetworkRequestHandler>,
    ) {
        self.entries.write().push(HandlerEntry {
            name: name.into(),
            predicate,
            handler,
        });
    }

    /// First applicable handler. The lock is released before returning so the
    /// handler runs outside it.
    pub fn find(
        &self,
        request: &NetworkRequest,
    ) -> Option<(String, Arc<dyn NetworkRequestHandler>)> {
        self.entries
            .read()
            .iter()
            .find(|entry| (entry.predicate)(request))
            .map(|entry| (entry.name.clone(), entry.handler.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answers health-check probes by echoing their payload.
pub struct HealthCheckRequestHandler;

#[async_trait]
impl NetworkRequestHandler for HealthCheckRequestHandler {
    async fn handle_request(
        &self,
        request: &NetworkRequest,
        _source: &NodeIdentifier,
    ) -> Result<NetworkResponse, CommunicationError> {
        Ok(NetworkResponse::success(request, request.content.clone()))
    }
}
