//! Request/response envelope, metadata and contact points.
//!
//! The envelope semantics here are the contract every transport preserves:
//! a request id correlates a response with its request, and the response
//! carries one of the result codes in [`ResultCode`].

use conduit_core::{CommunicationError, NodeIdentifier, RequestId, ServiceError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Address used to initiate a connection: `transport:host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkContactPoint {
    pub transport_id: String,
    pub host: String,
    pub port: u16,
}

impl NetworkContactPoint {
    pub fn new(transport_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport_id: transport_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkContactPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.transport_id, self.host, self.port)
    }
}

impl FromStr for NetworkContactPoint {
    type Err = CommunicationError;

    /// The host part may itself contain colons (IPv6), so the transport id is
    /// split at the first colon and the port at the last one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CommunicationError::InvalidContactPoint(s.to_string());
        let (transport_id, rest) = s.trim().split_once(':').ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if transport_id.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(transport_id, host, port))
    }
}

/// Typed access to the string metadata carried by requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaData(HashMap<String, String>);

impl MetaData {
    pub const KEY_CATEGORY: &'static str = "category";
    pub const KEY_MESSAGE_TYPE: &'static str = "type";
    pub const KEY_SENDER: &'static str = "sender";
    pub const KEY_RECEIVER: &'static str = "receiver";
    pub const KEY_MESSAGE_ID: &'static str = "messageid";
    pub const KEY_HOP_COUNT: &'static str = "hopcount";
    pub const KEY_TRACE: &'static str = "trace";

    pub const CATEGORY_ROUTING: &'static str = "routing";
    pub const CATEGORY_HEALTH_CHECK: &'static str = "healthCheck";
    pub const CATEGORY_SERVICE_CALL: &'static str = "serviceCall";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn category(self, category: &str) -> Self {
        self.with(Self::KEY_CATEGORY, category)
    }

    pub fn message_type(self, message_type: &str) -> Self {
        self.with(Self::KEY_MESSAGE_TYPE, message_type)
    }

    pub fn sender(self, node: &NodeIdentifier) -> Self {
        self.with(Self::KEY_SENDER, node.as_str())
    }

    pub fn receiver(self, node: &NodeIdentifier) -> Self {
        self.with(Self::KEY_RECEIVER, node.as_str())
    }

    pub fn hop_count(self, hops: u32) -> Self {
        self.with(Self::KEY_HOP_COUNT, hops.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_category(&self) -> Option<&str> {
        self.get(Self::KEY_CATEGORY)
    }

    pub fn get_receiver(&self) -> Option<NodeIdentifier> {
        self.get(Self::KEY_RECEIVER).map(NodeIdentifier::new)
    }

    /// Missing or unparsable hop counts read as zero.
    pub fn get_hop_count(&self) -> u32 {
        self.get(Self::KEY_HOP_COUNT)
            .and_then(|hops| hops.parse().ok())
            .unwrap_or(0)
    }

    /// True if every entry of `filter` is present with the same value.
    pub fn matches(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.0
    }
}

/// A request travelling over a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub request_id: RequestId,
    pub content: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl NetworkRequest {
    pub fn new(content: Vec<u8>, mut metadata: HashMap<String, String>) -> Self {
        let request_id = RequestId::new();
        metadata.insert(MetaData::KEY_MESSAGE_ID.to_string(), request_id.to_string());
        Self {
            request_id,
            content,
            metadata,
        }
    }

    pub fn metadata(&self) -> MetaData {
        MetaData::wrap(self.metadata.clone())
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata
            .get(MetaData::KEY_CATEGORY)
            .map(String::as_str)
    }
}

/// Outcome classification carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Undefined,
    Success,
    NoMatchingHandler,
    ExceptionWhileRouting,
    ExceptionAtDestination,
}

impl ResultCode {
    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Undefined => 0,
            ResultCode::Success => 1,
            ResultCode::NoMatchingHandler => 2,
            ResultCode::ExceptionWhileRouting => 3,
            ResultCode::ExceptionAtDestination => 4,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ResultCode::Success,
            2 => ResultCode::NoMatchingHandler,
            3 => ResultCode::ExceptionWhileRouting,
            4 => ResultCode::ExceptionAtDestination,
            _ => ResultCode::Undefined,
        }
    }
}

/// A response correlated to the request with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub request_id: RequestId,
    pub content: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl NetworkResponse {
    pub const KEY_RESULT_CODE: &'static str = "response.resultCode";

    pub fn new(request: &NetworkRequest, content: Vec<u8>, code: ResultCode) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(Self::KEY_RESULT_CODE.to_string(), code.code().to_string());
        Self {
            request_id: request.request_id,
            content,
            metadata,
        }
    }

    pub fn success(request: &NetworkRequest, content: Vec<u8>) -> Self {
        Self::new(request, content, ResultCode::Success)
    }

    pub fn no_matching_handler(request: &NetworkRequest) -> Self {
        Self::new(request, Vec::new(), ResultCode::NoMatchingHandler)
    }

    /// The request failed on its way, at `node`.
    pub fn exception_while_routing(
        request: &NetworkRequest,
        node: &NodeIdentifier,
        cause: &str,
    ) -> Self {
        let message = format!("{} (at node {})", cause, node);
        let content = serde_json::to_vec(&message).unwrap_or_else(|_| message.into_bytes());
        Self::new(request, content, ResultCode::ExceptionWhileRouting)
    }

    /// The request reached its destination and the invoked operation failed.
    pub fn exception_at_destination(request: &NetworkRequest, fault: &ServiceError) -> Self {
        let content = serde_json::to_vec(fault).unwrap_or_else(|_| fault.to_string().into_bytes());
        Self::new(request, content, ResultCode::ExceptionAtDestination)
    }

    pub fn result_code(&self) -> ResultCode {
        self.metadata
            .get(Self::KEY_RESULT_CODE)
            .and_then(|code| code.parse().ok())
            .map(ResultCode::from_code)
            .unwrap_or(ResultCode::Undefined)
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == ResultCode::Success
    }

    /// Interpret the response as the result of a typed remote call.
    pub fn into_outcome<T: DeserializeOwned>(self) -> CallOutcome<T> {
        match self.result_code() {
            ResultCode::Success => match deserialize(&self.content) {
                Ok(value) => CallOutcome::Ok(value),
                Err(e) => CallOutcome::DestinationError(ServiceError::Failed(format!(
                    "Undecodable result: {}",
                    e
                ))),
            },
            ResultCode::ExceptionAtDestination => CallOutcome::DestinationError(
                deserialize(&self.content).unwrap_or_else(|_| {
                    ServiceError::Failed(String::from_utf8_lossy(&self.content).into_owned())
                }),
            ),
            ResultCode::ExceptionWhileRouting => CallOutcome::RoutingError(
                deserialize(&self.content)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&self.content).into_owned()),
            ),
            ResultCode::NoMatchingHandler => {
                CallOutcome::RoutingError("No matching handler at the receiving node".to_string())
            }
            ResultCode::Undefined => {
                CallOutcome::RoutingError("Response carried no result code".to_string())
            }
        }
    }
}

/// Three-way result of a remote call.
///
/// `RoutingError` means the request never reached anything that could execute
/// it; `DestinationError` means it did and the operation failed there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Ok(T),
    RoutingError(String),
    DestinationError(ServiceError),
}

impl<T> CallOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            CallOutcome::Ok(value) => CallOutcome::Ok(f(value)),
            CallOutcome::RoutingError(message) => CallOutcome::RoutingError(message),
            CallOutcome::DestinationError(fault) => CallOutcome::DestinationError(fault),
        }
    }

    /// Collapse into a `Result`, keeping the destination fault as is.
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            CallOutcome::Ok(value) => Ok(value),
            CallOutcome::RoutingError(message) => Err(ServiceError::Unreachable(message)),
            CallOutcome::DestinationError(fault) => Err(fault),
        }
    }
}

pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CommunicationError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CommunicationError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Best-effort readable form of a payload for log output.
pub fn describe_payload(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => value.to_string(),
        Err(_) => format!("<{} bytes of undecodable content>", bytes.len()),
    }
}
