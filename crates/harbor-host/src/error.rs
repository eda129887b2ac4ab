use std::fmt;
use std::sync::PoisonError;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;

use crate::app::{AppName, CallInfo};

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("no route matched ({method})[{path}] for app ({app})")]
    RouteNotMatched {
        app: AppName,
        method: String,
        path: String,
    },
    #[error("unknown app: {app}")]
    UnknownApp { app: AppName },
    #[error("handler ({app}.{handler}) does not exist")]
    HandlerNotFound { app: AppName, handler: String },
    #[error("worker initialization failed: {0}")]
    InitError(String),
    #[error("worker for app ({app}) has exited{}", exit_detail(.last_call))]
    WorkerExited {
        app: AppName,
        last_call: Option<CallInfo>,
    },
    #[error("call {call} timed out after {window:?}")]
    CallTimeout { window: Duration, call: CallInfo },
    #[error("module denied: {0}")]
    ModuleDenied(String),
    #[error("{0}")]
    ApplicationError(ErrorDescription),
    #[error("invalid rpc target: {0}")]
    InvalidRpcTarget(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("serialization error: {0}")]
    JsonError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

fn exit_detail(last_call: &Option<CallInfo>) -> String {
    match last_call {
        Some(call) => format!(" (last call: {call})"),
        None => String::new(),
    }
}

impl HostError {
    pub fn internal(message: impl Into<String>) -> Self {
        HostError::InternalError(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        HostError::InvalidArgument(message.into())
    }
}

impl From<std::io::Error> for HostError {
    fn from(error: std::io::Error) -> Self {
        HostError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(error: serde_json::Error) -> Self {
        HostError::JsonError(error.to_string())
    }
}

impl From<JoinError> for HostError {
    fn from(error: JoinError) -> Self {
        HostError::InternalError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for HostError {
    fn from(error: PoisonError<T>) -> Self {
        HostError::InternalError(error.to_string())
    }
}

/// Wire-safe error shape. Whatever a handler raises is reduced to this
/// before crossing the worker boundary, so error reporting itself can
/// never fail to serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescription {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorDescription {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl fmt::Display for ErrorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<&HostError> for ErrorDescription {
    fn from(error: &HostError) -> Self {
        let name = match error {
            HostError::RouteNotMatched { .. } => "RoutingError",
            HostError::UnknownApp { .. } => "UnknownAppError",
            HostError::HandlerNotFound { .. } => "HandlerNotFoundError",
            HostError::InitError(_) => "InitError",
            HostError::WorkerExited { .. } => "WorkerExitedError",
            HostError::CallTimeout { .. } => "TimeoutError",
            HostError::ModuleDenied(_) => "ModuleDeniedError",
            HostError::ApplicationError(description) => return description.clone(),
            HostError::InvalidRpcTarget(_) | HostError::InvalidArgument(_) => "InvalidArgumentError",
            HostError::IoError(_) => "IoError",
            HostError::JsonError(_) => "SerializationError",
            HostError::InternalError(_) => "InternalError",
        };
        Self::new(name, error.to_string())
    }
}

impl From<ErrorDescription> for HostError {
    fn from(description: ErrorDescription) -> Self {
        HostError::ApplicationError(description)
    }
}
