use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use harbor_common::config::{AppOverrides, HarborConfig, WorkerDefaults};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};
use crate::id::ExecuteId;
use crate::transport::RequestSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppName(String);

impl AppName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for AppName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for AppName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version label for one deployment of an application. The empty tag
/// means the on-disk default version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for VersionTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<&str> for VersionTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "default")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Http,
    WebSocket,
    Rpc,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Http => "http",
            CallKind::WebSocket => "websocket",
            CallKind::Rpc => "rpc",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Method comparison on requests is case-insensitive.
    pub fn matches(&self, method: &str) -> bool {
        method.eq_ignore_ascii_case(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(HostError::invalid(format!("unsupported HTTP method: {s}"))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One exposed operation of an application, declared when the application
/// instance is constructed and fixed for the lifetime of its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDeclaration {
    pub name: String,
    pub kind: CallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl HandlerDeclaration {
    pub fn http(name: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Http,
            method: Some(method),
            route: None,
        }
    }

    pub fn web_socket(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::WebSocket,
            method: None,
            route: None,
        }
    }

    pub fn rpc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CallKind::Rpc,
            method: None,
            route: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }
}

/// The handlers one application declares, in declaration order. Order is
/// significant: route matching takes the first declared match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerManifest {
    handlers: Vec<HandlerDeclaration>,
}

impl HandlerManifest {
    pub fn new(handlers: Vec<HandlerDeclaration>) -> Self {
        Self { handlers }
    }

    pub fn get(&self, name: &str) -> Option<&HandlerDeclaration> {
        self.handlers.iter().find(|x| x.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerDeclaration> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Metadata of one call, kept for diagnostics. Only the identity of the
/// call is retained, never its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub app: AppName,
    pub handler: String,
    pub kind: CallKind,
    pub execute_id: ExecuteId,
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) {}.{} [{}]",
            self.kind, self.app, self.handler, self.execute_id
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_heap_bytes: Option<u64>,
    pub max_stack_bytes: Option<u64>,
}

/// Effective per-application settings, resolved from the host defaults
/// and any per-application overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub max_workers: usize,
    pub call_timeout: Duration,
    pub recycle_window: Duration,
    pub allowed_modules: HashSet<String>,
    pub load_dependencies_in_sandbox: bool,
    pub resource_limits: ResourceLimits,
}

impl AppConfig {
    pub fn resolve(defaults: &WorkerDefaults, overrides: Option<&AppOverrides>) -> Self {
        let max_workers = overrides
            .and_then(|x| x.max_workers)
            .unwrap_or(defaults.max_workers);
        let max_workers = if max_workers == 0 {
            warn!("a worker pool cannot be empty; treating max_workers 0 as 1");
            1
        } else {
            max_workers
        };
        let call_timeout_secs = overrides
            .and_then(|x| x.call_timeout_secs)
            .unwrap_or(defaults.call_timeout_secs);
        let recycle_window_secs = overrides
            .and_then(|x| x.recycle_window_secs)
            .unwrap_or(defaults.recycle_window_secs);
        let allowed_modules = overrides
            .and_then(|x| x.allowed_modules.clone())
            .unwrap_or_else(|| defaults.allowed_modules.clone());
        let load_dependencies_in_sandbox = overrides
            .and_then(|x| x.load_dependencies_in_sandbox)
            .unwrap_or(defaults.load_dependencies_in_sandbox);
        Self {
            max_workers,
            call_timeout: Duration::from_secs(call_timeout_secs),
            recycle_window: Duration::from_secs(recycle_window_secs),
            allowed_modules: allowed_modules.into_iter().collect(),
            load_dependencies_in_sandbox,
            resource_limits: ResourceLimits {
                max_heap_bytes: overrides
                    .and_then(|x| x.max_heap_bytes)
                    .or(defaults.max_heap_bytes),
                max_stack_bytes: overrides
                    .and_then(|x| x.max_stack_bytes)
                    .or(defaults.max_stack_bytes),
            },
        }
    }
}

/// The application an inbound request belongs to, along with the path
/// prefix to strip before route matching.
#[derive(Debug, Clone, PartialEq)]
pub struct AppBinding {
    pub app: AppName,
    pub path_prefix: String,
}

#[async_trait]
pub trait AppResolver: Send + Sync {
    /// Maps an inbound request to an application, or `None` to let the
    /// gateway derive the application from the first path segment.
    async fn resolve(&self, request: &RequestSnapshot) -> HostResult<Option<AppBinding>>;
}

#[async_trait]
pub trait VersionResolver: Send + Sync {
    async fn resolve_version(&self, app: &AppName) -> HostResult<VersionTag>;
}

#[async_trait]
pub trait AppConfigProvider: Send + Sync {
    async fn config(&self, app: &AppName) -> HostResult<AppConfig>;
}

/// Leaves application resolution to the gateway's path derivation.
pub struct DefaultAppResolver;

#[async_trait]
impl AppResolver for DefaultAppResolver {
    async fn resolve(&self, _request: &RequestSnapshot) -> HostResult<Option<AppBinding>> {
        Ok(None)
    }
}

/// Resolves every application to the on-disk default version.
pub struct DefaultVersionResolver;

#[async_trait]
impl VersionResolver for DefaultVersionResolver {
    async fn resolve_version(&self, _app: &AppName) -> HostResult<VersionTag> {
        Ok(VersionTag::default())
    }
}

/// Configuration provider backed by the static host configuration.
pub struct StaticAppConfigProvider {
    defaults: WorkerDefaults,
    overrides: HashMap<String, AppOverrides>,
}

impl StaticAppConfigProvider {
    pub fn new(config: &HarborConfig) -> Self {
        Self {
            defaults: config.worker.clone(),
            overrides: config.apps.clone(),
        }
    }
}

#[async_trait]
impl AppConfigProvider for StaticAppConfigProvider {
    async fn config(&self, app: &AppName) -> HostResult<AppConfig> {
        Ok(AppConfig::resolve(
            &self.defaults,
            self.overrides.get(app.as_str()),
        ))
    }
}
