use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::app::{AppConfig, AppName, HandlerManifest, ResourceLimits, VersionTag};
use crate::error::{HostError, HostResult};
use crate::rpc::RpcBridge;
use crate::transport::{CallParams, Payload, RequestSnapshot, ResponseSnapshot};

const NATIVE_EXTENSIONS: &[&str] = &["node", "so", "dylib"];

/// Module-access policy a sandbox enforces when the application imports
/// dependencies. Path imports are confined to the application directory;
/// everything else must be allow-listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulePolicy {
    pub app_dir: PathBuf,
    pub allowed_modules: HashSet<String>,
    pub load_dependencies_in_sandbox: bool,
}

impl ModulePolicy {
    pub fn new(
        app_dir: impl Into<PathBuf>,
        allowed_modules: HashSet<String>,
        load_dependencies_in_sandbox: bool,
    ) -> Self {
        Self {
            app_dir: app_dir.into(),
            allowed_modules,
            load_dependencies_in_sandbox,
        }
    }

    /// Checks one import specifier. The allow-list entry `"*"` admits
    /// every module id. Native extensions are deprecated; they pass only
    /// when allow-listed, with a warning.
    pub fn permits(&self, specifier: &str) -> HostResult<()> {
        if has_native_extension(specifier) {
            if self.is_allowed(specifier) {
                warn!("loading the native extension ({specifier}) is deprecated");
                return Ok(());
            }
            return Err(HostError::ModuleDenied(format!(
                "native extension not allow-listed: {specifier}"
            )));
        }
        if specifier.starts_with('/') || specifier.starts_with('.') {
            return self.permits_path(Path::new(specifier));
        }
        if self.is_allowed(specifier) {
            Ok(())
        } else {
            Err(HostError::ModuleDenied(format!(
                "module not allow-listed: {specifier}"
            )))
        }
    }

    fn permits_path(&self, path: &Path) -> HostResult<()> {
        let resolved = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.app_dir.join(path))
        };
        if resolved.starts_with(normalize(&self.app_dir)) {
            Ok(())
        } else {
            Err(HostError::ModuleDenied(format!(
                "path import escapes the application directory: {}",
                path.display()
            )))
        }
    }

    fn is_allowed(&self, specifier: &str) -> bool {
        self.allowed_modules.contains("*") || self.allowed_modules.contains(specifier)
    }
}

fn has_native_extension(specifier: &str) -> bool {
    Path::new(specifier)
        .extension()
        .and_then(|x| x.to_str())
        .is_some_and(|x| NATIVE_EXTENSIONS.iter().any(|e| x.eq_ignore_ascii_case(e)))
}

/// Lexical normalization; never touches the filesystem, so the target
/// does not have to exist.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            x => out.push(x),
        }
    }
    out
}

/// Everything a sandbox needs to load one application version.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    pub app: AppName,
    pub version: VersionTag,
    pub entry_dir: PathBuf,
    pub policy: ModulePolicy,
    pub limits: ResourceLimits,
}

impl AppDescriptor {
    pub fn new(
        app: AppName,
        version: VersionTag,
        entry_dir: impl Into<PathBuf>,
        config: &AppConfig,
    ) -> Self {
        let entry_dir = entry_dir.into();
        Self {
            policy: ModulePolicy::new(
                entry_dir.clone(),
                config.allowed_modules.clone(),
                config.load_dependencies_in_sandbox,
            ),
            limits: config.resource_limits.clone(),
            app,
            version,
            entry_dir,
        }
    }
}

/// The execution-sandbox capability. Implementations pick the isolation
/// mechanism; the pool only relies on this contract.
#[async_trait]
pub trait Sandbox: Send + Sync + 'static {
    async fn load(&self, descriptor: &AppDescriptor) -> HostResult<Arc<dyn AppInstance>>;
}

/// One loaded application instance inside a sandbox.
#[async_trait]
pub trait AppInstance: Send + Sync + 'static {
    /// Declared handlers, in declaration order.
    fn handlers(&self) -> HandlerManifest;

    async fn invoke(&self, call: HandlerCall) -> HostResult<HandlerOutcome>;
}

/// One handler invocation as the application instance sees it.
pub struct HandlerCall {
    pub handler: String,
    pub params: CallParams,
    pub rpc: RpcBridge,
}

pub type HandlerStream = BoxStream<'static, HostResult<Bytes>>;

pub enum HandlerOutcome {
    Complete {
        data: Payload,
        request: Option<RequestSnapshot>,
        response: Option<ResponseSnapshot>,
    },
    Stream {
        stream: HandlerStream,
        request: Option<RequestSnapshot>,
        response: Option<ResponseSnapshot>,
    },
}

impl HandlerOutcome {
    pub fn value(data: impl Into<Payload>) -> Self {
        HandlerOutcome::Complete {
            data: data.into(),
            request: None,
            response: None,
        }
    }

    pub fn http(
        data: impl Into<Payload>,
        request: RequestSnapshot,
        response: ResponseSnapshot,
    ) -> Self {
        HandlerOutcome::Complete {
            data: data.into(),
            request: Some(request),
            response: Some(response),
        }
    }

    pub fn stream(stream: impl Stream<Item = HostResult<Bytes>> + Send + 'static) -> Self {
        HandlerOutcome::Stream {
            stream: Box::pin(stream),
            request: None,
            response: None,
        }
    }
}
