use std::sync::Arc;

use crate::app::{AppBinding, AppName, AppResolver, CallKind, DefaultAppResolver};
use crate::error::{HostError, HostResult};
use crate::pool::WorkPool;
use crate::stream::CallStream;
use crate::transport::{CallParams, Payload, RequestSnapshot, ResponseSnapshot};
use crate::worker::{ExecuteCall, Outcome, WorkerHandle};

/// Front door for external traffic. Maps a request to an application,
/// matches a route inside it, and dispatches the call to a pooled
/// worker. The gateway holds no worker state of its own.
pub struct Gateway {
    pool: WorkPool,
    app_resolver: Arc<dyn AppResolver>,
}

/// Everything a transport needs to write an HTTP response: the final
/// request and response snapshots as the handler left them, plus the
/// body.
#[derive(Debug)]
pub struct HttpReply {
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    pub body: ReplyBody,
}

#[derive(Debug)]
pub enum ReplyBody {
    Complete(Payload),
    Stream(CallStream),
}

impl Gateway {
    pub fn new(pool: WorkPool, app_resolver: Arc<dyn AppResolver>) -> Self {
        Self { pool, app_resolver }
    }

    /// A gateway that derives the application from the first path
    /// segment, which is the common single-host layout.
    pub fn with_default_resolver(pool: WorkPool) -> Self {
        Self::new(pool, Arc::new(DefaultAppResolver))
    }

    pub fn pool(&self) -> &WorkPool {
        &self.pool
    }

    /// Dispatches one HTTP request. Route parameters are filled into the
    /// request before the handler sees it.
    pub async fn handle_request(
        &self,
        mut request: RequestSnapshot,
        response: ResponseSnapshot,
    ) -> HostResult<HttpReply> {
        let binding = self.resolve_binding(&request).await?;
        let worker = self
            .acquire(&binding, &request.method, &request.path)
            .await?;
        let suffix = strip_prefix(&binding.path_prefix, &request.path);
        let routes = worker.route_table()?;
        let Some(matched) = routes.match_route(&[CallKind::Http], &request.method, &suffix) else {
            return Err(HostError::RouteNotMatched {
                app: binding.app,
                method: request.method,
                path: request.path,
            });
        };
        request.params = matched.params;
        let call = ExecuteCall::new(matched.handler, CallParams::Http { request, response });
        let outcome = worker.execute(call).await?;
        Ok(reply_from(outcome))
    }

    /// Dispatches one WebSocket frame to the handler whose route matches
    /// the upgrade path.
    pub async fn handle_socket_message(
        &self,
        request: &RequestSnapshot,
        frame: Payload,
    ) -> HostResult<ReplyBody> {
        let binding = self.resolve_binding(request).await?;
        let worker = self
            .acquire(&binding, &request.method, &request.path)
            .await?;
        let suffix = strip_prefix(&binding.path_prefix, &request.path);
        let routes = worker.route_table()?;
        let Some(matched) = routes.match_route(&[CallKind::WebSocket], &request.method, &suffix)
        else {
            return Err(HostError::RouteNotMatched {
                app: binding.app,
                method: request.method.clone(),
                path: request.path.clone(),
            });
        };
        let mut request = request.clone();
        request.params = matched.params;
        let call = ExecuteCall::new(matched.handler, CallParams::WebSocket { request, frame });
        let outcome = worker.execute(call).await?;
        Ok(match outcome.stream {
            Some(stream) => ReplyBody::Stream(stream),
            None => ReplyBody::Complete(outcome.data),
        })
    }

    async fn resolve_binding(&self, request: &RequestSnapshot) -> HostResult<AppBinding> {
        if let Some(binding) = self.app_resolver.resolve(request).await? {
            return Ok(binding);
        }
        derive_binding(&request.path)
    }

    /// An unknown application reads as an unmatched route from the
    /// outside, so probing paths cannot tell apps apart from routes.
    async fn acquire(
        &self,
        binding: &AppBinding,
        method: &str,
        path: &str,
    ) -> HostResult<WorkerHandle> {
        let version = self.pool.resolve_version(&binding.app).await?;
        match self.pool.get_worker(&binding.app, &version).await {
            Ok(worker) => Ok(worker),
            Err(HostError::UnknownApp { app }) => Err(HostError::RouteNotMatched {
                app,
                method: method.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

fn derive_binding(path: &str) -> HostResult<AppBinding> {
    let name = path
        .strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .next()
        .unwrap_or("");
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|x| x.is_ascii_alphanumeric() || x == b'_' || x == b'-');
    if !valid {
        return Err(HostError::invalid(format!(
            "cannot derive an application from path ({path})"
        )));
    }
    Ok(AppBinding {
        app: AppName::from(name),
        path_prefix: format!("/{name}"),
    })
}

/// Path as the application sees it, with the mount prefix removed. An
/// exact prefix match with nothing after it becomes the root path.
fn strip_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

fn reply_from(outcome: Outcome) -> HttpReply {
    let Outcome {
        data,
        request,
        response,
        stream,
    } = outcome;
    HttpReply {
        request: request.unwrap_or_default(),
        response: response.unwrap_or_default(),
        body: match stream {
            Some(stream) => ReplyBody::Stream(stream),
            None => ReplyBody::Complete(data),
        },
    }
}
