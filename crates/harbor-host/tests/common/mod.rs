#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use harbor_common::config::{AppOverrides, HarborConfig, WorkerDefaults};
use harbor_host::app::{AppName, HandlerDeclaration, HandlerManifest};
use harbor_host::error::{ErrorDescription, HostError, HostResult};
use harbor_host::pool::{PoolOptions, WorkPool};
use harbor_host::sandbox::{AppDescriptor, AppInstance, HandlerCall, HandlerOutcome, Sandbox};
use harbor_host::transport::{CallParams, Payload};
use harbor_host::{ExecuteCall, Outcome, WorkerHandle};
use serde_json::json;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn worker_defaults() -> WorkerDefaults {
    WorkerDefaults {
        max_workers: 2,
        call_timeout_secs: 30,
        recycle_window_secs: 300,
        allowed_modules: vec![],
        load_dependencies_in_sandbox: false,
        max_heap_bytes: None,
        max_stack_bytes: None,
    }
}

/// Canned handler behaviors for test applications.
#[derive(Clone)]
pub enum Behavior {
    /// Replies with the call input: the rpc payload, the websocket
    /// frame, or a JSON view of the http request.
    Echo,
    Value(Payload),
    Sleep(Duration),
    Chunks(Vec<&'static str>),
    /// Streams the chunks, then fails the stream.
    ChunksThenFail(Vec<&'static str>, &'static str),
    /// Sets the response status before replying.
    Respond { status: u16, body: &'static str },
    /// Calls another application over rpc and replies with its value.
    Invoke {
        target: &'static str,
        params: &'static str,
    },
    Fail {
        name: &'static str,
        message: &'static str,
    },
    Panic,
}

pub struct TestApp {
    manifest: HandlerManifest,
    behaviors: HashMap<String, Behavior>,
    fail_load: Option<String>,
}

impl TestApp {
    pub fn new(declarations: Vec<HandlerDeclaration>) -> Self {
        Self {
            manifest: HandlerManifest::new(declarations),
            behaviors: HashMap::new(),
            fail_load: None,
        }
    }

    pub fn rpc_app(handlers: &[&str]) -> Self {
        Self::new(
            handlers
                .iter()
                .map(|x| HandlerDeclaration::rpc(*x))
                .collect(),
        )
    }

    pub fn behavior(mut self, handler: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(handler.to_string(), behavior);
        self
    }

    pub fn failing_load(message: &str) -> Self {
        Self {
            manifest: HandlerManifest::new(vec![]),
            behaviors: HashMap::new(),
            fail_load: Some(message.to_string()),
        }
    }
}

pub struct TestSandbox {
    apps: HashMap<String, TestApp>,
    load_delay: Option<Duration>,
    loads: Mutex<HashMap<String, usize>>,
}

impl TestSandbox {
    pub fn load_count(&self, app: &str) -> usize {
        self.loads.lock().unwrap().get(app).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Sandbox for TestSandbox {
    async fn load(&self, descriptor: &AppDescriptor) -> HostResult<Arc<dyn AppInstance>> {
        let name = descriptor.app.as_str().to_string();
        *self.loads.lock().unwrap().entry(name.clone()).or_insert(0) += 1;
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        let Some(app) = self.apps.get(&name) else {
            return Err(HostError::InitError(format!(
                "no test app registered for ({name})"
            )));
        };
        if let Some(message) = &app.fail_load {
            return Err(HostError::InitError(message.clone()));
        }
        Ok(Arc::new(TestInstance {
            manifest: app.manifest.clone(),
            behaviors: app.behaviors.clone(),
        }))
    }
}

struct TestInstance {
    manifest: HandlerManifest,
    behaviors: HashMap<String, Behavior>,
}

#[async_trait]
impl AppInstance for TestInstance {
    fn handlers(&self) -> HandlerManifest {
        self.manifest.clone()
    }

    async fn invoke(&self, call: HandlerCall) -> HostResult<HandlerOutcome> {
        let behavior = self
            .behaviors
            .get(&call.handler)
            .cloned()
            .unwrap_or(Behavior::Echo);
        match behavior {
            Behavior::Echo => Ok(echo(call.params)),
            Behavior::Value(payload) => Ok(HandlerOutcome::value(payload)),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                Ok(HandlerOutcome::value("late"))
            }
            Behavior::Chunks(chunks) => Ok(HandlerOutcome::stream(futures::stream::iter(
                chunks.into_iter().map(|x| Ok(Bytes::from(x))),
            ))),
            Behavior::ChunksThenFail(chunks, message) => {
                let error = HostError::ApplicationError(ErrorDescription::new(
                    "StreamError",
                    message,
                ));
                let items = chunks
                    .into_iter()
                    .map(|x| Ok(Bytes::from(x)))
                    .chain(std::iter::once(Err(error)));
                Ok(HandlerOutcome::stream(futures::stream::iter(items)))
            }
            Behavior::Respond { status, body } => {
                let CallParams::Http {
                    request,
                    mut response,
                } = call.params
                else {
                    return Err(HostError::invalid("respond behavior expects an http call"));
                };
                response.set_status(status);
                Ok(HandlerOutcome::http(body, request, response))
            }
            Behavior::Invoke { target, params } => {
                let value = call.rpc.invoke(target, params).await?;
                Ok(HandlerOutcome::value(value))
            }
            Behavior::Fail { name, message } => Err(HostError::ApplicationError(
                ErrorDescription::new(name, message),
            )),
            Behavior::Panic => panic!("handler panic requested by the test"),
        }
    }
}

fn echo(params: CallParams) -> HandlerOutcome {
    match params {
        CallParams::Http { request, response } => {
            let body = json!({
                "path": request.path.clone(),
                "params": request.params.clone(),
            });
            HandlerOutcome::http(body, request, response)
        }
        CallParams::WebSocket { frame, .. } => HandlerOutcome::value(frame),
        CallParams::Rpc(payload) => HandlerOutcome::value(payload),
    }
}

#[derive(Default)]
pub struct FixtureBuilder {
    defaults: Option<WorkerDefaults>,
    overrides: HashMap<String, AppOverrides>,
    apps: HashMap<String, TestApp>,
    load_delay: Option<Duration>,
}

pub fn fixture() -> FixtureBuilder {
    FixtureBuilder::default()
}

impl FixtureBuilder {
    pub fn defaults(mut self, defaults: WorkerDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn app(mut self, name: &str, app: TestApp) -> Self {
        self.apps.insert(name.to_string(), app);
        self
    }

    pub fn override_app(mut self, name: &str, overrides: AppOverrides) -> Self {
        self.overrides.insert(name.to_string(), overrides);
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn build(self) -> TestHost {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        for name in self.apps.keys() {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let config = HarborConfig {
            apps_dir: dir.path().to_path_buf(),
            worker: self.defaults.unwrap_or_else(worker_defaults),
            apps: self.overrides,
        };
        let sandbox = Arc::new(TestSandbox {
            apps: self.apps,
            load_delay: self.load_delay,
            loads: Mutex::new(HashMap::new()),
        });
        let pool = WorkPool::new(PoolOptions::from_config(&config, sandbox.clone()));
        TestHost {
            pool,
            sandbox,
            _dir: dir,
        }
    }
}

/// A work pool over programmable in-process applications, with one real
/// directory per application so discovery works.
pub struct TestHost {
    pub pool: WorkPool,
    pub sandbox: Arc<TestSandbox>,
    _dir: TempDir,
}

impl TestHost {
    pub async fn worker(&self, app: &str) -> HostResult<WorkerHandle> {
        let app = AppName::from(app);
        let version = self.pool.resolve_version(&app).await?;
        self.pool.get_worker(&app, &version).await
    }

    pub async fn worker_count(&self, app: &str) -> usize {
        self.pool
            .worker_count(&AppName::from(app), &Default::default())
            .await
            .unwrap()
    }
}

pub async fn rpc(worker: &WorkerHandle, handler: &str, value: &str) -> HostResult<Outcome> {
    worker
        .execute(ExecuteCall::new(
            handler,
            CallParams::Rpc(Payload::from(value)),
        ))
        .await
}
