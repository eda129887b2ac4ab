use std::collections::HashMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Host-level configuration: where applications live on disk, the worker
/// defaults applied to every application, and per-application overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarborConfig {
    pub apps_dir: PathBuf,
    pub worker: WorkerDefaults,
    #[serde(default)]
    pub apps: HashMap<String, AppOverrides>,
}

impl HarborConfig {
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("HARBOR__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefaults {
    pub max_workers: usize,
    pub call_timeout_secs: u64,
    pub recycle_window_secs: u64,
    pub allowed_modules: Vec<String>,
    pub load_dependencies_in_sandbox: bool,
    pub max_heap_bytes: Option<u64>,
    pub max_stack_bytes: Option<u64>,
}

/// Per-application overrides; any field left unset falls back to the
/// `[worker]` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppOverrides {
    pub max_workers: Option<usize>,
    pub call_timeout_secs: Option<u64>,
    pub recycle_window_secs: Option<u64>,
    pub allowed_modules: Option<Vec<String>>,
    pub load_dependencies_in_sandbox: Option<bool>,
    pub max_heap_bytes: Option<u64>,
    pub max_stack_bytes: Option<u64>,
}
