use std::path::PathBuf;
use std::sync::Arc;

use harbor_common::config::HarborConfig;

use crate::app::{
    AppConfigProvider, DefaultVersionResolver, StaticAppConfigProvider, VersionResolver,
};
use crate::sandbox::Sandbox;

/// Collaborators injected into a work pool. There is no global pool;
/// construct one and pass it where it is needed.
#[derive(Clone)]
pub struct PoolOptions {
    pub apps_dir: PathBuf,
    pub config_provider: Arc<dyn AppConfigProvider>,
    pub version_resolver: Arc<dyn VersionResolver>,
    pub sandbox: Arc<dyn Sandbox>,
}

impl PoolOptions {
    /// Static configuration with the default version resolution.
    pub fn from_config(config: &HarborConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            apps_dir: config.apps_dir.clone(),
            config_provider: Arc::new(StaticAppConfigProvider::new(config)),
            version_resolver: Arc::new(DefaultVersionResolver),
            sandbox,
        }
    }
}
