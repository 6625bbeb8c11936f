//! 应用容器
//!
//! 按 `HOSTKIT_HOME` 目录布局组装启用配置、注册表和安装器。

use crate::error::Result;
use crate::plugin::config::PluginConfigManager;
use crate::plugin::installer::GitInstaller;
use crate::plugin::loader::{NativeArtifactLoader, SourceLoader, builtin};
use crate::plugin::registry::{LoadReport, Registry};
use crate::utils::paths;
use std::sync::Arc;
use tracing::warn;

/// 应用设置
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub verbose: bool,
}

pub struct Application {
    pub config: AppConfig,
    pub plugin_config: PluginConfigManager,
    pub registry: Arc<Registry>,
    pub installer: GitInstaller,
}

impl Application {
    /// 构建容器；调用 [`Application::load`] 之前不注册任何插件
    pub fn new(config: AppConfig) -> Result<Self> {
        builtin::init();

        let plugin_config = PluginConfigManager::new(&builtin::names())?;
        let plugin_dir = paths::get_plugin_dir()?;
        let cache_dir = paths::get_repo_cache_dir()?;

        let loader = SourceLoader::new(
            plugin_config.clone(),
            plugin_dir.clone(),
            Arc::new(NativeArtifactLoader::new()),
        );
        let registry = Arc::new(Registry::new(Box::new(loader)));
        let mut installer =
            GitInstaller::new(plugin_dir, cache_dir).with_config(plugin_config.clone());
        let official_sources = plugin_config.official_sources();
        if !official_sources.is_empty() {
            installer = installer.with_official_sources(official_sources);
        }

        Ok(Self {
            config,
            plugin_config,
            registry,
            installer,
        })
    }

    /// 加载所有已启用插件。单个插件失败只记录日志并写入报告，
    /// 不会让调用失败
    pub fn load(&self) -> Result<LoadReport> {
        let report = self.registry.load_all()?;
        for (name, err) in &report.failed {
            warn!(plugin = %name, "not loaded: {}", err);
        }
        Ok(report)
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}
