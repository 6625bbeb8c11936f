//! 插件加载器
//!
//! 加载器负责发现并构造插件实例，
//! 注册表校验并注册加载器返回的结果。

pub mod builtin;
pub mod dynamic;
pub mod source;

use crate::plugin::types::{Plugin, PluginConfig, PluginError};

pub use builtin::BuiltinLoader;
pub use dynamic::{ArtifactLoader, NativeArtifactLoader};
pub use source::SourceLoader;

/// 构造好的插件及其初始化配置
pub struct LoadedPlugin {
    pub plugin: Box<dyn Plugin>,
    pub config: PluginConfig,
}

impl LoadedPlugin {
    pub fn new(plugin: Box<dyn Plugin>, config: PluginConfig) -> Self {
        Self { plugin, config }
    }

    /// 使用以插件名为键的空配置
    pub fn unconfigured(plugin: Box<dyn Plugin>) -> Self {
        let config = PluginConfig::new(plugin.name());
        Self { plugin, config }
    }
}

/// 向加载器请求全部插件的结果
///
/// 单个条目损坏不影响其他插件加载，
/// 它会以条目名为键记录在 `failures` 中。
#[derive(Default)]
pub struct LoadBatch {
    pub plugins: Vec<LoadedPlugin>,
    pub failures: Vec<(String, PluginError)>,
}

/// 加载策略
pub trait PluginLoader: Send + Sync {
    /// 日志中使用的简短标识
    fn name(&self) -> &str;

    /// 本加载器能产出的全部插件
    fn load_plugins(&self) -> Result<LoadBatch, PluginError>;

    /// 按名称加载单个插件；本加载器不认识时返回 `Ok(None)`
    fn load_plugin(&self, name: &str) -> Result<Option<LoadedPlugin>, PluginError>;
}
