//! 插件系统
//!
//! # 模块结构
//!
//! - `types.rs` - 插件契约、元数据记录、错误分类
//! - `version.rs` - 语义化版本解析与约束
//! - `validation.rs` - 结构校验器
//! - `compatibility.rs` - 宿主、运行时与平台检查
//! - `dependency.rs` - 依赖图与加载顺序
//! - `registry.rs` - 已加载插件的运行时容器
//! - `loader/` - 内置插件表、启用配置加载器、原生制品
//! - `installer/` - 基于 git 的安装器与构建器
//! - `config.rs` - `plugins.toml`
//! - `installed.rs` - 已安装插件的目录布局
//! - `api.rs` - 原生插件导出的入口

pub mod api;
pub mod compatibility;
pub mod config;
pub mod dependency;
pub mod installed;
pub mod installer;
pub mod loader;
pub mod registry;
pub mod types;
pub mod validation;
pub mod version;

pub use types::{
    ArgSpec, BuildInfo, Command, CommandArgs, CommandHandler, Compatibility, Context, Dependency,
    FlagSpec, InstallStep, Plugin, PluginConfig, PluginError, PluginMetadata, TrustLevel,
};

pub use compatibility::{CompatibilityChecker, CompatibilityResult, Environment};
pub use config::{PluginConfigManager, PluginEntry, PluginSource, PluginsFile};
pub use dependency::{DependencyGraph, DependencyNode};
pub use installer::{GitInstaller, InstallOptions, InstallOutcome};
pub use loader::{BuiltinLoader, LoadedPlugin, PluginLoader, SourceLoader};
pub use registry::{LoadReport, PluginReport, RegisterOutcome, Registry};
pub use validation::{ValidationError, ValidationErrorKind, Validator};

pub use api::{DECLARATION_SYMBOL, PLUGIN_ABI_VERSION, PluginDeclaration};
