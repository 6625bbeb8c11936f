//! 原生插件制品
//!
//! 加载导出了 `export_plugin!` 声明的 `cdylib` 插件 (.so/.dll/.dylib)。
//! 替换这套机制时实现 [`ArtifactLoader`] trait 即可。

use crate::plugin::api::{DECLARATION_SYMBOL, PLUGIN_ABI_VERSION, PluginDeclaration};
use crate::plugin::compatibility::RUNTIME_VERSION;
use crate::plugin::types::{
    Command, Compatibility, Context, Dependency, Plugin, PluginConfig, PluginError, PluginMetadata,
};
use libloading::{Library, Symbol};
use std::path::Path;
use tracing::{debug, warn};

/// 把已安装的制品变成可用的插件实例
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, artifact: &Path) -> Result<Box<dyn Plugin>, PluginError>;
}

/// 当前平台动态库的扩展名
pub fn library_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// `path` 是否像当前平台的动态库
pub fn is_library(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(library_extension()))
}

/// 由已加载动态库提供的插件
///
/// 字段顺序决定析构顺序：`plugin` 先于 `_library` 释放，
/// 实例存活期间 vtable 始终处于映射状态
pub struct DynamicLibraryPlugin {
    plugin: Box<dyn Plugin>,
    _library: Library,
    /// 制品声明的编译器版本
    rustc_version: String,
}

impl Plugin for DynamicLibraryPlugin {
    fn name(&self) -> &str {
        self.plugin.name()
    }

    fn description(&self) -> &str {
        self.plugin.description()
    }

    fn version(&self) -> &str {
        self.plugin.version()
    }

    fn author(&self) -> &str {
        self.plugin.author()
    }

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.plugin.initialize(config)
    }

    fn validate(&self) -> Result<(), PluginError> {
        self.plugin.validate()
    }

    fn commands(&self) -> Vec<Command> {
        self.plugin.commands()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.plugin.dependencies()
    }

    /// 插件未声明运行时版本时，使用制品声明的编译器版本
    fn compatibility(&self) -> Compatibility {
        let mut compat = self.plugin.compatibility();
        if compat.runtime_version.is_none() {
            compat.runtime_version = Some(self.rustc_version.clone());
        }
        compat
    }

    fn metadata(&self) -> PluginMetadata {
        let mut metadata = self.plugin.metadata();
        metadata.compatibility = self.compatibility();
        metadata
    }

    fn start(&self, ctx: &Context) -> Result<(), PluginError> {
        self.plugin.start(ctx)
    }

    fn stop(&self, ctx: &Context) -> Result<(), PluginError> {
        self.plugin.stop(ctx)
    }
}

/// 基于 `libloading` 的制品加载器
#[derive(Debug, Clone)]
pub struct NativeArtifactLoader {
    runtime_version: String,
}

impl Default for NativeArtifactLoader {
    fn default() -> Self {
        Self {
            runtime_version: RUNTIME_VERSION.to_string(),
        }
    }
}

impl NativeArtifactLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactLoader for NativeArtifactLoader {
    fn load(&self, artifact: &Path) -> Result<Box<dyn Plugin>, PluginError> {
        if !artifact.is_file() {
            return Err(PluginError::LoadFailed(format!(
                "plugin artifact does not exist: {}",
                artifact.display()
            )));
        }

        let library = unsafe {
            Library::new(artifact).map_err(|e| {
                PluginError::LoadFailed(format!("cannot load {}: {}", artifact.display(), e))
            })?
        };

        let (rustc_version, create) = unsafe {
            let symbol: Symbol<*const PluginDeclaration> = library
                .get(DECLARATION_SYMBOL.as_bytes())
                .map_err(|_| PluginError::PluginSymbolMissing {
                    path: artifact.to_path_buf(),
                    symbol: DECLARATION_SYMBOL.to_string(),
                })?;

            let declaration: *const PluginDeclaration = *symbol;
            if declaration.is_null() {
                return Err(PluginError::PluginSignatureMismatch {
                    path: artifact.to_path_buf(),
                    reason: "declaration symbol is null".to_string(),
                });
            }

            // abi_version 是 repr(C) 结构体的第一个字段，
            // 在访问任何可能变更布局的字段之前先检查它
            let abi_version = (*declaration).abi_version;
            if abi_version != PLUGIN_ABI_VERSION {
                return Err(PluginError::PluginSignatureMismatch {
                    path: artifact.to_path_buf(),
                    reason: format!(
                        "plugin ABI version {} does not match host ABI version {}",
                        abi_version, PLUGIN_ABI_VERSION
                    ),
                });
            }

            (
                (*declaration).rustc_version.to_string(),
                (*declaration).create,
            )
        };

        if rustc_version != self.runtime_version {
            warn!(
                artifact = %artifact.display(),
                plugin_rustc = %rustc_version,
                host_rustc = %self.runtime_version,
                "plugin was built with a different compiler"
            );
        }

        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginError::LoadFailed(format!(
                "{} returned no plugin instance",
                artifact.display()
            )));
        }
        let plugin = unsafe { Box::from_raw(raw) };

        debug!(plugin = plugin.name(), artifact = %artifact.display(), "loaded native plugin");
        Ok(Box::new(DynamicLibraryPlugin {
            plugin,
            _library: library,
            rustc_version,
        }))
    }
}
