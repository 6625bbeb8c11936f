//! 运行环境兼容性检查
//!
//! 宿主版本范围和平台列表不满足时阻断加载；运行时 (rustc)
//! 版本不一致只给出警告。

use crate::plugin::types::{Compatibility, Plugin, PluginError};
use crate::plugin::version::parse_version;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 宿主构建所用的 rustc 版本
pub const RUNTIME_VERSION: &str = env!("HOSTKIT_RUSTC_VERSION");

/// 宿主版本
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 检查插件时对照的运行环境
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub host_version: String,
    pub runtime_version: String,
    pub os: String,
    pub arch: String,
}

impl Environment {
    /// 当前进程的运行环境
    pub fn current() -> Self {
        Self {
            host_version: HOST_VERSION.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
            os: normalize_os(std::env::consts::OS),
            arch: normalize_arch(std::env::consts::ARCH),
        }
    }

    pub fn platform(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }
}

/// 把 Rust 的目标操作系统名映射为插件声明中使用的名称
pub fn normalize_os(os: &str) -> String {
    match os.to_ascii_lowercase().as_str() {
        "macos" | "darwin" => "darwin".to_string(),
        other => other.to_string(),
    }
}

/// 把 Rust 的目标架构名映射为插件声明中使用的名称
pub fn normalize_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        "x86" | "i386" | "i686" | "386" => "386".to_string(),
        other => other.to_string(),
    }
}

/// 兼容性检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub compatible: bool,
    /// 阻断性的不兼容项
    pub errors: Vec<String>,
    /// 非阻断的提示
    pub warnings: Vec<String>,
}

impl CompatibilityResult {
    fn new() -> Self {
        Self {
            compatible: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn block(&mut self, message: String) {
        self.compatible = false;
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

/// 兼容性检查器
#[derive(Debug, Clone)]
pub struct CompatibilityChecker {
    env: Environment,
}

impl Default for CompatibilityChecker {
    fn default() -> Self {
        Self::new(Environment::current())
    }
}

impl CompatibilityChecker {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// 逐项检查声明的要求，收集全部不满足项
    pub fn check(&self, compat: &Compatibility) -> CompatibilityResult {
        let mut result = CompatibilityResult::new();

        let host = match parse_version(&self.env.host_version) {
            Ok(v) => Some(v),
            Err(e) => {
                result.block(format!(
                    "host version '{}' is not a valid semantic version: {}",
                    self.env.host_version, e
                ));
                None
            }
        };

        if let Some(min) = compat.min_host_version.as_deref().filter(|s| !s.is_empty()) {
            match (parse_version(min), &host) {
                (Ok(min_version), Some(host)) => {
                    if *host < min_version {
                        result.block(format!(
                            "requires host version >= {}, running {}",
                            min_version, host
                        ));
                    }
                }
                (Err(e), _) => {
                    result.block(format!("invalid min-host-version '{}': {}", min, e));
                }
                (Ok(_), None) => {}
            }
        }

        if let Some(max) = compat.max_host_version.as_deref().filter(|s| !s.is_empty()) {
            match (parse_version(max), &host) {
                (Ok(max_version), Some(host)) => {
                    if *host > max_version {
                        result.block(format!(
                            "requires host version <= {}, running {}",
                            max_version, host
                        ));
                    }
                }
                (Err(e), _) => {
                    result.block(format!("invalid max-host-version '{}': {}", max, e));
                }
                (Ok(_), None) => {}
            }
        }

        if let Some(runtime) = compat.runtime_version.as_deref().filter(|s| !s.is_empty())
            && !self.runtime_matches(runtime)
        {
            result.warn(format!(
                "built for runtime {}, running {}",
                runtime, self.env.runtime_version
            ));
        }

        if !compat.platforms.is_empty() && !self.platform_supported(&compat.platforms) {
            result.block(format!(
                "platform {} is not supported (supported: {})",
                self.env.platform(),
                compat.platforms.join(", ")
            ));
        }

        debug!(
            compatible = result.compatible,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "compatibility check finished"
        );
        result
    }

    /// 检查插件；有阻断性错误时返回 `IncompatibleEnvironment`，
    /// 否则返回警告列表
    pub fn ensure(&self, plugin: &dyn Plugin) -> Result<Vec<String>, PluginError> {
        let result = self.check(&plugin.compatibility());
        if result.compatible {
            Ok(result.warnings)
        } else {
            Err(PluginError::IncompatibleEnvironment {
                plugin: plugin.name().to_string(),
                errors: result.errors,
                warnings: result.warnings,
            })
        }
    }

    fn runtime_matches(&self, declared: &str) -> bool {
        match (parse_version(declared), parse_version(&self.env.runtime_version)) {
            (Ok(a), Ok(b)) => a == b,
            _ => declared.trim() == self.env.runtime_version,
        }
    }

    fn platform_supported(&self, platforms: &[String]) -> bool {
        platforms.iter().any(|entry| {
            let Some((os, arch)) = entry.trim().split_once('/') else {
                return false;
            };
            let os_ok = os == "*" || normalize_os(os) == self.env.os;
            let arch_ok = arch == "*" || normalize_arch(arch) == self.env.arch;
            os_ok && arch_ok
        })
    }
}
