//! 插件系统类型定义
//!
//! 插件契约及其声明的命令、依赖和兼容性要求，
//! 持久化的元数据记录，以及注册表、加载器和安装器
//! 共用的错误分类。

use crate::connection::{Connection, ConnectionError};
use crate::plugin::validation::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 分发插件命令时调用的处理函数
pub type CommandHandler =
    Arc<dyn Fn(&dyn Connection, &CommandArgs) -> Result<(), PluginError> + Send + Sync>;

/// 命令声明的位置参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// 命令声明的标志
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSpec {
    pub name: String,
    pub short: Option<char>,
    pub description: String,
    pub takes_value: bool,
    pub default: Option<String>,
}

/// 交给命令处理函数的已解析参数
#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    pub positional: Vec<String>,
    pub flags: HashMap<String, String>,
}

impl CommandArgs {
    /// 把原始参数拆成位置参数和 `--flag[=value]` 对
    ///
    /// 不带 `=` 的标志记为值 `"true"`
    pub fn parse(raw: &[String]) -> Self {
        let mut args = CommandArgs::default();
        for token in raw {
            match token.strip_prefix("--") {
                Some(flag) => match flag.split_once('=') {
                    Some((key, value)) => {
                        args.flags.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        args.flags.insert(flag.to_string(), "true".to_string());
                    }
                },
                None => args.positional.push(token.clone()),
            }
        }
        args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }
}

/// 插件暴露的命令
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    pub flags: Vec<FlagSpec>,
    pub handler: Option<CommandHandler>,
}

impl Command {
    pub fn new<F>(name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(&dyn Connection, &CommandArgs) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            args: Vec::new(),
            flags: Vec::new(),
            handler: Some(Arc::new(handler)),
        }
    }

    pub fn with_arg(mut self, name: &str, description: &str, required: bool) -> Self {
        self.args.push(ArgSpec {
            name: name.to_string(),
            description: description.to_string(),
            required,
        });
        self
    }

    pub fn with_flag(mut self, name: &str, description: &str, takes_value: bool) -> Self {
        self.flags.push(FlagSpec {
            name: name.to_string(),
            short: None,
            description: description.to_string(),
            takes_value,
            default: None,
        });
        self
    }

    /// 检查必填位置参数，然后运行处理函数
    pub fn run(&self, conn: &dyn Connection, args: &CommandArgs) -> Result<(), PluginError> {
        let required = self.args.iter().filter(|a| a.required).count();
        if args.positional.len() < required {
            let missing: Vec<&str> = self.args[args.positional.len()..]
                .iter()
                .filter(|a| a.required)
                .map(|a| a.name.as_str())
                .collect();
            return Err(PluginError::ExecutionFailed(format!(
                "command '{}' is missing required arguments: {}",
                self.name,
                missing.join(", ")
            )));
        }

        let handler = self.handler.as_ref().ok_or_else(|| {
            PluginError::ExecutionFailed(format!("command '{}' has no handler", self.name))
        })?;
        handler(conn, args)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args", &self.args)
            .field("flags", &self.flags)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// 对另一个插件的依赖
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dependency {
    pub name: String,
    /// 语义化版本范围，例如 `>=2.0.0` 或 `^1.4`
    pub version: Option<String>,
    pub optional: bool,
    pub tags: Vec<String>,
}

impl Dependency {
    pub fn required(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version.to_string()),
            ..Default::default()
        }
    }

    pub fn optional(name: &str, version: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            optional: true,
            tags: Vec::new(),
        }
    }
}

/// 插件声明的环境要求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compatibility {
    pub min_host_version: Option<String>,
    pub max_host_version: Option<String>,
    /// 构建插件所用的 rustc 版本
    pub runtime_version: Option<String>,
    /// `os/arch` 对，支持 `os/*` 和 `*/arch` 通配
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
}

/// 插件来源的可信级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Untrusted,
    Community,
    Official,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::Official => write!(f, "official"),
            TrustLevel::Community => write!(f, "community"),
            TrustLevel::Untrusted => write!(f, "untrusted"),
        }
    }
}

impl FromStr for TrustLevel {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" => Ok(TrustLevel::Official),
            "community" => Ok(TrustLevel::Community),
            "untrusted" => Ok(TrustLevel::Untrusted),
            other => Err(PluginError::Config(format!("unknown trust level: {}", other))),
        }
    }
}

/// 已安装制品的产出方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildInfo {
    pub builder: String,
    pub profile: String,
    pub rustc_version: Option<String>,
    pub commit: Option<String>,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
}

/// 插件元数据
///
/// 身份字段与 [`Plugin`] 的访问方法一致。来源字段只对已安装插件填写，
/// 并以 `plugin.json` 的形式保存在制品旁。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub commands: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub compatibility: Compatibility,
    pub install_path: Option<PathBuf>,
    pub installed_at: Option<DateTime<Utc>>,
    /// 制品的十六进制 SHA-256
    pub checksum: Option<String>,
    pub source: Option<String>,
    pub trust_level: Option<String>,
    pub validated: bool,
    pub build: Option<BuildInfo>,
}

impl PluginMetadata {
    pub fn trust(&self) -> Option<TrustLevel> {
        self.trust_level.as_deref().and_then(|t| t.parse().ok())
    }
}

/// 传给 [`Plugin::initialize`] 的配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin_id: String,
    pub settings: HashMap<String, String>,
}

impl PluginConfig {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            settings: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// 返回必填配置项，缺失时返回指明该项的初始化错误
    pub fn require(&self, key: &str) -> Result<&str, PluginError> {
        self.get(key).ok_or_else(|| PluginError::Initialization {
            plugin: self.plugin_id.clone(),
            reason: format!("missing required setting '{}'", key),
        })
    }
}

/// 传给 `start`/`stop` 的生命周期上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// 安装流水线步骤，用于标注被包装的失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Parse,
    Fetch,
    ResolveVersion,
    Discover,
    Validate,
    Build,
    Install,
    Finalize,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStep::Parse => "parse",
            InstallStep::Fetch => "fetch",
            InstallStep::ResolveVersion => "resolve-version",
            InstallStep::Discover => "discover",
            InstallStep::Validate => "validate",
            InstallStep::Build => "build",
            InstallStep::Install => "install",
            InstallStep::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

fn join_violations(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 插件错误类型
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid repository URL '{0}'")]
    InvalidRepositoryUrl(String),

    #[error("version '{requested}' not found in {repository}")]
    VersionNotFound { repository: String, requested: String },

    #[error("plugin metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("validation failed for '{plugin}': {}", join_violations(.errors))]
    ValidationFailed {
        plugin: String,
        errors: Vec<ValidationError>,
    },

    #[error("plugin '{plugin}' is incompatible with this environment: {}", .errors.join("; "))]
    IncompatibleEnvironment {
        plugin: String,
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("plugin {plugin} requires dependency {dependency} {constraint}, {found}")]
    UnresolvedDependency {
        plugin: String,
        dependency: String,
        constraint: String,
        found: String,
    },

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin '{plugin}' has no command '{command}'")]
    CommandNotFound { plugin: String, command: String },

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("failed to write {}: {source}", .path.display())]
    InstallIoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("symbol '{symbol}' missing from {}", .path.display())]
    PluginSymbolMissing { path: PathBuf, symbol: String },

    #[error("plugin artifact {} has an incompatible entry point: {reason}", .path.display())]
    PluginSignatureMismatch { path: PathBuf, reason: String },

    #[error("initialization of '{plugin}' failed: {reason}")]
    Initialization { plugin: String, reason: String },

    #[error("{0}")]
    Invalid(String),

    #[error("plugin load failed: {0}")]
    LoadFailed(String),

    #[error("command failed: {0}")]
    ExecutionFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{step} step failed: {source}")]
    Install {
        step: InstallStep,
        source: Box<PluginError>,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl PluginError {
    /// 最内层的错误，剥去安装步骤标注
    pub fn kind(&self) -> &PluginError {
        match self {
            PluginError::Install { source, .. } => source.kind(),
            other => other,
        }
    }

    /// 失败的安装步骤（如有）
    pub fn step(&self) -> Option<InstallStep> {
        match self {
            PluginError::Install { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// 插件契约
///
/// 内置插件和已安装插件是可互换的实现。
/// 访问方法每次调用都必须返回相同的值。
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn version(&self) -> &str;

    fn author(&self) -> &str;

    /// 在任何命令处理函数运行之前恰好调用一次
    fn initialize(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    /// 插件自身的语义检查；返回错误即否决注册
    fn validate(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn commands(&self) -> Vec<Command>;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn compatibility(&self) -> Compatibility {
        Compatibility::default()
    }

    /// 元数据记录的身份部分，由访问方法构建
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: self.name().to_string(),
            description: self.description().to_string(),
            version: self.version().to_string(),
            author: self.author().to_string(),
            commands: self.commands().into_iter().map(|c| c.name).collect(),
            dependencies: self.dependencies(),
            compatibility: self.compatibility(),
            ..Default::default()
        }
    }

    /// 幂等
    fn start(&self, _ctx: &Context) -> Result<(), PluginError> {
        Ok(())
    }

    /// 幂等；即使 `start` 从未运行也可以调用
    fn stop(&self, _ctx: &Context) -> Result<(), PluginError> {
        Ok(())
    }
}
