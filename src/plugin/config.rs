//! 插件启用配置
//!
//! `plugins.toml` 记录哪些插件启用、各自来源、插件配置项，
//! 以及额外的扫描目录。

use crate::error::{HostError, Result};
use crate::plugin::types::PluginConfig;
use crate::utils::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// 已启用插件的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSource {
    /// 编译进二进制，按注册 id 引用
    Builtin(String),
    /// 磁盘上的插件目录或制品
    Path(PathBuf),
    /// 从仓库安装；`hash` 固定制品校验和
    Remote { url: String, hash: String },
}

/// 一条 `[[plugins]]` 条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PluginSource>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl PluginEntry {
    pub fn new(name: &str, source: PluginSource) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            source: Some(source),
            settings: HashMap::new(),
        }
    }

    pub fn plugin_config(&self) -> PluginConfig {
        PluginConfig {
            plugin_id: self.name.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// 完整的 `plugins.toml` 文档
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginsFile {
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
    /// 视为官方来源的仓库地址前缀；为空时使用内置列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub official_sources: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl PluginsFile {
    /// 默认内容：启用全部内置插件，没有扫描目录
    pub fn with_builtins<S: AsRef<str>>(builtins: &[S]) -> Self {
        Self {
            search_dirs: Vec::new(),
            official_sources: Vec::new(),
            plugins: builtins
                .iter()
                .map(|b| PluginEntry::new(b.as_ref(), PluginSource::Builtin(b.as_ref().to_string())))
                .collect(),
        }
    }
}

/// `plugins.toml` 的线程安全句柄
#[derive(Debug, Clone)]
pub struct PluginConfigManager {
    config_path: PathBuf,
    document: Arc<RwLock<PluginsFile>>,
}

impl PluginConfigManager {
    /// 加载默认的 `plugins.toml`，首次运行时生成
    pub fn new<S: AsRef<str>>(builtins: &[S]) -> Result<Self> {
        let config_path = paths::get_plugin_config_path()?;
        Self::load_or_init(&config_path, builtins)
    }

    /// 加载 `path`，文件不存在时先写入默认内容
    pub fn load_or_init<S: AsRef<str>>(path: &Path, builtins: &[S]) -> Result<Self> {
        if !path.exists() {
            let manager = Self {
                config_path: path.to_path_buf(),
                document: Arc::new(RwLock::new(PluginsFile::with_builtins(builtins))),
            };
            manager.save()?;
            info!(path = %path.display(), "generated default plugin configuration");
            return Ok(manager);
        }
        Self::load_from_file(path)
    }

    /// 加载 `path`；文件不存在时得到空文档
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let document = if path.exists() {
            let content = paths::read_file(path)?;
            toml::from_str(&content).map_err(|e| {
                HostError::PluginConfig(format!("{}: {}", path.display(), e))
            })?
        } else {
            PluginsFile::default()
        };

        debug!(path = %path.display(), plugins = document.plugins.len(), "loaded plugin configuration");
        Ok(Self {
            config_path: path.to_path_buf(),
            document: Arc::new(RwLock::new(document)),
        })
    }

    pub fn from_document(document: PluginsFile) -> Self {
        Self {
            config_path: PathBuf::new(),
            document: Arc::new(RwLock::new(document)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PluginsFile> {
        self.document.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PluginsFile> {
        self.document.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn save(&self) -> Result<()> {
        Self::persist(&self.config_path, &self.read())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn entries(&self) -> Vec<PluginEntry> {
        self.read().plugins.clone()
    }

    pub fn enabled_entries(&self) -> Vec<PluginEntry> {
        self.read()
            .plugins
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    pub fn entry(&self, name: &str) -> Option<PluginEntry> {
        self.read().plugins.iter().find(|p| p.name == name).cloned()
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.read().search_dirs.clone()
    }

    pub fn official_sources(&self) -> Vec<String> {
        self.read().official_sources.clone()
    }

    /// 插件的配置项，没有条目时为空
    pub fn plugin_config(&self, name: &str) -> PluginConfig {
        self.entry(name)
            .map(|e| e.plugin_config())
            .unwrap_or_else(|| PluginConfig::new(name))
    }

    /// 修改文档并保存；保存失败时内存中的文档恢复原状
    fn update<T>(&self, change: impl FnOnce(&mut PluginsFile) -> Result<T>) -> Result<T> {
        let mut doc = self.write();
        let previous = doc.clone();
        let value = change(&mut doc)?;
        if let Err(e) = Self::persist(&self.config_path, &doc) {
            *doc = previous;
            return Err(e);
        }
        Ok(value)
    }

    fn persist(path: &Path, doc: &PluginsFile) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let content = toml::to_string_pretty(doc)?;
        paths::write_file_safe(path, &content)
    }

    fn entry_mut<'d>(doc: &'d mut PluginsFile, name: &str) -> Result<&'d mut PluginEntry> {
        doc.plugins
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| HostError::PluginConfig(format!("no plugin entry named '{}'", name)))
    }

    /// 新增或替换同名条目，然后保存
    pub fn upsert_entry(&self, entry: PluginEntry) -> Result<()> {
        self.update(|doc| {
            match doc.plugins.iter_mut().find(|p| p.name == entry.name) {
                Some(existing) => *existing = entry,
                None => doc.plugins.push(entry),
            }
            Ok(())
        })
    }

    /// 把条目指向已安装的远程来源，保留其配置项
    pub fn record_remote(&self, name: &str, url: &str, hash: &str) -> Result<()> {
        let source = PluginSource::Remote {
            url: url.to_string(),
            hash: hash.to_string(),
        };
        self.update(|doc| {
            match doc.plugins.iter_mut().find(|p| p.name == name) {
                Some(existing) => {
                    existing.source = Some(source);
                    existing.enabled = true;
                }
                None => doc.plugins.push(PluginEntry::new(name, source)),
            }
            Ok(())
        })
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.update(|doc| {
            Self::entry_mut(doc, name)?.enabled = enabled;
            Ok(())
        })
    }

    pub fn set_setting(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.update(|doc| {
            Self::entry_mut(doc, name)?
                .settings
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// 删除条目，返回被删除的条目
    pub fn remove(&self, name: &str) -> Result<Option<PluginEntry>> {
        if self.entry(name).is_none() {
            return Ok(None);
        }
        self.update(|doc| {
            let index = doc.plugins.iter().position(|p| p.name == name);
            Ok(index.map(|i| doc.plugins.remove(i)))
        })
    }
}
