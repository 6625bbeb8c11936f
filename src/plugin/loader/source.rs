//! 基于配置的加载器
//!
//! 把每个已启用的 `plugins.toml` 条目解析为内置插件、本地路径
//! 或已安装的远程插件，再加载插件目录和配置的扫描目录中
//! 其余已安装的插件。

use crate::plugin::config::{PluginConfigManager, PluginEntry, PluginSource};
use crate::plugin::installed;
use crate::plugin::loader::dynamic::{ArtifactLoader, is_library};
use crate::plugin::loader::{LoadBatch, LoadedPlugin, PluginLoader, builtin};
use crate::plugin::types::{Plugin, PluginConfig, PluginError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SourceLoader {
    config: PluginConfigManager,
    plugin_dir: PathBuf,
    artifacts: Arc<dyn ArtifactLoader>,
}

impl SourceLoader {
    pub fn new(
        config: PluginConfigManager,
        plugin_dir: PathBuf,
        artifacts: Arc<dyn ArtifactLoader>,
    ) -> Self {
        Self {
            config,
            plugin_dir,
            artifacts,
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    fn resolve(&self, entry: &PluginEntry) -> Result<Box<dyn Plugin>, PluginError> {
        match &entry.source {
            Some(PluginSource::Builtin(id)) => builtin::create(id)
                .ok_or_else(|| PluginError::PluginNotFound(format!("built-in '{}'", id))),

            Some(PluginSource::Path(path)) => self.load_path(path),

            Some(PluginSource::Remote { url, hash }) => {
                let dir = self.plugin_dir.join(&entry.name);
                if !installed::is_plugin_dir(&dir) {
                    return Err(PluginError::LoadFailed(format!(
                        "'{}' is not installed; run `hostkit plugin install {}`",
                        entry.name, url
                    )));
                }
                let artifact = installed::find_artifact(&dir)?;
                if !hash.is_empty() {
                    let actual = installed::sha256_file(&artifact)?;
                    if !actual.eq_ignore_ascii_case(hash) {
                        return Err(PluginError::LoadFailed(format!(
                            "checksum mismatch for '{}': expected {}, found {}",
                            entry.name, hash, actual
                        )));
                    }
                }
                self.artifacts.load(&artifact)
            }

            None => {
                let dir = self.plugin_dir.join(&entry.name);
                if installed::is_plugin_dir(&dir) {
                    self.load_dir(&dir)
                } else {
                    builtin::create(&entry.name)
                        .ok_or_else(|| PluginError::PluginNotFound(entry.name.clone()))
                }
            }
        }
    }

    fn load_path(&self, path: &Path) -> Result<Box<dyn Plugin>, PluginError> {
        if path.is_dir() {
            self.load_dir(path)
        } else if path.is_file() && is_library(path) {
            self.artifacts.load(path)
        } else {
            Err(PluginError::LoadFailed(format!(
                "{} is neither a plugin directory nor a plugin library",
                path.display()
            )))
        }
    }

    fn load_dir(&self, dir: &Path) -> Result<Box<dyn Plugin>, PluginError> {
        let artifact = installed::find_artifact(dir)?;
        self.artifacts.load(&artifact)
    }

    /// 没有被任何条目认领的已安装插件目录
    fn unclaimed_dirs(&self, claimed: &HashSet<String>) -> Vec<(String, PathBuf)> {
        let mut roots = vec![self.plugin_dir.clone()];
        roots.extend(self.config.search_dirs());

        let mut found = Vec::new();
        let mut seen = claimed.clone();
        for root in roots {
            for dir in installed::scan(&root) {
                let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
                else {
                    continue;
                };
                if seen.insert(name.clone()) {
                    found.push((name, dir));
                }
            }
        }
        found
    }
}

impl PluginLoader for SourceLoader {
    fn name(&self) -> &str {
        "source"
    }

    fn load_plugins(&self) -> Result<LoadBatch, PluginError> {
        let mut batch = LoadBatch::default();
        // 已禁用的条目同样认领其名称，扫描不会让它复活
        let claimed: HashSet<String> = self.config.entries().into_iter().map(|e| e.name).collect();

        for entry in self.config.enabled_entries() {
            match self.resolve(&entry) {
                Ok(plugin) => {
                    debug!(entry = %entry.name, plugin = plugin.name(), "resolved plugin entry");
                    batch
                        .plugins
                        .push(LoadedPlugin::new(plugin, entry.plugin_config()));
                }
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "failed to load plugin");
                    batch.failures.push((entry.name.clone(), e));
                }
            }
        }

        for (name, dir) in self.unclaimed_dirs(&claimed) {
            match self.load_dir(&dir) {
                Ok(plugin) => {
                    debug!(dir = %dir.display(), "discovered installed plugin");
                    let config = PluginConfig::new(plugin.name());
                    batch.plugins.push(LoadedPlugin::new(plugin, config));
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to load installed plugin");
                    batch.failures.push((name, e));
                }
            }
        }

        Ok(batch)
    }

    fn load_plugin(&self, name: &str) -> Result<Option<LoadedPlugin>, PluginError> {
        if let Some(entry) = self.config.entry(name) {
            if !entry.enabled {
                return Ok(None);
            }
            let plugin = self.resolve(&entry)?;
            return Ok(Some(LoadedPlugin::new(plugin, entry.plugin_config())));
        }

        let claimed = HashSet::new();
        if let Some((_, dir)) = self
            .unclaimed_dirs(&claimed)
            .into_iter()
            .find(|(dir_name, _)| dir_name == name)
        {
            let plugin = self.load_dir(&dir)?;
            return Ok(Some(LoadedPlugin::unconfigured(plugin)));
        }

        Ok(builtin::create(name).map(LoadedPlugin::unconfigured))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plugin::config::PluginsFile;
    use crate::plugin::installed::METADATA_FILE;
    use crate::plugin::loader::dynamic::library_extension;
    use crate::plugin::types::{Command, PluginMetadata};
    use serial_test::serial;
    use std::fs;

    /// 根据元数据记录重建的插件
    pub(crate) struct RecordPlugin(pub PluginMetadata);

    impl Plugin for RecordPlugin {
        fn name(&self) -> &str {
            &self.0.name
        }
        fn description(&self) -> &str {
            &self.0.description
        }
        fn version(&self) -> &str {
            &self.0.version
        }
        fn author(&self) -> &str {
            &self.0.author
        }
        fn commands(&self) -> Vec<Command> {
            vec![Command::new("status", "Show status", |_, _| Ok(()))]
        }
        fn dependencies(&self) -> Vec<crate::plugin::types::Dependency> {
            self.0.dependencies.clone()
        }
    }

    /// 读取制品旁 `plugin.json` 的制品加载器，
    /// 不映射原生代码
    pub(crate) struct RecordArtifactLoader;

    impl ArtifactLoader for RecordArtifactLoader {
        fn load(&self, artifact: &Path) -> Result<Box<dyn Plugin>, PluginError> {
            let dir = artifact
                .parent()
                .ok_or_else(|| PluginError::LoadFailed("artifact has no parent".to_string()))?;
            let metadata = installed::read_metadata(dir)?;
            Ok(Box::new(RecordPlugin(metadata)))
        }
    }

    pub(crate) fn install_fake(root: &Path, dir_name: &str, name: &str, version: &str) -> PathBuf {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        let artifact = dir.join(format!("lib{}.{}", name.replace('-', "_"), library_extension()));
        fs::write(&artifact, format!("{}-{}", name, version)).unwrap();
        let metadata = PluginMetadata {
            name: name.to_string(),
            description: format!("{} plugin", name),
            version: version.to_string(),
            author: "acme".to_string(),
            ..Default::default()
        };
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata).unwrap(),
        )
        .unwrap();
        artifact
    }

    fn loader(doc: PluginsFile, plugin_dir: &Path) -> SourceLoader {
        SourceLoader::new(
            PluginConfigManager::from_document(doc),
            plugin_dir.to_path_buf(),
            Arc::new(RecordArtifactLoader),
        )
    }

    #[test]
    #[serial]
    fn test_resolves_each_source_kind() {
        builtin::init();
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("plugins");
        let widget = install_fake(&plugin_dir, "widget", "widget", "1.2.0");
        let local = install_fake(root.path(), "local-tool", "local-tool", "0.1.0");
        let hash = installed::sha256_file(&widget).unwrap();

        let doc = PluginsFile {
            search_dirs: Vec::new(),
            official_sources: Vec::new(),
            plugins: vec![
                PluginEntry::new("system", PluginSource::Builtin("system".to_string())),
                PluginEntry::new("local-tool", PluginSource::Path(local.parent().unwrap().to_path_buf())),
                PluginEntry::new(
                    "widget",
                    PluginSource::Remote {
                        url: "https://example.com/acme/widget".to_string(),
                        hash,
                    },
                ),
            ],
        };

        let batch = loader(doc, &plugin_dir).load_plugins().unwrap();
        assert!(batch.failures.is_empty());
        let mut names: Vec<&str> = batch.plugins.iter().map(|p| p.plugin.name()).collect();
        names.sort();
        assert_eq!(names, vec!["local-tool", "system", "widget"]);
    }

    #[test]
    fn test_remote_checksum_mismatch_is_isolated() {
        let root = tempfile::tempdir().unwrap();
        install_fake(root.path(), "widget", "widget", "1.2.0");
        install_fake(root.path(), "gadget", "gadget", "0.3.0");

        let doc = PluginsFile {
            search_dirs: Vec::new(),
            official_sources: Vec::new(),
            plugins: vec![PluginEntry::new(
                "widget",
                PluginSource::Remote {
                    url: "https://example.com/acme/widget".to_string(),
                    hash: "00".repeat(32),
                },
            )],
        };

        let batch = loader(doc, root.path()).load_plugins().unwrap();
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, "widget");
        // 无关的已安装插件照常加载
        assert_eq!(batch.plugins.len(), 1);
        assert_eq!(batch.plugins[0].plugin.name(), "gadget");
    }

    #[test]
    fn test_disabled_entry_is_not_revived_by_scan() {
        let root = tempfile::tempdir().unwrap();
        install_fake(root.path(), "widget", "widget", "1.2.0");

        let mut entry = PluginEntry::new(
            "widget",
            PluginSource::Path(root.path().join("widget")),
        );
        entry.enabled = false;
        let doc = PluginsFile {
            search_dirs: Vec::new(),
            official_sources: Vec::new(),
            plugins: vec![entry],
        };

        let loader = loader(doc, root.path());
        assert!(loader.load_plugins().unwrap().plugins.is_empty());
        assert!(loader.load_plugin("widget").unwrap().is_none());
    }

    #[test]
    fn test_search_dirs_and_single_lookup() {
        let root = tempfile::tempdir().unwrap();
        let extra = root.path().join("extra");
        install_fake(&extra, "gadget", "gadget", "0.3.0");
        install_fake(&extra, ".gadget.staging", "gadget", "0.4.0");

        let doc = PluginsFile {
            search_dirs: vec![extra.clone()],
            plugins: Vec::new(),
            ..Default::default()
        };
        let loader = loader(doc, &root.path().join("plugins"));

        let batch = loader.load_plugins().unwrap();
        assert_eq!(batch.plugins.len(), 1);
        assert_eq!(batch.plugins[0].plugin.version(), "0.3.0");

        let one = loader.load_plugin("gadget").unwrap().unwrap();
        assert_eq!(one.plugin.name(), "gadget");
        assert!(loader.load_plugin("ghost").unwrap().is_none());
    }
}
