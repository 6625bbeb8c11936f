//! `hostkit-plugin.toml`：插件仓库携带的元数据文件

use crate::plugin::types::{Compatibility, Dependency, PluginError, PluginMetadata};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "hostkit-plugin.toml";

/// 如何从检出目录产出制品
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// 由能识别布局的构建器决定
    #[default]
    Auto,
    Cargo,
    Prebuilt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSpec {
    pub kind: BuildKind,
    /// 预编译库，相对清单所在目录
    pub artifact: Option<PathBuf>,
    /// 清单位于 workspace 中时要构建的 Cargo package
    pub package: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub trust_level: Option<String>,
    pub commands: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub compatibility: Compatibility,
    pub build: BuildSpec,
}

impl PluginManifest {
    pub fn from_file(path: &Path) -> Result<Self, PluginError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// 已安装元数据记录中的身份部分
    pub fn to_metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            commands: self.commands.clone(),
            dependencies: self.dependencies.clone(),
            compatibility: self.compatibility.clone(),
            trust_level: self.trust_level.clone(),
            ..Default::default()
        }
    }
}

/// 在 `root` 或恰好一个直接子目录中查找清单
///
/// 返回清单所在目录和解析后的清单
pub fn discover(root: &Path) -> Result<(PathBuf, PluginManifest), PluginError> {
    let at_root = root.join(MANIFEST_FILE);
    if at_root.is_file() {
        return Ok((root.to_path_buf(), PluginManifest::from_file(&at_root)?));
    }

    let mut found: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .filter(|p| p.join(MANIFEST_FILE).is_file())
        .collect();
    found.sort();

    match found.len() {
        0 => Err(PluginError::MetadataNotFound(format!(
            "no {} at the root of {} or in any immediate subdirectory",
            MANIFEST_FILE,
            root.display()
        ))),
        1 => {
            let dir = found.remove(0);
            let manifest = PluginManifest::from_file(&dir.join(MANIFEST_FILE))?;
            Ok((dir, manifest))
        }
        _ => {
            let names: Vec<String> = found
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            Err(PluginError::MetadataNotFound(format!(
                "ambiguous: {} found in several subdirectories ({})",
                MANIFEST_FILE,
                names.join(", ")
            )))
        }
    }
}
