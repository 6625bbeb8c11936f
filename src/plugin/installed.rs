//! 已安装插件的目录布局
//!
//! `plugins/<name>/` 下只有一个动态库和 `plugin.json`。
//! 以 `.` 开头的条目是暂存或备份目录，
//! 不会被当作已安装插件。

use crate::plugin::loader::dynamic::is_library;
use crate::plugin::types::{PluginError, PluginMetadata};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// 元数据记录文件名
pub const METADATA_FILE: &str = "plugin.json";

/// 文件内容的十六进制 SHA-256
pub fn sha256_file(path: &Path) -> Result<String, PluginError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// `dir` 是否像一个已安装插件
pub fn is_plugin_dir(dir: &Path) -> bool {
    dir.is_dir() && !is_hidden(dir) && dir.join(METADATA_FILE).is_file()
}

pub fn read_metadata(dir: &Path) -> Result<PluginMetadata, PluginError> {
    let path = dir.join(METADATA_FILE);
    if !path.is_file() {
        return Err(PluginError::MetadataNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

/// `dir` 中唯一的动态库
pub fn find_artifact(dir: &Path) -> Result<PathBuf, PluginError> {
    let mut libraries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_library(p))
        .collect();

    match libraries.len() {
        1 => Ok(libraries.remove(0)),
        0 => Err(PluginError::LoadFailed(format!(
            "no plugin library in {}",
            dir.display()
        ))),
        n => Err(PluginError::LoadFailed(format!(
            "{} plugin libraries in {}, expected one",
            n,
            dir.display()
        ))),
    }
}

/// `root` 下一级的已安装插件目录，按名称排序
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_plugin_dir(p))
        .collect();
    dirs.sort();
    dirs
}
