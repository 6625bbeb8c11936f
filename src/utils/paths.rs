//! 文件系统位置与小型文件工具

use crate::error::{HostError, Result};
use std::path::{Path, PathBuf};

/// 覆盖主目录（测试和 CI 使用）
pub const HOME_ENV: &str = "HOSTKIT_HOME";

/// `$HOSTKIT_HOME`，否则为 `~/.hostkit`
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| HostError::ConfigDirMissing("cannot locate the user home directory".to_string()))?;

    Ok(home.join(".hostkit"))
}

/// 启用配置文件
pub fn get_plugin_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("plugins.toml"))
}

/// 已安装插件，每个插件一个子目录
pub fn get_plugin_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("plugins"))
}

/// 安装器的克隆缓存
pub fn get_repo_cache_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("cache").join("repos"))
}

/// 读取文件，文件不存在时单独报告
pub fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(HostError::FileNotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|e| {
        HostError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", path.display(), e),
        ))
    })
}

/// 先写临时文件再原子重命名
pub fn write_file_safe(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}
