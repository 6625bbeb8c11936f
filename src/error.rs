//! 顶层错误类型与错误报告

use crate::plugin::types::PluginError;
use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration directory unavailable: {0}")]
    ConfigDirMissing(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plugin configuration error: {0}")]
    PluginConfig(String),

    /// 批量操作中有插件失败
    #[error("{0}")]
    Failed(String),
}

impl From<toml::de::Error> for HostError {
    fn from(e: toml::de::Error) -> Self {
        HostError::PluginConfig(e.to_string())
    }
}

impl From<toml::ser::Error> for HostError {
    fn from(e: toml::ser::Error) -> Self {
        HostError::PluginConfig(e.to_string())
    }
}

impl HostError {
    /// 把错误打印到 stderr
    ///
    /// `verbose` 时打印完整的 `source()` 链，否则只打印一行
    pub fn report(&self, verbose: bool) {
        if verbose {
            eprintln!("error: {}", self);

            if let Some(source) = self.source() {
                eprintln!("  caused by: {}", source);
                let mut current = source.source();
                while let Some(next) = current {
                    eprintln!("    caused by: {}", next);
                    current = next.source();
                }
            }
        } else {
            match self {
                HostError::Plugin(err) => match err.step() {
                    Some(step) => eprintln!("error: install failed at {}: {}", step, err.kind()),
                    None => eprintln!("error: {}", err),
                },
                HostError::FileNotFound(path) => eprintln!("error: file not found: {}", path.display()),
                _ => eprintln!("error: {}", self),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::types::InstallStep;

    #[test]
    fn test_install_error_keeps_step_and_kind() {
        let err: HostError = PluginError::Install {
            step: InstallStep::Discover,
            source: Box::new(PluginError::MetadataNotFound("no hostkit-plugin.toml".to_string())),
        }
        .into();

        let HostError::Plugin(inner) = &err else {
            panic!("expected plugin error");
        };
        assert_eq!(inner.step(), Some(InstallStep::Discover));
        assert!(matches!(inner.kind(), PluginError::MetadataNotFound(_)));
        assert!(err.to_string().starts_with("discover step failed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_toml_errors_convert() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("a = ");
        let err: HostError = parse.unwrap_err().into();
        assert!(matches!(err, HostError::PluginConfig(_)));
    }
}
