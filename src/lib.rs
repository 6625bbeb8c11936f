//! hostkit - 基于可插拔能力模块的主机自动化工具
//!
//! 插件系统位于 [`plugin`]；原生插件链接本 crate，
//! 并通过 [`export_plugin!`] 导出自身。

pub mod app;
pub mod builtins;
pub mod cli;
pub mod commands;
pub mod connection;
pub mod error;
pub mod plugin;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use error::{HostError, Result};
pub use plugin::{Plugin, PluginError};
