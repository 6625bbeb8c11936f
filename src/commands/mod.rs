//! 命令处理器
//!
//! 每个命令组一个模块，每个命令实现 `CommandHandler`。

use crate::error::Result;

pub mod plugin;
pub mod run;

/// 命令上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandContext {
    pub verbose: bool,
}

/// 命令处理器 trait
pub trait CommandHandler {
    fn execute(&self, ctx: &CommandContext) -> Result<()>;
}
