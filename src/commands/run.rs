//! run 命令处理器

use super::{CommandContext, CommandHandler};
use crate::app::Application;
use crate::connection;
use crate::error::Result;
use crate::plugin::types::CommandArgs;

/// run 命令
pub struct RunCommand<'a> {
    app: &'a Application,
    plugin: String,
    command: String,
    host: String,
    args: Vec<String>,
}

impl<'a> RunCommand<'a> {
    pub fn new(
        app: &'a Application,
        plugin: String,
        command: String,
        host: String,
        args: Vec<String>,
    ) -> Self {
        Self {
            app,
            plugin,
            command,
            host,
            args,
        }
    }
}

impl CommandHandler for RunCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        // 先检查插件是否存在，再建立连接
        self.app.registry.require(&self.plugin)?;

        let conn = connection::open(&self.host);
        let args = CommandArgs::parse(&self.args);
        self.app
            .registry
            .dispatch(&self.plugin, &self.command, conn.as_ref(), &args)?;
        Ok(())
    }
}
