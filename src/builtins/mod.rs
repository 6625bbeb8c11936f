//! 编译进二进制的内置插件

mod docker;
mod system;

pub use docker::DockerPlugin;
pub use system::SystemPlugin;

use crate::plugin::loader::builtin;

/// 把所有内置插件登记到进程级表中
pub fn register_all() {
    builtin::register("system", || Box::new(SystemPlugin::default()));
    builtin::register("docker", || Box::new(DockerPlugin::default()));
}
