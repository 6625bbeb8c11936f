//! 原生插件入口
//!
//! 插件库导出一个静态声明，原生加载器按符号名查找它。
//! 用 [`export_plugin!`](crate::export_plugin) 生成该声明。

use crate::plugin::types::Plugin;

/// `Plugin` trait 或本声明的布局变化时递增
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// 导出符号名
pub const DECLARATION_SYMBOL: &str = "HOSTKIT_PLUGIN_DECLARATION";

/// 插件库导出的构造函数
#[allow(improper_ctypes_definitions)]
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut dyn Plugin;

/// 每个原生插件都导出的声明
#[repr(C)]
pub struct PluginDeclaration {
    pub abi_version: u32,
    /// 编译该库所用的 rustc 版本
    pub rustc_version: &'static str,
    pub create: CreatePluginFn,
}

/// 从 `cdylib` 导出插件构造函数
///
/// ```rust,ignore
/// use hostkit::export_plugin;
/// use hostkit::plugin::{Command, Plugin};
///
/// #[derive(Default)]
/// struct Widget;
///
/// impl Plugin for Widget {
///     fn name(&self) -> &str { "widget" }
///     fn description(&self) -> &str { "Manages widgets" }
///     fn version(&self) -> &str { "1.2.0" }
///     fn author(&self) -> &str { "acme" }
///     fn commands(&self) -> Vec<Command> {
///         vec![Command::new("status", "Show widget status", |conn, _| {
///             conn.exec_checked("widgetctl status")?;
///             Ok(())
///         })]
///     }
/// }
///
/// export_plugin!(Widget::default);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:path) => {
        // 宿主与插件共用 Rust ABI；加载器经此指针调用前
        // 会先检查 `abi_version`。
        #[allow(improper_ctypes_definitions)]
        unsafe extern "C" fn __hostkit_create_plugin() -> *mut dyn $crate::plugin::Plugin {
            let plugin: ::std::boxed::Box<dyn $crate::plugin::Plugin> =
                ::std::boxed::Box::new($constructor());
            ::std::boxed::Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub static HOSTKIT_PLUGIN_DECLARATION: $crate::plugin::api::PluginDeclaration =
            $crate::plugin::api::PluginDeclaration {
                abi_version: $crate::plugin::api::PLUGIN_ABI_VERSION,
                rustc_version: $crate::plugin::compatibility::RUNTIME_VERSION,
                create: __hostkit_create_plugin,
            };
    };
}

#[cfg(test)]
mod tests {
    use crate::plugin::types::{Command, Plugin};

    #[derive(Default)]
    struct Widget;

    impl Plugin for Widget {
        fn name(&self) -> &str {
            "widget"
        }
        fn description(&self) -> &str {
            "Manages widgets"
        }
        fn version(&self) -> &str {
            "1.2.0"
        }
        fn author(&self) -> &str {
            "acme"
        }
        fn commands(&self) -> Vec<Command> {
            vec![Command::new("status", "Show widget status", |_, _| Ok(()))]
        }
    }

    crate::export_plugin!(Widget::default);

    #[test]
    fn test_exported_declaration() {
        let declaration = &HOSTKIT_PLUGIN_DECLARATION;
        assert_eq!(declaration.abi_version, super::PLUGIN_ABI_VERSION);
        assert_eq!(
            declaration.rustc_version,
            crate::plugin::compatibility::RUNTIME_VERSION
        );

        let plugin = unsafe { Box::from_raw((declaration.create)()) };
        assert_eq!(plugin.name(), "widget");
        assert_eq!(plugin.commands().len(), 1);
    }
}
