//! 内置插件表
//!
//! 编译进二进制的插件在 [`init`] 中登记构造函数。
//! 该表只在启动时填充一次，之后只读；
//! [`teardown`] 会再次清空它。

use crate::plugin::loader::{LoadBatch, LoadedPlugin, PluginLoader};
use crate::plugin::types::{Plugin, PluginError};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

/// 内置插件的构造函数
pub type BuiltinConstructor = fn() -> Box<dyn Plugin>;

fn table() -> MutexGuard<'static, BTreeMap<String, BuiltinConstructor>> {
    static TABLE: OnceLock<Mutex<BTreeMap<String, BuiltinConstructor>>> = OnceLock::new();
    TABLE
        .get_or_init(|| Mutex::new(BTreeMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// 登记随二进制发布的全部插件，可重复调用
pub fn init() {
    crate::builtins::register_all();
}

/// 新增或替换构造函数
pub fn register(id: &str, constructor: BuiltinConstructor) {
    debug!(id, "registering built-in plugin");
    table().insert(id.to_string(), constructor);
}

/// 清空插件表
pub fn teardown() {
    table().clear();
}

/// 已登记的 id，已排序
pub fn names() -> Vec<String> {
    table().keys().cloned().collect()
}

pub fn contains(id: &str) -> bool {
    table().contains_key(id)
}

/// 构造一个新的内置插件实例
pub fn create(id: &str) -> Option<Box<dyn Plugin>> {
    // 先取出函数指针，构造期间不持有锁
    let constructor = table().get(id).copied();
    constructor.map(|c| c())
}

/// 基于内置插件表的加载器
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLoader;

impl PluginLoader for BuiltinLoader {
    fn name(&self) -> &str {
        "builtin"
    }

    fn load_plugins(&self) -> Result<LoadBatch, PluginError> {
        let plugins = names()
            .iter()
            .filter_map(|id| create(id))
            .map(LoadedPlugin::unconfigured)
            .collect();
        Ok(LoadBatch {
            plugins,
            failures: Vec::new(),
        })
    }

    fn load_plugin(&self, name: &str) -> Result<Option<LoadedPlugin>, PluginError> {
        Ok(create(name).map(LoadedPlugin::unconfigured))
    }
}
