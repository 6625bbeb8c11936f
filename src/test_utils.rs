//! 共享的测试辅助工具
//!
//! 隔离的 `HOSTKIT_HOME`，以及记录插件所发命令的连接。

use crate::connection::{Connection, ConnectionError, ExecOutput};
use crate::utils::paths::HOME_ENV;
use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use tempfile::TempDir;

/// 把 `HOSTKIT_HOME` 指向新的临时目录，drop 时恢复原值。
/// 使用它的测试必须加 `#[serial]`。
pub struct HomeGuard {
    temp_dir: TempDir,
    original: Option<String>,
}

impl Default for HomeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl HomeGuard {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let original = env::var(HOME_ENV).ok();
        unsafe {
            env::set_var(HOME_ENV, temp_dir.path());
        }
        Self { temp_dir, original }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Drop for HomeGuard {
    fn drop(&mut self) {
        unsafe {
            match &self.original {
                Some(value) => env::set_var(HOME_ENV, value),
                None => env::remove_var(HOME_ENV),
            }
        }
    }
}

/// 内存中的连接
///
/// 除非为命令登记了预设响应，
/// 每条命令都成功且输出为空。
#[derive(Default)]
pub struct RecordingConnection {
    pub commands: Mutex<Vec<String>>,
    pub files: Mutex<HashMap<String, (Vec<u8>, u32)>>,
    responses: HashMap<String, ExecOutput>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, command: &str, status: i32, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            ExecOutput {
                status,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Connection for RecordingConnection {
    fn target(&self) -> &str {
        "test-host"
    }

    fn exec(&self, command: &str) -> Result<ExecOutput, ConnectionError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self.responses.get(command).cloned().unwrap_or_default())
    }

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), ConnectionError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (contents.to_vec(), mode));
        Ok(())
    }

    fn interactive(&self, command: &str) -> Result<i32, ConnectionError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_home_guard_restores() {
        let before = env::var(HOME_ENV).ok();
        {
            let guard = HomeGuard::new();
            assert_eq!(env::var(HOME_ENV).unwrap(), guard.path().to_string_lossy());
        }
        assert_eq!(env::var(HOME_ENV).ok(), before);
    }

    #[test]
    fn test_recording_connection() {
        let conn = RecordingConnection::new().respond("uptime", 0, "up 3 days");
        assert_eq!(conn.exec("uptime").unwrap().stdout, "up 3 days");
        assert!(conn.exec_checked("true").is_ok());
        assert_eq!(conn.executed(), vec!["uptime", "true"]);
    }
}
