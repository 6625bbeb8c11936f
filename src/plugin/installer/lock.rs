//! 按仓库划分的缓存锁
//!
//! 同一仓库的安装按缓存键串行：进程内用带键集合协调线程，跨进程用
//! `create_new` 锁文件，文件内容是持有者的 pid。两种等待都遵守安装截止时间。

use crate::plugin::types::{Context, PluginError};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// 无法读出持有者 pid 的锁文件，超过该时长视为残留
const UNATTRIBUTED_GRACE: Duration = Duration::from_secs(60);
const RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// 无截止时间时等待其他线程的唤醒间隔
const IDLE_WAIT: Duration = Duration::from_secs(1);

struct KeySet {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

fn keys() -> &'static KeySet {
    static KEYS: OnceLock<KeySet> = OnceLock::new();
    KEYS.get_or_init(|| KeySet {
        held: Mutex::new(HashSet::new()),
        released: Condvar::new(),
    })
}

fn timeout(key: &str) -> PluginError {
    PluginError::Timeout(format!("waiting for the cache lock on {}", key))
}

/// 检查进程是否存在
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: 信号 0 不会真正发送，只检查目标进程是否存在
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM：进程存在但属于其他用户
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// 非 Unix 平台无法检查，一律视为存活
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn holder_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// 一次安装期间持有，drop 时释放
#[derive(Debug)]
pub struct CacheLock {
    key: String,
    path: PathBuf,
}

impl CacheLock {
    pub fn acquire(cache_dir: &Path, key: &str, ctx: &Context) -> Result<Self, PluginError> {
        Self::acquire_in_process(key, ctx)?;

        match Self::acquire_file(cache_dir, key, ctx) {
            Ok(path) => Ok(Self {
                key: key.to_string(),
                path,
            }),
            Err(e) => {
                Self::release_in_process(key);
                Err(e)
            }
        }
    }

    fn acquire_in_process(key: &str, ctx: &Context) -> Result<(), PluginError> {
        let set = keys();
        let mut held = set.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(key) {
            debug!(key, "waiting for another install of the same repository");
            let wait = match ctx.deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(timeout(key));
                    }
                    deadline - now
                }
                None => IDLE_WAIT,
            };
            held = set
                .released
                .wait_timeout(held, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        held.insert(key.to_string());
        Ok(())
    }

    fn release_in_process(key: &str) {
        let set = keys();
        set.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        set.released.notify_all();
    }

    fn acquire_file(cache_dir: &Path, key: &str, ctx: &Context) -> Result<PathBuf, PluginError> {
        fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(format!("{}.lock", key));

        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(holder) = Self::stale_holder(&path) {
                        warn!(lock = %path.display(), holder = ?holder, "removing stale cache lock");
                        // 只删除仍属于同一持有者的锁文件
                        if holder_pid(&path) == holder {
                            let _ = fs::remove_file(&path);
                        }
                        continue;
                    }
                    if ctx.expired() {
                        return Err(timeout(key));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 锁文件是否为残留：持有者进程已退出，或写入 pid 前崩溃且已超过宽限期。
    /// 残留时返回文件中记录的 pid（可能没有）。
    fn stale_holder(path: &Path) -> Option<Option<u32>> {
        match holder_pid(path) {
            // 本进程的其他线程由进程内集合排除在外，这里只可能是 pid 复用
            Some(pid) if pid == std::process::id() => Some(Some(pid)),
            Some(pid) => (!process_alive(pid)).then_some(Some(pid)),
            None => {
                let age = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
                (age > UNATTRIBUTED_GRACE).then_some(None)
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(lock = %self.path.display(), error = %e, "failed to remove cache lock");
        }
        Self::release_in_process(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 存活的外部进程，测试结束时杀掉
    #[cfg(unix)]
    struct LiveProcess(Child);

    #[cfg(unix)]
    impl LiveProcess {
        fn spawn() -> Self {
            Self(Command::new("sleep").arg("30").spawn().unwrap())
        }

        fn pid(&self) -> u32 {
            self.0.id()
        }
    }

    #[cfg(unix)]
    impl Drop for LiveProcess {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    fn backdate(path: &Path, by: Duration) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_lock_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let lock = CacheLock::acquire(dir.path(), "acme__lifecycle", &Context::background()).unwrap();
        let path = dir.path().join("acme__lifecycle.lock");
        assert_eq!(holder_pid(&path), Some(std::process::id()));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_same_key_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _held = CacheLock::acquire(dir.path(), "acme__held", &Context::background()).unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(150));
        let err = CacheLock::acquire(dir.path(), "acme__held", &ctx).unwrap_err();
        assert!(matches!(err, PluginError::Timeout(_)));

        // 不同仓库互不阻塞
        assert!(CacheLock::acquire(dir.path(), "acme__other", &ctx).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_old_lock_of_live_holder_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let holder = LiveProcess::spawn();
        let path = dir.path().join("acme__busy.lock");
        fs::write(&path, format!("{}\n", holder.pid())).unwrap();
        backdate(&path, Duration::from_secs(3 * 60 * 60));

        let ctx = Context::with_timeout(Duration::from_millis(300));
        let err = CacheLock::acquire(dir.path(), "acme__busy", &ctx).unwrap_err();
        assert!(matches!(err, PluginError::Timeout(_)));
        assert_eq!(holder_pid(&path), Some(holder.pid()));

        drop(holder);
        let lock = CacheLock::acquire(dir.path(), "acme__busy", &ctx).unwrap();
        assert_eq!(holder_pid(&path), Some(std::process::id()));
        drop(lock);
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_of_exited_holder_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let path = dir.path().join("acme__crashed.lock");
        fs::write(&path, pid.to_string()).unwrap();

        let ctx = Context::with_timeout(Duration::from_secs(5));
        let _lock = CacheLock::acquire(dir.path(), "acme__crashed", &ctx).unwrap();
        assert_eq!(holder_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_unattributed_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme__partial.lock");
        fs::write(&path, "").unwrap();

        // 刚创建、尚未写入 pid：视为正在被持有
        let ctx = Context::with_timeout(Duration::from_millis(150));
        assert!(CacheLock::acquire(dir.path(), "acme__partial", &ctx).is_err());

        backdate(&path, UNATTRIBUTED_GRACE * 2);
        assert!(CacheLock::acquire(dir.path(), "acme__partial", &ctx).is_ok());
    }

    #[test]
    fn test_threads_are_serialized() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let ctx = Context::with_timeout(Duration::from_secs(30));
                    let _lock = CacheLock::acquire(dir.path(), "acme__threads", &ctx).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
