//! JSON 文件账本存储：<dir>/<mas_name>/<session_id>.json
//!
//! 写入先落临时文件再 rename；同一会话的读改写由会话锁串行。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::checkpoint::{session_key, Ledger, LedgerStore, RootCall, SessionLocks};
use crate::core::{ExecResult, OxyError};

#[derive(Debug)]
pub struct FileLedgerStore {
    dir: PathBuf,
    locks: SessionLocks,
}

/// 文件名编码：ASCII 字母数字与 - 原样保留，其余字节写成 _XX（大写十六进制），可逆且不冲突
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{b:02X}"));
        }
    }
    out
}

fn ledger_err(e: impl std::fmt::Display) -> OxyError {
    OxyError::Ledger(e.to_string())
}

impl FileLedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: SessionLocks::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, mas_name: &str, session_id: &str) -> PathBuf {
        self.dir
            .join(encode_component(mas_name))
            .join(format!("{}.json", encode_component(session_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Ledger>, OxyError> {
        match fs::read_to_string(path).await {
            Ok(s) => serde_json::from_str(&s).map(Some).map_err(ledger_err),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ledger_err(e)),
        }
    }

    async fn write(&self, path: &Path, ledger: &Ledger) -> Result<(), OxyError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ledger_err)?;
        }
        let json = serde_json::to_string_pretty(ledger).map_err(ledger_err)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(ledger_err)?;
        fs::rename(&tmp, path).await.map_err(ledger_err)
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn begin_run(&self, mas_name: &str, session_id: &str, root: RootCall) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(mas_name, session_id));
        let _guard = lock.lock().await;
        let path = self.path_for(mas_name, session_id);
        let mut ledger = self
            .read(&path)
            .await?
            .unwrap_or_else(|| Ledger::new(mas_name, session_id));
        ledger.begin_run(root);
        self.write(&path, &ledger).await
    }

    async fn append(&self, mas_name: &str, session_id: &str, result: ExecResult) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(mas_name, session_id));
        let _guard = lock.lock().await;
        let path = self.path_for(mas_name, session_id);
        let mut ledger = self
            .read(&path)
            .await?
            .unwrap_or_else(|| Ledger::new(mas_name, session_id));
        ledger.record(result);
        self.write(&path, &ledger).await
    }

    async fn load(&self, mas_name: &str, session_id: &str) -> Result<Option<Ledger>, OxyError> {
        let lock = self.locks.lock_for(&session_key(mas_name, session_id));
        let _guard = lock.lock().await;
        self.read(&self.path_for(mas_name, session_id)).await
    }

    async fn replace(&self, ledger: Ledger) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(&ledger.mas_name, &ledger.session_id));
        let _guard = lock.lock().await;
        let path = self.path_for(&ledger.mas_name, &ledger.session_id);
        self.write(&path, &ledger).await
    }

    async fn remove(&self, mas_name: &str, session_id: &str) -> Result<bool, OxyError> {
        let key = session_key(mas_name, session_id);
        let removed = {
            let lock = self.locks.lock_for(&key);
            let _guard = lock.lock().await;
            match fs::remove_file(self.path_for(mas_name, session_id)).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(ledger_err(e)),
            }
        };
        self.locks.forget(&key);
        Ok(removed)
    }
}
