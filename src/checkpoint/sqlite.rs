//! SQLite 账本存储（feature = "async-sqlite"）
//!
//! 每个会话一行，body 列为账本 JSON；同一会话的读改写由会话锁串行。

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::checkpoint::{session_key, Ledger, LedgerStore, RootCall, SessionLocks};
use crate::core::{ExecResult, OxyError};

fn ledger_err(e: impl std::fmt::Display) -> OxyError {
    OxyError::Ledger(e.to_string())
}

pub struct SqliteLedgerStore {
    pool: SqlitePool,
    locks: SessionLocks,
}

impl SqliteLedgerStore {
    /// 打开（或创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<std::path::Path>) -> Result<Self, OxyError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&db_url).await
    }

    pub async fn connect(db_url: &str) -> Result<Self, OxyError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(db_url)
            .await
            .map_err(ledger_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS oxy_ledger (
                mas_name TEXT NOT NULL,
                session_id TEXT NOT NULL,
                last_node TEXT,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (mas_name, session_id)
            )",
        )
        .execute(&pool)
        .await
        .map_err(ledger_err)?;

        Ok(Self {
            pool,
            locks: SessionLocks::default(),
        })
    }

    async fn read(&self, mas_name: &str, session_id: &str) -> Result<Option<Ledger>, OxyError> {
        let row = sqlx::query("SELECT body FROM oxy_ledger WHERE mas_name = ? AND session_id = ?")
            .bind(mas_name)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_err)?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                serde_json::from_str(&body).map(Some).map_err(ledger_err)
            }
            None => Ok(None),
        }
    }

    async fn write(&self, ledger: &Ledger) -> Result<(), OxyError> {
        let body = serde_json::to_string(ledger).map_err(ledger_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO oxy_ledger (mas_name, session_id, last_node, body, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&ledger.mas_name)
        .bind(&ledger.session_id)
        .bind(&ledger.last_node)
        .bind(body)
        .bind(ledger.updated_at)
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin_run(&self, mas_name: &str, session_id: &str, root: RootCall) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(mas_name, session_id));
        let _guard = lock.lock().await;
        let mut ledger = self
            .read(mas_name, session_id)
            .await?
            .unwrap_or_else(|| Ledger::new(mas_name, session_id));
        ledger.begin_run(root);
        self.write(&ledger).await
    }

    async fn append(&self, mas_name: &str, session_id: &str, result: ExecResult) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(mas_name, session_id));
        let _guard = lock.lock().await;
        let mut ledger = self
            .read(mas_name, session_id)
            .await?
            .unwrap_or_else(|| Ledger::new(mas_name, session_id));
        ledger.record(result);
        self.write(&ledger).await
    }

    async fn load(&self, mas_name: &str, session_id: &str) -> Result<Option<Ledger>, OxyError> {
        self.read(mas_name, session_id).await
    }

    async fn replace(&self, ledger: Ledger) -> Result<(), OxyError> {
        let lock = self.locks.lock_for(&session_key(&ledger.mas_name, &ledger.session_id));
        let _guard = lock.lock().await;
        self.write(&ledger).await
    }

    async fn remove(&self, mas_name: &str, session_id: &str) -> Result<bool, OxyError> {
        let key = session_key(mas_name, session_id);
        let res = {
            let lock = self.locks.lock_for(&key);
            let _guard = lock.lock().await;
            sqlx::query("DELETE FROM oxy_ledger WHERE mas_name = ? AND session_id = ?")
                .bind(mas_name)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(ledger_err)?
        };
        self.locks.forget(&key);
        Ok(res.rows_affected() > 0)
    }
}
