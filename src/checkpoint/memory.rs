//! 内存账本存储：每个会话一把互斥锁，append 串行

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::checkpoint::{session_key, Ledger, LedgerStore, RootCall};
use crate::core::{ExecResult, OxyError};

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    ledgers: RwLock<HashMap<String, Arc<Mutex<Ledger>>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, mas_name: &str, session_id: &str) -> Arc<Mutex<Ledger>> {
        let key = session_key(mas_name, session_id);
        if let Some(l) = self.ledgers.read().await.get(&key) {
            return l.clone();
        }
        self.ledgers
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Ledger::new(mas_name, session_id))))
            .clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin_run(&self, mas_name: &str, session_id: &str, root: RootCall) -> Result<(), OxyError> {
        let entry = self.entry(mas_name, session_id).await;
        entry.lock().await.begin_run(root);
        Ok(())
    }

    async fn append(&self, mas_name: &str, session_id: &str, result: ExecResult) -> Result<(), OxyError> {
        let entry = self.entry(mas_name, session_id).await;
        entry.lock().await.record(result);
        Ok(())
    }

    async fn load(&self, mas_name: &str, session_id: &str) -> Result<Option<Ledger>, OxyError> {
        let key = session_key(mas_name, session_id);
        let entry = self.ledgers.read().await.get(&key).cloned();
        match entry {
            Some(l) => Ok(Some(l.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn replace(&self, ledger: Ledger) -> Result<(), OxyError> {
        let entry = self.entry(&ledger.mas_name, &ledger.session_id).await;
        *entry.lock().await = ledger;
        Ok(())
    }

    async fn remove(&self, mas_name: &str, session_id: &str) -> Result<bool, OxyError> {
        let key = session_key(mas_name, session_id);
        Ok(self.ledgers.write().await.remove(&key).is_some())
    }
}
