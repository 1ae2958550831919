//! 编排器注册表：按名称 get-or-create，同名最多一个实例
//!
//! 创建时从 SpaceCatalog 按优先级解析节点空间，共享的检索客户端、账本存储与远程分发器由注册表注入。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::checkpoint::{InMemoryLedgerStore, LedgerStore};
use crate::config::AppConfig;
use crate::core::{Mas, MasSettings, OxyError, SpaceCatalog};
use crate::memory::MemoryClients;
use crate::remote::RemoteDispatcher;

pub struct MasRegistry {
    catalog: SpaceCatalog,
    settings: MasSettings,
    ledger: Arc<dyn LedgerStore>,
    clients: MemoryClients,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    instances: Mutex<HashMap<String, Arc<Mas>>>,
}

impl MasRegistry {
    pub fn new(catalog: SpaceCatalog) -> Self {
        Self {
            catalog,
            settings: MasSettings::default(),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            clients: MemoryClients::default(),
            dispatcher: None,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// 新建实例使用配置中的 [mas] / [memory] / [react] 参数
    pub fn with_config(mut self, cfg: &AppConfig) -> Self {
        self.settings = MasSettings::from_config(cfg);
        self
    }

    pub fn with_settings(mut self, settings: MasSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_memory_clients(mut self, clients: MemoryClients) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// 取已有实例，不存在则创建；并发调用下同名只构建一次
    pub async fn get_or_create(&self, mas_name: &str) -> Result<Arc<Mas>, OxyError> {
        let mut instances = self.instances.lock().await;
        if let Some(mas) = instances.get(mas_name) {
            return Ok(Arc::clone(mas));
        }

        let (space, origin) = self.catalog.resolve(mas_name)?;
        let mut builder = Mas::builder(mas_name)
            .space(space, origin)
            .settings(self.settings.clone())
            .ledger(Arc::clone(&self.ledger))
            .memory_clients(self.clients.clone());
        if let Some(d) = &self.dispatcher {
            builder = builder.dispatcher(Arc::clone(d));
        }
        let mas = Arc::new(builder.build()?);
        instances.insert(mas_name.to_string(), Arc::clone(&mas));
        Ok(mas)
    }

    pub async fn get(&self, mas_name: &str) -> Result<Arc<Mas>, OxyError> {
        self.instances
            .lock()
            .await
            .get(mas_name)
            .cloned()
            .ok_or_else(|| OxyError::MasNotFound(mas_name.to_string()))
    }

    pub async fn remove(&self, mas_name: &str) -> Option<Arc<Mas>> {
        self.instances.lock().await.remove(mas_name)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Node, SpaceOrigin};
    use crate::tools::EchoTool;

    #[tokio::test]
    async fn test_get_before_create_is_not_found() {
        let registry = MasRegistry::new(SpaceCatalog::new());
        let err = registry.get("travel").await.err().unwrap();
        assert!(matches!(err, OxyError::MasNotFound(ref n) if n == "travel"));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_builds_once() {
        let catalog = SpaceCatalog::new().declare("travel", vec![Node::tool(EchoTool)]);
        let registry = Arc::new(MasRegistry::new(catalog));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&registry);
                tokio::spawn(async move { r.get_or_create("travel").await.unwrap() })
            })
            .collect();
        let mut instances = Vec::new();
        for h in handles {
            instances.push(h.await.unwrap());
        }
        for mas in &instances {
            assert!(Arc::ptr_eq(mas, &instances[0]));
        }
        assert_eq!(instances[0].origin(), SpaceOrigin::Declared);
        assert!(Arc::ptr_eq(&registry.get("travel").await.unwrap(), &instances[0]));
        assert_eq!(registry.names().await, vec!["travel".to_string()]);
    }
}
