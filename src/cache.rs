use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{domain::MachineRecord, store::BoxFuture};

/// Last-known machine records keyed by machine id.
///
/// Writes always replace the whole record. Entries are never invalidated,
/// only overwritten.
pub trait MachineCache: Send + Sync + 'static {
    fn get<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<MachineRecord>>>;

    fn put(&self, machine_id: String, machine: MachineRecord) -> BoxFuture<'_, anyhow::Result<()>>;
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, MachineRecord>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl MachineCache for MemoryCache {
    fn get<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<MachineRecord>>> {
        Box::pin(async move { Ok(self.inner.read().await.get(machine_id).cloned()) })
    }

    fn put(&self, machine_id: String, machine: MachineRecord) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.inner.write().await.insert(machine_id, machine);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::domain::MachineStatus;

    #[tokio::test]
    async fn put_replaces_whole_record() {
        let cache = MemoryCache::new();
        let mut m1 = MachineRecord::available("m1", "L1");
        cache.put("m1".to_string(), m1.clone()).await.unwrap();

        m1.status = MachineStatus::Running;
        m1.job_id = Some("J1".to_string());
        cache.put("m1".to_string(), m1.clone()).await.unwrap();

        assert_eq!(cache.get("m1").await.unwrap(), Some(m1));
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        other
            .put("m1".to_string(), MachineRecord::available("m1", "L1"))
            .await
            .unwrap();
        assert!(cache.get("m1").await.unwrap().is_some());
    }
}
