// 按服务器串行化的操作锁
//
// 同一台服务器上的逻辑操作（连接 → 执行 → 关闭）按到达顺序依次进行，
// 不同服务器之间互不影响。tokio 的 Mutex 是公平锁（FIFO）。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::ServerId;

#[derive(Clone, Default)]
pub struct ServerLocks {
    locks: Arc<DashMap<ServerId, Arc<Mutex<()>>>>,
}

impl ServerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待并持有服务器锁，guard 释放时解锁
    pub async fn acquire(&self, server_id: ServerId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(server_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// 服务器删除后移除其锁
    pub fn forget(&self, server_id: ServerId) {
        self.locks.remove(&server_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, server_id: ServerId) -> bool {
        self.locks
            .get(&server_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
