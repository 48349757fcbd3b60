use async_trait::async_trait;
use domain::{ConnectionId, UserId};

/// 全局在线用户登记表
///
/// 用户只要还有一个存活的连接就算在线，最后一个连接移除时整条记录删除。
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 登记 (用户, 连接)，重复登记同一对没有额外效果
    async fn set_online(&self, user_id: UserId, connection_id: ConnectionId);

    /// 移除该连接关联的所有登记，返回因此下线的用户。已移除的连接再次调用是空操作。
    async fn remove(&self, connection_id: ConnectionId) -> Vec<UserId>;

    /// 当前在线用户的拷贝，按 id 排序
    async fn snapshot(&self) -> Vec<UserId>;

    async fn is_online(&self, user_id: &UserId) -> bool;
}

/// 内存实现
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct PresenceState {
        user_connections: BTreeMap<UserId, HashSet<ConnectionId>>,
        connection_users: HashMap<ConnectionId, HashSet<UserId>>,
    }

    /// 两个索引放在同一把锁下，保证任意时刻互相一致
    #[derive(Default)]
    pub struct MemoryPresenceRegistry {
        state: RwLock<PresenceState>,
    }

    impl MemoryPresenceRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn online_count(&self) -> usize {
            self.state.read().await.user_connections.len()
        }
    }

    #[async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        async fn set_online(&self, user_id: UserId, connection_id: ConnectionId) {
            let mut state = self.state.write().await;
            state
                .user_connections
                .entry(user_id.clone())
                .or_default()
                .insert(connection_id);
            state
                .connection_users
                .entry(connection_id)
                .or_default()
                .insert(user_id);
        }

        async fn remove(&self, connection_id: ConnectionId) -> Vec<UserId> {
            let mut state = self.state.write().await;
            let Some(users) = state.connection_users.remove(&connection_id) else {
                return Vec::new();
            };

            let mut offline = Vec::new();
            for user_id in users {
                if let Some(connections) = state.user_connections.get_mut(&user_id) {
                    connections.remove(&connection_id);
                    if connections.is_empty() {
                        state.user_connections.remove(&user_id);
                        offline.push(user_id);
                    }
                }
            }
            offline.sort();
            offline
        }

        async fn snapshot(&self) -> Vec<UserId> {
            self.state
                .read()
                .await
                .user_connections
                .keys()
                .cloned()
                .collect()
        }

        async fn is_online(&self, user_id: &UserId) -> bool {
            self.state
                .read()
                .await
                .user_connections
                .contains_key(user_id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::Arc;

        fn user(id: &str) -> UserId {
            UserId::parse(id).unwrap()
        }

        #[tokio::test]
        async fn user_stays_online_until_last_connection_leaves() {
            let registry = MemoryPresenceRegistry::new();
            let alice = user("alice");
            let (phone, laptop) = (ConnectionId::generate(), ConnectionId::generate());

            registry.set_online(alice.clone(), phone).await;
            registry.set_online(alice.clone(), laptop).await;

            assert!(registry.remove(phone).await.is_empty());
            assert!(registry.is_online(&alice).await);

            assert_eq!(registry.remove(laptop).await, vec![alice.clone()]);
            assert!(!registry.is_online(&alice).await);
            assert!(registry.snapshot().await.is_empty());
        }

        #[tokio::test]
        async fn set_online_is_idempotent_and_remove_is_safe_to_repeat() {
            let registry = MemoryPresenceRegistry::new();
            let connection = ConnectionId::generate();

            registry.set_online(user("bob"), connection).await;
            registry.set_online(user("bob"), connection).await;
            assert_eq!(registry.snapshot().await, vec![user("bob")]);

            assert_eq!(registry.remove(connection).await, vec![user("bob")]);
            assert!(registry.remove(connection).await.is_empty());
            assert!(registry.remove(ConnectionId::generate()).await.is_empty());
        }

        #[tokio::test]
        async fn snapshot_matches_live_connections_after_concurrent_churn() {
            let registry = Arc::new(MemoryPresenceRegistry::new());
            let mut handles = Vec::new();

            for i in 0..64 {
                let registry = Arc::clone(&registry);
                handles.push(tokio::spawn(async move {
                    let user_id = user(&format!("user-{}", i % 8));
                    let connection = ConnectionId::generate();
                    registry.set_online(user_id, connection).await;
                    // 偶数连接随即断开，奇数连接保持
                    if i % 2 == 0 {
                        registry.remove(connection).await;
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            // 奇数 i 对应 user-1/3/5/7
            let expected: Vec<UserId> = ["user-1", "user-3", "user-5", "user-7"]
                .into_iter()
                .map(user)
                .collect();
            assert_eq!(registry.snapshot().await, expected);
            assert_eq!(registry.online_count().await, 4);
        }
    }
}
