//! Time-bounded memoization of remote cluster clients

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{ClusterClient, ClusterClientProvider, ClusterRef};
use crate::crd::NamespacedRef;
use crate::Result;

/// How long a remote client is reused before credentials are read again
pub const DEFAULT_CLIENT_TTL: Duration = Duration::from_secs(8 * 60 * 60);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map from kubeconfig secret to value, with lazily evicted entries
pub struct ClientCache<V> {
    entries: DashMap<NamespacedRef, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> ClientCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached value, dropping the entry if it has expired
    pub fn get(&self, key: &NamespacedRef) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
        None
    }

    pub fn insert(&self, key: NamespacedRef, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Cached value, or the result of `build` which is then cached.
    /// Failed builds are not cached.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: &NamespacedRef, build: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = build().await?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a client for a cluster from its kubeconfig secret
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    async fn build(
        &self,
        secret: &NamespacedRef,
        context: Option<&str>,
    ) -> Result<Arc<dyn ClusterClient>>;
}

/// [`ClusterClientProvider`] shared by all controllers and watchers
pub struct RemoteClients {
    in_cluster: Arc<dyn ClusterClient>,
    builder: Arc<dyn ClientBuilder>,
    cache: ClientCache<Arc<dyn ClusterClient>>,
}

impl RemoteClients {
    pub fn new(
        in_cluster: Arc<dyn ClusterClient>,
        builder: Arc<dyn ClientBuilder>,
        ttl: Duration,
    ) -> Self {
        Self {
            in_cluster,
            builder,
            cache: ClientCache::new(ttl),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl ClusterClientProvider for RemoteClients {
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>> {
        match cluster {
            ClusterRef::InCluster => Ok(self.in_cluster.clone()),
            ClusterRef::Kubeconfig { secret, context } => {
                self.cache
                    .get_or_try_insert_with(secret, || async {
                        debug!(secret = %secret, "building remote cluster client");
                        let client = self.builder.build(secret, context.as_deref()).await?;
                        info!(secret = %secret, "cached remote cluster client");
                        Ok(client)
                    })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ChartEvents, ProbeError};
    use crate::crd::Chart;
    use crate::store::{MemoryStore, ObjectStore};
    use crate::Error;
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ClientCache::new(Duration::from_secs(60));
        let key = NamespacedRef::new("org-acme", "abc12-kubeconfig");
        cache.insert(key.clone(), 7);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key), Some(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_builds_are_not_cached() {
        let cache: ClientCache<u32> = ClientCache::new(Duration::from_secs(60));
        let key = NamespacedRef::new("org-acme", "abc12-kubeconfig");

        let err = cache
            .get_or_try_insert_with(&key, || async {
                Err(Error::CredentialsMissing {
                    namespace: "org-acme".to_string(),
                    name: "abc12-kubeconfig".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialsMissing { .. }));
        assert!(cache.is_empty());

        let value = cache.get_or_try_insert_with(&key, || async { Ok(3) }).await.unwrap();
        assert_eq!(value, 3);
        assert_eq!(cache.len(), 1);
    }

    struct NullCluster;

    #[async_trait]
    impl ClusterClient for NullCluster {
        fn charts(&self) -> Arc<dyn ObjectStore<Chart>> {
            Arc::new(MemoryStore::<Chart>::new())
        }

        fn config_maps(&self) -> Arc<dyn ObjectStore<ConfigMap>> {
            Arc::new(MemoryStore::<ConfigMap>::new())
        }

        async fn probe_charts(&self, _: &str) -> std::result::Result<(), ProbeError> {
            Ok(())
        }

        async fn watch_charts(&self, _: &str) -> Result<ChartEvents> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[derive(Default)]
    struct CountingBuilder {
        builds: AtomicU32,
    }

    #[async_trait]
    impl ClientBuilder for CountingBuilder {
        async fn build(&self, _: &NamespacedRef, _: Option<&str>) -> Result<Arc<dyn ClusterClient>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullCluster))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remote_clients_reuse_until_expiry() {
        let builder = Arc::new(CountingBuilder::default());
        let clients = RemoteClients::new(
            Arc::new(NullCluster),
            builder.clone(),
            Duration::from_secs(3600),
        );
        let cluster = ClusterRef::Kubeconfig {
            secret: NamespacedRef::new("org-acme", "abc12-kubeconfig"),
            context: None,
        };

        clients.client_for(&cluster).await.unwrap();
        clients.client_for(&cluster).await.unwrap();
        clients.client_for(&ClusterRef::InCluster).await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(clients.cached(), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        clients.client_for(&cluster).await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }
}
