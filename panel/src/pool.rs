//! Per-data-source connection pool.
//!
//! Each data source gets up to `max_connections` live clients. A request
//! always prefers opening a fresh client while under the cap and otherwise
//! shares the least-used eligible one. Clients older than
//! `connection_timeout` are swept on every request; clients within
//! `safety_margin` of that age are no longer handed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::{ClientError, ClientProvider, DataSourceDescriptor, SqlClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub connection_timeout: Duration,
    pub safety_margin: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 3,
            connection_timeout: Duration::from_secs(300),
            safety_margin: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Age below which a connection may still be handed out.
    fn usable_for(&self) -> Duration {
        self.connection_timeout.saturating_sub(self.safety_margin)
    }
}

struct PooledConnection {
    data_source_id: Uuid,
    client: Arc<dyn SqlClient>,
    created_at: Instant,
    operations_count: u64,
}

pub struct ConnectionPool {
    provider: Arc<dyn ClientProvider>,
    config: PoolConfig,
    connections: AsyncMutex<Vec<PooledConnection>>,
}

impl ConnectionPool {
    pub fn new(provider: Arc<dyn ClientProvider>, config: PoolConfig) -> Self {
        let config = PoolConfig {
            max_connections: config.max_connections.max(1),
            ..config
        };
        Self {
            provider,
            config,
            connections: AsyncMutex::new(Vec::new()),
        }
    }

    /// Return a client for `descriptor`.
    ///
    /// Sweep, selection and registration happen under one lock, and client
    /// construction does no I/O, so concurrent callers can never push a data
    /// source past `max_connections` eligible clients.
    pub async fn get_connection(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Arc<dyn SqlClient>, ClientError> {
        let mut connections = self.connections.lock().await;
        let now = Instant::now();

        self.sweep(&mut connections, now);

        let usable_for = self.config.usable_for();
        let is_eligible = |c: &PooledConnection| {
            c.data_source_id == descriptor.id && now.duration_since(c.created_at) < usable_for
        };

        let eligible = connections.iter().filter(|c| is_eligible(c)).count();
        if eligible < self.config.max_connections {
            return self.create(&mut connections, descriptor, now);
        }

        match connections
            .iter_mut()
            .filter(|c| is_eligible(c))
            .min_by_key(|c| c.operations_count)
        {
            Some(conn) => {
                conn.operations_count += 1;
                tracing::trace!(
                    datasource_id = %descriptor.id,
                    operations = conn.operations_count,
                    "reusing pooled connection"
                );
                Ok(conn.client.clone())
            }
            None => self.create(&mut connections, descriptor, now),
        }
    }

    fn create(
        &self,
        connections: &mut Vec<PooledConnection>,
        descriptor: &DataSourceDescriptor,
        now: Instant,
    ) -> Result<Arc<dyn SqlClient>, ClientError> {
        let client = self.provider.get_client(descriptor)?;
        connections.push(PooledConnection {
            data_source_id: descriptor.id,
            client: client.clone(),
            created_at: now,
            operations_count: 1,
        });
        tracing::debug!(
            datasource_id = %descriptor.id,
            dialect = %client.dialect(),
            total = connections.len(),
            "registered new connection"
        );
        Ok(client)
    }

    /// Drop every connection (of any data source) that reached the timeout.
    fn sweep(&self, connections: &mut Vec<PooledConnection>, now: Instant) {
        let timeout = self.config.connection_timeout;
        let (expired, live): (Vec<_>, Vec<_>) = connections
            .drain(..)
            .partition(|c| now.duration_since(c.created_at) >= timeout);
        *connections = live;

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "sweeping expired connections");
        }
        for conn in expired {
            close_in_background(conn, "expired");
        }
    }

    /// Close and forget every connection of one data source (after it was
    /// deleted or its credentials changed).
    pub async fn evict_data_source(&self, data_source_id: Uuid) {
        let mut connections = self.connections.lock().await;
        let (evicted, kept): (Vec<_>, Vec<_>) = connections
            .drain(..)
            .partition(|c| c.data_source_id == data_source_id);
        *connections = kept;

        for conn in evicted {
            close_in_background(conn, "evicted");
        }
    }

    /// Number of registered connections for a data source, eligible or not.
    pub async fn live_count(&self, data_source_id: Uuid) -> usize {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|c| c.data_source_id == data_source_id)
            .count()
    }

    /// Close every connection. The pool stays usable afterwards.
    pub async fn shutdown(&self) {
        let drained: Vec<PooledConnection> = self.connections.lock().await.drain(..).collect();
        let count = drained.len();

        let closes = drained.into_iter().map(|conn| async move {
            if let Err(e) = conn.client.close().await {
                tracing::warn!(
                    datasource_id = %conn.data_source_id,
                    error = %e,
                    "failed to close connection during shutdown"
                );
            }
        });
        futures::future::join_all(closes).await;

        tracing::info!(count, "connection pool shut down");
    }
}

fn close_in_background(conn: PooledConnection, reason: &'static str) {
    tokio::spawn(async move {
        if let Err(e) = conn.client.close().await {
            tracing::warn!(
                datasource_id = %conn.data_source_id,
                reason,
                error = %e,
                "failed to close pooled connection"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::testing::RecordingClient;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    /// Hands out recording clients and remembers each one it built.
    #[derive(Default)]
    struct TestProvider {
        built: Mutex<Vec<Arc<RecordingClient>>>,
        fail: bool,
    }

    impl TestProvider {
        fn built(&self) -> Vec<Arc<RecordingClient>> {
            self.built.lock().unwrap().clone()
        }
    }

    impl ClientProvider for TestProvider {
        fn get_client(
            &self,
            descriptor: &DataSourceDescriptor,
        ) -> Result<Arc<dyn SqlClient>, ClientError> {
            if self.fail {
                return Err(ClientError::UnsupportedDialect(descriptor.dialect.clone()));
            }
            let client = Arc::new(RecordingClient::new(Dialect::Postgresql));
            self.built.lock().unwrap().push(client.clone());
            Ok(client)
        }
    }

    fn descriptor() -> DataSourceDescriptor {
        DataSourceDescriptor {
            id: Uuid::new_v4(),
            dialect: "postgresql".to_string(),
            encrypted_credentials: "blob".to_string(),
            options: serde_json::Value::Null,
        }
    }

    fn pool(provider: Arc<TestProvider>) -> ConnectionPool {
        ConnectionPool::new(provider, PoolConfig::default())
    }

    fn same(a: &Arc<dyn SqlClient>, b: &Arc<dyn SqlClient>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
    }

    /// Let spawned close tasks run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn creates_up_to_cap_then_shares_least_used() {
        let provider = Arc::new(TestProvider::default());
        let pool = pool(provider.clone());
        let ds = descriptor();

        let mut handed_out = Vec::new();
        for _ in 0..3 {
            handed_out.push(pool.get_connection(&ds).await.unwrap());
        }
        assert_eq!(provider.built().len(), 3);
        assert!(!same(&handed_out[0], &handed_out[1]));

        // Three more requests spread evenly over the three clients
        for _ in 0..3 {
            handed_out.push(pool.get_connection(&ds).await.unwrap());
        }
        assert_eq!(provider.built().len(), 3);
        for first in &handed_out[..3] {
            let uses = handed_out.iter().filter(|c| same(c, first)).count();
            assert_eq!(uses, 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn data_sources_have_separate_caps() {
        let provider = Arc::new(TestProvider::default());
        let pool = pool(provider.clone());
        let (a, b) = (descriptor(), descriptor());

        for _ in 0..4 {
            pool.get_connection(&a).await.unwrap();
        }
        pool.get_connection(&b).await.unwrap();

        assert_eq!(pool.live_count(a.id).await, 3);
        assert_eq!(pool.live_count(b.id).await, 1);
        assert_eq!(provider.built().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn aging_connections_stop_being_handed_out_then_get_swept() {
        let provider = Arc::new(TestProvider::default());
        let pool = pool(provider.clone());
        let ds = descriptor();

        for _ in 0..3 {
            pool.get_connection(&ds).await.unwrap();
        }

        // Inside the safety margin: still registered, no longer eligible
        tokio::time::advance(Duration::from_secs(271)).await;
        let fresh = pool.get_connection(&ds).await.unwrap();
        assert_eq!(provider.built().len(), 4);
        assert!(same(&fresh, &(provider.built()[3].clone() as Arc<dyn SqlClient>)));
        assert_eq!(pool.live_count(ds.id).await, 4);

        // Past the timeout: the first three are swept and closed
        tokio::time::advance(Duration::from_secs(30)).await;
        pool.get_connection(&ds).await.unwrap();
        settle().await;

        let built = provider.built();
        for old in &built[..3] {
            assert_eq!(old.closes.load(Ordering::SeqCst), 1);
        }
        assert_eq!(built[3].closes.load(Ordering::SeqCst), 0);
        assert_eq!(pool.live_count(ds.id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reaches_other_data_sources() {
        let provider = Arc::new(TestProvider::default());
        let pool = pool(provider.clone());
        let (idle, busy) = (descriptor(), descriptor());

        pool.get_connection(&idle).await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        pool.get_connection(&busy).await.unwrap();
        settle().await;

        assert_eq!(pool.live_count(idle.id).await, 0);
        assert_eq!(provider.built()[0].closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_cap() {
        let provider = Arc::new(TestProvider::default());
        let pool = Arc::new(pool(provider.clone()));
        let ds = descriptor();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                let ds = ds.clone();
                tokio::spawn(async move { pool.get_connection(&ds).await.map(|_| ()) })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(provider.built().len(), 3);
        assert_eq!(pool.live_count(ds.id).await, 3);
    }

    #[tokio::test]
    async fn factory_errors_register_nothing() {
        let provider = Arc::new(TestProvider {
            fail: true,
            ..Default::default()
        });
        let pool = pool(provider);
        let ds = descriptor();

        assert!(pool.get_connection(&ds).await.is_err());
        assert_eq!(pool.live_count(ds.id).await, 0);
    }

    #[tokio::test]
    async fn shutdown_and_eviction_close_clients() {
        let provider = Arc::new(TestProvider::default());
        let pool = pool(provider.clone());
        let (a, b) = (descriptor(), descriptor());

        pool.get_connection(&a).await.unwrap();
        pool.get_connection(&b).await.unwrap();

        pool.evict_data_source(a.id).await;
        settle().await;
        assert_eq!(pool.live_count(a.id).await, 0);
        assert_eq!(provider.built()[0].closes.load(Ordering::SeqCst), 1);

        pool.shutdown().await;
        assert_eq!(pool.live_count(b.id).await, 0);
        assert_eq!(provider.built()[1].closes.load(Ordering::SeqCst), 1);
    }
}
