//! Object storage for scheduling objects.
//!
//! Objects are stored JSON-serialized under `/registry/<kind>/<name>` in an
//! etcd-compatible cluster, with prefix snapshots and watches per kind.

pub mod multicluster;

use anyhow::{Context, Result};
use etcd_client::{
    Client, ConnectOptions, GetOptions, PutOptions, WatchOptions, WatchStream, Watcher,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stored object kinds. Operations on a kind outside this list do not
/// resolve to any cluster.
pub mod kinds {
    pub const DECISIONS: &str = "decisions";
    pub const PIPELINES: &str = "pipelines";
    pub const STEPS: &str = "steps";
    pub const RESERVATIONS: &str = "reservations";
    pub const KNOWLEDGE: &str = "knowledge";
    pub const PODS: &str = "pods";
    pub const NODES: &str = "nodes";
    pub const MACHINES: &str = "machines";
    pub const MACHINE_POOLS: &str = "machinepools";

    pub const ALL: [&str; 9] = [
        DECISIONS,
        PIPELINES,
        STEPS,
        RESERVATIONS,
        KNOWLEDGE,
        PODS,
        NODES,
        MACHINES,
        MACHINE_POOLS,
    ];

    pub fn is_known(kind: &str) -> bool {
        ALL.contains(&kind)
    }
}

#[derive(Clone)]
pub struct ObjectStore {
    client: Arc<RwLock<Client>>,
}

fn prefix(kind: &str) -> String {
    format!("/registry/{kind}/")
}

fn key(kind: &str, name: &str) -> String {
    format!("/registry/{kind}/{name}")
}

impl ObjectStore {
    pub async fn connect(endpoints: &[String], options: Option<ConnectOptions>) -> Result<Self> {
        let client = Client::connect(endpoints, options)
            .await
            .context("failed to connect to object store")?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<Option<T>> {
        let mut client = self.client.write().await;
        let resp = client.get(key(kind, name), None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(serde_json::from_slice(kv.value())?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, kind: &str, name: &str, object: &T) -> Result<()> {
        let json = serde_json::to_string(object)?;
        let mut client = self.client.write().await;
        client
            .put(key(kind, name), json, Some(PutOptions::new()))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, kind: &str, name: &str) -> Result<()> {
        let mut client = self.client.write().await;
        client.delete(key(kind, name), None).await?;
        Ok(())
    }

    /// Lists all objects of a kind. Entries that fail to decode are logged
    /// and skipped rather than failing the whole listing.
    pub async fn list<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>> {
        Ok(self.snapshot_with_rev(kind).await?.0)
    }

    /// Snapshot of a kind plus the revision it was read at, for seamless
    /// watch continuation.
    pub async fn snapshot_with_rev<T: DeserializeOwned>(
        &self,
        kind: &str,
    ) -> Result<(Vec<T>, i64)> {
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix(kind), Some(GetOptions::new().with_prefix()))
            .await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or(0);
        let mut items = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match serde_json::from_slice(kv.value()) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(
                    "skipping undecodable {kind} object at {}: {e}",
                    String::from_utf8_lossy(kv.key())
                ),
            }
        }
        Ok((items, rev))
    }

    /// Prefix watch over a kind with `prev_kv`, starting after `start_rev`.
    pub async fn watch_kind(
        &self,
        kind: &str,
        start_rev: i64,
    ) -> Result<(Watcher, WatchStream)> {
        let opts = WatchOptions::new()
            .with_prefix()
            .with_prev_key()
            .with_start_revision(start_rev);
        let mut client = self.client.write().await;
        let (watcher, stream) = client.watch(prefix(kind), Some(opts)).await?;
        Ok((watcher, stream))
    }

    /// Read-modify-write of one object, the merge-patch analogue for status
    /// updates. Returns false when the object no longer exists.
    pub async fn update<T, F>(&self, kind: &str, name: &str, mutate: F) -> Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let Some(mut object) = self.get::<T>(kind, name).await? else {
            return Ok(false);
        };
        mutate(&mut object);
        self.put(kind, name, &object).await?;
        Ok(true)
    }
}

/// Extracts the object name from a watch event key like
/// `/registry/decisions/nova-abc`.
pub fn name_from_key(key: &[u8]) -> Option<String> {
    let key = String::from_utf8_lossy(key);
    key.split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_string)
}
