//! Multicluster routing.
//!
//! One home cluster provides the credentials; remote clusters are
//! registered per object kind and reuse the home connect options except for
//! the endpoints and the CA certificate. Every operation resolves its
//! target cluster by kind: registered remote first, home otherwise.
//! Remote registration is rare; lookups dominate, hence the read/write
//! lock.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use etcd_client::{Certificate, ConnectOptions, TlsOptions, WatchStream, Watcher};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::RwLock;

use super::{ObjectStore, kinds};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("kind `{0}` does not resolve to any cluster")]
    TypeUnresolved(String),
}

/// Connection parameters of the home cluster, reused for remotes with the
/// endpoints and CA swapped out.
#[derive(Debug, Clone, Default)]
pub struct ConnectProfile {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert_pem: Option<String>,
}

impl ConnectProfile {
    pub fn connect_options(&self) -> Option<ConnectOptions> {
        let mut options = ConnectOptions::new();
        let mut any = false;
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            options = options.with_user(user, password);
            any = true;
        }
        if let Some(pem) = &self.ca_cert_pem {
            let tls = TlsOptions::new().ca_certificate(Certificate::from_pem(pem.as_bytes()));
            options = options.with_tls(tls);
            any = true;
        }
        any.then_some(options)
    }
}

pub struct MulticlusterStore {
    home: ObjectStore,
    home_profile: ConnectProfile,
    remotes: RwLock<HashMap<String, ObjectStore>>,
}

/// Pure routing decision, factored out for tests: a known kind resolves to
/// its registered remote or, absent one, to the home cluster.
fn resolve_route<'a, S>(
    remotes: &'a HashMap<String, S>,
    kind: &str,
) -> Result<Option<&'a S>, RouteError> {
    if !kinds::is_known(kind) {
        return Err(RouteError::TypeUnresolved(kind.to_string()));
    }
    Ok(remotes.get(kind))
}

impl MulticlusterStore {
    pub fn new(home: ObjectStore, home_profile: ConnectProfile) -> Arc<Self> {
        Arc::new(Self {
            home,
            home_profile,
            remotes: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a remote cluster for the given kinds. The connection copies
    /// the home credentials with only the endpoints and CA replaced.
    pub async fn add_remote(
        &self,
        endpoints: Vec<String>,
        ca_cert_pem: Option<String>,
        for_kinds: &[String],
    ) -> Result<()> {
        for kind in for_kinds {
            if !kinds::is_known(kind) {
                return Err(RouteError::TypeUnresolved(kind.clone()).into());
            }
        }
        let profile = ConnectProfile {
            endpoints: endpoints.clone(),
            ca_cert_pem,
            ..self.home_profile.clone()
        };
        let store = ObjectStore::connect(&endpoints, profile.connect_options()).await?;
        let mut remotes = self.remotes.write().await;
        for kind in for_kinds {
            remotes.insert(kind.clone(), store.clone());
        }
        Ok(())
    }

    /// The cluster that owns a kind.
    pub async fn for_kind(&self, kind: &str) -> Result<ObjectStore, RouteError> {
        let remotes = self.remotes.read().await;
        Ok(resolve_route(&remotes, kind)?
            .cloned()
            .unwrap_or_else(|| self.home.clone()))
    }

    pub async fn get<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<Option<T>> {
        self.for_kind(kind).await?.get(kind, name).await
    }

    pub async fn put<T: Serialize>(&self, kind: &str, name: &str, object: &T) -> Result<()> {
        self.for_kind(kind).await?.put(kind, name, object).await
    }

    pub async fn delete(&self, kind: &str, name: &str) -> Result<()> {
        self.for_kind(kind).await?.delete(kind, name).await
    }

    pub async fn list<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>> {
        self.for_kind(kind).await?.list(kind).await
    }

    pub async fn snapshot_with_rev<T: DeserializeOwned>(
        &self,
        kind: &str,
    ) -> Result<(Vec<T>, i64)> {
        self.for_kind(kind).await?.snapshot_with_rev(kind).await
    }

    /// Status and subresource writes follow the same routing as everything
    /// else.
    pub async fn update<T, F>(&self, kind: &str, name: &str, mutate: F) -> Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        self.for_kind(kind).await?.update(kind, name, mutate).await
    }

    /// Wires a watch against the cluster cache that owns the kind, so
    /// controllers see events sourced from the correct cluster.
    pub async fn watch_kind(
        &self,
        kind: &str,
        start_rev: i64,
    ) -> Result<(Watcher, WatchStream)> {
        self.for_kind(kind).await?.watch_kind(kind, start_rev).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_unresolved() {
        let remotes: HashMap<String, &str> = HashMap::new();
        assert!(matches!(
            resolve_route(&remotes, "widgets"),
            Err(RouteError::TypeUnresolved(kind)) if kind == "widgets"
        ));
    }

    #[test]
    fn registered_kind_routes_to_its_remote_and_no_other() {
        let mut remotes = HashMap::new();
        remotes.insert(kinds::MACHINES.to_string(), "remote-a");
        remotes.insert(kinds::MACHINE_POOLS.to_string(), "remote-a");

        assert_eq!(
            resolve_route(&remotes, kinds::MACHINES).unwrap(),
            Some(&"remote-a")
        );
        // Unregistered kinds fall back to home.
        assert_eq!(resolve_route(&remotes, kinds::DECISIONS).unwrap(), None);
    }

    #[test]
    fn remote_profile_copies_home_credentials() {
        let home = ConnectProfile {
            endpoints: vec!["http://home:2379".into()],
            username: Some("cortex".into()),
            password: Some("secret".into()),
            ca_cert_pem: Some("HOME-CA".into()),
        };
        let remote = ConnectProfile {
            endpoints: vec!["http://remote:2379".into()],
            ca_cert_pem: Some("REMOTE-CA".into()),
            ..home.clone()
        };
        assert_eq!(remote.username.as_deref(), Some("cortex"));
        assert_eq!(remote.password.as_deref(), Some("secret"));
        assert_eq!(remote.ca_cert_pem.as_deref(), Some("REMOTE-CA"));
        assert_eq!(remote.endpoints, vec!["http://remote:2379"]);
    }
}
