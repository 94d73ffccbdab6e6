//! Decision cleanup.
//!
//! Periodically deletes Nova decisions whose server no longer exists. A
//! server counts as existing while it appears in the union of the live and
//! the recently-deleted listings; decisions referenced by a reservation are
//! retained either way.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{Decision, Reservation, SchedulingDomain};
use sqlx::{PgPool, Row};

use crate::store::kinds;
use crate::store::multicluster::MulticlusterStore;

/// The servers Nova still knows about. Fed from the synced server tables;
/// the upstream sync client is out of scope.
#[async_trait]
pub trait ServerLister: Send + Sync {
    async fn known_servers(&self) -> Result<HashSet<String>>;
}

/// Union of the live server listing and the recently-deleted feature table.
pub struct DbServerLister {
    db: PgPool,
}

impl DbServerLister {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ServerLister for DbServerLister {
    async fn known_servers(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT id FROM openstack_servers \
             UNION SELECT id FROM feature_recently_deleted_servers",
        )
        .fetch_all(&self.db)
        .await?;
        let mut known = HashSet::with_capacity(rows.len());
        for row in rows {
            known.insert(row.try_get("id")?);
        }
        Ok(known)
    }
}

/// Names of the decisions whose resource is gone and unreserved.
fn decisions_to_delete(
    decisions: &[Decision],
    operator: &str,
    known_servers: &HashSet<String>,
    reserved_resources: &HashSet<String>,
) -> Vec<String> {
    decisions
        .iter()
        .filter(|d| {
            d.spec.operator == operator
                && d.spec.scheduling_domain == SchedulingDomain::Nova
                && !known_servers.contains(&d.spec.resource_id)
                && !reserved_resources.contains(&d.spec.resource_id)
        })
        .map(|d| d.metadata.name.clone())
        .collect()
}

pub struct CleanupLoop {
    store: Arc<MulticlusterStore>,
    operator: String,
    lister: Box<dyn ServerLister>,
    interval: Duration,
}

impl CleanupLoop {
    pub fn new(
        store: Arc<MulticlusterStore>,
        operator: String,
        lister: Box<dyn ServerLister>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            operator,
            lister,
            interval,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            loop {
                timer.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::warn!("decision cleanup failed: {e}");
                }
            }
        });
    }

    pub async fn run_once(&self) -> Result<()> {
        let decisions: Vec<Decision> = self.store.list(kinds::DECISIONS).await?;
        let known = self.lister.known_servers().await?;
        let reservations: Vec<Reservation> = self.store.list(kinds::RESERVATIONS).await?;
        let reserved: HashSet<String> = reservations
            .into_iter()
            .map(|r| r.spec.resource_id)
            .collect();

        for name in decisions_to_delete(&decisions, &self.operator, &known, &reserved) {
            tracing::info!("deleting decision {name}: server is gone and unreserved");
            self.store.delete(kinds::DECISIONS, &name).await?;
        }
        Ok(())
    }
}
