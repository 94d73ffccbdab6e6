//! Stable topic names.
//!
//! Sync jobs raise the `triggers/sync/...` topics after a successful table
//! refresh; extractors declare the subset they listen to. The scheduler
//! raises `cortex/scheduler/<domain>/pipeline/finished` after each run, and
//! the extraction pipeline raises a per-feature updated topic after each
//! extraction.

pub const NOVA_SERVERS_SYNCED: &str = "triggers/sync/openstack/nova/types/servers";
pub const NOVA_HYPERVISORS_SYNCED: &str = "triggers/sync/openstack/nova/types/hypervisors";
pub const NOVA_FLAVORS_SYNCED: &str = "triggers/sync/openstack/nova/types/flavors";
pub const NOVA_MIGRATIONS_SYNCED: &str = "triggers/sync/openstack/nova/types/migrations";
pub const NOVA_AGGREGATES_SYNCED: &str = "triggers/sync/openstack/nova/types/aggregates";
pub const NOVA_DELETED_SERVERS_SYNCED: &str = "triggers/sync/openstack/nova/types/deleted_servers";

/// Topic raised after a scheduling pipeline run for the given domain.
pub fn pipeline_finished(domain: &str) -> String {
    format!("cortex/scheduler/{domain}/pipeline/finished")
}

/// Topic raised after an extractor refreshed its feature table.
pub fn features_updated(extractor: &str) -> String {
    format!("cortex/features/{extractor}/updated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_shapes_are_stable() {
        assert_eq!(
            NOVA_SERVERS_SYNCED,
            "triggers/sync/openstack/nova/types/servers"
        );
        assert_eq!(
            pipeline_finished("nova"),
            "cortex/scheduler/nova/pipeline/finished"
        );
        assert_eq!(
            features_updated("host_utilization"),
            "cortex/features/host_utilization/updated"
        );
    }
}
