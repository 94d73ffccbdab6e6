use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A reservation linked to a scheduled resource. Cleanup retains decisions
/// whose resource is referenced by a live reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub metadata: ObjectMeta,
    pub spec: ReservationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSpec {
    pub resource_id: String,
}

/// An externally produced feature snapshot. The contents are opaque to the
/// controllers; an update invalidates caches in the steps that consume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Knowledge {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub status: serde_json::Value,
}
