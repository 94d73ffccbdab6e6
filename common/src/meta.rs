use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label carrying the operator that owns an object. Controllers only process
/// objects whose operator label matches their own.
pub const OPERATOR_LABEL: &str = "cortex.cloud/operator";

/// The scheduling domains served by the decision controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulingDomain {
    Nova,
    Pods,
    Machines,
}

impl SchedulingDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingDomain::Nova => "nova",
            SchedulingDomain::Pods => "pods",
            SchedulingDomain::Machines => "machines",
        }
    }
}

impl fmt::Display for SchedulingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object metadata, the subset of the usual apimachinery fields the
/// controllers rely on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn operator(&self) -> Option<&str> {
        self.labels.get(OPERATOR_LABEL).map(String::as_str)
    }

    pub fn with_operator(mut self, operator: &str) -> Self {
        self.labels
            .insert(OPERATOR_LABEL.to_string(), operator.to_string());
        self
    }
}

/// Reference to another stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Status condition on an object, in the usual k8s shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn ready() -> Self {
        Self {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::True,
            reason: "Scheduled".to_string(),
            message: String::new(),
        }
    }

    pub fn not_ready(reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::False,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn error(reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: ConditionType::Error,
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}
