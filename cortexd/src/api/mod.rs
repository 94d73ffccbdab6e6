//! External HTTP surface.
//!
//! The only scheduling endpoint is `POST /scheduler/nova/external`; the
//! response is a terse ranked host list. Richer diagnostics live on the
//! decision objects. Health and metrics are transport shell.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::meta::ObjectMeta;
use common::nova::{ExternalSchedulerRequest, ExternalSchedulerResponse};
use common::{Decision, DecisionSpec, DecisionStatus, PipelineRef, SchedulingDomain};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::controllers::{DecisionController, ProcessError};

pub const PIPELINE_KVM: &str = "nova-external-scheduler-kvm";
pub const PIPELINE_KVM_ALL_FILTERS: &str = "nova-external-scheduler-kvm-all-filters-enabled";
pub const PIPELINE_VMWARE: &str = "nova-external-scheduler-vmware";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(reason) => {
                tracing::debug!("rejecting scheduler request: {reason}");
                (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
            }
            ApiError::Internal(reason) => {
                tracing::error!("scheduler request failed: {reason}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ProcessError> for ApiError {
    fn from(error: ProcessError) -> Self {
        match error {
            ProcessError::Validation(reason) => ApiError::BadRequest(reason),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Infers the pipeline name from the flavor's hypervisor type when the
/// request names none.
pub fn infer_pipeline(
    hypervisor_type: Option<&str>,
    has_reservation: bool,
) -> Result<&'static str, ApiError> {
    match hypervisor_type {
        Some("qemu") | Some("ch") => Ok(if has_reservation {
            PIPELINE_KVM_ALL_FILTERS
        } else {
            PIPELINE_KVM
        }),
        Some("vmware vcenter server") => {
            if has_reservation {
                return Err(ApiError::BadRequest(
                    "reservations are not supported for vmware hypervisors".into(),
                ));
            }
            Ok(PIPELINE_VMWARE)
        }
        other => Err(ApiError::BadRequest(format!(
            "unsupported hypervisor type {}",
            other.unwrap_or("<none>")
        ))),
    }
}

/// Every host must carry a weight, and every weight must name a host.
fn validate_weights(request: &ExternalSchedulerRequest) -> Result<(), ApiError> {
    for host in &request.hosts {
        if !request.weights.contains_key(&host.host) {
            return Err(ApiError::BadRequest(format!(
                "missing weight for host {}",
                host.host
            )));
        }
    }
    for key in request.weights.keys() {
        if !request.hosts.iter().any(|h| &h.host == key) {
            return Err(ApiError::BadRequest(format!(
                "weight for unknown host {key}"
            )));
        }
    }
    Ok(())
}

pub struct AppState {
    pub operator: String,
    pub nova: Option<Arc<DecisionController>>,
    pub registry: prometheus::Registry,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scheduler/nova/external", post(external_scheduler))
        .route("/metrics", get(metrics))
        .route("/up", get(up))
        .with_state(state)
}

async fn up() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn external_scheduler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExternalSchedulerRequest>,
) -> Result<Json<ExternalSchedulerResponse>, ApiError> {
    let Some(controller) = &state.nova else {
        return Err(ApiError::Internal(
            "nova scheduling domain is not enabled".into(),
        ));
    };
    validate_weights(&request)?;

    let pipeline = match &request.pipeline {
        Some(pipeline) => pipeline.clone(),
        None => {
            infer_pipeline(request.hypervisor_type(), request.reservation.is_some())?.to_string()
        }
    };
    let resource_id = request
        .instance_id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let name = format!("nova-{}", Uuid::new_v4().simple());
    let decision = Decision {
        metadata: ObjectMeta::named(&name).with_operator(&state.operator),
        spec: DecisionSpec {
            scheduling_domain: SchedulingDomain::Nova,
            operator: state.operator.clone(),
            pipeline_ref: PipelineRef { name: pipeline },
            resource_id,
            nova_raw: Some(
                serde_json::to_value(&request).map_err(|e| ApiError::Internal(e.to_string()))?,
            ),
            pod_ref: None,
            machine_ref: None,
            reservation: request.reservation.clone(),
        },
        status: DecisionStatus::default(),
    };

    // A dropped connection cancels the token; the spawned run observes it
    // instead of being torn down mid-write.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let controller = Arc::clone(controller);
    let outcome = tokio::spawn(async move {
        controller
            .process_new_decision_from_api(decision, cancel)
            .await
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    drop(guard);

    Ok(Json(ExternalSchedulerResponse {
        hosts: outcome.ordered_hosts,
    }))
}
