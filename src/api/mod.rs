//! Thin HTTP translation layer: request DTOs -> operations -> simulator ->
//! response DTOs.
//!
//! All mutation and simulation work against the snapshot manager is
//! serialized through one manager-wide lock; external calls (price oracle,
//! cluster collector) run outside of it on the blocking pool.

pub mod schema;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde_json::json;
use tokio::net::TcpListener;

use crate::core::common::NODEPOOL_LABEL;
use crate::core::pod::{Toleration, TolerationOperator};
use crate::pricing::{PriceOracle, PriceTable, PriceView, PricingState};
use crate::sim::operations::{self, OpError};
use crate::sim::simulator::run_simulation;
use crate::store::collector::ClusterCollector;
use crate::store::io;
use crate::store::manager::{SnapshotInfo, SnapshotManager};

use schema::{
    ActivateResponse, CaptureResponse, MutateRequest, Operation, PlanMoveRequest,
    PlanMoveResponse, RefreshPricesResponse, SimulationResponse,
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RwLock<SnapshotManager>>,
    pub prices: Arc<PriceTable>,
    pub oracle: Arc<dyn PriceOracle>,
    pub collector: Arc<dyn ClusterCollector>,
    pub snapshots_dir: PathBuf,
}

impl AppState {
    fn manager_read(&self) -> RwLockReadGuard<'_, SnapshotManager> {
        self.manager.read().unwrap_or_else(|e| e.into_inner())
    }

    fn manager_write(&self) -> RwLockWriteGuard<'_, SnapshotManager> {
        self.manager.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl From<OpError> for ApiError {
    fn from(err: OpError) -> Self {
        match err {
            OpError::Validation(msg) | OpError::Inconsistent(msg) => ApiError::BadRequest(msg),
            OpError::NotFound(msg) => ApiError::NotFound(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn simulation_response(manager: &SnapshotManager, price_state: PricingState) -> SimulationResponse {
    let snapshot = manager.active();
    let view = PriceView::with_state(&snapshot.prices, price_state);
    SimulationResponse {
        result: run_simulation(snapshot, &view),
        logs: manager
            .active_log()
            .map(|log| log.recent_first())
            .unwrap_or_default(),
    }
}

async fn simulate(State(state): State<AppState>) -> Json<SimulationResponse> {
    // Copy the price cache first; the manager lock and the price lock are
    // never held together.
    let price_state = state.prices.state();
    let manager = state.manager_read();
    Json(simulation_response(&manager, price_state))
}

fn apply_operation(
    snapshot: &mut crate::core::snapshot::Snapshot,
    operation: &Operation,
    prices: &PriceView,
) -> Result<(), OpError> {
    match operation {
        // Handled by the caller, which owns the baseline.
        Operation::ResetToBaseline => Ok(()),
        Operation::MovePodsToPool {
            pod_ids,
            target_pool,
            overrides,
        } => operations::move_pods_to_pool(
            snapshot,
            pod_ids,
            target_pool,
            overrides.as_ref(),
            prices,
        ),
        Operation::MovePodToNode {
            pod_ids,
            node_id,
            overrides,
        } => operations::move_pod_to_node(snapshot, pod_ids, node_id, overrides.as_ref()),
        Operation::MoveNamespaceToPool {
            namespace,
            target_pool,
            include_system,
            include_daemonsets,
            overrides,
        } => operations::move_namespace_to_pool(
            snapshot,
            namespace,
            target_pool,
            *include_system,
            *include_daemonsets,
            overrides.as_ref(),
        ),
        Operation::MoveOwnerToPool {
            namespace,
            owner_kind,
            owner_name,
            target_pool,
            include_system,
            include_daemonsets,
            overrides,
        } => operations::move_owner_to_pool(
            snapshot,
            namespace,
            owner_kind,
            owner_name,
            target_pool,
            *include_system,
            *include_daemonsets,
            overrides.as_ref(),
        ),
        Operation::MoveNodePodsToPool {
            node_name,
            target_pool,
            include_system,
            include_daemonsets,
            overrides,
        } => operations::move_node_pods_to_pool(
            snapshot,
            node_name,
            target_pool,
            *include_system,
            *include_daemonsets,
            overrides.as_ref(),
        ),
        Operation::DeletePods { pod_ids } => {
            operations::delete_pods(snapshot, pod_ids);
            Ok(())
        }
        Operation::DeleteNamespace { namespace } => {
            operations::delete_namespace(snapshot, namespace);
            Ok(())
        }
        Operation::DeleteOwner {
            namespace,
            owner_kind,
            owner_name,
        } => {
            operations::delete_owner(snapshot, namespace, owner_kind, owner_name);
            Ok(())
        }
    }
}

async fn mutate(
    State(state): State<AppState>,
    body: Result<Json<MutateRequest>, JsonRejection>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let operations = request.into_operations();
    if operations.is_empty() {
        return Err(ApiError::BadRequest("no operations given".to_string()));
    }

    let price_state = state.prices.state();
    let mut manager = state.manager_write();
    let baseline = manager.baseline().clone();
    let mut snapshot = manager.active().clone();
    let prices = PriceView::with_state(&snapshot.prices, price_state.clone());

    // Operations apply sequentially; the first failure leaves the published
    // snapshot untouched. A reset drops the mutation history, so only the
    // operations after the last reset end up in the log.
    let mut reset_applied = false;
    let mut logged_operations: Vec<&Operation> = Vec::new();
    for operation in &operations {
        if matches!(operation, Operation::ResetToBaseline) {
            snapshot = baseline.clone();
            reset_applied = true;
            logged_operations.clear();
        } else {
            apply_operation(&mut snapshot, operation, &prices)?;
            logged_operations.push(operation);
        }
    }

    manager.update_active(snapshot);
    if reset_applied {
        manager.active_log_mut().clear();
    }
    for operation in logged_operations {
        let details = serde_json::to_value(operation).ok();
        manager.active_log_mut().append(operation.describe(), details);
    }

    info!("applied {} mutation(s)", operations.len());
    Ok(Json(simulation_response(&manager, price_state)))
}

async fn plan_move(
    State(state): State<AppState>,
    body: Result<Json<PlanMoveRequest>, JsonRejection>,
) -> Result<Json<PlanMoveResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let manager = state.manager_read();
    let snapshot = manager.active();
    let pod = snapshot
        .pods
        .get(&request.pod_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown pod '{}'", request.pod_id)))?;
    let node = snapshot
        .nodes
        .get(&request.target_node)
        .ok_or_else(|| ApiError::NotFound(format!("unknown node '{}'", request.target_node)))?;

    // Tolerations covering both the node's taints and the pool's template
    // taints, deduplicated.
    let mut suggested = Vec::new();
    let mut seen = BTreeSet::new();
    let pool_taints = snapshot
        .nodepools
        .get(&node.nodepool)
        .map(|pool| pool.taints.clone())
        .unwrap_or_default();
    for taint in node.taints.iter().chain(pool_taints.iter()) {
        if !taint.effect.is_hard() {
            continue;
        }
        let key = format!("{}={:?}/{:?}", taint.key, taint.value, taint.effect);
        if !seen.insert(key) {
            continue;
        }
        suggested.push(Toleration {
            key: Some(taint.key.clone()),
            operator: if taint.value.is_some() {
                TolerationOperator::Equal
            } else {
                TolerationOperator::Exists
            },
            value: taint.value.clone(),
            effect: Some(taint.effect),
        });
    }

    Ok(Json(PlanMoveResponse {
        pod_id: pod.id.clone(),
        owner_kind: pod.owner_kind.clone(),
        owner_name: pod.owner_name.clone(),
        current_req_cpu_m: pod.req_cpu_m,
        current_req_mem_b: pod.req_mem_b,
        suggested_tolerations: suggested,
        suggested_node_selector: [(NODEPOOL_LABEL.to_string(), node.nodepool.clone())]
            .into_iter()
            .collect(),
    }))
}

async fn list_snapshots(State(state): State<AppState>) -> Json<Vec<SnapshotInfo>> {
    Json(state.manager_read().list())
}

async fn capture_snapshot(
    State(state): State<AppState>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let collector = state.collector.clone();
    let snapshot = tokio::task::spawn_blocking(move || collector.capture())
        .await
        .map_err(|e| ApiError::Internal(format!("capture task panicked: {}", e)))?
        .map_err(|e| ApiError::Upstream(format!("live capture failed: {:#}", e)))?;

    let (id, nodes, pods) = {
        let mut manager = state.manager_write();
        let id = manager.add_capture(snapshot.clone());
        (id, snapshot.nodes.len(), snapshot.pods.len())
    };

    let path = state.snapshots_dir.join(format!("{}.json", id));
    let mut message = format!("captured {} nodes and {} pods", nodes, pods);
    if let Err(err) = io::save_snapshot(&snapshot, &path) {
        warn!("snapshot {} captured but not persisted: {:#}", id, err);
        message.push_str(" (not persisted)");
    }

    Ok(Json(CaptureResponse { id, message }))
}

async fn activate_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let mut manager = state.manager_write();
    if !manager.set_active(&id) {
        return Err(ApiError::NotFound(format!("unknown snapshot '{}'", id)));
    }
    Ok(Json(ActivateResponse {
        status: "ok".to_string(),
        active: id,
    }))
}

async fn refresh_prices(
    State(state): State<AppState>,
) -> Result<Json<RefreshPricesResponse>, ApiError> {
    let instance_types: Vec<String> = {
        let manager = state.manager_read();
        manager
            .active()
            .nodes
            .values()
            .map(|n| n.instance_type.clone())
            .filter(|inst| !inst.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let prices = state.prices.clone();
    let oracle = state.oracle.clone();
    let types = instance_types.clone();
    let refreshed = tokio::task::spawn_blocking(move || prices.refresh_from_oracle(&*oracle, &types))
        .await
        .map_err(|e| ApiError::Internal(format!("refresh task panicked: {}", e)))?
        .map_err(|e| {
            error!("price refresh failed: {:#}", e);
            ApiError::Upstream(format!("price refresh failed: {:#}", e))
        })?;

    Ok(Json(RefreshPricesResponse {
        ok: true,
        region: refreshed.region,
        instance_types,
        hourly_prices: refreshed
            .hourly_prices
            .into_iter()
            .map(|(inst, entry)| (inst, entry.usd_per_hour))
            .collect(),
    }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/simulate", get(simulate))
        .route("/mutate", post(mutate))
        .route("/plan_move", post(plan_move))
        .route("/snapshots", get(list_snapshots))
        .route("/snapshots/capture", post(capture_snapshot))
        .route("/snapshots/:id/activate", post(activate_snapshot))
        .route("/admin/refresh-prices", post(refresh_prices))
        .with_state(state)
}

pub async fn serve(state: AppState, bind_address: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind {}: {}", bind_address, e))?;
    info!("listening on http://{}", bind_address);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
