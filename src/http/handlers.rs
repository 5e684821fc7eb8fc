//! Route handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use super::request::{
    self, ActionQuery, ListQuery, SnapshotCopyRequest, SnapshotCreateVolumeRequest,
    VolumeCopyRequest, VolumeCreateRequest, VolumeSnapshotRequest,
};
use super::response;
use super::AppState;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::types::{
    ServiceInfo, Task, TaskId, VolumeAttachOpts, VolumeDetachOpts, VolumeRemoveOpts,
};

fn context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    request::context(headers, state.orchestrator.services())
}

fn unknown_action(path: &str) -> Response {
    response::error(&Error::InvalidRequest(format!(
        "no action selected for POST {path}"
    )))
}

// ─── Services & tasks ───────────────────────────────────────────────────

pub async fn services(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, ServiceInfo>> {
    Json(
        state
            .orchestrator
            .service_infos()
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect(),
    )
}

pub async fn service_inspect(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Response {
    match state.orchestrator.service_inspect(&service) {
        Ok(info) => Json(info).into_response(),
        Err(err) => response::error(&err),
    }
}

pub async fn tasks(State(state): State<Arc<AppState>>) -> Json<BTreeMap<TaskId, Task>> {
    Json(
        state
            .orchestrator
            .tasks()
            .tasks()
            .into_iter()
            .map(|task| (task.id, task))
            .collect(),
    )
}

pub async fn task_inspect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Response {
    match state.orchestrator.tasks().inspect(id) {
        Some(task) => Json(task).into_response(),
        None => response::error(&Error::not_found("task", id.to_string())),
    }
}

// ─── Volumes ────────────────────────────────────────────────────────────

pub async fn volumes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = query
        .mask()
        .and_then(|mask| {
            state
                .orchestrator
                .volumes(&ctx, mask, query.filter.as_deref())
        });
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

/// `POST /volumes?detach`
pub async fn volumes_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    if query.detach.is_none() {
        return unknown_action("/volumes");
    }
    let ctx = context(&state, &headers);
    let queued = detach_opts(&query, &body)
        .map(|opts| state.orchestrator.volume_detach_all(&ctx, opts));
    response::task(&state, queued, StatusCode::RESET_CONTENT, query.run_async()).await
}

pub async fn volumes_for_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = query.mask().and_then(|mask| {
        state
            .orchestrator
            .volumes_for_service(&ctx, &service, mask, query.filter.as_deref())
    });
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

/// `POST /volumes/{service}` creates a volume; with `?detach` it detaches
/// the caller from every volume of the service.
pub async fn service_volumes_action(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    let ctx = context(&state, &headers);
    let orchestrator = &state.orchestrator;
    let (queued, ok) = if query.detach.is_some() {
        let queued = detach_opts(&query, &body).and_then(|opts| {
            orchestrator.volume_detach_all_for_service(&ctx, &service, opts)
        });
        (queued, StatusCode::RESET_CONTENT)
    } else {
        let queued = request::body::<VolumeCreateRequest>(&body)
            .and_then(|req| orchestrator.volume_create(&ctx, &service, &req.name, req.opts));
        (queued, StatusCode::CREATED)
    };
    response::task(&state, queued, ok, query.run_async()).await
}

pub async fn volume_inspect(
    State(state): State<Arc<AppState>>,
    Path((service, volume)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = query.mask().and_then(|mask| {
        state
            .orchestrator
            .volume_inspect(&ctx, &service, &volume, query.by_name(), mask)
    });
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

pub async fn volume_remove(
    State(state): State<Arc<AppState>>,
    Path((service, volume)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let opts = VolumeRemoveOpts {
        force: query.force(),
    };
    let queued = state
        .orchestrator
        .volume_remove(&ctx, &service, &volume, opts);
    response::task(&state, queued, StatusCode::NO_CONTENT, query.run_async()).await
}

/// `POST /volumes/{service}/{id}` with one of `?attach`, `?detach`,
/// `?copy` or `?snapshot`.
pub async fn volume_action(
    State(state): State<Arc<AppState>>,
    Path((service, volume)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    let ctx = context(&state, &headers);
    let orchestrator = &state.orchestrator;
    let (queued, ok) = if query.attach.is_some() {
        let queued = request::body::<VolumeAttachOpts>(&body).and_then(|mut opts| {
            opts.force |= query.force();
            orchestrator.volume_attach(&ctx, &service, &volume, opts)
        });
        (queued, StatusCode::OK)
    } else if query.detach.is_some() {
        let queued = detach_opts(&query, &body)
            .and_then(|opts| orchestrator.volume_detach(&ctx, &service, &volume, opts));
        (queued, StatusCode::RESET_CONTENT)
    } else if query.copy.is_some() {
        let queued = request::body::<VolumeCopyRequest>(&body).and_then(|req| {
            orchestrator.volume_copy(&ctx, &service, &volume, &req.volume_name)
        });
        (queued, StatusCode::CREATED)
    } else if query.snapshot.is_some() {
        let queued = request::body::<VolumeSnapshotRequest>(&body).and_then(|req| {
            orchestrator.volume_snapshot(&ctx, &service, &volume, &req.snapshot_name)
        });
        (queued, StatusCode::CREATED)
    } else {
        return unknown_action(&format!("/volumes/{service}/{volume}"));
    };
    response::task(&state, queued, ok, query.run_async()).await
}

fn detach_opts(query: &ActionQuery, body: &Bytes) -> Result<VolumeDetachOpts> {
    let mut opts: VolumeDetachOpts = request::body(body)?;
    opts.force |= query.force();
    Ok(opts)
}

// ─── Snapshots ──────────────────────────────────────────────────────────

pub async fn snapshots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = state
        .orchestrator
        .snapshots(&ctx, query.filter.as_deref());
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

pub async fn snapshots_for_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = state
        .orchestrator
        .snapshots_for_service(&ctx, &service, query.filter.as_deref());
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

pub async fn snapshot_inspect(
    State(state): State<Arc<AppState>>,
    Path((service, snapshot)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = state
        .orchestrator
        .snapshot_inspect(&ctx, &service, &snapshot);
    response::task(&state, queued, StatusCode::OK, query.run_async()).await
}

pub async fn snapshot_remove(
    State(state): State<Arc<AppState>>,
    Path((service, snapshot)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
) -> Response {
    let ctx = context(&state, &headers);
    let queued = state
        .orchestrator
        .snapshot_remove(&ctx, &service, &snapshot);
    response::task(&state, queued, StatusCode::RESET_CONTENT, query.run_async()).await
}

/// `POST /snapshots/{service}/{id}` with `?create` (a volume from the
/// snapshot) or `?copy`.
pub async fn snapshot_action(
    State(state): State<Arc<AppState>>,
    Path((service, snapshot)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    let ctx = context(&state, &headers);
    let orchestrator = &state.orchestrator;
    let queued = if query.create.is_some() {
        request::body::<SnapshotCreateVolumeRequest>(&body).and_then(|req| {
            orchestrator.volume_create_from_snapshot(
                &ctx,
                &service,
                &snapshot,
                &req.volume_name,
                req.opts,
            )
        })
    } else if query.copy.is_some() {
        request::body::<SnapshotCopyRequest>(&body).and_then(|req| {
            orchestrator.snapshot_copy(
                &ctx,
                &service,
                &snapshot,
                &req.snapshot_name,
                req.destination_id.as_deref(),
            )
        })
    } else {
        return unknown_action(&format!("/snapshots/{service}/{snapshot}"));
    };
    response::task(&state, queued, StatusCode::CREATED, query.run_async()).await
}
