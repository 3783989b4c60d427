//! Data endpoints: `GET`/`PUT`/`PATCH` on `/v1/data` and `/v1/data/*path`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use verdict_ast::Compiler;
use verdict_store::{PatchOp, Path, Transaction};
use verdict_topdown::{eval_path, truth, BufferTracer, QueryParams};

use crate::error::{Result, ServerError};
use crate::params::{parse_request_params, string_path_to_data_ref, ExplainMode, Params};
use crate::routes::{json_response, no_body};
use crate::state::AppState;
use crate::v1::{query_result_set_v1, trace_v1, PatchV1};

pub async fn get_root(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response> {
    get_inner(state, "", pairs).await
}

pub async fn get_path(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response> {
    get_inner(state, &path, pairs).await
}

async fn get_inner(
    state: Arc<AppState>,
    raw_path: &str,
    pairs: Vec<(String, String)>,
) -> Result<Response> {
    let params = Params::parse(&pairs);
    let (request, non_ground) = parse_request_params(&params.request_items)?;

    if non_ground && params.explain != ExplainMode::Off {
        return Err(ServerError::bad_request(
            "explanations with non-ground request values not supported",
        ));
    }

    let txn = state.store.begin_read().await;
    let compiler = state.compiler.current();
    let query = QueryParams {
        compiler: &compiler,
        txn: &txn,
        request,
        path: string_path_to_data_ref(raw_path),
    };

    let mut tracer = (params.explain != ExplainMode::Off).then(BufferTracer::new);
    let qrs = eval_path(&query, tracer.as_mut())?;

    if qrs.is_empty() {
        debug!(path = raw_path, "document undefined");
        return Ok(match (params.explain, &tracer) {
            (ExplainMode::Full, Some(tracer)) => json_response(
                StatusCode::NOT_FOUND,
                &trace_v1(tracer.events()),
                params.pretty,
            ),
            _ => no_body(StatusCode::NOT_FOUND),
        });
    }

    if non_ground {
        return Ok(json_response(
            StatusCode::OK,
            &query_result_set_v1(&qrs),
            params.pretty,
        ));
    }

    Ok(match (params.explain, tracer) {
        (ExplainMode::Full, Some(tracer)) => {
            json_response(StatusCode::OK, &trace_v1(tracer.events()), params.pretty)
        }
        (ExplainMode::Truth, Some(tracer)) => json_response(
            StatusCode::OK,
            &trace_v1(&truth(tracer.events())),
            params.pretty,
        ),
        _ => json_response(StatusCode::OK, &qrs[0].result, params.pretty),
    })
}

pub async fn put_root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    put_inner(state, "", headers, body).await
}

pub async fn put_path(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    put_inner(state, &path, headers, body).await
}

async fn put_inner(
    state: Arc<AppState>,
    raw_path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let value: JsonValue = serde_json::from_slice(&body)
        .map_err(|e| ServerError::bad_request(e.to_string()))?;

    let path = Path::from_url(raw_path)
        .ok_or_else(|| ServerError::bad_request(format!("bad path format {}", raw_path)))?;

    let mut txn = state.store.begin_write().await;
    let compiler = state.compiler.current();

    let exists = match txn.read(&path) {
        Ok(_) => true,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e.into()),
    };

    if exists {
        let if_none_match = headers
            .get("if-none-match")
            .and_then(|v| v.to_str().ok());
        if if_none_match == Some("*") {
            return Ok(no_body(StatusCode::NOT_MODIFIED));
        }
    } else {
        make_dir(&mut txn, &compiler, &path.parent())?;
    }

    write_conflict(&compiler, PatchOp::Add, &path)?;
    txn.write(PatchOp::Add, &path, value)?;
    Ok(no_body(StatusCode::NO_CONTENT))
}

pub async fn patch_root(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    patch_inner(state, "", body).await
}

pub async fn patch_path(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
    body: Bytes,
) -> Result<Response> {
    patch_inner(state, &path, body).await
}

async fn patch_inner(state: Arc<AppState>, raw_path: &str, body: Bytes) -> Result<Response> {
    let ops: Vec<PatchV1> = serde_json::from_slice(&body)
        .map_err(|e| ServerError::bad_request(e.to_string()))?;

    let mut txn = state.store.begin_write().await;
    let compiler = state.compiler.current();

    let patches = prepare_patches(raw_path, &ops, &compiler)?;
    for patch in patches {
        txn.write(patch.op, &patch.path, patch.value)?;
    }
    Ok(no_body(StatusCode::NO_CONTENT))
}

struct PatchImpl {
    op: PatchOp,
    path: Path,
    value: JsonValue,
}

/// Translate an ordered op batch into store writes. Every op is validated
/// (operation kind, joined path, virtual-document conflict) before the
/// caller applies any.
fn prepare_patches(
    root: &str,
    ops: &[PatchV1],
    compiler: &Compiler,
) -> Result<Vec<PatchImpl>> {
    let root = root.trim_matches('/');
    let mut out = Vec::with_capacity(ops.len());

    for op in ops {
        let store_op = match op.op.as_str() {
            "add" => PatchOp::Add,
            "remove" => PatchOp::Remove,
            "replace" => PatchOp::Replace,
            other => {
                return Err(ServerError::bad_request(format!(
                    "bad patch operation: {}",
                    other
                )));
            }
        };

        let sub = op.path.trim_matches('/');
        let joined = match (root.is_empty(), sub.is_empty()) {
            (true, true) => "/".to_string(),
            (true, false) => format!("/{}", sub),
            (false, true) => format!("/{}", root),
            (false, false) => format!("/{}/{}", root, sub),
        };
        let path = Path::parse(&joined)
            .ok_or_else(|| ServerError::bad_request(format!("bad patch path: {}", op.path)))?;

        write_conflict(compiler, store_op, &path)?;
        out.push(PatchImpl {
            op: store_op,
            path,
            value: op.value.clone(),
        });
    }

    Ok(out)
}

/// Reject a write whose path intersects the virtual-document index. A
/// trailing `-` (array append) is ignored for the check on `add`.
pub(crate) fn write_conflict(
    compiler: &Compiler,
    op: PatchOp,
    path: &Path,
) -> Result<()> {
    let effective = if op == PatchOp::Add {
        path.without_append_marker()
    } else {
        path.clone()
    };
    let r = string_path_to_data_ref(&effective.segments().join("/"));
    if compiler.has_virtual_document(&r) {
        return Err(ServerError::WriteConflict(effective));
    }
    Ok(())
}

/// Materialize missing ancestors as empty objects, write-conflict
/// checking each created level. A non-object ancestor is a conflict.
fn make_dir(txn: &mut Transaction, compiler: &Compiler, path: &Path) -> Result<()> {
    match txn.read(path) {
        Ok(node) => {
            if node.is_object() {
                return Ok(());
            }
            return Err(ServerError::WriteConflict(path.clone()));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    make_dir(txn, compiler, &path.parent())?;
    write_conflict(compiler, PatchOp::Add, path)?;
    txn.write(PatchOp::Add, path, JsonValue::Object(Map::new()))?;
    Ok(())
}
