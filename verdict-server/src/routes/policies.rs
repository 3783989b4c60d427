//! Policy module endpoints: list, fetch, install, delete.
//!
//! Installs and deletes recompile the whole stored module set plus the
//! requested change; nothing is persisted or published unless the full
//! set compiles, which keeps the stored set always-compilable.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::info;

use verdict_ast::{parse_module, Compiler};

use crate::error::{Result, ServerError};
use crate::routes::{json_response, no_body};
use crate::state::AppState;
use crate::v1::{PolicyV1, COMPILE_MOD_ERR_MSG};

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Response> {
    let compiler = state.compiler.current();
    let policies: Vec<PolicyV1> = compiler
        .modules()
        .iter()
        .map(|(id, module)| PolicyV1 { id, module })
        .collect();
    Ok(json_response(StatusCode::OK, &policies, true))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response> {
    let txn = state.store.begin_read().await;
    txn.get_policy(&id)?;

    let compiler = state.compiler.current();
    let module = compiler
        .module(&id)
        .ok_or_else(|| ServerError::internal(format!("stored policy {} not compiled", id)))?;
    Ok(json_response(
        StatusCode::OK,
        &PolicyV1 { id: &id, module },
        true,
    ))
}

pub async fn get_raw(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response> {
    let txn = state.store.begin_read().await;
    let policy = txn.get_policy(&id)?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        policy.raw.clone(),
    )
        .into_response())
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
    body: Bytes,
) -> Result<Response> {
    let src = String::from_utf8_lossy(&body);
    if src.trim().is_empty() {
        return Err(ServerError::bad_request("refusing to add empty module"));
    }

    let module = parse_module(&src).map_err(|errors| ServerError::Compile {
        message: COMPILE_MOD_ERR_MSG.to_string(),
        errors,
    })?;

    let mut txn = state.store.begin_write().await;

    let mut modules = txn.policy_modules();
    modules.insert(id.clone(), module.clone());
    let compiler = Compiler::compile(modules).map_err(|errors| ServerError::Compile {
        message: COMPILE_MOD_ERR_MSG.to_string(),
        errors,
    })?;

    txn.insert_policy(&id, module, body.to_vec())?;

    let snapshot = Arc::new(compiler);
    state.compiler.publish(snapshot.clone());
    info!(id = %id, modules = snapshot.modules().len(), "policy installed");

    let module = snapshot
        .module(&id)
        .ok_or_else(|| ServerError::internal(format!("policy {} missing after compile", id)))?;
    Ok(json_response(
        StatusCode::OK,
        &PolicyV1 { id: &id, module },
        true,
    ))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response> {
    let mut txn = state.store.begin_write().await;
    txn.get_policy(&id)?;

    let mut modules = txn.policy_modules();
    modules.remove(&id);
    let compiler = Compiler::compile(modules).map_err(|errors| ServerError::Compile {
        message: COMPILE_MOD_ERR_MSG.to_string(),
        errors,
    })?;

    txn.delete_policy(&id)?;
    state.compiler.publish(Arc::new(compiler));
    info!(id = %id, "policy removed");

    Ok(no_body(StatusCode::NO_CONTENT))
}
