//! RPC façade: framed `Validate` requests over TCP.
//!
//! Each attribute becomes a request pair `<id>:"<value>"`; the
//! `customer_id` attribute additionally selects the tenant policy subtree
//! `data.opa.<customer_id>`. The decision comes from the highest-priority
//! entry of the evaluated document's `match` object.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use verdict_protocol::{
    read_message, write_message, Attribute, Effect, ValidateRequest, ValidateResponse,
};
use verdict_topdown::{eval_path, QueryParams};

use crate::params::{parse_request_params, string_path_to_data_ref};
use crate::state::AppState;

/// Accept loop: one task per connection, one response per request frame.
pub async fn serve(state: Arc<AppState>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "rpc connection accepted");
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(state, stream).await {
                        warn!(error = %e, "rpc connection failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "rpc accept failed");
            }
        }
    }
}

async fn handle_connection(state: Arc<AppState>, stream: TcpStream) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    while let Some(request) = read_message::<_, ValidateRequest>(&mut reader).await? {
        let response = validate(&state, &request).await;
        write_message(&mut writer, &response).await?;
    }
    Ok(())
}

/// Decide a verdict for an attribute-value request.
pub async fn validate(state: &AppState, request: &ValidateRequest) -> ValidateResponse {
    // The verdict initializes to deny and is only upgraded by a
    // successful evaluation.
    let response = ValidateResponse::deny();

    let mut customer_id = String::new();
    let mut items = Vec::with_capacity(request.attributes.len());
    for attr in &request.attributes {
        items.push(format!(
            "{}:{}",
            attr.id,
            JsonValue::String(attr.value.clone())
        ));
        if attr.id == "customer_id" {
            customer_id = attr.value.clone();
        }
    }

    let (request_doc, non_ground) = match parse_request_params(&items) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "rpc attributes failed to parse");
            return response;
        }
    };
    if non_ground {
        return response;
    }

    let txn = state.store.begin_read().await;
    let compiler = state.compiler.current();
    let params = QueryParams {
        compiler: &compiler,
        txn: &txn,
        request: request_doc,
        path: string_path_to_data_ref(&format!("opa/{}", customer_id)),
    };
    let qrs = match eval_path(&params, None) {
        Ok(qrs) => qrs,
        Err(e) => {
            warn!(error = %e, "rpc evaluation failed");
            return response;
        }
    };

    let Some(first) = qrs.first() else {
        return response;
    };
    let Some(matches) = first.result.get("match").and_then(JsonValue::as_object) else {
        return response;
    };

    // Highest strictly-greater priority wins; ties keep the first match
    // encountered (iteration order, unspecified).
    let mut best_priority = 0i64;
    let mut best_type = String::new();
    let mut best_data = String::new();
    for entry in matches.values() {
        let priority = entry.get("priority").and_then(JsonValue::as_i64).unwrap_or(0);
        if priority > best_priority {
            best_priority = priority;
            best_type = entry
                .get("action_type")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            best_data = entry
                .get("action_data")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
        }
    }

    // Permit by default, overridden when blocked or redirected.
    let mut response = ValidateResponse::permit();
    if best_type == "action_block" {
        response.effect = Effect::Deny;
    } else if best_type == "action_redirect" {
        response.effect = Effect::Deny;
        response
            .obligations
            .push(Attribute::new("redirect_to", best_data));
    }
    response
}
