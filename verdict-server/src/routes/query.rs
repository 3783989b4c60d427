//! Ad-hoc query endpoint: `GET /v1/query?q=<expr>`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;

use verdict_ast::parse_body;
use verdict_topdown::{eval_query, truth, BufferTracer};

use crate::error::{Result, ServerError};
use crate::params::{ExplainMode, Params};
use crate::routes::json_response;
use crate::state::AppState;
use crate::v1::{trace_v1, COMPILE_QUERY_ERR_MSG};

pub async fn query(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response> {
    let params = Params::parse(&pairs);
    let Some(q) = params.q else {
        return Err(ServerError::bad_request("missing query parameter 'q'"));
    };

    let body = parse_body(&q).map_err(|errors| ServerError::Compile {
        message: COMPILE_QUERY_ERR_MSG.to_string(),
        errors,
    })?;

    let txn = state.store.begin_read().await;
    let compiler = state.compiler.current();
    let compiled = compiler
        .compile_query(&body)
        .map_err(|errors| ServerError::Compile {
            message: COMPILE_QUERY_ERR_MSG.to_string(),
            errors,
        })?;

    let mut tracer = (params.explain != ExplainMode::Off).then(BufferTracer::new);
    let solutions = eval_query(&compiler, &txn, &compiled, tracer.as_mut())?;

    Ok(match (params.explain, tracer) {
        (ExplainMode::Full, Some(tracer)) => {
            json_response(StatusCode::OK, &trace_v1(tracer.events()), params.pretty)
        }
        (ExplainMode::Truth, Some(tracer)) => json_response(
            StatusCode::OK,
            &trace_v1(&truth(tracer.events())),
            params.pretty,
        ),
        _ => json_response(StatusCode::OK, &solutions, params.pretty),
    })
}
