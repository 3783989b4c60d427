//! Index page: a minimal HTML query form that runs `q=` inline.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;

use verdict_ast::parse_body;
use verdict_topdown::eval_query;

use crate::params::Params;
use crate::state::AppState;

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Html<String> {
    let params = Params::parse(&pairs);
    let input = params.q.as_deref().unwrap_or("");

    let mut page = String::from("<html>\n<body>\n");
    page.push_str("<h1>verdict</h1>\n");
    page.push_str(&format!(
        "Version: {}<br>\n<br>\n\
         <form>\nQuery:<br>\n\
         <textarea rows=\"10\" cols=\"50\" name=\"q\">{}</textarea><br>\n\
         <input type=\"submit\" value=\"Submit\">\n</form>\n",
        env!("CARGO_PKG_VERSION"),
        escape(input),
    ));

    if !input.is_empty() {
        let rendered = run_query(&state, input).await;
        page.push_str(&format!("<pre>{}</pre>\n", escape(&rendered)));
    }

    page.push_str("</body>\n</html>\n");
    Html(page)
}

async fn run_query(state: &Arc<AppState>, q: &str) -> String {
    let body = match parse_body(q) {
        Ok(body) => body,
        Err(e) => return format!("parse error: {}", e),
    };
    let txn = state.store.begin_read().await;
    let compiler = state.compiler.current();
    let compiled = match compiler.compile_query(&body) {
        Ok(body) => body,
        Err(e) => return format!("compile error: {}", e),
    };
    match eval_query(&compiler, &txn, &compiled, None) {
        Ok(solutions) => serde_json::to_string_pretty(&solutions)
            .unwrap_or_else(|e| format!("encoding error: {}", e)),
        Err(e) => format!("query error: {}", e),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
