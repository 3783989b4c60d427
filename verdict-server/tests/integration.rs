//! End-to-end tests for the verdict HTTP surface, driven through the
//! router without a listener.

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use verdict_server::{ServerConfig, VerdictServer};

async fn test_server() -> VerdictServer {
    VerdictServer::new(ServerConfig::default()).await.unwrap()
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, JsonValue) {
    let (status, bytes) = send(router, method, uri, body).await;
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).expect("valid JSON response")
    };
    (status, json)
}

// ---------------------------------------------------------------------------
// Data API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn data_put_then_get() {
    let server = test_server().await;
    let router = server.router();

    let (status, _) = send(&router, "PUT", "/v1/data/a/b", Some("{\"c\": 1}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, value) = send_json(&router, "GET", "/v1/data/a/b/c", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(1));

    let (status, bytes) = send(&router, "GET", "/v1/data/a/b/d", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(bytes.is_empty());

    // Whole-document read includes the written tree.
    let (status, value) = send_json(&router, "GET", "/v1/data", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({"a": {"b": {"c": 1}}}));
}

#[tokio::test]
async fn data_put_if_none_match() {
    let server = test_server().await;
    let router = server.router();

    send(&router, "PUT", "/v1/data/k", Some("1")).await;

    let request = Request::builder()
        .method("PUT")
        .uri("/v1/data/k")
        .header("If-None-Match", "*")
        .body(Body::from("2"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let (_, value) = send_json(&router, "GET", "/v1/data/k", None).await;
    assert_eq!(value, json!(1));
}

#[tokio::test]
async fn data_put_bad_json_is_400() {
    let server = test_server().await;
    let router = server.router();
    let (status, body) = send_json(&router, "PUT", "/v1/data/a", Some("{nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Code"], json!(400));
}

#[tokio::test]
async fn data_patch_ordered_ops() {
    let server = test_server().await;
    let router = server.router();

    send(&router, "PUT", "/v1/data/x", Some("{}")).await;

    let patch = r#"[
        {"op": "add", "path": "/y", "value": [1, 2]},
        {"op": "replace", "path": "/y/0", "value": 9}
    ]"#;
    let (status, _) = send(&router, "PATCH", "/v1/data/x", Some(patch)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, value) = send_json(&router, "GET", "/v1/data/x/y", None).await;
    assert_eq!(value, json!([9, 2]));

    // Append marker.
    let patch = r#"[{"op": "add", "path": "/y/-", "value": 5}]"#;
    let (status, _) = send(&router, "PATCH", "/v1/data/x", Some(patch)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, value) = send_json(&router, "GET", "/v1/data/x/y", None).await;
    assert_eq!(value, json!([9, 2, 5]));
}

#[tokio::test]
async fn data_patch_bad_op_is_400() {
    let server = test_server().await;
    let router = server.router();
    let patch = r#"[{"op": "move", "path": "/y", "value": 1}]"#;
    let (status, body) = send_json(&router, "PATCH", "/v1/data/x", Some(patch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Message"], json!("bad patch operation: move"));
}

#[tokio::test]
async fn data_patch_replace_missing_is_404() {
    let server = test_server().await;
    let router = server.router();
    let patch = r#"[{"op": "replace", "path": "/nope", "value": 1}]"#;
    let (status, _) = send_json(&router, "PATCH", "/v1/data", Some(patch)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Policy API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_lifecycle() {
    let server = test_server().await;
    let router = server.router();

    let src = "package a.b\nc = 2 :- true";
    let (status, body) = send_json(&router, "PUT", "/v1/policies/p", Some(src)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ID"], json!("p"));
    assert!(body["Module"].is_object());

    let (status, body) = send_json(&router, "GET", "/v1/policies/p", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ID"], json!("p"));

    let (status, raw) = send(&router, "GET", "/v1/policies/p/raw", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(raw, src.as_bytes());

    let (status, body) = send_json(&router, "GET", "/v1/policies", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    // The virtual document is served from the data API.
    let (status, value) = send_json(&router, "GET", "/v1/data/a/b/c", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(2));

    let (status, _) = send(&router, "DELETE", "/v1/policies/p", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&router, "GET", "/v1/policies/p", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn policy_write_conflict_guards_data_writes() {
    let server = test_server().await;
    let router = server.router();

    let src = "package a.b\nc = 2 :- true";
    let (status, _) = send(&router, "PUT", "/v1/policies/p", Some(src)).await;
    assert_eq!(status, StatusCode::OK);

    // The rule computes data.a.b.c, so writes at or above are conflicts.
    let (status, body) = send_json(&router, "PUT", "/v1/data/a/b", Some("{\"x\": 1}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(
        body["Message"].as_str().unwrap().starts_with("write conflict"),
        "{}",
        body
    );

    let patch = r#"[{"op": "add", "path": "/b/c", "value": 1}]"#;
    let (status, _) = send_json(&router, "PATCH", "/v1/data/a", Some(patch)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Removing the policy unblocks the write.
    send(&router, "DELETE", "/v1/policies/p", None).await;
    let (status, _) = send(&router, "PUT", "/v1/data/a/b", Some("{\"x\": 1}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn policy_compile_error_carries_sub_errors() {
    let server = test_server().await;
    let router = server.router();

    let (status, body) = send_json(&router, "PUT", "/v1/policies/p", Some("package a\nc =")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["Message"],
        json!("error(s) occurred while compiling module(s), see Errors")
    );
    assert!(body["Errors"].as_array().is_some_and(|e| !e.is_empty()));

    let (status, _) = send_json(&router, "PUT", "/v1/policies/p", Some("   ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn policy_put_that_breaks_the_set_is_rejected() {
    let server = test_server().await;
    let router = server.router();

    // m2's rules live underneath m1's rule document; the combined set
    // must not compile, and the stored set must stay as it was.
    let m1 = "package a\nb = 1 :- true";
    let m2 = "package a.b\nc = 2 :- true";
    assert_eq!(
        send(&router, "PUT", "/v1/policies/m1", Some(m1)).await.0,
        StatusCode::OK
    );

    let (status, body) = send_json(&router, "PUT", "/v1/policies/m2", Some(m2)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["Errors"].as_array().is_some_and(|e| !e.is_empty()));

    let (status, _) = send(&router, "GET", "/v1/policies/m2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, value) = send_json(&router, "GET", "/v1/data/a/b", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(1));

    // Cross-module use of the surviving rule still works.
    let m3 = "package d\nq = x :- data.a.b = x";
    assert_eq!(
        send(&router, "PUT", "/v1/policies/m3", Some(m3)).await.0,
        StatusCode::OK
    );
    let (_, value) = send_json(&router, "GET", "/v1/data/d/q", None).await;
    assert_eq!(value, json!(1));

    // And deleting a module the set does not depend on succeeds.
    let (status, _) = send(&router, "DELETE", "/v1/policies/m3", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// ---------------------------------------------------------------------------
// Request parameters and explanations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_parameters_bind_the_request_document() {
    let server = test_server().await;
    let router = server.router();

    let src = "package t\nallow = true :- request.user = \"alice\"";
    send(&router, "PUT", "/v1/policies/p", Some(src)).await;

    let (status, value) = send_json(
        &router,
        "GET",
        "/v1/data/t/allow?request=user:%22alice%22",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(true));

    let (status, _) = send(
        &router,
        "GET",
        "/v1/data/t/allow?request=user:%22bob%22",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conflicting_request_parameters_are_400() {
    let server = test_server().await;
    let router = server.router();
    let (status, body) = send_json(
        &router,
        "GET",
        "/v1/data/t?request=a.b:1&request=a.b.c:2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["Message"],
        json!("conflicting request value request.a.b.c: check request parameters")
    );
}

#[tokio::test]
async fn explain_full_returns_trace() {
    let server = test_server().await;
    let router = server.router();

    let src = "package t\nallow = true :- request.user = \"alice\"";
    send(&router, "PUT", "/v1/policies/p", Some(src)).await;

    let (status, trace) = send_json(
        &router,
        "GET",
        "/v1/data/t/allow?request=user:%22alice%22&explain=full",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let events = trace.as_array().unwrap();
    assert!(!events.is_empty());
    for event in events {
        assert!(event.get("Op").is_some());
        assert!(event.get("QueryID").is_some());
        assert!(matches!(
            event["Type"].as_str().unwrap(),
            "rule" | "body" | "expr"
        ));
    }

    // Undefined document still returns the trace, with 404.
    let (status, trace) = send_json(
        &router,
        "GET",
        "/v1/data/t/allow?request=user:%22bob%22&explain=full",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(trace.as_array().is_some());

    // Truth mode filters the trace on success.
    let (status, trace) = send_json(
        &router,
        "GET",
        "/v1/data/t/allow?request=user:%22alice%22&explain=truth",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!trace.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn explain_with_non_ground_request_is_400() {
    let server = test_server().await;
    let router = server.router();
    let (status, body) = send_json(
        &router,
        "GET",
        "/v1/data/t?request=user:x&explain=full",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["Message"],
        json!("explanations with non-ground request values not supported")
    );
}

#[tokio::test]
async fn non_ground_request_returns_result_set() {
    let server = test_server().await;
    let router = server.router();

    let src = "package t\n\
               match[\"R1\"] = 1 :- request.q = \"x\"\n\
               match[\"R2\"] = 2 :- request.q = \"z\"";
    send(&router, "PUT", "/v1/policies/p", Some(src)).await;

    let (status, value) = send_json(&router, "GET", "/v1/data/t/match?request=q:w", None).await;
    assert_eq!(status, StatusCode::OK);
    let results = value.as_array().unwrap();
    assert_eq!(results.len(), 2);
    // Each entry is a [result, bindings] pair.
    for entry in results {
        let pair = entry.as_array().unwrap();
        assert_eq!(pair.len(), 2);
        assert!(pair[1].get("w").is_some());
    }
}

// ---------------------------------------------------------------------------
// Ad-hoc queries and index page
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adhoc_query() {
    let server = test_server().await;
    let router = server.router();

    send(&router, "PUT", "/v1/data/items", Some("[10, 20]")).await;

    let (status, value) = send_json(
        &router,
        "GET",
        "/v1/query?q=data.items%5Bi%5D%20%3D%20x",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!([{"i": 0, "x": 10}, {"i": 1, "x": 20}]));
}

#[tokio::test]
async fn adhoc_query_requires_q() {
    let server = test_server().await;
    let router = server.router();
    let (status, body) = send_json(&router, "GET", "/v1/query", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["Message"], json!("missing query parameter 'q'"));
}

#[tokio::test]
async fn adhoc_query_parse_error_carries_errors() {
    let server = test_server().await;
    let router = server.router();
    let (status, body) = send_json(&router, "GET", "/v1/query?q=%3D%3D", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["Message"],
        json!("error(s) occurred while compiling query, see Errors")
    );
    assert!(body["Errors"].is_array());
}

#[tokio::test]
async fn index_page_serves_form() {
    let server = test_server().await;
    let router = server.router();
    let (status, bytes) = send(&router, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(bytes).unwrap();
    assert!(page.contains("<form>"));
}

#[tokio::test]
async fn pretty_parameter_indents_output() {
    let server = test_server().await;
    let router = server.router();
    send(&router, "PUT", "/v1/data/a", Some("{\"b\": 1}")).await;

    let (_, plain) = send(&router, "GET", "/v1/data/a", None).await;
    let (_, pretty) = send(&router, "GET", "/v1/data/a?pretty=true", None).await;
    assert_eq!(String::from_utf8(plain).unwrap(), "{\"b\":1}");
    assert_eq!(
        String::from_utf8(pretty).unwrap(),
        "{\n  \"b\": 1\n}"
    );
}

// ---------------------------------------------------------------------------
// Policy persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policies_survive_restart_with_policy_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        policy_dir: Some(dir.path().to_path_buf()),
        ..ServerConfig::default()
    };

    {
        let server = VerdictServer::new(config.clone()).await.unwrap();
        let router = server.router();
        let src = "package a\nb = 1 :- true";
        assert_eq!(
            send(&router, "PUT", "/v1/policies/p", Some(src)).await.0,
            StatusCode::OK
        );
    }

    let server = VerdictServer::new(config).await.unwrap();
    let router = server.router();
    let (status, value) = send_json(&router, "GET", "/v1/data/a/b", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(1));
}
