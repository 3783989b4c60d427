//! RPC façade tests: the decision algorithm and the framed TCP surface.

use axum::body::Body;
use http::Request;
use tower::ServiceExt;

use verdict_protocol::{
    read_message, write_message, Attribute, Effect, ValidateRequest, ValidateResponse,
};
use verdict_server::{rpc, ServerConfig, VerdictServer};

async fn server_with_policy(src: &str) -> VerdictServer {
    let server = VerdictServer::new(ServerConfig::default()).await.unwrap();
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/policies/p")
        .body(Body::from(src.to_string()))
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert!(
        response.status().is_success(),
        "policy install failed: {}",
        response.status()
    );
    server
}

fn attributes(pairs: &[(&str, &str)]) -> ValidateRequest {
    ValidateRequest {
        attributes: pairs
            .iter()
            .map(|(id, value)| Attribute::new(*id, *value))
            .collect(),
    }
}

#[tokio::test]
async fn highest_priority_block_denies() {
    let policy = "package opa.c1\n\
                  match[\"R1\"] = {\"priority\": 1, \"action_type\": \"action_allow\", \"action_data\": \"\"} :- request.q = \"x\"\n\
                  match[\"R2\"] = {\"priority\": 9, \"action_type\": \"action_block\", \"action_data\": \"\"} :- request.q = \"x\"\n";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "x")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Deny);
    assert!(response.obligations.is_empty());
}

#[tokio::test]
async fn redirect_denies_with_obligation() {
    let policy = "package opa.c1\n\
                  match[\"R1\"] = {\"priority\": 9, \"action_type\": \"action_redirect\", \"action_data\": \"http://h\"} :- request.q = \"x\"\n";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "x")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Deny);
    assert_eq!(
        response.obligations,
        vec![Attribute::new("redirect_to", "http://h")]
    );
}

#[tokio::test]
async fn allow_action_permits() {
    let policy = "package opa.c1\n\
                  match[\"R1\"] = {\"priority\": 3, \"action_type\": \"action_allow\", \"action_data\": \"\"} :- request.q = \"x\"\n";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "x")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Permit);
}

#[tokio::test]
async fn empty_match_permits_but_absent_document_denies() {
    // A complete rule with an empty match object: evaluation succeeds,
    // nothing to scan, the verdict is permit.
    let policy = "package opa.c1\nmatch = {} :- request.q = \"x\"";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "x")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Permit);

    // The rule body fails: the tenant document is undefined, deny.
    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "nope")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Deny);

    // Unknown tenant: undefined document, deny.
    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "other"), ("q", "x")]),
    )
    .await;
    assert_eq!(response.effect, Effect::Deny);
}

#[tokio::test]
async fn missing_match_key_denies() {
    let policy = "package opa.c1\nother = 1 :- true";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(server.state(), &attributes(&[("customer_id", "c1")])).await;
    assert_eq!(response.effect, Effect::Deny);
}

#[tokio::test]
async fn non_positive_priorities_never_win() {
    let policy = "package opa.c1\n\
                  match[\"R1\"] = {\"priority\": 0, \"action_type\": \"action_block\", \"action_data\": \"\"} :- request.q = \"x\"\n";
    let server = server_with_policy(policy).await;

    let response = rpc::validate(
        server.state(),
        &attributes(&[("customer_id", "c1"), ("q", "x")]),
    )
    .await;
    // priority 0 is not strictly greater than the initial best, so no
    // action applies and the verdict stays permit.
    assert_eq!(response.effect, Effect::Permit);
}

#[tokio::test]
async fn framed_tcp_round_trip() {
    let policy = "package opa.c1\n\
                  match[\"R2\"] = {\"priority\": 9, \"action_type\": \"action_block\", \"action_data\": \"\"} :- request.q = \"x\"\n";
    let server = server_with_policy(policy).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = server.state().clone();
    tokio::spawn(rpc::serve(state, listener));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    // Two requests on one connection, answered in order.
    let deny = attributes(&[("customer_id", "c1"), ("q", "x")]);
    write_message(&mut stream, &deny).await.unwrap();
    let response: ValidateResponse = read_message(&mut stream).await.unwrap().unwrap();
    assert_eq!(response.effect, Effect::Deny);

    let permit = attributes(&[("customer_id", "c1"), ("q", "other")]);
    write_message(&mut stream, &permit).await.unwrap();
    let response: ValidateResponse = read_message(&mut stream).await.unwrap().unwrap();
    assert_eq!(response.effect, Effect::Deny); // undefined document

    drop(stream);
}
