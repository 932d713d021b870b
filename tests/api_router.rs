// tests/api_router.rs

use std::error::Error;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value as Json, json};
use tower::ServiceExt;

use labqueue::api::build_router;
use labqueue::protocol::{ParamKind, ProtocolRegistry};
use labqueue_test_utils::builders::{
    ConfigFileBuilder, ParamBuilder, ProtocolBuilder, StepBuilder, WORKCELL,
};
use labqueue_test_utils::fake_dispatcher::ScriptedDispatcher;
use labqueue_test_utils::{TestQueue, init_tracing, test_queue};

type TestResult = Result<(), Box<dyn Error>>;

fn registry() -> ProtocolRegistry {
    let protocol = ProtocolBuilder::new("Dispense")
        .param(
            ParamBuilder::new("volume", ParamKind::Number)
                .min(1.0)
                .max(100.0)
                .build(),
        )
        .step(
            StepBuilder::new("ot2", "dispense")
                .param("volume", "${volume}")
                .build(),
        )
        .step(StepBuilder::new("ot2", "rinse").build())
        .build();

    let cfg = ConfigFileBuilder::new()
        .with_tool("ot2")
        .with_protocol("dispense", protocol)
        .build();
    ProtocolRegistry::from_config(&cfg).unwrap()
}

async fn setup() -> (TestQueue, Router) {
    init_tracing();
    let q = test_queue(registry(), ScriptedDispatcher::new()).await;
    let router = build_router(q.handle.clone());
    (q, router)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, json)
}

fn create_body(volume: Json) -> Json {
    json!({
        "workcell_name": WORKCELL,
        "protocol_id": "dispense",
        "params": { "volume": volume }
    })
}

#[tokio::test]
async fn create_then_fetch_run() -> TestResult {
    let (_q, router) = setup().await;

    let (status, body) = send(&router, Method::POST, "/runs", Some(create_body(json!(25)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "QUEUED");
    let id = body["id"].as_str().expect("run id").to_string();

    let (status, run) = send(&router, Method::GET, &format!("/runs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["id"], id.as_str());
    assert_eq!(run["protocol_id"], "dispense");
    assert_eq!(run["commands"].as_array().map(Vec::len), Some(2));
    assert_eq!(run["commands"][0]["command_info"]["params"]["volume"], 25.0);

    let (status, list) = send(&router, Method::GET, "/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["data"][0]["id"], id.as_str());

    Ok(())
}

#[tokio::test]
async fn unknown_protocol_is_404() -> TestResult {
    let (_q, router) = setup().await;

    let body = json!({ "workcell_name": WORKCELL, "protocol_id": "nope" });
    let (status, body) = send(&router, Method::POST, "/runs", Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap_or_default().contains("nope"));

    // Protocols are scoped to their workcell.
    let body = json!({ "workcell_name": "other-cell", "protocol_id": "dispense" });
    let (status, _) = send(&router, Method::POST, "/runs", Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn invalid_params_are_400_with_field_errors() -> TestResult {
    let (q, router) = setup().await;

    let (status, body) = send(&router, Method::POST, "/runs", Some(create_body(json!(500)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert_eq!(body["fields"][0]["field"], "volume");
    assert_eq!(body["fields"][0]["constraint"], "max");

    assert!(q.handle.list_runs().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_400() -> TestResult {
    let (_q, router) = setup().await;

    let (status, body) = send(&router, Method::POST, "/runs", Some(json!({ "protocol_id": 3 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    Ok(())
}

#[tokio::test]
async fn unknown_run_ids_are_404() -> TestResult {
    let (_q, router) = setup().await;

    let (status, _) = send(&router, Method::GET, "/runs/not-a-ulid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let missing = ulid::Ulid::new();
    let (status, body) = send(&router, Method::GET, &format!("/runs/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);

    Ok(())
}

#[tokio::test]
async fn queue_endpoints_report_and_control_state() -> TestResult {
    let (mut q, router) = setup().await;

    let (status, state) = send(&router, Method::GET, "/queue/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state, json!({ "state": "READY", "running": true, "in_flight": null }));

    send(&router, Method::POST, "/runs", Some(create_body(json!(10)))).await;

    let (_, stopped) = send(&router, Method::POST, "/queue/stop", None).await;
    assert_eq!(stopped["running"], false);
    assert!(q.runtime.tick().await.is_none());

    let (_, restarted) = send(&router, Method::POST, "/queue/restart", None).await;
    assert_eq!(restarted["running"], true);

    q.runtime.tick().await;
    q.runtime.tick().await;

    let (_, commands) = send(&router, Method::GET, "/queue/commands", None).await;
    let statuses: Vec<&str> = commands
        .as_array()
        .expect("command list")
        .iter()
        .filter_map(|c| c["status"].as_str())
        .collect();
    assert_eq!(statuses, vec!["COMPLETED", "COMPLETED"]);

    let (status, _) = send(&router, Method::POST, "/queue/clear-completed", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, list) = send(&router, Method::GET, "/runs", None).await;
    assert_eq!(list["count"], 0);

    send(&router, Method::POST, "/runs", Some(create_body(json!(10)))).await;
    let (status, cleared) = send(&router, Method::POST, "/queue/clear-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["state"], "READY");
    let (_, commands) = send(&router, Method::GET, "/queue/commands", None).await;
    assert_eq!(commands, json!([]));

    Ok(())
}

#[tokio::test]
async fn skip_endpoints() -> TestResult {
    let (q, router) = setup().await;

    send(&router, Method::POST, "/runs", Some(create_body(json!(10)))).await;
    send(&router, Method::POST, "/runs", Some(create_body(json!(20)))).await;
    let commands = q.handle.commands().await;
    let ids: Vec<String> = commands.iter().map(|c| c.queue_id.to_string()).collect();

    // Skip everything before the second run's first command.
    let (status, outcome) = send(
        &router,
        Method::POST,
        &format!("/queue/commands/{}/skip-until", ids[2]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["skipped"], json!([ids[0], ids[1]]));

    // Already skipped: conflict.
    let (status, body) = send(&router, Method::POST, &format!("/queue/commands/{}/skip", ids[0]), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);

    let (status, outcome) = send(&router, Method::POST, &format!("/queue/commands/{}/skip", ids[3]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["skipped"], json!([ids[3]]));

    let (status, _) = send(&router, Method::POST, "/queue/commands/bogus/skip", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let missing = ulid::Ulid::new();
    let (status, _) = send(&router, Method::POST, &format!("/queue/commands/{missing}/skip"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn protocols_are_listed() -> TestResult {
    let (_q, router) = setup().await;

    let (status, protocols) = send(&router, Method::GET, "/protocols", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(protocols[0]["id"], "dispense");
    assert_eq!(protocols[0]["workcell"], WORKCELL);
    assert_eq!(protocols[0]["steps"], 2);
    assert_eq!(protocols[0]["params"][0]["name"], "volume");
    assert_eq!(protocols[0]["params"][0]["type"], "number");

    Ok(())
}
