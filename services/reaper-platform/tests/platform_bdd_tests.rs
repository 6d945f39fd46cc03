//! BDD tests driving the platform's router in-process (no socket), per
//! `reaper_platform::build_router`.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cucumber::{given, then, when, World};
use http_body_util::BodyExt;
use reaper_core::retention::RetentionConfig;
use reaper_platform::{bootstrap, build_router, PlatformConfig};
use serde_json::Value;
use tower::ServiceExt;

#[derive(Debug, World)]
#[world(init = Self::new)]
struct PlatformWorld {
    router: Option<axum::Router>,
    status: Option<StatusCode>,
    body: Option<Value>,
    created_id: Option<String>,
}

impl PlatformWorld {
    fn new() -> Self {
        Self {
            router: None,
            status: None,
            body: None,
            created_id: None,
        }
    }
}

async fn fresh_router() -> axum::Router {
    let config = PlatformConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        retention: RetentionConfig {
            retain_denials: Duration::from_secs(7_776_000),
            retain_allows: Duration::from_secs(604_800),
            purge_interval: Duration::from_secs(86_400),
        },
    };
    let state = bootstrap(&config).await.expect("platform state bootstraps");
    build_router(state)
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[given("a running platform")]
async fn given_running_platform(world: &mut PlatformWorld) {
    world.router = Some(fresh_router().await);
}

#[when("I request the health endpoint")]
async fn when_request_health(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when(regex = r#"^I create a policy named "([^"]+)" with dsl "(.*)"$"#)]
async fn when_create_policy(world: &mut PlatformWorld, name: String, dsl_text: String) {
    let router = world.router.take().expect("router must be set up first");
    let payload = serde_json::json!({ "name": name, "dsl_text": dsl_text });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/policies")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&payload).unwrap()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.created_id = body["policy"]["id"].as_str().map(str::to_string);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I list policies")]
async fn when_list_policies(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder().uri("/api/v1/policies").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I delete the created policy")]
async fn when_delete_created_policy(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let id = world.created_id.clone().expect("a policy must have been created first");
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/policies/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I fetch a policy by a random id")]
async fn when_fetch_unknown_policy(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder()
        .uri(format!("/api/v1/policies/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I list partitions")]
async fn when_list_partitions(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder().uri("/api/v1/partitions").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I request the retention status")]
async fn when_request_retention_status(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder().uri("/api/v1/retention").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[when("I trigger a retention cycle")]
async fn when_trigger_retention(world: &mut PlatformWorld) {
    let router = world.router.take().expect("router must be set up first");
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/retention")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    world.status = Some(status);
    world.body = Some(body);
    world.router = Some(router);
}

#[then(regex = r"^the response status is (\d+)$")]
async fn then_status_is(world: &mut PlatformWorld, expected: u16) {
    assert_eq!(world.status.unwrap().as_u16(), expected);
}

#[then(regex = r"^the policy list contains (\d+) entries?$")]
async fn then_policy_list_contains(world: &mut PlatformWorld, expected: usize) {
    let body = world.body.as_ref().unwrap();
    assert_eq!(body["total"].as_u64().unwrap() as usize, expected);
}

#[then("the partition listing includes the seeded months")]
async fn then_partition_listing_nonempty(world: &mut PlatformWorld) {
    let body = world.body.as_ref().unwrap();
    assert!(body["partitions"].is_array());
    assert!(body["dropped"].is_array());
}

#[then(regex = r"^the retention status reports a purge interval of (\d+) seconds$")]
async fn then_purge_interval_is(world: &mut PlatformWorld, expected: u64) {
    let body = world.body.as_ref().unwrap();
    assert_eq!(body["purge_interval_secs"].as_u64().unwrap(), expected);
}

#[then("the retention report lists no errors")]
async fn then_retention_report_has_no_errors(world: &mut PlatformWorld) {
    let body = world.body.as_ref().unwrap();
    assert!(body["errors"].as_array().unwrap().is_empty());
}

#[tokio::main]
async fn main() {
    PlatformWorld::run("tests/features").await;
}
