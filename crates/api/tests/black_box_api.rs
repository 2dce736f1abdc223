//! Black-box tests over the assembled mock-mode application.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use flowra_api::app;
use flowra_api::config::Config;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_always_ok() {
    let running = app::build_app(&Config::mock()).await.unwrap();

    let response = running
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");

    running.shutdown().await;
}

#[tokio::test]
async fn readiness_reports_all_components_in_mock_mode() {
    let running = app::build_app(&Config::mock()).await.unwrap();

    let response = running
        .router()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    running.shutdown().await;
}

#[tokio::test]
async fn health_details_exposes_component_status() {
    let running = app::build_app(&Config::mock()).await.unwrap();

    let response = running
        .router()
        .oneshot(Request::get("/health/details").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["store"]["healthy"], true);
    assert_eq!(json["data"]["hub"]["running"], true);
    assert_eq!(json["data"]["outbox"]["backlog"], 0);

    running.shutdown().await;
}

#[tokio::test]
async fn collaborator_surface_answers_501() {
    let running = app::build_app(&Config::mock()).await.unwrap();

    for path in [
        "/api/v1/workspaces",
        "/api/v1/workspaces/42/members",
        "/api/v1/tasks",
        "/auth/refresh",
    ] {
        let response = running
            .router()
            .oneshot(Request::post(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED, "{path}");

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NOT_IMPLEMENTED");
    }

    running.shutdown().await;
}

#[tokio::test]
async fn ws_route_refuses_plain_requests() {
    let running = app::build_app(&Config::mock()).await.unwrap();

    // Without a live upgradable connection the request cannot become a
    // websocket; whichever guard fires first (upgrade headers or token),
    // the route must refuse with a client error rather than 501.
    let response = running
        .router()
        .oneshot(Request::get("/api/v1/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error(), "{}", response.status());

    running.shutdown().await;
}
