// tests/metrics.rs
//
// The Prometheus recorder is process-global, so this binary installs it once.

use std::path::PathBuf;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use eigenslur::bootstrap::Runtime;
use eigenslur::config::Settings;
use eigenslur::create_router;
use eigenslur::metrics::Metrics;

#[tokio::test]
async fn metrics_endpoint_reports_scoring_series() {
    let metrics = Metrics::init().expect("install recorder");
    let settings = Settings {
        weights_path: PathBuf::from("target/does-not-exist/fusion.toml"),
        ..Settings::default()
    };
    let runtime = Runtime::from_settings(settings).await.expect("runtime");
    let app = create_router(runtime.state(Some(metrics.handle.clone())));

    // one good pass, one rejected, one degenerate
    for payload in [
        json!({ "term": "slur1", "contexts": ["you slur1 again", "a slur1 joke"] }),
        json!({ "term": "slur1", "contexts": [] }),
        json!({ "term": "slur1", "contexts": ["only slur1 once"] }),
    ] {
        app.clone()
            .oneshot(
                Request::post("/score/term")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "scoring_runs_total",
        "scoring_failures_total",
        "spectral_degenerate_total",
        "scoring_duration_ms",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
