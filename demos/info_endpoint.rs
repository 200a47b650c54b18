//! Ramp test against an info endpoint: 100 VUs over 10s, up to 3000 over 30s,
//! hold 3000 for 20s. Run with `BASE_URL=http://host:port cargo run --example
//! info_endpoint`.

use std::sync::Arc;
use std::time::Duration;

use stampede::{
    Check, ReqwestClient, RequestSpec, RunConfig, Scenario, Stage, Threshold, setup_fn,
    teardown_fn,
};

#[tokio::main]
async fn main() -> Result<(), stampede::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let target = format!("{base_url}/api/info");

    let summary = Scenario::builder()
        .name("info endpoint ramp")
        .client(Arc::new(ReqwestClient::new()))
        .config(
            RunConfig::builder()
                .base_url(base_url)
                .stages(vec![
                    Stage::new(Duration::from_secs(10), 100),
                    Stage::new(Duration::from_secs(30), 3000),
                    Stage::new(Duration::from_secs(20), 3000),
                ])
                .thresholds(vec![
                    Threshold::new("http_req_duration", "p(95)<2000"),
                    Threshold::new("errors", "rate<0.1"),
                    Threshold::new("http_req_failed", "rate<0.1"),
                ])
                .think_time(Duration::from_millis(100))
                .build(),
        )
        .requests(vec![RequestSpec::get("/api/info").named("InfoEndpoint")])
        .checks(vec![
            Check::status(200),
            Check::max_duration(Duration::from_secs(2)),
            Check::body_non_empty(),
        ])
        .setup(setup_fn(move || {
            let target = target.clone();
            async move {
                tracing::info!(%target, "starting performance test for /api/info");
                serde_json::Value::Null
            }
        }))
        .teardown(teardown_fn(|_data| async {
            tracing::info!("performance test completed");
        }))
        .build()
        .run()
        .await?;

    std::process::exit(summary.exit_code());
}
