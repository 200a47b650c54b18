//! Spike test: idle for 5s, spike to 3000 VUs in 10s, hold 30s, ramp down
//! over 15s. Emits both a text and a JSON summary.

use std::sync::Arc;
use std::time::Duration;

use stampede::{
    Check, JsonReporter, ReqwestClient, RequestSpec, RunConfig, Scenario, Stage, Threshold,
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

    let summary = Scenario::builder()
        .name("spike")
        .client(Arc::new(ReqwestClient::new()))
        .config(
            RunConfig::builder()
                .base_url(base_url)
                .stages(vec![
                    Stage::new(Duration::from_secs(5), 0),
                    Stage::new(Duration::from_secs(10), 3000),
                    Stage::new(Duration::from_secs(30), 3000),
                    Stage::new(Duration::from_secs(15), 0),
                ])
                .thresholds(vec![
                    Threshold::new("http_req_duration", "p(95)<3000"),
                    Threshold::new("http_req_duration", "p(99)<5000"),
                    Threshold::new("http_req_failed", "rate<0.15"),
                ])
                .think_time(Duration::from_millis(100))
                .build(),
        )
        .requests(vec![RequestSpec::get("/api/info")])
        .checks(vec![
            Check::status(200),
            Check::max_duration(Duration::from_secs(3)).named("response time OK"),
        ])
        .reporter(Box::new(JsonReporter))
        .build()
        .run()
        .await?;

    std::process::exit(summary.exit_code());
}
