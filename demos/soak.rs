//! Soak/endurance test: ramp to 1000 VUs over 2 minutes, hold for 10 minutes,
//! ramp down over 2 minutes, with a one-second think time per iteration.

use std::sync::Arc;
use std::time::Duration;

use stampede::{Check, ReqwestClient, RequestSpec, RunConfig, Scenario, Stage, Threshold};

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
        .name("soak")
        .client(Arc::new(ReqwestClient::new()))
        .config(
            RunConfig::builder()
                .base_url(base_url)
                .stages(vec![
                    Stage::new(Duration::from_secs(120), 1000),
                    Stage::new(Duration::from_secs(600), 1000),
                    Stage::new(Duration::from_secs(120), 0),
                ])
                .thresholds(vec![
                    Threshold::new("http_req_duration", "p(95)<2000"),
                    Threshold::new("http_req_failed", "rate<0.05"),
                ])
                .think_time(Duration::from_secs(1))
                .build(),
        )
        .requests(vec![RequestSpec::get("/api/info")])
        .checks(vec![
            Check::status(200),
            Check::max_duration(Duration::from_secs(2)).named("response time < 2s"),
        ])
        .build()
        .run()
        .await?;

    std::process::exit(summary.exit_code());
}
