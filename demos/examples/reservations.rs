//! Reserve two seats per iteration against a gateway started with `cargo run -p mock-service`.
use anyhow::Result;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use volley::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("volley=debug,reservations=info")
        .init();

    let token = std::env::var("ACCESS_TOKEN").unwrap_or_else(|_| "dev-token".into());

    let plan = RunPlan::new("reservations")
        .base_url("http://localhost:8000".parse()?)
        .bearer(&token)
        .stage(Duration::from_secs(10), 20)
        .stage(Duration::from_secs(20), 20)
        .stage(Duration::from_secs(10), 0)
        .sleep(SleepPolicy::Uniform {
            min: Duration::from_millis(500),
            max: Duration::from_millis(1500),
        })
        .threshold(Threshold::parse("http_req_failed", "rate<0.02")?)
        .threshold(Threshold::parse("http_req_duration{name:reserve}", "p(95)<500")?);

    let body = serde_json::json!({
        "eventId": "b1a9d6b7-23f4-4b95-92f1-3a5e4f57e9aa",
        "totalPrice": 300.0,
        "seats": [
            { "zoneNumber": 1, "row": 10, "column": 10 },
            { "zoneNumber": 1, "row": 10, "column": 10 }
        ]
    });

    info!("Reserving seats for event {}", body["eventId"]);
    let result = Engine::new(plan)?
        .run(scenario_fn(move |vu: Vu| {
            let body = body.clone();
            async move {
                let res = vu
                    .http()
                    .post("/v1/reservations")
                    .name("reserve")
                    .json(&body)
                    .send()
                    .await?;
                vu.check("status is 200", &res, |r| r.status == 200);
                Ok(())
            }
        }))
        .await?;

    println!("{}", volley::summary::render(&result));
    std::process::exit(result.exit_code());
}
