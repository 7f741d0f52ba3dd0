//! Browse events like a visitor: list them, then open a random one.
//!
//! `ACCESS_TOKEN=... BASE_URL=http://localhost:8000 cargo run -p demos --example events`
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;
use volley::prelude::*;

#[derive(Deserialize)]
struct Event {
    id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("volley=info,events=info")
        .init();

    let metrics_addr: SocketAddr = "0.0.0.0:8002".parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    info!("Serving Prometheus metrics on {metrics_addr}");

    let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());
    let token = std::env::var("ACCESS_TOKEN")?;

    let plan = RunPlan::new("events")
        .base_url(base_url.parse()?)
        .bearer(&token)
        .stage(Duration::from_secs(30), 50)
        .stage(Duration::from_secs(60), 50)
        .stage(Duration::from_secs(30), 200)
        .stage(Duration::from_secs(60), 200)
        .stage(Duration::from_secs(30), 0)
        .sleep(SleepPolicy::Fixed(Duration::from_secs(1)))
        .threshold(Threshold::parse("http_req_failed", "rate<0.02")?)
        .threshold(Threshold::parse("http_req_duration", "p(95)<500")?);

    let engine = Engine::new(plan)?;
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, letting VUs finish their iteration");
            cancel.cancel();
        }
    });

    let result = engine
        .run(scenario_fn(|vu: Vu| async move {
            let res = vu.http().get("/v1/events").send().await?;
            vu.check("GET /events 200", &res, |r| r.status == 200);

            let events: Vec<Event> = res.json().unwrap_or_else(|err| {
                warn!("Unable to parse event list: {err}");
                vec![]
            });
            let chosen = events.choose(&mut rand::thread_rng());
            if let Some(event) = chosen {
                let detail = vu
                    .http()
                    .get(&format!("/v1/events/{}", event.id))
                    .name("/v1/events/:id")
                    .send()
                    .await?;
                vu.check("GET /events/:id 200", &detail, |r| r.status == 200);
            }
            Ok(())
        }))
        .await?;

    println!("{}", volley::summary::render(&result));
    std::process::exit(result.exit_code());
}
