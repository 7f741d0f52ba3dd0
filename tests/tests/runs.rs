mod utils;
#[allow(unused)]
use utils::*;

use std::time::Duration;
use volley::core::{
    PlanFile, RunPlan, RunStatus, SleepPolicy, Threshold, EXIT_THRESHOLDS_FAILED,
    EXIT_THRESHOLD_ABORT, HTTP_REQS, HTTP_REQ_FAILED, ITERATIONS,
};
use volley::prelude::*;

const EVENTS_PLAN: &str = r#"{
    "name": "events",
    "baseUrl": "${BASE_URL}",
    "headers": { "Authorization": "Bearer ${ACCESS_TOKEN}" },
    "stages": [
        { "duration": "1s", "target": 4 },
        { "duration": "1s", "target": 4 },
        { "duration": "1s", "target": 0 }
    ],
    "tick": "50ms",
    "sleep": "100ms",
    "thresholds": {
        "http_req_failed": ["rate<0.02"],
        "http_req_duration": ["p(95)<500"],
        "checks": ["rate==1"]
    },
    "requests": [
        {
            "url": "/v1/events",
            "checks": [{ "name": "GET /events 200", "status": 200 }],
            "capture": [{ "var": "eventId", "pointer": "/id", "random": true }]
        },
        {
            "url": "/v1/events/{{eventId}}",
            "name": "/v1/events/:id",
            "checks": [{ "name": "GET /events/:id 200", "status": 200 }]
        }
    ]
}"#;

#[tokio::test]
#[ntest::timeout(20_000)]
async fn scripted_events_plan_passes() {
    let base_url = init().await;

    let loaded = PlanFile::from_json(EVENTS_PLAN)
        .unwrap()
        .resolve_with(env(&base_url))
        .unwrap();
    let script = HttpScript::new(&loaded.requests).unwrap();

    let result = Engine::new(loaded.plan).unwrap().run(script).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.passed(), "{}", volley::summary::render(&result));
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.vus_max, 4);
    assert!(result.iterations > 0);

    let list = &result.checks["GET /events 200"];
    let detail = &result.checks["GET /events/:id 200"];
    assert!(list.passes > 0);
    assert_eq!(list.fails, 0);
    assert_eq!(detail.passes, list.passes);

    let reqs = &result.metrics[HTTP_REQS];
    assert_eq!(reqs.count, (list.passes + detail.passes) as f64);
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn missing_token_fails_thresholds() {
    let base_url = init().await;

    let plan = RunPlan::new("unauthorized")
        .base_url(base_url.parse().unwrap())
        .stage(Duration::from_millis(500), 2)
        .stage(Duration::from_millis(500), 0)
        .tick(Duration::from_millis(50))
        .sleep(SleepPolicy::Fixed(Duration::from_millis(50)))
        .threshold(Threshold::parse("http_req_failed", "rate<0.02").unwrap());

    let result = Engine::new(plan)
        .unwrap()
        .run(scenario_fn(|vu: Vu| async move {
            let res = vu.http().get("/v1/locations").send().await?;
            vu.check("GET /locations 200", &res, |r| r.status == 200);
            Ok(())
        }))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.passed());
    assert_eq!(result.exit_code(), EXIT_THRESHOLDS_FAILED);
    assert_eq!(result.metrics[HTTP_REQ_FAILED].rate, Some(1.));
    assert_eq!(result.checks["GET /locations 200"].passes, 0);
    assert_eq!(result.failed_thresholds().count(), 1);
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn failing_threshold_aborts_run() {
    let base_url = init().await;

    let plan = RunPlan::new("always-failing")
        .base_url(base_url.parse().unwrap())
        .stage(Duration::from_secs(30), 2)
        .tick(Duration::from_millis(50))
        .graceful_stop(Duration::from_secs(1))
        .threshold_interval(Duration::from_millis(100))
        .sleep(SleepPolicy::Fixed(Duration::from_millis(20)))
        .threshold(
            Threshold::parse("http_req_failed", "rate<0.5")
                .unwrap()
                .abort_on_fail(Some(Duration::from_millis(200))),
        );

    let result = Engine::new(plan)
        .unwrap()
        .run(scenario_fn(|vu: Vu| async move {
            vu.http().get("/flaky/1000000").send().await?;
            Ok(())
        }))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::AbortedByThreshold);
    assert_eq!(result.exit_code(), EXIT_THRESHOLD_ABORT);
    assert!(result.duration < Duration::from_secs(10));
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn reservations_and_summary_export() {
    let base_url = init().await;

    let plan = RunPlan::new("reservations")
        .base_url(base_url.parse().unwrap())
        .bearer(TOKEN)
        .stage(Duration::from_millis(500), 3)
        .stage(Duration::from_millis(500), 0)
        .tick(Duration::from_millis(50))
        .sleep(SleepPolicy::Uniform {
            min: Duration::from_millis(20),
            max: Duration::from_millis(60),
        })
        .threshold(Threshold::parse("http_req_failed", "rate<0.02").unwrap())
        .threshold(Threshold::parse("http_req_duration{name:reserve}", "p(95)<500").unwrap());

    let body = serde_json::json!({
        "eventId": "b1a9d6b7-23f4-4b95-92f1-3a5e4f57e9aa",
        "totalPrice": 300.0,
        "seats": [
            { "zoneNumber": 1, "row": 10, "column": 10 },
            { "zoneNumber": 1, "row": 10, "column": 11 }
        ]
    });

    let result = Engine::new(plan)
        .unwrap()
        .run(scenario_fn(move |vu: Vu| {
            let body = body.clone();
            async move {
                let res = vu
                    .http()
                    .post("/v1/reservations")
                    .name("reserve")
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                let created: serde_json::Value = res.json()?;
                vu.check("reservation has id", &created, |c| c["id"].is_string());
                Ok(())
            }
        }))
        .await
        .unwrap();

    assert!(result.passed(), "{}", volley::summary::render(&result));
    assert!(result.metrics[ITERATIONS].count > 0.);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    volley::summary::export(&result, &path).unwrap();

    let exported: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(exported["state"]["passed"], serde_json::json!(true));
    assert_eq!(
        exported["metrics"]["http_req_duration{name:reserve}"]["thresholds"]["p(95)<500"]["ok"],
        serde_json::json!(true)
    );
    assert_eq!(
        exported["checks"]["reservation has id"]["fails"],
        serde_json::json!(0)
    );
}
