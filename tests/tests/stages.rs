mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use std::time::Duration;
    use volley::core::{
        RunPlan, RunStatus, SleepPolicy, Threshold, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    };
    use volley::prelude::*;

    fn ramp(name: &str, base_url: &str) -> RunPlan {
        RunPlan::new(name)
            .base_url(base_url.parse().unwrap())
            .stage(Duration::from_secs(5), 10)
            .stage(Duration::from_secs(5), 10)
            .stage(Duration::from_secs(5), 0)
            .sleep(SleepPolicy::Fixed(Duration::from_secs(1)))
    }

    #[tokio::test]
    #[ntest::timeout(60_000)]
    async fn ramp_with_rare_failures_passes() {
        let base_url = init().await;

        let plan = ramp("flaky", &base_url)
            .threshold(Threshold::parse("http_req_failed", "rate<0.02").unwrap());

        // 1% failures. Twenty calls per iteration keep the observed rate well clear of 2%.
        let result = Engine::new(plan)
            .unwrap()
            .run(scenario_fn(|vu: Vu| async move {
                for _ in 0..20 {
                    vu.http().get("/flaky/10000").name("/flaky").send().await?;
                }
                Ok(())
            }))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.passed(), "{}", volley::summary::render(&result));
        assert_eq!(result.vus_max, 10);
        assert!(result.duration >= Duration::from_secs(15));
        // Ten VUs for roughly ten seconds at one iteration per second.
        assert!(dbg!(result.iterations) >= 60);
        assert!(result.metrics[HTTP_REQS].count >= 1_200.);

        let rate = result.metrics[HTTP_REQ_FAILED].rate.unwrap();
        assert!(dbg!(rate) > 0.002 && rate < 0.02);
    }

    #[tokio::test]
    #[ntest::timeout(60_000)]
    async fn latency_percentiles() {
        let base_url = init().await;

        let plan = ramp("latency", &base_url)
            .threshold(Threshold::parse("http_req_duration", "p(95)<500").unwrap())
            .threshold(Threshold::parse("http_req_duration", "p(95)<100").unwrap());

        let result = Engine::new(plan)
            .unwrap()
            .run(scenario_fn(|vu: Vu| async move {
                vu.http().get("/latency/ms/200").send().await?;
                Ok(())
            }))
            .await
            .unwrap();

        let p95 = result.metrics[HTTP_REQ_DURATION].p95.unwrap();
        assert!(dbg!(p95) > 200.);
        assert!(p95 < 500.);

        let failed: Vec<_> = result.failed_thresholds().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].expression, "p(95)<100");
    }
}
