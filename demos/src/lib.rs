//! Runnable demos for volley. See `examples/` for programmatic scenarios and `plans/` for plan
//! files to pass to `volley run`.
use std::path::PathBuf;

/// Path of a bundled plan file, e.g. `plan("events")`.
pub fn plan(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("plans")
        .join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use volley::core::PlanFile;
    use volley::HttpScript;

    fn env(name: &str) -> Option<String> {
        match name {
            "BASE_URL" => Some("http://localhost:8000".to_string()),
            "ACCESS_TOKEN" => Some("dev-token".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_bundled_plans_resolve() {
        for name in ["events", "locations", "reservations"] {
            let loaded = PlanFile::load(plan(name)).unwrap().resolve_with(env).unwrap();
            assert_eq!(loaded.plan.name, name);
            assert_eq!(loaded.plan.schedule.peak(), 200);
            assert_eq!(loaded.plan.schedule.total_duration(), Duration::from_secs(210));
            assert!(!loaded.plan.thresholds.is_empty());
            assert!(!HttpScript::new(&loaded.requests).unwrap().is_empty());
        }
    }

    #[test]
    fn test_plans_need_a_token() {
        let err = PlanFile::load(plan("events"))
            .unwrap()
            .resolve_with(|name| (name == "BASE_URL").then(|| "http://localhost:8000".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN"));
    }
}
