use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use volley::core::{ConfigError, LoadedPlan, PlanFile, EXIT_ENGINE_FAULT, EXIT_INVALID_CONFIG};
use volley::{summary, Engine, EngineError, HttpScript};

mod cli;

use cli::{Cli, Command, Format, RunArgs};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default = if cli.verbose {
        "volley=debug"
    } else if cli.quiet {
        "volley=warn"
    } else {
        "volley=info"
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Command::Validate { plan } => validate(&plan),
        Command::Run(args) => match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(run(args)),
            Err(err) => {
                error!("Unable to start the async runtime: {err}");
                EXIT_ENGINE_FAULT
            }
        },
    };

    ExitCode::from(code as u8)
}

fn load(
    path: &std::path::Path,
    overrides: Option<&RunArgs>,
) -> Result<(LoadedPlan, HttpScript), ConfigError> {
    let mut file = PlanFile::load(path)?;
    if let Some(args) = overrides {
        args.apply(&mut file);
    }
    let loaded = file.resolve()?;
    if loaded.requests.is_empty() {
        return Err(ConfigError::InvalidStep {
            index: 0,
            reason: "the plan has no requests to run".to_string(),
        });
    }
    let script = HttpScript::new(&loaded.requests)?;
    Ok((loaded, script))
}

fn validate(path: &std::path::Path) -> i32 {
    let (loaded, script) = match load(path, None) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{err}");
            return EXIT_INVALID_CONFIG;
        }
    };
    let plan = &loaded.plan;

    println!("plan: {}", plan.name);
    let mut at = Duration::ZERO;
    println!("  {:>10}  {:>5} VUs (start)", "0s", plan.schedule.start_vus);
    for stage in &plan.schedule.stages {
        at += stage.duration;
        println!(
            "  {:>10}  {:>5} VUs (over {})",
            humantime::format_duration(at).to_string(),
            stage.target,
            humantime::format_duration(stage.duration)
        );
    }
    println!("  peak {} VUs, cap {}", plan.schedule.peak(), plan.max_vus);
    for threshold in &plan.thresholds {
        let abort = if threshold.abort_on_fail { " (abortOnFail)" } else { "" };
        println!("  threshold {threshold}{abort}");
    }
    println!("  {} request steps", script.len());
    0
}

async fn run(args: RunArgs) -> i32 {
    let (loaded, script) = match load(&args.plan, Some(&args)) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{err}");
            return EXIT_INVALID_CONFIG;
        }
    };

    let mut engine = match Engine::new(loaded.plan) {
        Ok(engine) => engine,
        Err(err) => {
            error!("{err}");
            return EXIT_INVALID_CONFIG;
        }
    };
    if let Some(deadline) = args.duration {
        engine = engine.deadline(deadline);
    }

    watch_signals(engine.cancel_token(), engine.abort_token());

    let result = match engine.run(script).await {
        Ok(result) => result,
        Err(EngineError::Config(err)) => {
            error!("{err}");
            return EXIT_INVALID_CONFIG;
        }
        Err(EngineError::Fault { reason, partial }) => {
            error!("{reason}");
            match serde_json::to_string_pretty(&partial) {
                Ok(dump) => eprintln!("metrics at the time of the fault:\n{dump}"),
                Err(err) => error!("Unable to dump metrics: {err}"),
            }
            return EXIT_ENGINE_FAULT;
        }
        Err(err) => {
            error!("{err}");
            return EXIT_ENGINE_FAULT;
        }
    };

    match args.format {
        Format::Text => println!("{}", summary::render(&result)),
        Format::Json => match serde_json::to_string_pretty(&summary::to_json(&result)) {
            Ok(json) => println!("{json}"),
            Err(err) => error!("Unable to serialize the summary: {err}"),
        },
    }

    if let Some(path) = &args.summary_export {
        if let Err(err) = summary::export(&result, path)
            .with_context(|| format!("Unable to write summary to {}", path.display()))
        {
            error!("{err:#}");
            return EXIT_ENGINE_FAULT;
        }
        info!("Summary written to {}", path.display());
    }

    result.exit_code()
}

/// First Ctrl-C stops gracefully, the second drops in-flight iterations.
fn watch_signals(cancel: CancellationToken, abort: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, letting VUs finish their iterations. Press Ctrl-C again to abort.");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborting in-flight iterations");
            abort.cancel();
        }
    });
}
