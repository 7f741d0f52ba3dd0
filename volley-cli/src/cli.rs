use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use volley::core::{parse_duration, PlanFile, Stage, StageSpec};

#[derive(Parser, Debug)]
#[command(name = "volley", version, about = "Stage-driven HTTP load testing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug logging for the engine.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a plan file and report the verdict through the exit code.
    Run(RunArgs),
    /// Parse and validate a plan file, then print its schedule.
    Validate {
        plan: PathBuf,
    },
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    pub plan: PathBuf,

    /// Override the plan's VU cap.
    #[arg(long)]
    pub max_vus: Option<u64>,

    /// Stop the run after this long even if stages remain (`90s`, `2m`).
    #[arg(long, value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Replace the plan's stages, written `DURATION:TARGET` (`30s:50`). Repeatable.
    #[arg(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Write the machine-readable summary to this file.
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Skip threshold evaluation; the run passes unless interrupted.
    #[arg(long)]
    pub no_thresholds: bool,

    /// Override the plan's base URL.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl RunArgs {
    /// Fold the overrides into the plan file, before environment expansion and validation.
    pub fn apply(&self, file: &mut PlanFile) {
        if let Some(max_vus) = self.max_vus {
            file.max_vus = Some(max_vus);
        }
        if !self.stages.is_empty() {
            file.stages = self
                .stages
                .iter()
                .map(|s| StageSpec {
                    duration: s.duration.into(),
                    target: s.target,
                })
                .collect();
        }
        if let Some(base_url) = &self.base_url {
            file.base_url = Some(base_url.clone());
        }
        if self.no_thresholds {
            file.thresholds.clear();
        }
    }
}

fn parse_duration_arg(input: &str) -> Result<Duration, String> {
    parse_duration(input).map_err(|e| e.to_string())
}

fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("expected DURATION:TARGET, got {input:?}"))?;
    let target = target
        .trim()
        .parse()
        .map_err(|_| format!("invalid VU target {target:?}"))?;
    Ok(Stage::new(parse_duration_arg(duration)?, target))
}
