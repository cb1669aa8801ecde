use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use vigil_compute::{DetectionMode, SignalFailurePolicy};

/// Batch anomaly monitor for failed logins and review bursts.
#[derive(Parser, Debug)]
#[command(name = "vigil-monitor", version, about)]
pub struct Cli {
    /// Config profile (e.g. PROD reads PROD_PG_HOST before PG_HOST).
    #[arg(long, global = true, env = "VIGIL_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train on baselines, score recent activity and persist alerts.
    Run(RunArgs),
    /// List alerts with status `bad`, newest first.
    Alerts,
    /// List alerts whose review score reaches the threshold.
    ReviewAnomalies {
        /// Minimum review score (defaults to the detection threshold).
        #[arg(long, allow_hyphen_values = true)]
        threshold: Option<f64>,
    },
    /// Hand off alerts not yet processed and flag them as processed.
    Process {
        /// List pending alerts without flagging them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the resolved configuration with secrets redacted.
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Score)]
    pub mode: ModeArg,

    /// Print alerts as JSON instead of writing them to PostgreSQL.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep going when one signal fails; its users are left out of the run.
    #[arg(long)]
    pub omit_failed: bool,

    /// Directory holding the record exports (overrides VIGIL_LOG_DIR).
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Skip applying migrations before writing.
    #[arg(long)]
    pub no_migrate: bool,
}

impl RunArgs {
    pub fn failure_policy(&self) -> SignalFailurePolicy {
        if self.omit_failed {
            SignalFailurePolicy::Omit
        } else {
            SignalFailurePolicy::Abort
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Continuous score with good/bad status per user.
    Score,
    /// Binary verdict; only anomalous users are reported.
    Label,
}

impl From<ModeArg> for DetectionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Score => DetectionMode::Score,
            ModeArg::Label => DetectionMode::Label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_to_score_mode() {
        let cli = Cli::try_parse_from(["vigil-monitor", "run"]).unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.mode, ModeArg::Score);
                assert!(!args.dry_run);
                assert_eq!(args.failure_policy(), SignalFailurePolicy::Abort);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "vigil-monitor",
            "run",
            "--mode",
            "label",
            "--dry-run",
            "--omit-failed",
            "--log-dir",
            "/tmp/exports",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(DetectionMode::from(args.mode), DetectionMode::Label);
        assert!(args.dry_run);
        assert_eq!(args.failure_policy(), SignalFailurePolicy::Omit);
        assert_eq!(args.log_dir, Some(PathBuf::from("/tmp/exports")));
    }

    #[test]
    fn process_flags_parse() {
        let cli = Cli::try_parse_from(["vigil-monitor", "--profile", "PROD", "process", "--dry-run"]).unwrap();
        assert_eq!(cli.profile.as_deref(), Some("PROD"));
        assert!(matches!(cli.command, Command::Process { dry_run: true }));

        let cli = Cli::try_parse_from(["vigil-monitor", "process"]).unwrap();
        assert!(matches!(cli.command, Command::Process { dry_run: false }));
    }

    #[test]
    fn negative_threshold_parses() {
        let cli =
            Cli::try_parse_from(["vigil-monitor", "review-anomalies", "--threshold", "-0.05"]).unwrap();
        match cli.command {
            Command::ReviewAnomalies { threshold } => assert_eq!(threshold, Some(-0.05)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
