use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// KubeSandbox - provision a local Kubernetes sandbox from a step plan
#[derive(Parser)]
#[command(name = "kubesandbox")]
#[command(about = "Executes provisioning plans for a local Kubernetes sandbox")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install missing programs, execute the plan and write the report
    Run {
        /// Path to the plan (JSON array of steps)
        plan: PathBuf,

        /// Installation sources file, replaces the built-in sources
        #[arg(short, long)]
        sources: Option<PathBuf>,

        /// Directory for the log file and reports (overrides WORKDIR)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Do not write report.md
        #[arg(long)]
        no_report: bool,

        /// Write every command output to outputs.md
        #[arg(long)]
        dump_output: bool,
    },
    /// List the programs the plan needs that are missing on this host
    Check {
        /// Path to the plan (JSON array of steps)
        plan: PathBuf,
    },
    /// Parse a plan and print its steps with their effort
    Validate {
        /// Path to the plan (JSON array of steps)
        plan: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["kubesandbox"]).is_err());
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::try_parse_from(["kubesandbox", "run", "plan.json"]).unwrap();
        match cli.command {
            Commands::Run {
                plan,
                sources,
                workdir,
                no_report,
                dump_output,
            } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert!(sources.is_none());
                assert!(workdir.is_none());
                assert!(!no_report);
                assert!(!dump_output);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_with_flags() {
        let cli = Cli::try_parse_from([
            "kubesandbox",
            "run",
            "plan.json",
            "--sources",
            "sources.json",
            "--workdir",
            "/tmp/sandbox",
            "--no-report",
            "--dump-output",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                sources,
                workdir,
                no_report,
                dump_output,
                ..
            } => {
                assert_eq!(sources, Some(PathBuf::from("sources.json")));
                assert_eq!(workdir, Some(PathBuf::from("/tmp/sandbox")));
                assert!(no_report);
                assert!(dump_output);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_check_and_validate() {
        let cli = Cli::try_parse_from(["kubesandbox", "check", "plan.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { .. }));

        let cli = Cli::try_parse_from(["kubesandbox", "validate", "plan.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }
}
