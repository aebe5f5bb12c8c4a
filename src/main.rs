//! KubeSandbox - Main entry point

use anyhow::Context;
use crossterm::style::Stylize;
use kubesandbox::cli::{Cli, Commands};
use kubesandbox::{
    Chores, ConsoleDisplay, DependencyInstaller, ExecutionPlanner, PathProbe, PlannerConfig,
    ProcessGuard, RuntimeData, compute_effort, load_plan_file, load_sources_file,
    missing_dependencies, process_guard,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Send logs to `<workdir>/kubesandbox.log` so they never interleave with
/// the console display. `RUST_LOG` overrides the default `info` level.
fn init_logger(config: &PlannerConfig) -> anyhow::Result<()> {
    fs::create_dir_all(&config.workdir)
        .with_context(|| format!("Failed to create workdir {:?}", config.workdir))?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_file())
        .with_context(|| format!("Failed to open log file {:?}", config.log_file()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let mut config = PlannerConfig::from_env().context("Invalid environment configuration")?;
    if let Commands::Run { workdir: Some(workdir), .. } = &cli.command {
        config.workdir = workdir.clone();
    }
    init_logger(&config)?;
    info!("KubeSandbox starting up");

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    match cli.command {
        Commands::Run {
            plan,
            sources,
            no_report,
            dump_output,
            ..
        } => {
            if no_report {
                config.generate_report = false;
            }
            if dump_output {
                config.dump_output = true;
            }
            run_plan(&plan, sources, config)
        }
        Commands::Check { plan } => check_plan(&plan),
        Commands::Validate { plan } => validate_plan(&plan),
    }
}

fn run_plan(plan: &Path, sources: Option<PathBuf>, mut config: PlannerConfig) -> anyhow::Result<()> {
    info!("Loading plan from {:?}", plan);
    let steps = load_plan_file(plan)?;
    if let Some(path) = sources {
        config.installation_sources = load_sources_file(&path)?;
    }

    let guard = ProcessGuard::new();
    let installer = DependencyInstaller::new(config.installation_sources.clone())
        .privilege_probe(config.privilege_probe.clone());
    let mut planner = ExecutionPlanner::new(steps, installer);

    let mut storage = RuntimeData::new();
    let mut display = ConsoleDisplay::new("KubeSandbox");
    let failure = planner.execute(&mut storage, &mut display).err();

    // Present the plan error before anything else can fail
    if let Some(e) = &failure {
        error!("Plan failed: {}", e);
        eprintln!("{} {}", "✗".red().bold(), e);
    }

    let mut chores = Chores::new(&config.workdir, config.dump_output, config.generate_report)
        .with_context(|| format!("Failed to prepare workdir {:?}", config.workdir))?;
    if failure.is_none() {
        info!("Plan completed successfully");
        if let Some(report) = chores.cleanup(&mut storage)? {
            println!("\n{}", report);
        }
        return Ok(());
    }

    chores.should_dump_output = false;
    chores.should_generate_report = false;
    if let Err(cleanup_err) = chores.cleanup(&mut storage) {
        warn!("Cleanup after failure did not complete: {}", cleanup_err);
    }
    drop(guard);
    std::process::exit(1);
}

fn check_plan(plan: &Path) -> anyhow::Result<()> {
    let steps = load_plan_file(plan)?;
    let missing = missing_dependencies(&steps, &PathProbe::new());
    if missing.is_empty() {
        println!("{} All dependencies are installed", "✓".green());
    } else {
        println!("{} Missing dependencies:", "!".yellow());
        for package in &missing {
            println!("  - {}", package);
        }
    }
    info!("Dependency check found {} missing programs", missing.len());
    Ok(())
}

fn validate_plan(plan: &Path) -> anyhow::Result<()> {
    let mut steps = load_plan_file(plan)?;
    let mut total = 0;
    for step in steps.iter_mut() {
        let effort = compute_effort(step);
        total += effort;
        println!("  {} (effort {})", step.name, effort);
    }
    println!("{} Plan is valid: {} steps, total effort {}", "✓".green(), steps.len(), total);
    info!("Validated plan {:?}", plan);
    Ok(())
}
