use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use runtime_packager::preflight::{run_preflight, CheckStatus};
use runtime_packager::{verify_overlays, ModuleGraph, PackagingConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "runtime-packager", version)]
#[command(about = "Package modules into a self-contained multi-launcher runtime image")]
#[command(
    after_help = "QUICK START:\n  runtime-packager preflight       Check inputs before packaging\n  runtime-packager plan            Show what would be linked\n  runtime-packager package         Aggregate, link, overlay and deploy\n  runtime-packager verify-scripts  Compare overlays with generated launchers"
)]
struct Cli {
    /// Packaging configuration
    #[arg(short, long, global = true, default_value = "package.toml")]
    config: PathBuf,

    /// Install destination (overrides [install] destination)
    #[arg(long, global = true, env = "RUNTIME_PACKAGER_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole pipeline
    Package,

    /// Resolve the link set and launchers without writing anything
    Plan {
        /// Print the image descriptor as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report overlays that differ from the generated launcher scripts
    VerifyScripts {
        /// Fail (exit code 1) if any overlay differs
        #[arg(long)]
        strict: bool,
    },

    /// Check platform catalog, linker, artifacts and overlay sources
    Preflight {
        /// Fail (exit code 1) if any check fails
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    debug!("arguments: {:?}", cli);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("runtime_packager={level}"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config, cli.install_dir.clone())?;
    let graph = ModuleGraph::load(&config.module_graph)
        .with_context(|| format!("loading module graph for image '{}'", config.image_name))?;
    let pipeline = Pipeline::new(&config, &graph);

    match &cli.command {
        Commands::Package => package(&pipeline),
        Commands::Plan { json } => plan(&pipeline, *json),
        Commands::VerifyScripts { strict } => verify_scripts(&pipeline, &config, *strict),
        Commands::Preflight { strict } => preflight(&config, &graph, *strict),
    }
}

fn load_config(path: &Path, install_dir: Option<PathBuf>) -> Result<PackagingConfig> {
    let config = PackagingConfig::load(path)
        .with_context(|| format!("loading configuration '{}'", path.display()))?;
    Ok(config.with_install_dir(install_dir))
}

fn package(pipeline: &Pipeline) -> Result<ExitCode> {
    let report = match pipeline.run() {
        Ok(report) => report,
        Err(e) => bail!("[{}] {}", e.kind(), e),
    };

    println!("Image: {}", report.image.root.display());
    for artifact in &report.artifacts {
        println!(
            "Artifact: {} ({} entries, sha256 {})",
            artifact.path.display(),
            artifact.entries,
            artifact.sha256
        );
    }
    for launcher in report.image.launchers.iter() {
        println!("Launcher: bin/{} -> {}", launcher.name, launcher.target());
    }
    if !report.overlays.is_empty() {
        println!("Overlays: {}", report.overlays.len());
    }
    if let Some(dir) = &report.deployed_to {
        println!("Deployed: {}", dir.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn plan(pipeline: &Pipeline, json: bool) -> Result<ExitCode> {
    let plan = match pipeline.plan() {
        Ok(plan) => plan,
        Err(e) => bail!("[{}] {}", e.kind(), e),
    };

    if json {
        let rendered =
            serde_json::to_string_pretty(&plan.image).context("serializing image descriptor")?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    let stages: Vec<String> = plan.stages.iter().map(ToString::to_string).collect();
    println!("Stages: {}", stages.join(" -> "));
    println!("Image: {}", plan.image.root.display());
    println!(
        "Modules: {}",
        plan.image.modules.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!(
        "Platform: {}",
        plan.image
            .platform_components
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    let capabilities: Vec<String> = plan.image.capabilities.iter().map(|c| c.to_string()).collect();
    println!("Capabilities: {}", capabilities.join(", "));
    for launcher in plan.image.launchers.iter() {
        let role = if launcher.primary { "primary" } else { "secondary" };
        println!("Launcher ({role}): {} -> {}", launcher.name, launcher.target());
    }
    for artifact in &plan.artifacts {
        println!("Artifact: {}", artifact.display());
    }
    let flags = plan.image.optimization.to_args();
    if !flags.is_empty() {
        println!("Flags: {}", flags.join(" "));
    }
    Ok(ExitCode::SUCCESS)
}

fn verify_scripts(pipeline: &Pipeline, config: &PackagingConfig, strict: bool) -> Result<ExitCode> {
    let plan = match pipeline.plan() {
        Ok(plan) => plan,
        Err(e) => bail!("[{}] {}", e.kind(), e),
    };
    let drift = verify_overlays(
        &plan.image.launchers,
        &config.runtime_executable,
        &config.overlays,
    )
    .context("verifying script overlays")?;

    if drift.is_empty() {
        println!("No overlays target generated launcher scripts.");
        return Ok(ExitCode::SUCCESS);
    }
    let mut differing = 0;
    for entry in &drift {
        let status = if entry.differs() {
            differing += 1;
            "DIFFERS"
        } else {
            "matches"
        };
        println!(
            "  [{status}] {} ({})",
            entry.destination.display(),
            entry.launcher
        );
        if entry.differs() {
            println!("      generated {}", entry.generated_sha256);
            println!("      overlay   {}", entry.overlay_sha256);
        }
    }
    println!("\n{} of {} overlay(s) differ from the generated script.", differing, drift.len());

    if strict && differing > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn preflight(config: &PackagingConfig, graph: &ModuleGraph, strict: bool) -> Result<ExitCode> {
    println!("Running preflight checks...\n");
    let report = run_preflight(config, graph);

    for check in &report.checks {
        let status = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
        };
        match &check.details {
            Some(details) => println!("  [{status}] {}: {details}", check.name),
            None => println!("  [{status}] {}", check.name),
        }
    }
    println!();

    if report.all_passed() {
        println!("All preflight checks passed!");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{} check(s) failed.", report.fail_count());
    if strict {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
