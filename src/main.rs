use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use telescope_executive::cli::{Args, ExecutionMode, ObservationReport, RunConfig, ValidateConfig, simulated_context};
use telescope_executive::config::ConfigDiscovery;
use telescope_executive::control::observe;
use telescope_executive::sequence::{load_sequence, validate_structure};
use telescope_executive::task::{LoggingObserver, RootManager, TaskRef};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose() {
        "telescope_executive=debug"
    } else {
        "telescope_executive=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => bail!(e),
    };

    match mode {
        ExecutionMode::Run(config) => run_observation(config).await,
        ExecutionMode::Validate(config) => validate_sequence(config),
        ExecutionMode::ShowConfig { config_override } => show_config(config_override.as_deref()),
        ExecutionMode::InitConfig { workspace } => {
            let path = ConfigDiscovery::create_local_config(&workspace)
                .with_context(|| format!("Failed to create configuration in {:?}", workspace))?;
            println!("Configuration written to {}", path.display());
            Ok(())
        }
    }
}

async fn run_observation(config: RunConfig) -> Result<()> {
    info!("Running sequence {:?}", config.sequence);

    let loaded = ConfigDiscovery::load(config.config_override.as_deref())
        .context("Failed to load configuration")?;
    if let Some(source) = &loaded.source {
        info!("Using configuration {:?}", source);
    }

    let root = load_sequence(&config.sequence)
        .with_context(|| format!("Failed to load sequence {:?}", config.sequence))?;
    validate_structure(&root).context("Sequence failed structural checks")?;

    let name = root.name.clone();
    let (context, executives) =
        simulated_context(loaded.settings, &root, config.time_scale, &config.faults);
    let task: TaskRef = Arc::new(observe(root, context));

    let manager = RootManager::with_observers(vec![Box::new(LoggingObserver)]);
    let outcome = manager.run(task).await;
    let report = ObservationReport::new(&name, &outcome, executives.total_created());

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    if !report.succeeded() {
        warn!("Observation {} ended {}", name, report.status);
        std::process::exit(1);
    }
    Ok(())
}

fn validate_sequence(config: ValidateConfig) -> Result<()> {
    let root = load_sequence(&config.sequence)
        .with_context(|| format!("Failed to load sequence {:?}", config.sequence))?;
    validate_structure(&root)?;

    println!("Sequence '{}' is valid ({:?})", root.name, config.format);
    if config.verbose {
        for (index, child) in root.children.iter().enumerate() {
            println!("  {}. {}", index + 1, child.label());
        }
    }
    Ok(())
}

fn show_config(config_override: Option<&Path>) -> Result<()> {
    ConfigDiscovery::show_discovery_info();

    let loaded = ConfigDiscovery::load(config_override).context("Failed to load configuration")?;
    println!();
    println!("{}", loaded.settings.to_toml_string()?);
    Ok(())
}
