//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Execute a sequence document against the simulated executives
//! - `validate`: Decode a sequence document and check its structure
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write the default configuration to `./.tex/config.toml`

use crate::control::FaultSpec;
use crate::sequence::DocumentFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    Validate(ValidateConfig),
    ShowConfig { config_override: Option<PathBuf> },
    InitConfig { workspace: PathBuf },
}

#[derive(Debug)]
pub struct RunConfig {
    pub sequence: PathBuf,
    pub format: DocumentFormat,
    pub config_override: Option<PathBuf>,
    /// Overrides `simulation.time_scale` from the settings
    pub time_scale: Option<f64>,
    pub faults: Vec<FaultSpec>,
    pub json: bool,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct ValidateConfig {
    pub sequence: PathBuf,
    pub format: DocumentFormat,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "tex")]
#[command(author = "Telescope Executive Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs observing sequences as hierarchical tasks on a robotic telescope")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a sequence document (.toml or .json)
    Run {
        /// Path to the sequence document
        file: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Factor applied to simulated executive durations (0 runs instantly)
        #[arg(short = 't', long = "time-scale")]
        time_scale: Option<f64>,
        /// Inject failures as kind:count[:code] (can be used multiple times)
        #[arg(long = "fail", value_name = "FAULT")]
        fail: Vec<String>,
        /// Print the outcome as JSON
        #[arg(long = "json")]
        json: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Decode a sequence document and check its structure
    Validate {
        /// Path to the sequence document
        file: PathBuf,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Write the default configuration into a workspace
    InitConfig {
        /// Workspace directory
        #[arg(short = 'w', long = "workspace", default_value = ".")]
        workspace: PathBuf,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                file,
                config,
                time_scale,
                fail,
                json,
                verbose,
            }) => {
                if let Some(scale) = time_scale
                    && (*scale < 0.0 || !scale.is_finite())
                {
                    return Err(format!("Invalid time scale {}: must be zero or positive", scale));
                }
                let faults = fail
                    .iter()
                    .map(|spec| {
                        spec.parse::<FaultSpec>()
                            .map_err(|e| format!("Invalid --fail '{}': {}", spec, e))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(ExecutionMode::Run(RunConfig {
                    sequence: file.clone(),
                    format: DocumentFormat::from_path(file),
                    config_override: config.clone(),
                    time_scale: *time_scale,
                    faults,
                    json: *json,
                    verbose: *verbose,
                }))
            }
            Some(Commands::Validate { file, verbose }) => Ok(ExecutionMode::Validate(ValidateConfig {
                sequence: file.clone(),
                format: DocumentFormat::from_path(file),
                verbose: *verbose,
            })),
            Some(Commands::ShowConfig { config }) => Ok(ExecutionMode::ShowConfig {
                config_override: config.clone(),
            }),
            Some(Commands::InitConfig { workspace }) => Ok(ExecutionMode::InitConfig {
                workspace: workspace.clone(),
            }),
            None => {
                Err("No command specified. Use 'tex --help' to see available commands.".to_string())
            }
        }
    }

    /// Whether the command asked for debug logging
    pub fn verbose(&self) -> bool {
        matches!(
            self.command,
            Some(Commands::Run { verbose: true, .. }) | Some(Commands::Validate { verbose: true, .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::codes;
    use crate::sequence::NodeKind;

    fn run_args(file: &str, fail: Vec<&str>, time_scale: Option<f64>) -> Args {
        Args {
            command: Some(Commands::Run {
                file: PathBuf::from(file),
                config: None,
                time_scale,
                fail: fail.into_iter().map(String::from).collect(),
                json: false,
                verbose: true,
            }),
        }
    }

    #[test]
    fn test_run_command_with_faults() {
        let args = run_args("night.toml", vec!["expose:2", "slew:1:4001"], Some(0.0));
        assert!(args.verbose());

        let ExecutionMode::Run(config) = args.mode().unwrap() else {
            panic!("Expected Run mode");
        };
        assert_eq!(config.format, DocumentFormat::Toml);
        assert_eq!(config.time_scale, Some(0.0));
        assert_eq!(config.faults.len(), 2);
        assert_eq!(config.faults[0].kind, NodeKind::Expose);
        assert_eq!(config.faults[0].code, codes::SIMULATED_FAILURE);
        assert_eq!(config.faults[1].code, 4001);
    }

    #[test]
    fn test_run_command_with_json_document() {
        let ExecutionMode::Run(config) = run_args("plan.JSON", vec![], None).mode().unwrap() else {
            panic!("Expected Run mode");
        };
        assert_eq!(config.format, DocumentFormat::Json);
        assert!(config.faults.is_empty());
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let err = run_args("night.toml", vec!["mirror:1"], None).mode().unwrap_err();
        assert!(err.contains("mirror:1"));

        assert!(run_args("night.toml", vec![], Some(-1.0)).mode().is_err());
    }

    #[test]
    fn test_show_config_and_validate() {
        let args = Args {
            command: Some(Commands::ShowConfig { config: None }),
        };
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::ShowConfig { config_override: None }
        ));

        let args = Args {
            command: Some(Commands::Validate {
                file: PathBuf::from("flats.json"),
                verbose: false,
            }),
        };
        let ExecutionMode::Validate(config) = args.mode().unwrap() else {
            panic!("Expected Validate mode");
        };
        assert_eq!(config.format, DocumentFormat::Json);
        assert!(!args.verbose());
    }

    #[test]
    fn test_clap_parses_repeated_faults() {
        let args = <Args as Parser>::try_parse_from([
            "tex", "run", "night.toml", "--fail", "expose:1", "--fail", "offset:2:4100", "--json",
        ])
        .unwrap();
        let ExecutionMode::Run(config) = args.mode().unwrap() else {
            panic!("Expected Run mode");
        };
        assert_eq!(config.faults.len(), 2);
        assert!(config.json);
    }

    #[test]
    fn test_no_command_error() {
        let args = Args { command: None };
        assert!(args.mode().is_err());
    }
}
