//! forkpipe - deterministic fork/pipe simulation
//!
//! The `forkpipe` binary drives the simulation engine:
//! - Built-in demo scenarios with pass/fail checks
//! - Scripts of engine operations
//! - Status of a freshly configured engine
//! - Configuration inspection and validation

use clap::{Args, Parser, Subcommand, ValueEnum};
use forkpipe_common::{format_error_human, OutputFormat};
use forkpipe_config::{
    list_presets, load_config, ConfigError, ConfigOptions, ConfigSnapshot, LoadedConfig,
    PresetName, ValidationError,
};
use forkpipe_core::demo::{self, Scenario};
use forkpipe_core::exit_codes::ExitCode;
use forkpipe_core::logging::{event_names, generate_run_id, init_logging, LogConfig};
use forkpipe_core::script::{Script, ScriptError};
use forkpipe_core::Engine;
use serde::Serialize;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Deterministic simulation of fork/exit/wait and pipe/read/write/close
#[derive(Parser)]
#[command(name = "forkpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to a forkpipe.json config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a named preset instead of any config file (classic, tiny, roomy)
    #[arg(long, global = true)]
    preset: Option<PresetName>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "human")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

impl GlobalOpts {
    fn use_color(&self) -> bool {
        !self.no_color && std::io::stderr().is_terminal()
    }

    fn config_options(&self) -> ConfigOptions {
        ConfigOptions {
            path: self.config.clone(),
            preset: self.preset,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in simulation scenarios
    Demo(DemoArgs),

    /// Execute a script of engine operations
    Run(RunArgs),

    /// Print the status of a freshly configured engine
    Status,

    /// Configuration management
    Config(ConfigArgs),

    /// Print version information
    Version,
}

/// Which scenarios `demo` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoTarget {
    Fork,
    Pipe,
    Combined,
    Comprehensive,
    All,
}

impl DemoTarget {
    fn scenarios(self) -> &'static [Scenario] {
        match self {
            DemoTarget::Fork => &[Scenario::Fork],
            DemoTarget::Pipe => &[Scenario::Pipe],
            DemoTarget::Combined => &[Scenario::Combined],
            DemoTarget::Comprehensive => &[Scenario::Comprehensive],
            DemoTarget::All => Scenario::ALL,
        }
    }
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Scenario to run
    #[arg(value_enum, default_value = "all")]
    scenario: DemoTarget,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script file, or `-` for stdin
    script: String,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the resolved configuration and where it came from
    Show,

    /// Validate a config file (defaults to the resolved one)
    Validate {
        /// Path to a config file
        path: Option<PathBuf>,
    },

    /// List the built-in presets
    Presets,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(
        LogConfig::level_from_flags(cli.global.verbose, cli.global.quiet),
        None,
    );
    init_logging(&log_config);

    let run_id = generate_run_id();
    let span = tracing::info_span!("forkpipe", run_id = %run_id);
    let _enter = span.enter();

    let exit_code = match &cli.command {
        Commands::Demo(args) => run_demo(&cli.global, args, &run_id),
        Commands::Run(args) => run_script(&cli.global, args, &run_id),
        Commands::Status => run_status(&cli.global),
        Commands::Config(args) => run_config(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    if exit_code.is_internal_error() {
        error!(event = event_names::RUN_FINISHED, exit_code = %exit_code, "failed");
    } else if exit_code.is_user_error() {
        warn!(event = event_names::RUN_FINISHED, exit_code = %exit_code, "rejected");
    } else {
        info!(
            event = event_names::RUN_FINISHED,
            exit_code = %exit_code,
            checks_passed = exit_code.is_success(),
            "done"
        );
    }
    exit_code.into()
}

// ============================================================================
// Helpers
// ============================================================================

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::Clean
        }
        Err(e) => {
            error!("failed to serialize output: {}", e);
            ExitCode::InternalError
        }
    }
}

/// Load the configuration or report why it could not be loaded.
fn load_or_report(global: &GlobalOpts) -> Result<LoadedConfig, ExitCode> {
    match load_config(&global.config_options()) {
        Ok(loaded) => {
            info!(
                event = event_names::CONFIG_LOADED,
                source = %loaded.source,
                path = ?loaded.path,
                "config loaded"
            );
            Ok(loaded)
        }
        Err(e) => Err(output_config_error(global, &e)),
    }
}

fn config_error_code(error: &ConfigError) -> (u32, ExitCode) {
    match error {
        ConfigError::NotFound { .. } => (60, ExitCode::ConfigError),
        ConfigError::IoError { .. } => (60, ExitCode::IoError),
        ConfigError::ParseError { .. } => (61, ExitCode::ConfigError),
        ConfigError::ValidationError(inner) => (inner.code(), ExitCode::ConfigError),
    }
}

/// Output a config error in the appropriate format.
fn output_config_error(global: &GlobalOpts, error: &ConfigError) -> ExitCode {
    error!(event = event_names::CONFIG_ERROR, error = %error, "config error");
    let (error_code, exit_code) = config_error_code(error);

    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "error": {
                    "code": error_code,
                    "message": error.to_string(),
                }
            });
            eprintln!("{}", response);
        }
        OutputFormat::Human => {
            eprintln!("Configuration error: {}", error);
            if let ConfigError::ValidationError(ValidationError::InvalidValue { field, .. }) = error
            {
                eprintln!("  Fix: correct '{}' in the config file", field);
            }
        }
    }

    exit_code
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_demo(global: &GlobalOpts, args: &DemoArgs, run_id: &str) -> ExitCode {
    let loaded = match load_or_report(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let mut engine = Engine::new(loaded.config.clone());
    let report = demo::run_scenarios(&mut engine, args.scenario.scenarios());

    let printed = match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "run_id": run_id,
            "config": ConfigSnapshot::capture(&loaded),
            "report": report,
            "final_status": engine.status(),
        })),
        OutputFormat::Human => {
            print!("{}", report);
            ExitCode::Clean
        }
    };

    if printed != ExitCode::Clean {
        printed
    } else if report.all_passed() {
        ExitCode::Clean
    } else {
        ExitCode::CheckFailed
    }
}

fn read_script_source(path: &str) -> std::io::Result<String> {
    if path == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        std::fs::read_to_string(path)
    }
}

fn output_script_error(global: &GlobalOpts, path: &str, error: &ScriptError) -> ExitCode {
    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "status": "error",
                "script": path,
                "error": {
                    "line": error.line(),
                    "message": error.to_string(),
                }
            });
            eprintln!("{}", response);
        }
        OutputFormat::Human => eprintln!("Script error in {}: {}", path, error),
    }
    ExitCode::ArgsError
}

fn run_script(global: &GlobalOpts, args: &RunArgs, run_id: &str) -> ExitCode {
    let source = match read_script_source(&args.script) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Cannot read script {}: {}", args.script, e);
            return ExitCode::IoError;
        }
    };
    let script = match Script::parse(&source) {
        Ok(script) => script,
        Err(e) => return output_script_error(global, &args.script, &e),
    };

    let loaded = match load_or_report(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let mut engine = Engine::new(loaded.config);
    let report = script.run(&mut engine);

    let printed = match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "run_id": run_id,
            "script": args.script,
            "report": report,
        })),
        OutputFormat::Human => {
            print!("{}", report);
            let use_color = global.use_color();
            for step in report.steps.iter().filter(|s| !s.passed()) {
                if let Some(err) = step.sim_error() {
                    eprintln!("line {}:", step.line);
                    eprintln!("{}", format_error_human(err, use_color));
                }
            }
            ExitCode::Clean
        }
    };

    if printed != ExitCode::Clean {
        printed
    } else if report.all_passed() {
        ExitCode::Clean
    } else {
        ExitCode::CheckFailed
    }
}

fn run_status(global: &GlobalOpts) -> ExitCode {
    let loaded = match load_or_report(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let engine = Engine::new(loaded.config);

    match global.format {
        OutputFormat::Json => print_json(&engine.status()),
        OutputFormat::Human => {
            let mut stdout = std::io::stdout().lock();
            match engine.write_status(&mut stdout) {
                Ok(()) => ExitCode::Clean,
                Err(e) => {
                    error!("failed to write status: {}", e);
                    ExitCode::IoError
                }
            }
        }
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    match &args.command {
        ConfigCommands::Show => run_config_show(global),
        ConfigCommands::Validate { path } => run_config_validate(global, path.as_ref()),
        ConfigCommands::Presets => run_config_presets(global),
    }
}

/// Display the resolved configuration (defaults if no file is found).
fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let loaded = match load_or_report(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let snapshot = ConfigSnapshot::capture(&loaded);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "snapshot": snapshot,
            "config": loaded.config,
        })),
        OutputFormat::Human => {
            let config = &loaded.config;
            println!("# forkpipe config show");
            println!();
            println!("Source: {}", loaded.source);
            match &loaded.path {
                Some(path) => {
                    println!("Path: {}", path.display());
                    println!("Hash: {}", snapshot.hash.as_deref().unwrap_or("n/a"));
                }
                None => println!("Path: (none)"),
            }
            println!("Schema version: {}", config.schema_version);
            println!();
            println!("max_processes:    {}", config.max_processes);
            println!("max_pipes:        {}", config.max_pipes);
            println!("pipe_buffer_size: {}", config.pipe_buffer_size);
            println!("max_descriptors:  {}", config.max_descriptors);
            println!("first_descriptor: {}", config.first_descriptor);
            println!("pid_max:          {}", config.pid_max);
            println!("fork_mode:        {}", config.fork_mode);
            ExitCode::Clean
        }
    }
}

/// Validate a configuration file.
fn run_config_validate(global: &GlobalOpts, path: Option<&PathBuf>) -> ExitCode {
    let options = match path {
        Some(p) => ConfigOptions {
            path: Some(p.clone()),
            preset: None,
        },
        None => global.config_options(),
    };

    match load_config(&options) {
        Ok(loaded) => {
            let location = loaded
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| loaded.source.to_string());
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "status": "valid",
                    "source": loaded.source.to_string(),
                    "path": loaded.path.as_ref().map(|p| p.display().to_string()),
                    "hash": loaded.hash,
                })),
                OutputFormat::Human => {
                    println!("Status: ✓ Valid ({})", location);
                    ExitCode::Clean
                }
            }
        }
        Err(e) => output_config_error(global, &e),
    }
}

fn run_config_presets(global: &GlobalOpts) -> ExitCode {
    let presets = list_presets();
    match global.format {
        OutputFormat::Json => print_json(&presets),
        OutputFormat::Human => {
            for preset in &presets {
                println!("{:<8} {}", preset.name.as_str(), preset.description);
            }
            ExitCode::Clean
        }
    }
}

fn print_version(global: &GlobalOpts) {
    let version = env!("CARGO_PKG_VERSION");
    match global.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "forkpipe",
                    "version": version,
                    "config_schema_version": forkpipe_config::CONFIG_SCHEMA_VERSION,
                })
            );
        }
        OutputFormat::Human => println!("forkpipe {}", version),
    }
}
