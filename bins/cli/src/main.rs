//! CLI binary entrypoint.

mod error;
mod format;

use clap::{Parser, Subcommand, ValueEnum};
use db_query_tagger_config::{DESCRIPTION, PLUGIN_NAME, SAMPLE_CONFIG};
use db_query_tagger_infra::{
    ApplyOptions, DEFAULT_BATCH_SIZE, DriverRegistry, InfraError, InstanceSummary, Observability,
    check_config, driver_feature, load_effective_config_toml, run_apply_local,
};
use db_query_tagger_ports::LogLevel;
use db_query_tagger_shared::{REDACTED, is_secret_key};
use error::{CliError, ExitCode};
use format::{OutputArgs, OutputMode};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "DBQT_";
const TRACE_FILTER_ENV: &str = "DBQT_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "dbqt",
    version,
    about = "Enrich metric tags with values looked up in a SQL database",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    output: OutputArgs,

    /// Minimum level for JSON log lines on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogLevelArg::Info)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for LogLevel {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Debug => Self::Debug,
            LogLevelArg::Info => Self::Info,
            LogLevelArg::Warn => Self::Warn,
            LogLevelArg::Error => Self::Error,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the plugin name, description, and compiled-in drivers.
    Describe,
    /// Print the annotated sample configuration.
    SampleConfig,
    /// Config-related commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Tag a JSON-lines metric stream.
    Apply {
        /// Tagger config file (TOML or JSON).
        #[arg(long)]
        config: PathBuf,
        /// JSON-lines input file (defaults to stdin).
        #[arg(long)]
        input: Option<PathBuf>,
        /// JSON-lines output file (defaults to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Metrics per batch.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Emit JSON counters and timers on stderr.
        #[arg(long)]
        telemetry: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Validate a config file and summarize its instances.
    Check {
        /// Config file path (TOML or JSON).
        #[arg(long)]
        path: PathBuf,
    },
    /// Print the effective config with secrets removed.
    Show {
        /// Config file path (TOML or JSON).
        #[arg(long)]
        path: PathBuf,
    },
}

pub(crate) struct CliOutput {
    stdout: String,
    stderr: String,
    exit_code: ExitCode,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing();
    let mode = OutputMode::from_args(&cli.output);

    match run(&cli, mode) {
        Ok(output) => match write_output(&output) {
            Ok(()) => std::process::ExitCode::from(output.exit_code.as_u8()),
            Err(error) => exit_with_error(&error),
        },
        Err(error) => exit_with_error(&error),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(TRACE_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn exit_with_error(error: &CliError) -> std::process::ExitCode {
    let _ = writeln!(io::stderr(), "error: {error}");
    std::process::ExitCode::from(error.exit_code().as_u8())
}

fn run(cli: &Cli, mode: OutputMode) -> Result<CliOutput, CliError> {
    tracing::debug!(command = ?cli.command, "dispatching");
    match &cli.command {
        Commands::Describe => describe(mode, &DriverRegistry::with_default_drivers()),
        Commands::SampleConfig => sample_config(mode),
        Commands::Config { command } => {
            let env = collect_scoped_env(ENV_PREFIX);
            match command {
                ConfigCommands::Check { path } => config_check_with_env(mode, &env, path),
                ConfigCommands::Show { path } => config_show_with_env(mode, &env, path),
            }
        },
        Commands::Apply {
            config,
            input,
            output,
            batch_size,
            telemetry,
        } => {
            let mut options = ApplyOptions::new(config);
            options.input.clone_from(input);
            options.output.clone_from(output);
            options.batch_size = *batch_size;
            options.env = collect_scoped_env(ENV_PREFIX);
            options.observability = Observability::stderr(cli.log_level.into(), *telemetry);
            Ok(apply(mode, &options))
        },
    }
}

fn describe(mode: OutputMode, drivers: &DriverRegistry) -> Result<CliOutput, CliError> {
    let enabled: Vec<&str> = drivers
        .enabled()
        .into_iter()
        .map(|database_type| database_type.as_str())
        .collect();
    let disabled: Vec<String> = db_query_tagger_domain::DatabaseType::ALL
        .into_iter()
        .filter(|database_type| !drivers.contains(*database_type))
        .map(|database_type| {
            driver_feature(database_type).map_or_else(
                || database_type.as_str().to_owned(),
                |feature| format!("{} (feature `{feature}`)", database_type.as_str()),
            )
        })
        .collect();

    let stdout = if mode.is_json() {
        let payload = serde_json::json!({
            "name": PLUGIN_NAME,
            "description": DESCRIPTION,
            "version": env!("CARGO_PKG_VERSION"),
            "drivers": enabled,
        });
        let mut output = serde_json::to_string_pretty(&payload)?;
        output.push('\n');
        output
    } else {
        let mut output = format!(
            "name: {PLUGIN_NAME}\ndescription: {DESCRIPTION}\nversion: {}\ndrivers: {}\n",
            env!("CARGO_PKG_VERSION"),
            enabled.join(", ")
        );
        if !disabled.is_empty() {
            output.push_str("not built: ");
            output.push_str(&disabled.join(", "));
            output.push('\n');
        }
        output
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}

fn sample_config(mode: OutputMode) -> Result<CliOutput, CliError> {
    let stdout = if mode.is_json() {
        let payload = serde_json::json!({
            "name": PLUGIN_NAME,
            "sampleConfig": SAMPLE_CONFIG,
        });
        let mut output = serde_json::to_string_pretty(&payload)?;
        output.push('\n');
        output
    } else {
        format!("{}\n", SAMPLE_CONFIG.trim())
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}

fn config_check_with_env(
    mode: OutputMode,
    env: &BTreeMap<String, String>,
    path: &Path,
) -> Result<CliOutput, CliError> {
    let summaries = match check_config(path, env, &DriverRegistry::with_default_drivers()) {
        Ok(summaries) => summaries,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let mut stderr = String::new();
    log_info(&mut stderr, "config check completed", mode.no_progress);
    for summary in summaries.iter().filter(|summary| !summary.driver_enabled) {
        stderr.push_str(&format!(
            "warn: instance {} uses {}, which this build cannot open\n",
            summary.index,
            summary.database_type.as_str()
        ));
    }

    let stdout = if mode.is_json() {
        let payload = serde_json::json!({
            "status": "ok",
            "configPath": path.to_string_lossy(),
            "instances": summaries,
        });
        let mut output = serde_json::to_string_pretty(&payload)?;
        output.push('\n');
        output
    } else {
        let mut output = format!(
            "status: ok\npath: {}\ninstances: {}\n",
            path.to_string_lossy(),
            summaries.len()
        );
        for summary in &summaries {
            output.push_str(&format_instance_line(summary));
        }
        output
    };

    Ok(CliOutput {
        stdout,
        stderr,
        exit_code: ExitCode::Ok,
    })
}

fn format_instance_line(summary: &InstanceSummary) -> String {
    format!(
        "  [{}] {} {} params={} results={}{}\n",
        summary.index,
        summary.database_type.as_str(),
        summary.database,
        summary.param_tags,
        summary.result_tags,
        if summary.driver_enabled {
            ""
        } else {
            " (driver not built)"
        }
    )
}

fn config_show_with_env(
    mode: OutputMode,
    env: &BTreeMap<String, String>,
    path: &Path,
) -> Result<CliOutput, CliError> {
    let toml = match load_effective_config_toml(path, env) {
        Ok(toml) => toml,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let stdout = if mode.is_json() {
        let payload = serde_json::json!({
            "status": "ok",
            "configPath": path.to_string_lossy(),
            "effectiveConfig": toml,
        });
        let mut output = serde_json::to_string_pretty(&payload)?;
        output.push('\n');
        output
    } else {
        toml
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}

fn apply(mode: OutputMode, options: &ApplyOptions) -> CliOutput {
    match run_apply_local(options) {
        Ok(summary) => {
            let mut stderr = String::new();
            log_info(
                &mut stderr,
                &format!(
                    "applied {} metrics in {} batches",
                    summary.metrics, summary.batches
                ),
                mode.no_progress,
            );
            CliOutput {
                stdout: String::new(),
                stderr,
                exit_code: ExitCode::Ok,
            }
        },
        Err(error) => format_error_output(mode, &error),
    }
}

/// Render a failed command on stderr. Stdout is left alone so `apply`
/// output stays a clean metric stream.
fn format_error_output(mode: OutputMode, error: &InfraError) -> CliOutput {
    let exit_code = ExitCode::for_error(error);
    let metadata: BTreeMap<&str, &str> = error
        .metadata
        .iter()
        .map(|(key, value)| {
            let value = if is_secret_key(key) {
                REDACTED
            } else {
                value.as_str()
            };
            (key.as_str(), value)
        })
        .collect();

    let stderr = if mode.is_json() {
        let payload = serde_json::json!({
            "status": "error",
            "error": {
                "code": error.code.to_string(),
                "kind": error.kind.to_string(),
                "message": error.message,
                "metadata": metadata,
            },
        });
        let mut output = serde_json::to_string(&payload).unwrap_or_else(|_| {
            "{\"status\":\"error\",\"error\":{\"code\":\"core:internal\",\"message\":\"internal error\"}}".to_owned()
        });
        output.push('\n');
        output
    } else {
        let mut output = format!("error: {}: {}\n", error.code, error.message);
        for (key, value) in metadata {
            output.push_str(&format!("  {key}: {value}\n"));
        }
        output
    };

    CliOutput {
        stdout: String::new(),
        stderr,
        exit_code,
    }
}

fn log_info(stderr: &mut String, message: &str, no_progress: bool) {
    if no_progress {
        return;
    }
    stderr.push_str("info: ");
    stderr.push_str(message);
    stderr.push('\n');
}

fn write_output(output: &CliOutput) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    stdout.write_all(output.stdout.as_bytes())?;
    stdout.flush()?;

    if !output.stderr.is_empty() {
        let mut stderr = io::stderr();
        stderr.write_all(output.stderr.as_bytes())?;
        stderr.flush()?;
    }

    Ok(())
}

fn collect_scoped_env(prefix: &str) -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with(prefix) && key != TRACE_FILTER_ENV)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use clap::CommandFactory;
    use db_query_tagger_config::ENV_DATABASE;
    use db_query_tagger_testkit::fixture_path;

    fn text_mode() -> OutputMode {
        OutputMode {
            format: OutputFormat::Text,
            no_progress: true,
        }
    }

    fn json_mode() -> OutputMode {
        OutputMode {
            format: OutputFormat::Json,
            no_progress: true,
        }
    }

    #[test]
    fn version_flag_is_supported() {
        let result = Cli::command().try_get_matches_from(["dbqt", "--version"]);
        let is_version = matches!(
            result,
            Err(error) if error.kind() == clap::error::ErrorKind::DisplayVersion
        );
        assert!(is_version, "expected clap to render version");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_flags_parse_with_defaults() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["dbqt", "apply", "--config", "tagger.toml"])?;
        assert_eq!(cli.log_level, LogLevelArg::Info);
        let Commands::Apply {
            config,
            input,
            batch_size,
            telemetry,
            ..
        } = cli.command
        else {
            panic!("expected apply");
        };
        assert_eq!(config, PathBuf::from("tagger.toml"));
        assert!(input.is_none());
        assert_eq!(batch_size, DEFAULT_BATCH_SIZE);
        assert!(!telemetry);
        Ok(())
    }

    #[test]
    fn describe_names_the_plugin_and_sqlite() -> Result<(), CliError> {
        let output = describe(text_mode(), &DriverRegistry::with_default_drivers())?;
        assert!(output.stdout.starts_with("name: db_query_tagger\n"));
        assert!(output.stdout.contains("sqlite3"));
        assert_eq!(output.exit_code, ExitCode::Ok);
        Ok(())
    }

    #[test]
    fn describe_lists_missing_features_for_an_empty_registry() -> Result<(), CliError> {
        let output = describe(text_mode(), &DriverRegistry::new())?;
        assert!(output.stdout.contains("db-postgres"));
        Ok(())
    }

    #[test]
    fn sample_config_is_printed_verbatim() -> Result<(), CliError> {
        let output = sample_config(text_mode())?;
        assert!(output.stdout.contains("query_params_tags"));
        Ok(())
    }

    #[test]
    fn config_check_json_lists_instances() -> Result<(), Box<dyn std::error::Error>> {
        let output = config_check_with_env(
            json_mode(),
            &BTreeMap::new(),
            &fixture_path("config/tagger.host.toml"),
        )?;
        let value: serde_json::Value = serde_json::from_str(output.stdout.trim())?;
        let instances = value
            .get("instances")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len);
        assert_eq!(instances, Some(2));
        assert!(!output.stdout.contains("hunter2"));
        Ok(())
    }

    #[test]
    fn config_show_applies_env_overrides() -> Result<(), CliError> {
        let mut env = BTreeMap::new();
        env.insert(
            ENV_DATABASE.to_owned(),
            "/srv/override/devices.db".to_owned(),
        );
        let output =
            config_show_with_env(text_mode(), &env, &fixture_path("config/tagger.flat.toml"))?;
        assert!(output.stdout.contains("/srv/override/devices.db"));
        Ok(())
    }

    #[test]
    fn invalid_config_exits_with_invalid_input() -> Result<(), CliError> {
        let output = config_check_with_env(
            text_mode(),
            &BTreeMap::new(),
            &fixture_path("config/tagger.unknown-key.toml"),
        )?;
        assert_eq!(output.exit_code, ExitCode::InvalidInput);
        assert!(output.stdout.is_empty());
        assert!(output.stderr.starts_with("error: config:"));
        Ok(())
    }

    #[test]
    fn missing_config_exits_with_io() -> Result<(), CliError> {
        let output = config_check_with_env(
            text_mode(),
            &BTreeMap::new(),
            &fixture_path("config/does-not-exist.toml"),
        )?;
        assert_eq!(output.exit_code, ExitCode::Io);
        Ok(())
    }

    #[test]
    fn log_info_respects_no_progress() {
        let mut stderr = String::new();
        log_info(&mut stderr, "message", true);
        assert!(stderr.is_empty());
    }
}
