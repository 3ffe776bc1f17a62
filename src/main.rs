use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tabled::{Table, Tabled};

use ecobee::config::{default_config_path, DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECS};
use ecobee::error::exit_code;
use ecobee::types::{Operation, Thermostat};
use ecobee::{ClientSettings, CredentialStore, Error, ModeCommand, Session};

#[derive(Parser)]
#[command(name = "ecobee-mode")]
#[command(about = "A CLI for switching the HVAC mode of an ecobee thermostat")]
#[command(version)]
struct Cli {
    /// Credential file (defaults to ~/.ecobee.yml)
    #[arg(long, env = "ECOBEE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Thermostat identifier (defaults to thermostat_id in the credential file)
    #[arg(long, env = "ECOBEE_THERMOSTAT", global = true)]
    thermostat: Option<String>,

    /// Base URL of the thermostat API
    #[arg(long, env = "ECOBEE_API_URL", default_value = DEFAULT_API_BASE, global = true)]
    api_url: String,

    /// Base URL of the token endpoint (defaults to the API URL)
    #[arg(long, env = "ECOBEE_AUTH_URL", global = true)]
    auth_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout: u64,

    /// Print the request that would be sent without sending it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the HVAC mode (heat, cool, off, auto, aux)
    Mode {
        /// Desired mode, case-insensitive
        mode: String,
    },
    /// Show the configured thermostat's current mode and readings
    Status,
    /// List every thermostat registered to the account
    Thermostats,
}

#[derive(Tabled)]
struct ThermostatRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Identifier")]
    identifier: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Temperature")]
    temperature: String,
    #[tabled(rename = "Humidity")]
    humidity: String,
    #[tabled(rename = "Connected")]
    connected: String,
}

impl From<&Thermostat> for ThermostatRow {
    fn from(thermostat: &Thermostat) -> Self {
        Self {
            name: thermostat.name.clone(),
            identifier: thermostat.identifier.clone(),
            mode: thermostat.hvac_mode().to_string(),
            temperature: thermostat.temperature_display(),
            humidity: thermostat.humidity_display(),
            connected: if thermostat.is_connected() { "Yes" } else { "No" }.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(exit_code::TRANSPORT_OR_OTHER);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "ecobee=debug,ecobee_mode=debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let store = CredentialStore::new(config_path);

    let settings = ClientSettings {
        auth_base: cli.auth_url.unwrap_or_else(|| cli.api_url.clone()),
        api_base: cli.api_url,
        timeout: Duration::from_secs(cli.timeout),
    };

    let (operation, mode_change) = match &cli.command {
        Commands::Mode { mode } => {
            let mode: ModeCommand = mode.parse()?;
            let thermostat_id = resolve_thermostat(cli.thermostat, &store)?;
            (
                Operation::set_mode(&thermostat_id, mode),
                Some((thermostat_id, mode)),
            )
        }
        Commands::Status => (
            Operation::read_thermostat(&resolve_thermostat(cli.thermostat, &store)?),
            None,
        ),
        Commands::Thermostats => (Operation::list_thermostats(), None),
    };

    if cli.dry_run {
        return print_dry_run(&operation, &settings.api_base);
    }

    let mut session = Session::open(&settings, store)?;

    match mode_change {
        Some((thermostat_id, mode)) => {
            let outcome = session.set_mode(&thermostat_id, mode).await?;
            debug!("Mode change accepted (token refreshed: {})", outcome.refreshed);
            println!("Thermostat {} mode set to {}.", thermostat_id, mode);
        }
        None => {
            let thermostats = session.read(&operation).await?;
            let rows: Vec<ThermostatRow> = thermostats.iter().map(ThermostatRow::from).collect();
            println!("{}", Table::new(&rows));
        }
    }

    Ok(())
}

fn resolve_thermostat(flag: Option<String>, store: &CredentialStore) -> Result<String> {
    if let Some(id) = flag.filter(|id| !id.trim().is_empty()) {
        return Ok(id);
    }

    let config = store.load_config()?;
    config.thermostat_id.ok_or_else(|| {
        Error::Usage(
            "No thermostat selected. Pass --thermostat or set thermostat_id in the credential file."
                .to_string(),
        )
        .into()
    })
}

fn print_dry_run(operation: &Operation, api_base: &str) -> Result<()> {
    let request = operation.prepare(api_base)?;
    println!("{} {}", request.method, request.url);

    if let Some(body) = &request.body {
        let value: serde_json::Value = serde_json::from_str(body)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
