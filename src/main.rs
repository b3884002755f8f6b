//! CLI entry point for scpi-generator
//!
//! Drives a Keysight/Agilent or Rohde & Schwarz signal generator over raw
//! SCPI/TCP.
//!
//! # Usage
//!
//! ```bash
//! scpi-gen --address 192.168.1.50 identify
//! scpi-gen --address 192.168.1.50 apply --frequency-hz 9.4e9 --power-dbm -10 \
//!     --pulse-width-us 1 --pulse-period-us 100 --alc-off
//! scpi-gen --config bench.toml rf off
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scpi_generator::config::{GeneratorConfig, GeneratorOverrides, DEFAULT_CONFIG_PATH};
use scpi_generator::{logging, GeneratorSetup, SignalGenerator};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "scpi-gen")]
#[command(about = "Control SCPI signal generators over TCP", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Generator IP address (overrides configuration)
    #[arg(long, global = true)]
    address: Option<String>,

    /// Generator TCP port (overrides configuration)
    #[arg(long, global = true)]
    port: Option<u32>,

    /// Per-phase timeout in milliseconds (overrides configuration)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the identity string and resolved dialect
    Identify,

    /// Configure carrier, power and pulse modulation
    Apply(ApplyArgs),

    /// Switch RF output
    Rf {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Switch front panel display updates
    Display {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Check the error lists (static list first where supported)
    Errors,

    /// Reset the generator and clear its status
    Reset,
}

#[derive(Args)]
struct ApplyArgs {
    /// Carrier frequency in Hz
    #[arg(long, requires = "power_dbm")]
    frequency_hz: Option<f64>,

    /// Output power in dBm
    #[arg(long, requires = "frequency_hz")]
    power_dbm: Option<f64>,

    /// Pulse width in microseconds
    #[arg(long)]
    pulse_width_us: Option<f64>,

    /// Pulse repetition interval in microseconds
    #[arg(long)]
    pulse_period_us: Option<f64>,

    /// Turn automatic level control off
    #[arg(long)]
    alc_off: bool,

    /// Leave RF output off after configuring
    #[arg(long)]
    rf_off: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(name = %config.application.name, "Starting");

    let endpoint = config.generator.endpoint()?;
    let mut generator = SignalGenerator::connect(endpoint, config.generator.timeout_ms)
        .await
        .with_context(|| format!("Failed to open generator at {endpoint}"))?;

    let result = run(&cli.command, &config, &mut generator).await;
    generator.close().await;
    result
}

fn load_config(cli: &Cli) -> Result<GeneratorConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let overrides = GeneratorOverrides {
        address: cli.address.clone(),
        port: cli.port,
        timeout_ms: cli.timeout_ms,
    };

    GeneratorConfig::load_with_overrides(&path, &overrides)
        .with_context(|| format!("Loading {}", path.display()))
}

async fn run(
    command: &Commands,
    config: &GeneratorConfig,
    generator: &mut SignalGenerator,
) -> Result<()> {
    match command {
        Commands::Identify => {
            println!("{}", generator.identity());
            println!("dialect: {}", generator.dialect());
        }
        Commands::Apply(args) => {
            let setup = setup_from_args(args, config.setup.as_ref())?;
            generator.apply(&setup).await?;
            generator.check_static_errors().await?;
            generator.check_errors().await?;
        }
        Commands::Rf { state } => generator.set_rf_output(state.is_on()).await?,
        Commands::Display { state } => generator.set_display_update(state.is_on()).await?,
        Commands::Errors => {
            generator.check_static_errors().await?;
            generator.check_errors().await?;
            println!("No errors");
        }
        Commands::Reset => {
            generator.reset().await?;
            generator.clear_state().await?;
        }
    }
    Ok(())
}

fn setup_from_args(args: &ApplyArgs, configured: Option<&GeneratorSetup>) -> Result<GeneratorSetup> {
    let mut setup = match (args.frequency_hz, args.power_dbm, configured) {
        (Some(frequency_hz), Some(power_dbm), _) => GeneratorSetup {
            frequency_hz,
            power_dbm,
            pulse_width_us: None,
            pulse_period_us: None,
            alc_off: false,
            rf_on: true,
            display_off: false,
        },
        (_, _, Some(configured)) => configured.clone(),
        _ => {
            return Err(anyhow!(
                "No setup: pass --frequency-hz and --power-dbm or add a [setup] table"
            ))
        }
    };

    if args.pulse_width_us.is_some() {
        setup.pulse_width_us = args.pulse_width_us;
    }
    if args.pulse_period_us.is_some() {
        setup.pulse_period_us = args.pulse_period_us;
    }
    setup.alc_off |= args.alc_off;
    if args.rf_off {
        setup.rf_on = false;
    }
    Ok(setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("scpi-gen").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn malformed_file_is_reported_with_address_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bench.toml",
                r#"
                [generator]
                address = "10.0.0.7"
                timeout_ms = "2500"

                [setup]
                frequency_hz = 9.4e9
                power_dbm = -10.0
                "#,
            )?;

            let cli = parse(&["--config", "bench.toml", "--address", "10.0.0.9", "identify"]);
            let err = load_config(&cli).expect_err("malformed file was accepted");
            let report = format!("{err:?}");
            assert!(report.contains("bench.toml"), "{report}");
            assert!(report.contains("timeout_ms"), "{report}");
            Ok(())
        });
    }

    #[test]
    fn overrides_layer_over_file_and_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bench.toml",
                r#"
                [generator]
                address = "10.0.0.7"
                timeout_ms = 2000

                [setup]
                frequency_hz = 9.4e9
                power_dbm = -10.0
                "#,
            )?;
            jail.set_env("SCPIGEN_GENERATOR__PORT", "5026");

            let cli = parse(&[
                "--config",
                "bench.toml",
                "--address",
                "10.0.0.9",
                "--timeout-ms",
                "750",
                "errors",
            ]);
            let config = load_config(&cli).map_err(|e| format!("{e:?}"))?;
            assert_eq!(config.generator.address, "10.0.0.9");
            assert_eq!(config.generator.port, 5026);
            assert_eq!(config.generator.timeout_ms, 750);
            assert_eq!(config.setup.map(|s| s.power_dbm), Some(-10.0));
            Ok(())
        });
    }

    #[test]
    fn missing_file_needs_only_an_address() {
        Jail::expect_with(|_| {
            let cli = parse(&["--address", "192.168.1.50", "identify"]);
            let config = load_config(&cli).map_err(|e| format!("{e:?}"))?;
            assert_eq!(config.generator.address, "192.168.1.50");
            assert_eq!(config.generator.port, 5025);
            assert!(config.setup.is_none());

            let cli = parse(&["identify"]);
            assert!(load_config(&cli).is_err());
            Ok(())
        });
    }
}
