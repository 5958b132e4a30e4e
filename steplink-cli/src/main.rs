//! steplink CLI - Command-line tool for step/direction motion controllers.
//!
//! ## Features
//!
//! - List serial ports
//! - Probe a controller and print its capabilities
//! - Read and drive individual pins
//! - Monitor limit, sense, temperature and credit events
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use steplink::{LinkDriver, NativePort, PinMode, SerialConfig};

mod commands;
mod config;

use config::Config;

/// Baud rate used when neither the command line nor the config sets one.
const DEFAULT_BAUD: u32 = 115200;

/// steplink - Drive step/direction motion controllers over a serial link.
///
/// Environment variables:
///   STEPLINK_PORT   - Default serial port
///   STEPLINK_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "steplink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "STEPLINK_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "STEPLINK_BAUD")]
    baud: Option<u32>,

    /// Path to a config file (overrides steplink.toml lookup).
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Pin drive modes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PinModeArg {
    /// Drive low.
    Low,
    /// Drive high.
    High,
    /// Floating input.
    Input,
    /// Input with pull-up.
    Pullup,
}

impl From<PinModeArg> for PinMode {
    fn from(mode: PinModeArg) -> Self {
        match mode {
            PinModeArg::Low => Self::Low,
            PinModeArg::High => Self::High,
            PinModeArg::Input => Self::Input,
            PinModeArg::Pullup => Self::PullUp,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Handshake with the controller and print its capabilities.
    Probe {
        /// Output capabilities as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read the level of a digital pin.
    ReadPin {
        /// Pin index.
        pin: u8,

        /// Report the logical level of an active-low pin.
        #[arg(long)]
        inverted: bool,
    },

    /// Drive a digital pin or switch it to input.
    SetPin {
        /// Pin index.
        pin: u8,

        /// Requested mode.
        #[arg(value_enum)]
        mode: PinModeArg,

        /// Treat the pin as active-low.
        #[arg(long)]
        inverted: bool,
    },

    /// Push the configured machine and log controller events until Ctrl-C.
    Monitor,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "steplink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json)?,
        Commands::Probe { json } => commands::probe::cmd_probe(&cli, &config, *json)?,
        Commands::ReadPin { pin, inverted } => {
            commands::pins::cmd_read_pin(&cli, &config, *pin, *inverted)?;
        },
        Commands::SetPin {
            pin,
            mode,
            inverted,
        } => {
            commands::pins::cmd_set_pin(&cli, &config, *pin, (*mode).into(), *inverted)?;
        },
        Commands::Monitor => commands::monitor::cmd_monitor(&cli, &config)?,
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }

    Ok(())
}

/// Resolve the serial settings from CLI args, environment and config.
fn serial_config(cli: &Cli, config: &Config) -> Result<SerialConfig> {
    let Some(port) = cli
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
    else {
        bail!(
            "no serial port given; use {} or set [connection] serial",
            style("--port").cyan()
        );
    };
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    Ok(SerialConfig::new(port, baud))
}

/// Open the port and bring the link up to a negotiated state.
fn connect(cli: &Cli, config: &Config) -> Result<LinkDriver<NativePort>> {
    let serial = serial_config(cli, config)?;
    let mut link = LinkDriver::open(&serial)
        .with_context(|| format!("failed to open {}", serial.port_name))?
        .with_config(config.retry);
    link.connect()
        .with_context(|| format!("no controller answered on {}", serial.port_name))?;
    Ok(link)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_probe() {
        let cli = Cli::try_parse_from([
            "steplink",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "250000",
            "probe",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(250000));
        assert!(matches!(cli.command, Commands::Probe { json: true }));
    }

    #[test]
    fn test_cli_parse_read_pin() {
        let cli = Cli::try_parse_from(["steplink", "read-pin", "7", "--inverted"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ReadPin {
                pin: 7,
                inverted: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_set_pin() {
        let cli = Cli::try_parse_from(["steplink", "set-pin", "13", "pullup"]).unwrap();
        match cli.command {
            Commands::SetPin {
                pin,
                mode,
                inverted,
            } => {
                assert_eq!(pin, 13);
                assert_eq!(mode, PinModeArg::Pullup);
                assert!(!inverted);
                assert_eq!(PinMode::from(mode), PinMode::PullUp);
            },
            _ => panic!("expected set-pin"),
        }
    }

    #[test]
    fn test_cli_invalid_pin_mode() {
        assert!(Cli::try_parse_from(["steplink", "set-pin", "13", "sideways"]).is_err());
    }

    #[test]
    fn test_cli_pin_out_of_range() {
        assert!(Cli::try_parse_from(["steplink", "read-pin", "300"]).is_err());
    }

    #[test]
    fn test_cli_parse_monitor() {
        let cli = Cli::try_parse_from(["steplink", "monitor"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["steplink", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "steplink",
            "list-ports",
            "-p",
            "COM3",
            "-b",
            "57600",
            "-vv",
            "--quiet",
            "--config",
            "/tmp/steplink.toml",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, Some(57600));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert_eq!(
            cli.config_path.as_deref(),
            Some(std::path::Path::new("/tmp/steplink.toml"))
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["steplink"]).is_err());
    }

    #[test]
    fn test_serial_config_priority() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB0".to_string());
        config.connection.baud = Some(250000);

        let cli = Cli {
            port: None,
            baud: None,
            config_path: None,
            verbose: 0,
            quiet: false,
            command: Commands::Probe { json: false },
        };
        let serial = serial_config(&cli, &config).unwrap();
        assert_eq!(serial.port_name, "/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, 250000);

        let cli = Cli::try_parse_from(["steplink", "-p", "COM4", "-b", "9600", "probe"]).unwrap();
        let serial = serial_config(&cli, &config).unwrap();
        assert_eq!(serial.port_name, "COM4");
        assert_eq!(serial.baud_rate, 9600);
    }

    #[test]
    fn test_serial_config_requires_port() {
        let cli = Cli {
            port: None,
            baud: None,
            config_path: None,
            verbose: 0,
            quiet: false,
            command: Commands::Monitor,
        };
        let mut config = Config::default();
        assert!(serial_config(&cli, &config).is_err());

        config.connection.serial = Some("/dev/ttyACM1".to_string());
        let serial = serial_config(&cli, &config).unwrap();
        assert_eq!(serial.baud_rate, DEFAULT_BAUD);
    }
}
