use crate::domain::config::{MuxConfig, OverflowPolicy};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for serial-mux
#[derive(Parser, Debug)]
#[command(
    name = "serial-mux",
    version = env!("CARGO_PKG_VERSION"),
    about = "Share one serial port between many TCP clients",
    long_about = "Bridges a serial device to a TCP listener: everything the device prints is broadcast to every connected client, and everything any client sends is written to the device."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the multiplexer
    Serve(ServeArgs),
    /// Attach this terminal to a running multiplexer
    Connect(ConnectArgs),
    /// List available serial ports
    Ports {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Configuration management commands
    Config(ConfigArgs),
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
    /// CSV output
    Csv,
}

/// Multiplexer arguments. Anything given here overrides the configuration file.
#[derive(ClapArgs, Debug, Default)]
pub struct ServeArgs {
    /// Serial device path
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum bytes queued per client
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// What to do with a client that cannot keep up
    #[arg(long, value_enum)]
    pub overflow: Option<OverflowArg>,
}

/// Terminal client arguments
#[derive(ClapArgs, Debug)]
pub struct ConnectArgs {
    /// Multiplexer host
    #[arg(long)]
    pub host: Option<String>,

    /// Multiplexer port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connection timeout in seconds
    #[arg(short, long, default_value = "5")]
    pub timeout: u64,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Write a default configuration file
    Init,
    /// Validate a configuration file
    Validate {
        /// Configuration file path
        file: Option<String>,
    },
    /// Print the configuration file path
    Path,
}

/// Overflow policy argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OverflowArg {
    DropOldest,
    Disconnect,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(overflow: OverflowArg) -> Self {
        match overflow {
            OverflowArg::DropOldest => Self::DropOldest,
            OverflowArg::Disconnect => Self::Disconnect,
        }
    }
}

impl ServeArgs {
    /// Apply command line overrides on top of `config`.
    pub fn apply_to(&self, config: &mut MuxConfig) {
        if let Some(device) = &self.device {
            config.serial.device = device.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(host) = &self.host {
            config.listen.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(capacity) = self.buffer_size {
            config.broadcast.outbound_capacity = capacity;
        }
        if let Some(overflow) = self.overflow {
            config.broadcast.overflow = overflow.into();
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides_only_given_fields() {
        let args = Args::parse_from(["serial-mux", "serve", "-d", "/dev/ttyUSB0", "-p", "4000"]);
        let Command::Serve(serve) = args.command else {
            panic!("expected serve");
        };

        let mut config = MuxConfig::default();
        serve.apply_to(&mut config);
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.listen.port, 4000);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.listen.host, "localhost");
    }

    #[test]
    fn test_overflow_flag() {
        let args = Args::parse_from(["serial-mux", "serve", "--overflow", "disconnect", "--buffer-size", "1024"]);
        let Command::Serve(serve) = args.command else {
            panic!("expected serve");
        };

        let mut config = MuxConfig::default();
        serve.apply_to(&mut config);
        assert_eq!(config.broadcast.overflow, OverflowPolicy::Disconnect);
        assert_eq!(config.broadcast.outbound_capacity, 1024);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["serial-mux", "ports", "-o", "json", "--verbose"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Ports { output: OutputFormat::Json }));
    }

    #[test]
    fn test_args_are_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
