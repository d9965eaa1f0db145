use crate::cli::args::{Args, Command, ConfigCommand, ConnectArgs, OutputFormat, ServeArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter, PortSummary};
use crate::core::mux::MuxServer;
use crate::domain::config::MuxConfig;
use crate::domain::error::{MuxError, MuxResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::SerialTransport;
use crate::infrastructure::tcp::{Detach, MuxClient};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::time::Duration;
use tracing::{debug, info};

/// Execute CLI command
pub async fn execute_command(args: Args) -> MuxResult<()> {
    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };

    match args.command {
        Command::Serve(serve_args) => {
            let config = load_serve_config(&config_manager, &serve_args)?;
            if !args.quiet {
                init_logging(&config.log_level, args.verbose)?;
            }
            // The event loop blocks on poll(2); keep it off the async workers.
            tokio::task::spawn_blocking(move || serve(&config))
                .await
                .map_err(|e| MuxError::Output(format!("Server task failed: {}", e)))?
        }
        Command::Connect(connect_args) => {
            let config = config_manager.load_config()?;
            if !args.quiet {
                init_logging(&config.log_level, args.verbose)?;
            }
            execute_connect(&connect_args, &config).await
        }
        Command::Ports { output } => {
            let writer = ConsoleWriter::new(output);
            let ports = serialport::available_ports()?;
            let summaries: Vec<PortSummary> = ports.iter().map(PortSummary::from).collect();
            writer.write_ports(&summaries)?;
            Ok(())
        }
        Command::Config(config_args) => execute_config_command(config_args.command, &config_manager),
    }
}

/// File configuration with command line overrides applied, validated.
pub fn load_serve_config(config_manager: &ConfigManager, args: &ServeArgs) -> MuxResult<MuxConfig> {
    let mut config = config_manager.load_config()?;
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

/// Open the serial device and run the multiplexer until interrupted or a fatal fault.
pub fn serve(config: &MuxConfig) -> MuxResult<()> {
    let serial = SerialTransport::open(&config.serial)?;
    let mut server = MuxServer::bind(config, serial)?;

    let interrupt = server.interrupt_handle();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, interrupt.clone())?;
    }

    let outcome = server.run();
    let stats = server.stats();
    info!(
        "Served {} clients, {} bytes from serial, {} bytes to serial, {} bytes dropped",
        stats.clients_accepted, stats.bytes_from_serial, stats.bytes_to_serial, stats.bytes_dropped
    );
    outcome
}

async fn execute_connect(args: &ConnectArgs, config: &MuxConfig) -> MuxResult<()> {
    let host = args.host.as_deref().unwrap_or(&config.listen.host);
    let port = args.port.unwrap_or(config.listen.port);

    let mut client = MuxClient::connect(host, port, Duration::from_secs(args.timeout)).await?;
    let outcome = client.interact().await;
    client.close().await?;

    match outcome? {
        Detach::ServerClosed => info!("Server closed the connection"),
        detach => debug!("Detached: {:?}", detach),
    }
    Ok(())
}

fn execute_config_command(command: ConfigCommand, config_manager: &ConfigManager) -> MuxResult<()> {
    match command {
        ConfigCommand::Show { output } => {
            let writer = ConsoleWriter::new(output);
            let config = config_manager.load_config()?;
            writer.write_config(&config)?;
            Ok(())
        }
        ConfigCommand::Init => {
            let writer = ConsoleWriter::new(OutputFormat::Text);
            let path = config_manager.init_config()?;
            writer.write_message(&format!("Configuration initialized at '{}'", path.display()))?;
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let writer = ConsoleWriter::new(OutputFormat::Text);
            let path = match &file {
                Some(file) => std::path::PathBuf::from(file),
                None => config_manager.config_path().to_path_buf(),
            };
            if !path.exists() {
                return Err(MuxError::config(format!(
                    "Configuration file '{}' does not exist",
                    path.display()
                )));
            }
            config_manager.load_config_from_path(&path)?;
            writer.write_message(&format!("Configuration file '{}' is valid", path.display()))?;
            Ok(())
        }
        ConfigCommand::Path => {
            let writer = ConsoleWriter::new(OutputFormat::Text);
            writer.write_message(&config_manager.config_path().display().to_string())?;
            Ok(())
        }
    }
}
