use crate::cli::args::OutputFormat;
use crate::domain::config::MuxConfig;
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &MuxConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::MuxError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// A serial port as reported by the operating system
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
    pub description: String,
}

impl From<&SerialPortInfo> for PortSummary {
    fn from(info: &SerialPortInfo) -> Self {
        let (kind, description) = match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let product = usb.product.clone().unwrap_or_default();
                let manufacturer = usb.manufacturer.clone().unwrap_or_default();
                let description = format!("{} {} ({:04x}:{:04x})", manufacturer, product, usb.vid, usb.pid);
                ("usb", description.trim().to_string())
            }
            SerialPortType::PciPort => ("pci", String::new()),
            SerialPortType::BluetoothPort => ("bluetooth", String::new()),
            SerialPortType::Unknown => ("unknown", String::new()),
        };

        Self {
            name: info.port_name.clone(),
            kind: kind.to_string(),
            description,
        }
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError> {
        println!("{}", render_ports(self.format, ports)?);
        Ok(())
    }

    fn write_config(&self, config: &MuxConfig) -> Result<(), OutputError> {
        println!("{}", render_config(self.format, config)?);
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }
}

fn render_ports(format: OutputFormat, ports: &[PortSummary]) -> Result<String, OutputError> {
    let rendered = match format {
        OutputFormat::Text => {
            if ports.is_empty() {
                "No serial ports found".to_string()
            } else {
                let mut lines = vec!["Available serial ports:".to_string()];
                for port in ports {
                    if port.description.is_empty() {
                        lines.push(format!("  {} ({})", port.name, port.kind));
                    } else {
                        lines.push(format!("  {} ({}): {}", port.name, port.kind, port.description));
                    }
                }
                lines.join("\n")
            }
        }
        OutputFormat::Json => serde_json::to_string_pretty(ports)?,
        OutputFormat::Table => {
            let table_data: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
            Table::new(table_data).to_string()
        }
        OutputFormat::Csv => {
            let mut lines = vec!["name,kind,description".to_string()];
            for port in ports {
                lines.push(format!("{},{},{}", port.name, port.kind, csv_field(&port.description)));
            }
            lines.join("\n")
        }
    };
    Ok(rendered)
}

fn render_config(format: OutputFormat, config: &MuxConfig) -> Result<String, OutputError> {
    let rendered = match format {
        OutputFormat::Text => toml::to_string_pretty(config)?.trim_end().to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(config)?,
        OutputFormat::Table => {
            let table_data: Vec<SettingTableRow> = settings(config)
                .into_iter()
                .map(|(setting, value)| SettingTableRow { setting, value })
                .collect();
            Table::new(table_data).to_string()
        }
        OutputFormat::Csv => {
            let mut lines = vec!["setting,value".to_string()];
            for (setting, value) in settings(config) {
                lines.push(format!("{},{}", setting, csv_field(&value)));
            }
            lines.join("\n")
        }
    };
    Ok(rendered)
}

fn settings(config: &MuxConfig) -> Vec<(String, String)> {
    vec![
        ("log_level".to_string(), config.log_level.clone()),
        ("serial.device".to_string(), config.serial.device.clone()),
        ("serial.baud_rate".to_string(), config.serial.baud_rate.to_string()),
        ("listen.host".to_string(), config.listen.host.clone()),
        ("listen.port".to_string(), config.listen.port.to_string()),
        (
            "broadcast.outbound_capacity".to_string(),
            config.broadcast.outbound_capacity.to_string(),
        ),
        ("broadcast.overflow".to_string(), config.broadcast.overflow.to_string()),
    ]
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Table row for serial ports
#[derive(Tabled)]
struct PortTableRow {
    name: String,
    kind: String,
    description: String,
}

impl From<&PortSummary> for PortTableRow {
    fn from(port: &PortSummary) -> Self {
        Self {
            name: port.name.clone(),
            kind: port.kind.clone(),
            description: port.description.clone(),
        }
    }
}

/// Table row for one configuration setting
#[derive(Tabled)]
struct SettingTableRow {
    setting: String,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ports() -> Vec<PortSummary> {
        vec![
            PortSummary {
                name: "/dev/ttyUSB0".to_string(),
                kind: "usb".to_string(),
                description: "FTDI, Inc. FT232R (0403:6001)".to_string(),
            },
            PortSummary {
                name: "/dev/ttyS0".to_string(),
                kind: "unknown".to_string(),
                description: String::new(),
            },
        ]
    }

    #[test]
    fn test_port_summary_from_info() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS1".to_string(),
            port_type: SerialPortType::PciPort,
        };
        let summary = PortSummary::from(&info);
        assert_eq!(summary.name, "/dev/ttyS1");
        assert_eq!(summary.kind, "pci");
    }

    #[test]
    fn test_render_ports_text() {
        let text = render_ports(OutputFormat::Text, &sample_ports()).unwrap();
        assert!(text.starts_with("Available serial ports:"));
        assert!(text.contains("/dev/ttyS0 (unknown)"));

        let empty = render_ports(OutputFormat::Text, &[]).unwrap();
        assert_eq!(empty, "No serial ports found");
    }

    #[test]
    fn test_render_ports_json() {
        let json = render_ports(OutputFormat::Json, &sample_ports()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["name"], "/dev/ttyUSB0");
        assert_eq!(value[1]["kind"], "unknown");
    }

    #[test]
    fn test_render_ports_csv_quotes_commas() {
        let csv = render_ports(OutputFormat::Csv, &sample_ports()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "name,kind,description");
        assert_eq!(lines[1], "/dev/ttyUSB0,usb,\"FTDI, Inc. FT232R (0403:6001)\"");
        assert_eq!(lines[2], "/dev/ttyS0,unknown,");
    }

    #[test]
    fn test_render_ports_table() {
        let table = render_ports(OutputFormat::Table, &sample_ports()).unwrap();
        assert!(table.contains("description"));
        assert!(table.contains("/dev/ttyUSB0"));
    }

    #[test]
    fn test_render_config_formats() {
        let config = MuxConfig::default();

        let text = render_config(OutputFormat::Text, &config).unwrap();
        assert!(text.contains("[serial]"));
        assert!(text.contains("overflow = \"drop-oldest\""));

        let json = render_config(OutputFormat::Json, &config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["listen"]["port"], 23200);

        let csv = render_config(OutputFormat::Csv, &config).unwrap();
        assert!(csv.contains("serial.baud_rate,9600"));
    }
}
