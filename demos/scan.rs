use std::env;
use std::time::Duration;

use inquire::Select;
use leafbus::config::NetworkConfig;
use leafbus::message::Address;
use leafbus::network::Network;
use leafbus::register::{Channel, DeviceConfig};
use serialport::SerialPort;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
// Short, the transport keeps its own deadlines and polls the port.
const SERIAL_TIMEOUT_MS: u64 = 1;
const REPLY_TIMEOUT_MS: u64 = 20;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::WouldBlock => embedded_io::ErrorKind::Other,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            // A vanished USB adapter must not look like a quiet line.
            _ => embedded_io::ErrorKind::NotConnected,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

fn main() {
    env_logger::init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let config = NetworkConfig::builder()
        .with_reply_timeout(Duration::from_millis(REPLY_TIMEOUT_MS))
        .build();
    let network = Network::with_config(PortWrapper(port), config);

    println!("Scanning...");
    let found = network.scan(Address::unicast()).expect("Scan failed");
    if found.is_empty() {
        println!("No leaves answered.");
        return;
    }

    for reply in &found {
        let leaf = network.leaf(reply.source);
        println!(
            "\n{} - {:?}, protocol v{}, {:?} round trip",
            reply.source, reply.device, reply.version, reply.latency
        );
        match leaf.info() {
            Ok(info) => println!("  uid: {:016X}", info.uid),
            Err(err) => println!("  no info: {}", err),
        }
        match leaf.device_config() {
            Ok(config) => println!(
                "  free-run: {}, statistics: {}",
                config.contains(DeviceConfig::free_running()),
                config.contains(DeviceConfig::statistics())
            ),
            Err(err) => println!("  no config: {}", err),
        }
        if let Ok(errors) = leaf.device_error() {
            if !errors.is_empty() {
                println!("  errors: {:#?}", errors);
            }
        }
    }

    // Take one synchronized sample on every leaf, then collect it.
    network.sync().expect("Sync failed");
    std::thread::sleep(Duration::from_millis(10));
    for reply in &found {
        let leaf = network.leaf(reply.source);
        match leaf.process_values() {
            Ok(values) => println!("{}: {:?}", reply.source, values),
            Err(err) => println!("{}: {}", reply.source, err),
        }
        if let Ok(mean) = leaf.mean(Channel::Ch0) {
            println!("  mean pv0: {:.4}", mean);
        }
    }
}
