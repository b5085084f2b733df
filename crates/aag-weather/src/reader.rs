//! Serial frame reader.
//!
//! Opens the CloudWatcher port, identifies the unit and runs capture cycles.
//! Any failed exchange drops the port, since unread bytes may still be in
//! flight; the next capture reopens it, which makes [`Frames`] restartable.

use std::io::{Read, Write};
use std::time::Duration;

use chrono::Utc;

use crate::config::DeviceConfig;
use crate::decode::decode_device_info;
use crate::error::{AagError, Result};
use crate::protocol::{is_handshake, Command, BLOCK_LEN};
use crate::reading::{DeviceInfo, RawFrame};

/// Longest response the unit sends is `C!` with four blocks; anything past
/// this without a handshake means the stream is out of sync.
const MAX_BLOCKS_PER_RESPONSE: usize = 8;

/// Opens a byte stream to the device.
pub trait Connector: Send {
    type Port: Read + Write + Send + 'static;

    fn open(&self) -> Result<Self::Port>;

    /// Human readable target, used in logs.
    fn describe(&self) -> String;
}

/// [`Connector`] for a real serial port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub path: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialConnector {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            path: config.port.clone(),
            baud_rate: config.baud_rate,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl Connector for SerialConnector {
    type Port = Box<dyn serialport::SerialPort>;

    fn open(&self) -> Result<Self::Port> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| AagError::Connection(format!("{}: {}", self.path, e)))?;
        Ok(port)
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

/// Which optional sensors to query in every cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    pub read_humidity: bool,
    pub read_pressure: bool,
}

impl From<&DeviceConfig> for CaptureOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            read_humidity: config.read_humidity,
            read_pressure: config.read_pressure,
        }
    }
}

/// Reads raw frames from a CloudWatcher.
pub struct FrameReader<C: Connector> {
    connector: C,
    options: CaptureOptions,
    port: Option<C::Port>,
    info: Option<DeviceInfo>,
}

impl<C: Connector> FrameReader<C> {
    pub fn new(connector: C, options: CaptureOptions) -> Self {
        Self {
            connector,
            options,
            port: None,
            info: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Identity of the unit on the current connection.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Open the port and identify the unit if not connected yet.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        if let (Some(_), Some(info)) = (&self.port, &self.info) {
            return Ok(info.clone());
        }

        log::info!("Opening CloudWatcher at {}", self.connector.describe());
        let mut port = self.connector.open()?;

        let mut ident = query(&mut port, Command::ResetBuffers)?;
        for cmd in [
            Command::InternalName,
            Command::FirmwareVersion,
            Command::SerialNumber,
            Command::AnemometerStatus,
        ] {
            ident.extend(query(&mut port, cmd)?);
        }
        let info = decode_device_info(&ident)?;
        log::info!(
            "Connected to {} (firmware {}, serial {}, anemometer: {})",
            info.name,
            info.firmware,
            info.serial_number,
            info.has_anemometer
        );

        self.port = Some(port);
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Drop the port; the next capture reopens it.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed {}", self.connector.describe());
        }
        self.info = None;
    }

    /// Commands issued in one capture cycle.
    fn cycle_commands(&self) -> Vec<Command> {
        let mut commands = vec![
            Command::SkyTemperature,
            Command::SensorTemperature,
            Command::Values,
            Command::RainFrequency,
            Command::InternalErrors,
            Command::PwmValue,
            Command::SwitchStatus,
        ];
        if self.info.as_ref().is_some_and(|i| i.has_anemometer) {
            commands.push(Command::WindSpeed);
        }
        if self.options.read_humidity {
            commands.push(Command::Humidity);
        }
        if self.options.read_pressure {
            commands.push(Command::Pressure);
        }
        commands
    }

    /// Run one capture cycle and return its raw bytes.
    pub fn capture(&mut self) -> Result<RawFrame> {
        self.connect()?;
        let commands = self.cycle_commands();

        let result = match self.port.as_mut() {
            Some(port) => capture_with(port, &commands),
            None => Err(AagError::Connection("port not open".into())),
        };

        match result {
            Ok(bytes) => Ok(RawFrame::new(bytes, Utc::now())),
            Err(e) => {
                log::warn!("Capture failed ({}), dropping connection", e);
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Lazy, infinite sequence of capture results.
    pub fn frames(&mut self) -> Frames<'_, C> {
        Frames { reader: self }
    }
}

/// Iterator returned by [`FrameReader::frames`]. Never ends; every item is
/// one capture attempt.
pub struct Frames<'a, C: Connector> {
    reader: &'a mut FrameReader<C>,
}

impl<C: Connector> Iterator for Frames<'_, C> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.reader.capture())
    }
}

fn capture_with<P: Read + Write>(port: &mut P, commands: &[Command]) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(commands.len() * BLOCK_LEN * 3);
    for cmd in commands {
        bytes.extend(query(port, *cmd)?);
    }
    Ok(bytes)
}

/// Send one command and read its blocks up to and including the handshake.
pub fn query<P: Read + Write>(port: &mut P, cmd: Command) -> Result<Vec<u8>> {
    port.write_all(cmd.as_bytes())?;
    port.flush()?;

    let mut response = Vec::with_capacity(BLOCK_LEN * 2);
    let mut block = [0u8; BLOCK_LEN];
    for _ in 0..MAX_BLOCKS_PER_RESPONSE {
        port.read_exact(&mut block).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                AagError::Timeout(format!("incomplete response to {}", cmd))
            }
            _ => AagError::from(e),
        })?;
        response.extend_from_slice(&block);
        if is_handshake(&block) {
            log::trace!("{} -> {} bytes", cmd, response.len());
            return Ok(response);
        }
    }
    Err(AagError::Decode(format!(
        "no handshake after {} blocks in response to {}",
        MAX_BLOCKS_PER_RESPONSE, cmd
    )))
}
