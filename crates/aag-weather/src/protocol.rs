//! CloudWatcher serial protocol: commands and 15-byte response blocks.
//!
//! Every response is a sequence of blocks laid out as
//!
//! ```text
//! ! c c v v v v v v v v v v v v
//! ^ ^-^ ^---------------------^
//! | code (2)   value (12, right aligned)
//! start marker
//! ```
//!
//! terminated by the handshake block `!` `0x11` followed by 12 spaces and `0`.

use crate::error::{AagError, Result};

/// Size of every block on the wire.
pub const BLOCK_LEN: usize = 15;

const CODE_LEN: usize = 2;
const START: u8 = b'!';
const XON: u8 = 0x11;

/// Block terminating every response.
pub const HANDSHAKE: [u8; BLOCK_LEN] = handshake();

const fn handshake() -> [u8; BLOCK_LEN] {
    let mut block = [b' '; BLOCK_LEN];
    block[0] = START;
    block[1] = XON;
    block[BLOCK_LEN - 1] = b'0';
    block
}

/// Commands understood by the CloudWatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `A!` internal name
    InternalName,
    /// `B!` firmware version
    FirmwareVersion,
    /// `C!` zener, LDR and rain sensor NTC ADC values
    Values,
    /// `D!` internal error counters
    InternalErrors,
    /// `E!` rain sensor frequency
    RainFrequency,
    /// `F!` relay switch status
    SwitchStatus,
    /// `K!` serial number
    SerialNumber,
    /// `Q!` rain sensor heater PWM
    PwmValue,
    /// `S!` IR sky temperature
    SkyTemperature,
    /// `T!` IR sensor temperature
    SensorTemperature,
    /// `V!` wind speed
    WindSpeed,
    /// `v!` anemometer presence
    AnemometerStatus,
    /// `h!` relative humidity
    Humidity,
    /// `p!` atmospheric pressure
    Pressure,
    /// `z!` reset RS-232 buffer pointers
    ResetBuffers,
}

impl Command {
    /// Bytes written to the serial port.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Command::InternalName => b"A!",
            Command::FirmwareVersion => b"B!",
            Command::Values => b"C!",
            Command::InternalErrors => b"D!",
            Command::RainFrequency => b"E!",
            Command::SwitchStatus => b"F!",
            Command::SerialNumber => b"K!",
            Command::PwmValue => b"Q!",
            Command::SkyTemperature => b"S!",
            Command::SensorTemperature => b"T!",
            Command::WindSpeed => b"V!",
            Command::AnemometerStatus => b"v!",
            Command::Humidity => b"h!",
            Command::Pressure => b"p!",
            Command::ResetBuffers => b"z!",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Response codes, trimmed of their padding.
pub mod codes {
    pub const INTERNAL_NAME: &str = "N";
    pub const FIRMWARE: &str = "V";
    pub const SERIAL_NUMBER: &str = "K";
    pub const ANEMOMETER: &str = "v";
    pub const SKY_TEMP: &str = "1";
    pub const SENSOR_TEMP: &str = "2";
    pub const LDR: &str = "4";
    pub const RAIN_SENSOR_TEMP: &str = "5";
    pub const ZENER: &str = "6";
    pub const LIGHT_FREQ: &str = "8";
    pub const RAIN_FREQ: &str = "R";
    pub const PWM: &str = "Q";
    pub const WIND: &str = "w";
    pub const HUMIDITY: &str = "h";
    pub const HUMIDITY_16BIT: &str = "hh";
    pub const PRESSURE: &str = "p";
    pub const SWITCH_OPEN: &str = "X";
    pub const SWITCH_CLOSED: &str = "Y";
    pub const ERRORS: [&str; 4] = ["E1", "E2", "E3", "E4"];
}

/// One decoded response block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub code: String,
    pub value: String,
}

impl Block {
    /// Parse a single 15-byte block.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != BLOCK_LEN {
            return Err(AagError::Decode(format!(
                "block must be {} bytes, got {}",
                BLOCK_LEN,
                raw.len()
            )));
        }
        if raw[0] != START {
            return Err(AagError::Decode(format!(
                "block does not start with '!': {:?}",
                String::from_utf8_lossy(raw)
            )));
        }
        let code = std::str::from_utf8(&raw[1..1 + CODE_LEN])
            .map_err(|_| AagError::Decode("non-ASCII block code".into()))?;
        let value = std::str::from_utf8(&raw[1 + CODE_LEN..])
            .map_err(|_| AagError::Decode("non-ASCII block value".into()))?;
        Ok(Self {
            code: code.trim().to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Value as an integer counter or ADC reading.
    pub fn int(&self) -> Result<i64> {
        self.value.parse::<i64>().map_err(|_| {
            AagError::Decode(format!(
                "block '{}' has non-integer value {:?}",
                self.code, self.value
            ))
        })
    }

    /// Value as a float.
    pub fn float(&self) -> Result<f64> {
        self.value.parse::<f64>().map_err(|_| {
            AagError::Decode(format!(
                "block '{}' has non-numeric value {:?}",
                self.code, self.value
            ))
        })
    }
}

/// Whether `raw` is the handshake block.
pub fn is_handshake(raw: &[u8]) -> bool {
    raw == HANDSHAKE
}

/// Encode a block the way the device sends it.
///
/// Codes longer than 2 or values longer than 12 characters are truncated.
pub fn encode_block(code: &str, value: &str) -> [u8; BLOCK_LEN] {
    let mut block = [b' '; BLOCK_LEN];
    block[0] = START;
    for (slot, byte) in block[1..1 + CODE_LEN].iter_mut().zip(code.bytes()) {
        *slot = byte;
    }
    let value = value.as_bytes();
    let value = &value[..value.len().min(BLOCK_LEN - 1 - CODE_LEN)];
    let start = BLOCK_LEN - value.len();
    block[start..].copy_from_slice(value);
    block
}

/// Split a complete response (or a concatenation of responses) into the
/// blocks of each response, dropping the handshakes.
///
/// Fails when the length is not a multiple of [`BLOCK_LEN`], when any block
/// is malformed or when the bytes do not end with a handshake.
pub fn split_responses(bytes: &[u8]) -> Result<Vec<Vec<Block>>> {
    if bytes.is_empty() {
        return Err(AagError::Decode("empty frame".into()));
    }
    if bytes.len() % BLOCK_LEN != 0 {
        return Err(AagError::Decode(format!(
            "frame length {} is not a multiple of {}",
            bytes.len(),
            BLOCK_LEN
        )));
    }

    let mut responses = Vec::new();
    let mut current = Vec::new();
    let mut terminated = false;
    for raw in bytes.chunks_exact(BLOCK_LEN) {
        if is_handshake(raw) {
            responses.push(std::mem::take(&mut current));
            terminated = true;
        } else {
            current.push(Block::parse(raw)?);
            terminated = false;
        }
    }
    if !terminated {
        return Err(AagError::Decode("frame does not end with a handshake".into()));
    }
    Ok(responses)
}
