//! Cayenne LPP uplink payload.
//!
//! Every value is sent as a frame of channel number, LPP data type and the
//! big-endian value. The channel tells the network decoder what was measured:
//!
//! Channel | Value                 | LPP type           | Resolution
//! --------|-----------------------|--------------------|-----------
//!  1      | Measurement timestamp | Time (133)         | 1 s (Unix)
//!  2      | Modem RSSI            | Analog input (2)   | 0.01 dBm
//!  3      | Equipment temperature | Temperature (103)  | 0.1 °C
//!  4      | Relative humidity     | Humidity (104)     | 0.5 %
//!  11     | Battery voltage       | Voltage (116)      | 0.01 V
//!  12     | Battery charge        | Percentage (120)   | 1 %
//!
//! The timestamp always comes first, so that a record sent late can still
//! be placed correctly.

use core::fmt;

pub mod channel {
    pub const TIMESTAMP: u8 = 1;
    pub const MODEM_RSSI: u8 = 2;
    pub const TEMPERATURE: u8 = 3;
    pub const HUMIDITY: u8 = 4;
    pub const BATTERY_VOLTAGE: u8 = 11;
    pub const BATTERY_PERCENT: u8 = 12;
}

/// Size of a record with all values present.
pub const MAX_RECORD_LEN: usize = 24;

/// The LPP data types used by the logger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LppType {
    AnalogInput = 2,
    Temperature = 103,
    Humidity = 104,
    Voltage = 116,
    Percentage = 120,
    Time = 133,
}

impl LppType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            2 => Self::AnalogInput,
            103 => Self::Temperature,
            104 => Self::Humidity,
            116 => Self::Voltage,
            120 => Self::Percentage,
            133 => Self::Time,
            _ => return None,
        })
    }

    /// Size of the value in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Humidity | Self::Percentage => 1,
            Self::AnalogInput | Self::Temperature | Self::Voltage => 2,
            Self::Time => 4,
        }
    }
}

/// A decoded frame value, in LPP units.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LppValue {
    /// Hundredths
    AnalogInput(i16),
    /// Tenths of a degree Celsius
    Temperature(i16),
    /// Half percent
    Humidity(u8),
    /// Hundredths of a volt
    Voltage(u16),
    Percentage(u8),
    /// Seconds since the Unix epoch
    Time(u32),
}

impl LppValue {
    pub fn lpp_type(&self) -> LppType {
        match self {
            Self::AnalogInput(_) => LppType::AnalogInput,
            Self::Temperature(_) => LppType::Temperature,
            Self::Humidity(_) => LppType::Humidity,
            Self::Voltage(_) => LppType::Voltage,
            Self::Percentage(_) => LppType::Percentage,
            Self::Time(_) => LppType::Time,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        match *self {
            Self::AnalogInput(v) | Self::Temperature(v) => out.copy_from_slice(&v.to_be_bytes()),
            Self::Humidity(v) | Self::Percentage(v) => out[0] = v,
            Self::Voltage(v) => out.copy_from_slice(&v.to_be_bytes()),
            Self::Time(v) => out.copy_from_slice(&v.to_be_bytes()),
        }
    }

    fn read_from(lpp_type: LppType, data: &[u8]) -> Self {
        match lpp_type {
            LppType::AnalogInput => Self::AnalogInput(i16::from_be_bytes([data[0], data[1]])),
            LppType::Temperature => Self::Temperature(i16::from_be_bytes([data[0], data[1]])),
            LppType::Humidity => Self::Humidity(data[0]),
            LppType::Voltage => Self::Voltage(u16::from_be_bytes([data[0], data[1]])),
            LppType::Percentage => Self::Percentage(data[0]),
            LppType::Time => Self::Time(u32::from_be_bytes([data[0], data[1], data[2], data[3]])),
        }
    }
}

/// One channel/value pair of a payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub channel: u8,
    pub value: LppValue,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadError {
    /// The frame starting at `offset` is cut off.
    Truncated { offset: usize },
    /// The LPP type is not one the logger sends.
    UnknownType(u8),
    /// A known channel carries a value of the wrong type.
    WrongType { channel: u8, lpp_type: LppType },
    /// A channel the logger does not use.
    UnknownChannel(u8),
    /// There is no timestamp frame.
    MissingTimestamp,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset } => write!(f, "Truncated frame at offset {}", offset),
            Self::UnknownType(t) => write!(f, "Unknown LPP type {}", t),
            Self::WrongType { channel, lpp_type } => {
                write!(f, "Unexpected type {:?} on channel {}", lpp_type, channel)
            }
            Self::UnknownChannel(c) => write!(f, "Unknown channel {}", c),
            Self::MissingTimestamp => write!(f, "Missing timestamp"),
        }
    }
}

/// Iterator over the frames of a payload.
pub struct Frames<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Frames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, PayloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return None;
        }
        let offset = self.offset;
        if rest.len() < 2 {
            self.offset = self.data.len();
            return Some(Err(PayloadError::Truncated { offset }));
        }
        let lpp_type = match LppType::from_u8(rest[1]) {
            Some(t) => t,
            None => {
                self.offset = self.data.len();
                return Some(Err(PayloadError::UnknownType(rest[1])));
            }
        };
        let end = 2 + lpp_type.size();
        if rest.len() < end {
            self.offset = self.data.len();
            return Some(Err(PayloadError::Truncated { offset }));
        }
        self.offset += end;
        Some(Ok(Frame {
            channel: rest[0],
            value: LppValue::read_from(lpp_type, &rest[2..end]),
        }))
    }
}

/// The encoder writes frames into an output buffer.
///
/// It keeps track of the offset and returns the number of bytes written when
/// finishing.
struct Encoder<'a> {
    offset: usize,
    output: &'a mut [u8; MAX_RECORD_LEN],
}

impl<'a> Encoder<'a> {
    fn new(output: &'a mut [u8; MAX_RECORD_LEN]) -> Self {
        Self { offset: 0, output }
    }

    fn encode(&mut self, channel: u8, value: LppValue) {
        let lpp_type = value.lpp_type();
        let end = self.offset + 2 + lpp_type.size();
        self.output[self.offset] = channel;
        self.output[self.offset + 1] = lpp_type as u8;
        value.write_to(&mut self.output[self.offset + 2..end]);
        self.offset = end;
    }

    /// Finish encoding, return the number of bytes encoded.
    fn finish(self) -> usize {
        self.offset
    }
}

/// One timestamped logger record.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct LoggerRecord {
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    /// Modem signal strength in dBm
    pub modem_rssi: Option<i16>,
    /// Equipment temperature in 0.1 °C
    pub temperature: Option<i16>,
    /// Relative humidity in 0.5 %
    pub humidity: Option<u8>,
    /// Battery voltage in mV (sent with 10 mV resolution)
    pub battery_mv: Option<u16>,
    pub battery_percent: Option<u8>,
}

impl LoggerRecord {
    pub fn new(timestamp: u32) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Encode the record into the given buffer.
    ///
    /// Returns the number of bytes which should be sent.
    pub fn encode(&self, output: &mut [u8; MAX_RECORD_LEN]) -> usize {
        let mut encoder = Encoder::new(output);
        encoder.encode(channel::TIMESTAMP, LppValue::Time(self.timestamp));
        if let Some(rssi) = self.modem_rssi {
            encoder.encode(
                channel::MODEM_RSSI,
                LppValue::AnalogInput(rssi.saturating_mul(100)),
            );
        }
        if let Some(temperature) = self.temperature {
            encoder.encode(channel::TEMPERATURE, LppValue::Temperature(temperature));
        }
        if let Some(humidity) = self.humidity {
            encoder.encode(channel::HUMIDITY, LppValue::Humidity(humidity));
        }
        if let Some(mv) = self.battery_mv {
            encoder.encode(channel::BATTERY_VOLTAGE, LppValue::Voltage(mv / 10));
        }
        if let Some(percent) = self.battery_percent {
            encoder.encode(channel::BATTERY_PERCENT, LppValue::Percentage(percent));
        }
        encoder.finish()
    }

    pub fn decode(data: &[u8]) -> Result<LoggerRecord, PayloadError> {
        let mut record = LoggerRecord::default();
        let mut has_timestamp = false;
        for frame in Frames::new(data) {
            let frame = frame?;
            match (frame.channel, frame.value) {
                (channel::TIMESTAMP, LppValue::Time(t)) => {
                    record.timestamp = t;
                    has_timestamp = true;
                }
                (channel::MODEM_RSSI, LppValue::AnalogInput(v)) => {
                    record.modem_rssi = Some(v / 100)
                }
                (channel::TEMPERATURE, LppValue::Temperature(v)) => record.temperature = Some(v),
                (channel::HUMIDITY, LppValue::Humidity(v)) => record.humidity = Some(v),
                (channel::BATTERY_VOLTAGE, LppValue::Voltage(v)) => {
                    record.battery_mv = Some(v.saturating_mul(10))
                }
                (channel::BATTERY_PERCENT, LppValue::Percentage(v)) => {
                    record.battery_percent = Some(v)
                }
                (
                    known @ (channel::TIMESTAMP
                    | channel::MODEM_RSSI
                    | channel::TEMPERATURE
                    | channel::HUMIDITY
                    | channel::BATTERY_VOLTAGE
                    | channel::BATTERY_PERCENT),
                    value,
                ) => {
                    return Err(PayloadError::WrongType {
                        channel: known,
                        lpp_type: value.lpp_type(),
                    })
                }
                (other, _) => return Err(PayloadError::UnknownChannel(other)),
            }
        }
        if has_timestamp {
            Ok(record)
        } else {
            Err(PayloadError::MissingTimestamp)
        }
    }
}
