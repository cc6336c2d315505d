#![cfg_attr(not(test), no_std)]
//! # Device Configuration
//!
//! The device configuration is read from EEPROM.
//!
//! ## Memory Map
//!
//! ```text
//!             0           8          16          24          32
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0000 | Version   | Magic                             |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0004 | DevAddr                                       |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0008 |                                               |
//! 0x0808_000C | NwkSKey                                       |
//! 0x0808_0010 |                                               |
//! 0x0808_0014 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0018 |                                               |
//! 0x0808_001C | AppSKey                                       |
//! 0x0808_0020 |                                               |
//! 0x0808_0024 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0028 | WakeupInterval        | ITransmit | IDiag     |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_002C | PinPower  | PinStatus | PinReset  | PinSleepRq|
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0030 | PinLed    | Levels    | Reserved              |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0034 | ResetPulse            | WakePulse             |
//! 0x0808_0038 | WakeDelay             | StatusSettle          |
//! 0x0808_003C | Disconnect            | AtResponse            |
//!             +-----------+-----------+-----------+-----------+
//! ```
//!
//! ## Fields
//!
//! ### Header (0x0808_0000 - 0x0808_0004, 4 bytes)
//!
//! - `Version`: The constant `0x02`, can be used to change the config layout
//!   in the future (1 byte)
//! - `Magic`: The sequence `0x23 0x42 0x99` (in order to have some more
//!   checks against configuration data corruption).
//!
//! ### LoRaWAN Configuration (0x0808_0004 - 0x0808_0028, 36 bytes)
//!
//! - `DevAddr`: LoRaWAN device address (4 bytes)
//! - `NwkSKey`: LoRaWAN ABP network session key (16 bytes)
//! - `AppSKey`: LoRaWAN ABP app session key (16 bytes)
//!
//! ### Interval Configuration (0x0808_0028 - 0x0808_002C, 4 bytes)
//!
//! - `WakeupInterval`: How often (in seconds) the device should wake up to
//!   take a measurement (2 bytes, u16, LE)
//! - `ITransmit`: Every n-th measurement the backlog is transmitted (1 byte,
//!   u8)
//! - `IDiag`: Every n-th transmission the modem diagnostics are polled (1
//!   byte, u8)
//!
//! ### Modem Wiring (0x0808_002C - 0x0808_0034, 8 bytes)
//!
//! - `Pin*`: Board pin of the power, status, reset, sleep request and LED
//!   signal (1 byte each, i8). Negative if the signal is not connected.
//! - `Levels`: Active levels, a set bit means active high (1 byte)
//!   - bit 0: status
//!   - bit 1: reset
//!   - bit 2: wake
//! - Two reserved bytes, written as zero.
//!
//! ### Modem Timing (0x0808_0034 - 0x0808_0040, 12 bytes)
//!
//! Six durations in milliseconds (2 bytes each, u16, LE): reset pulse width,
//! wake pulse width, wake delay after power-on, status settle time, graceful
//! disconnect budget and AT response timeout.
//!
//! Example: With the following value at `0x0808_0028`:
//!
//! ```text
//! +-------------------------------------------+
//! | 00000384   00000000 | 00000004 | 00000006 |
//! +-------------------------------------------+
//! ```
//!
//! ...a measurement is taken every 15 minutes, the backlog is transmitted
//! every hour and the modem diagnostics are refreshed every 6 hours.

use core::fmt;

use bitfield::Bit;
use streamlog_modem::config::{
    ConfigurationError, ModemConfig, PinAssignments, PinId, PulseWidths, SignalLevels,
    TimingBudgets,
};
use streamlog_modem::Level;

pub const BASE_ADDR: usize = 0x0808_0000;
pub const CONFIG_DATA_SIZE: usize = 64;

const MAGIC: [u8; 3] = [0x23, 0x42, 0x99];

const LEVEL_BIT_STATUS: usize = 0;
const LEVEL_BIT_RESET: usize = 1;
const LEVEL_BIT_WAKE: usize = 2;

#[derive(PartialEq, Debug, Copy, Clone)]
#[repr(u8)]
pub enum ConfigVersion {
    V2 = 2,
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => write!(f, "2"),
        }
    }
}

#[derive(PartialEq, Debug, Copy, Clone)]
pub enum ConfigError {
    /// The version byte is not supported.
    UnsupportedVersion(u8),
    /// Wrong magic bytes, the configuration data might be corrupted.
    WrongMagicBytes,
    /// Less data than the layout requires.
    TooShort(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "Unsupported config format version ({})", v),
            Self::WrongMagicBytes => write!(f, "Wrong magic bytes"),
            Self::TooShort(len) => write!(
                f,
                "Config data too short ({} instead of {} bytes)",
                len, CONFIG_DATA_SIZE
            ),
        }
    }
}

/// How the modem is wired and how long it takes for things.
#[derive(PartialEq, Debug, Copy, Clone)]
pub struct ModemWiring {
    pub pin_power: PinId,
    pub pin_status: PinId,
    pub pin_reset: PinId,
    pub pin_sleep_request: PinId,
    pub pin_led: PinId,
    /// Bit set of active high signals
    pub levels: u8,
    pub reset_pulse_ms: u16,
    pub wake_pulse_ms: u16,
    pub wake_delay_ms: u16,
    pub status_settle_ms: u16,
    pub disconnect_ms: u16,
    pub at_response_ms: u16,
}

impl ModemWiring {
    fn level(&self, bit: usize) -> Level {
        Level::from(self.levels.bit(bit))
    }

    pub fn status_active(&self) -> Level {
        self.level(LEVEL_BIT_STATUS)
    }

    pub fn reset_active(&self) -> Level {
        self.level(LEVEL_BIT_RESET)
    }

    pub fn wake_active(&self) -> Level {
        self.level(LEVEL_BIT_WAKE)
    }
}

pub struct Config {
    /// Configuration format version
    pub version: ConfigVersion,
    /// LoRaWAN device address (4 bytes)
    pub devaddr: [u8; 4],
    /// LoRaWAN ABP network session key (16 bytes)
    pub nwkskey: [u8; 16],
    /// LoRaWAN ABP app session key (16 bytes)
    pub appskey: [u8; 16],
    /// How often (in seconds) the device should wake up to take a measurement
    pub wakeup_interval_seconds: u16,
    /// Every n-th measurement the backlog is transmitted
    pub nth_transmit: u8,
    /// Every n-th transmission the modem diagnostics are polled
    pub nth_diagnostics: u8,
    pub modem: ModemWiring,
}

fn read_array<const N: usize>(data: &[u8], start: usize) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&data[start..start + N]);
    array
}

fn read_u16(data: &[u8], start: usize) -> u16 {
    u16::from_le_bytes(read_array(data, start))
}

impl Config {
    /// Read current device configuration from EEPROM.
    ///
    /// Returns an error if the version field does not contain a supported
    /// value.
    ///
    /// UNSAFE: This method is unsafe because it reads raw memory. When calling
    /// this, ensure that no other part of the code can write to EEPROM at the
    /// same time. An easy way to do this, is to hold a mutable reference to
    /// the `pac::FLASH` peripheral.
    pub unsafe fn read_from_eeprom() -> Result<Self, ConfigError> {
        // Note(unsafe): Read with no side effects. See function docs for more
        // information.
        let config_data: &[u8] =
            core::slice::from_raw_parts(BASE_ADDR as *const u8, CONFIG_DATA_SIZE);
        Self::from_bytes(config_data)
    }

    /// Parse the in-memory representation.
    pub fn from_bytes(config_data: &[u8]) -> Result<Self, ConfigError> {
        if config_data.len() < CONFIG_DATA_SIZE {
            return Err(ConfigError::TooShort(config_data.len()));
        }

        // Determine version
        let version: ConfigVersion = match config_data[0] {
            2 => ConfigVersion::V2,
            other => return Err(ConfigError::UnsupportedVersion(other)),
        };

        // Validate magic bytes
        if config_data[0x01..0x04] != MAGIC {
            return Err(ConfigError::WrongMagicBytes);
        }

        let modem = ModemWiring {
            pin_power: config_data[0x2C] as i8,
            pin_status: config_data[0x2D] as i8,
            pin_reset: config_data[0x2E] as i8,
            pin_sleep_request: config_data[0x2F] as i8,
            pin_led: config_data[0x30] as i8,
            levels: config_data[0x31],
            reset_pulse_ms: read_u16(config_data, 0x34),
            wake_pulse_ms: read_u16(config_data, 0x36),
            wake_delay_ms: read_u16(config_data, 0x38),
            status_settle_ms: read_u16(config_data, 0x3A),
            disconnect_ms: read_u16(config_data, 0x3C),
            at_response_ms: read_u16(config_data, 0x3E),
        };

        Ok(Self {
            version,
            devaddr: read_array(config_data, 0x04),
            nwkskey: read_array(config_data, 0x08),
            appskey: read_array(config_data, 0x18),
            wakeup_interval_seconds: read_u16(config_data, 0x28),
            nth_transmit: config_data[0x2A],
            nth_diagnostics: config_data[0x2B],
            modem,
        })
    }

    /// Serialize the configuration into the in-memory representation.
    pub fn serialize(&self) -> [u8; CONFIG_DATA_SIZE] {
        let mut data = [0; CONFIG_DATA_SIZE];

        // Write version
        data[0] = self.version as u8;

        // Write magic bytes
        data[0x01..0x04].copy_from_slice(&MAGIC);

        // Write keys
        data[0x04..=0x07].copy_from_slice(&self.devaddr);
        data[0x08..=0x17].copy_from_slice(&self.nwkskey);
        data[0x18..=0x27].copy_from_slice(&self.appskey);

        // Write intervals
        data[0x28..=0x29].copy_from_slice(&u16::to_le_bytes(self.wakeup_interval_seconds));
        data[0x2A] = self.nth_transmit;
        data[0x2B] = self.nth_diagnostics;

        // Write modem wiring
        let modem = &self.modem;
        data[0x2C] = modem.pin_power as u8;
        data[0x2D] = modem.pin_status as u8;
        data[0x2E] = modem.pin_reset as u8;
        data[0x2F] = modem.pin_sleep_request as u8;
        data[0x30] = modem.pin_led as u8;
        data[0x31] = modem.levels;
        let timings = [
            modem.reset_pulse_ms,
            modem.wake_pulse_ms,
            modem.wake_delay_ms,
            modem.status_settle_ms,
            modem.disconnect_ms,
            modem.at_response_ms,
        ];
        for (i, ms) in timings.iter().enumerate() {
            let start = 0x34 + 2 * i;
            data[start..start + 2].copy_from_slice(&ms.to_le_bytes());
        }

        data
    }

    /// Validate the modem wiring and timing.
    pub fn modem_config(&self) -> Result<ModemConfig, ConfigurationError> {
        let modem = &self.modem;
        ModemConfig::configure(
            PinAssignments {
                power: modem.pin_power,
                status: modem.pin_status,
                reset: modem.pin_reset,
                sleep_request: modem.pin_sleep_request,
                led: modem.pin_led,
            },
            SignalLevels {
                status_active: modem.status_active(),
                reset_active: modem.reset_active(),
                wake_active: modem.wake_active(),
            },
            PulseWidths {
                reset_ms: modem.reset_pulse_ms.into(),
                wake_ms: modem.wake_pulse_ms.into(),
            },
            TimingBudgets {
                wake_delay_ms: modem.wake_delay_ms.into(),
                status_settle_ms: modem.status_settle_ms.into(),
                disconnect_ms: modem.disconnect_ms.into(),
                at_response_ms: modem.at_response_ms.into(),
            },
        )
    }

    /// Whether the `count`-th measurement (counting from 0) is followed by a
    /// transmission.
    pub fn transmits_after(&self, count: u32) -> bool {
        every_nth(count, self.nth_transmit)
    }

    /// Whether the `count`-th transmission also refreshes the diagnostics.
    pub fn polls_diagnostics_at(&self, count: u32) -> bool {
        every_nth(count, self.nth_diagnostics)
    }
}

/// Zero is treated like one.
fn every_nth(count: u32, n: u8) -> bool {
    count % u32::from(n.max(1)) == 0
}
