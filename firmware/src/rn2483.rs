//! Modem capability of the Microchip RN2483 LoRaWAN module.
//!
//! The module has no documented sleep request input, so the wake sequence
//! only pulses the sleep request line if the board has one, and the sleep
//! sequence relies on the power cut that follows it.
//!
//! The driver blocks on every byte it reads, so the UART is wrapped in a
//! [`DeadlineSerial`]. A silent module fails a command after the AT response
//! timeout. Liveness is only queried over UART when power and status pins do
//! not already tell that the module is down.

use heapless::String;
use log::{debug, info, warn};
use rn2xx3::{ConfirmationMode, DataRateEuCn, Driver, Freq868, JoinMode};
use stm32l0xx_hal::{pac, serial::Serial};
use streamlog_modem::{
    BatteryStats, DeadlineSerial, Duration, ModemCapability, ModemSignals, ReadTimeout,
};

use crate::lptim_clock::LptimMillis;

pub type RnSerial = DeadlineSerial<'static, Serial<pac::LPUART1>, LptimMillis>;
pub type RnDriver = Driver<Freq868, RnSerial>;

/// How often a failed ABP join is retried during setup.
const JOIN_ATTEMPTS: u8 = 3;

/// Per-byte read timeout while an uplink is sent. `mac_tx_ok` only follows
/// after both receive windows have closed.
const TRANSMIT_READ_TIMEOUT_MS: u32 = 10_000;

/// LoRaWAN ABP session.
pub struct AbpKeys {
    pub devaddr: [u8; 4],
    pub nwkskey: [u8; 16],
    pub appskey: [u8; 16],
}

pub struct Rn2483 {
    driver: RnDriver,
    read_timeout: &'static ReadTimeout,
    keys: AbpKeys,
    hweui: String<16>,
    version: String<48>,
    joined: bool,
}

impl Rn2483 {
    /// `read_timeout` must be the one `serial` was built with.
    pub fn new(serial: RnSerial, read_timeout: &'static ReadTimeout, keys: AbpKeys) -> Self {
        Self {
            driver: rn2xx3::rn2483_868(serial),
            read_timeout,
            keys,
            hweui: String::new(),
            version: String::new(),
            joined: false,
        }
    }

    /// Send one uplink on `port`, unconfirmed.
    pub fn transmit(&mut self, port: u8, data: &[u8]) -> bool {
        if !self.joined {
            return false;
        }
        let command_timeout = self.read_timeout.get();
        self.read_timeout
            .set(Duration::from_ticks(TRANSMIT_READ_TIMEOUT_MS));
        let result = self
            .driver
            .transmit_slice(ConfirmationMode::Unconfirmed, port, data);
        self.read_timeout.set(command_timeout);
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Transmit failed: {:?}", e);
                false
            }
        }
    }

    fn join(&mut self) -> bool {
        for attempt in 1..=JOIN_ATTEMPTS {
            match self.driver.join(JoinMode::Abp) {
                Ok(()) => {
                    info!("Joined via ABP");
                    return true;
                }
                Err(e) => warn!("Join attempt {} failed: {:?}", attempt, e),
            }
        }
        false
    }

    fn configure_session(&mut self) -> Result<(), rn2xx3::Error> {
        self.driver.set_dev_addr_slice(&self.keys.devaddr)?;
        self.driver
            .set_network_session_key_slice(&self.keys.nwkskey)?;
        self.driver.set_app_session_key_slice(&self.keys.appskey)?;
        self.driver.set_data_rate(DataRateEuCn::Sf8Bw125)?;
        Ok(())
    }

    fn restore_session(&mut self) -> bool {
        if let Err(e) = self.configure_session() {
            warn!("Configuring the LoRaWAN session failed: {:?}", e);
            return false;
        }
        self.joined = self.join();
        self.joined
    }

    fn remember_identity(&mut self) {
        if let Ok(hweui) = self.driver.hweui() {
            self.hweui.clear();
            // Longer answers are garbage
            self.hweui.push_str(hweui).ok();
        }
        if let Ok(version) = self.driver.version() {
            self.version.clear();
            self.version.push_str(version).ok();
        }
    }
}

impl ModemCapability for Rn2483 {
    fn name(&self) -> &str {
        "RN2483"
    }

    fn is_awake_now(&mut self, signals: &mut dyn ModemSignals) -> bool {
        if signals.is_powered() == Some(false) {
            return false;
        }
        if signals.status_active() == Some(false) {
            return false;
        }
        self.driver.version().is_ok()
    }

    fn perform_wake_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool {
        if !signals.pulse_wake() {
            debug!("No sleep request line, relying on power-up");
        }
        true
    }

    fn perform_sleep_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool {
        // The session lives in volatile module memory
        if signals.is_powered().is_some() {
            self.joined = false;
        }
        true
    }

    fn perform_extra_setup(&mut self, _signals: &mut dyn ModemSignals) -> bool {
        self.remember_identity();
        self.restore_session()
    }

    /// A session lost to a power cycle is restored on demand.
    fn is_internet_reachable(&mut self) -> bool {
        self.joined || self.restore_session()
    }

    fn poll_battery(&mut self) -> Option<BatteryStats> {
        // The module only knows its supply voltage
        let voltage_mv = self.driver.vdd().ok()?;
        Some(BatteryStats {
            state: 0,
            percent: 0,
            voltage_mv,
        })
    }

    fn serial_number(&self) -> &str {
        &self.hweui
    }

    fn firmware_version(&self) -> &str {
        &self.version
    }
}
