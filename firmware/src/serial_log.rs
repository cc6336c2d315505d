//! `log` backend writing to the debug serial port.

use core::cell::RefCell;
use core::fmt::Write;

use cortex_m::interrupt::{self, Mutex};
use log::{LevelFilter, Log, Metadata, Record};
use stm32l0xx_hal::{pac, serial::Serial};

pub type DebugSerial = Serial<pac::USART1>;

const MAX_LEVEL: LevelFilter = if cfg!(feature = "dev") {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

struct SerialLogger {
    serial: Mutex<RefCell<Option<DebugSerial>>>,
}

static LOGGER: SerialLogger = SerialLogger {
    serial: Mutex::new(RefCell::new(None)),
};

/// Install the logger.
///
/// Must be called from `#[init]`, with interrupts disabled.
pub fn init(serial: DebugSerial) {
    interrupt::free(|cs| LOGGER.serial.borrow(cs).replace(Some(serial)));
    // Note(unsafe): Cortex-M0+ has no compare-and-swap, so the logger can only
    // be installed racily. Interrupts are disabled during init.
    if unsafe { log::set_logger_racy(&LOGGER) }.is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        interrupt::free(|cs| {
            if let Some(serial) = self.serial.borrow(cs).borrow_mut().as_mut() {
                writeln!(serial, "[{}] {}", record.level(), record.args()).ok();
            }
        });
    }

    fn flush(&self) {}
}
