#![no_main]
#![no_std]
#![cfg(target_arch = "arm")]

// Third party
use panic_persist as _;

// Modules
mod alert;
mod lptim_clock;
mod rn2483;
mod rtc;
mod serial_log;
mod supply_monitor;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Records kept while the network is unreachable
const BACKLOG_LEN: usize = 32;

/// LoRaWAN port for logger records
const RECORD_PORT: u8 = 1;

/// Per-byte read timeout of the modem UART, set from the config in init
static MODEM_READ_TIMEOUT: streamlog_modem::ReadTimeout = streamlog_modem::ReadTimeout::new(1_000);

#[rtic::app(device = stm32l0xx_hal::pac, peripherals = true, dispatchers = [SPI1, SPI2])]
mod app {
    use fugit::ExtU32;
    use log::{debug, error, info, warn};
    use stm32l0xx_hal::{
        gpio::{Floating, Input, Output, Pin, PushPull},
        pac,
        prelude::*,
        pwr::PWR,
        rcc,
        rtc::Rtc,
        serial, time,
    };

    use streamlog_common::{LoggerRecord, MAX_RECORD_LEN};
    use streamlog_config::{self as config, Config};
    use streamlog_modem::{
        network_time, transmit_backlog, Backlog, DeadlineSerial, ModemController, ModemLines,
        PinRole, PollMask,
    };

    use crate::alert::AlertLeds;
    use crate::lptim_clock::{ExtendedLptim, LptimMillis};
    use crate::rn2483::{AbpKeys, Rn2483};
    use crate::supply_monitor::SupplyMonitor;
    use crate::{
        rtc, serial_log, BACKLOG_LEN, FIRMWARE_VERSION, MODEM_READ_TIMEOUT, RECORD_PORT,
    };

    type OutLine = Pin<Output<PushPull>>;
    type InLine = Pin<Input<Floating>>;
    type Modem = ModemController<Rn2483, LptimMillis, OutLine, InLine>;

    #[monotonic(binds = LPTIM1, default = true)]
    type Mono = ExtendedLptim<pac::LPTIM>;

    #[shared]
    struct Shared {
        modem: Modem,
        alert: AlertLeds,
    }

    #[local]
    struct Local {
        config: Config,
        rtc: Rtc,
        supply_monitor: SupplyMonitor,
        backlog: Backlog<BACKLOG_LEN>,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        let mut dp: pac::Peripherals = ctx.device;

        // Clock configuration. Use HSI at 16 MHz.
        let mut rcc = dp.RCC.freeze(rcc::Config::hsi16());
        let pwr = PWR::new(dp.PWR, &mut rcc);

        // Get access to GPIOs
        let gpioa = dp.GPIOA.split(&mut rcc);
        let gpiob = dp.GPIOB.split(&mut rcc);

        // Initialize serial port(s)
        let debug = serial::Serial::usart1(
            dp.USART1,
            gpiob.pb6.into_floating_input(),
            gpiob.pb7.into_floating_input(),
            serial::Config {
                baudrate: time::Bps(57_600),
                wordlength: serial::WordLength::DataBits8,
                parity: serial::Parity::ParityNone,
                stopbits: serial::StopBits::STOP1,
            },
            &mut rcc,
        )
        .unwrap_or_else(|_| panic!("Could not initialize debug serial"));
        let lpuart1 = serial::Serial::lpuart1(
            dp.LPUART1,
            gpioa.pa2.into_floating_input(),
            gpioa.pa3.into_floating_input(),
            // Config: See RN2483 datasheet, table 3-1
            serial::Config {
                baudrate: time::Bps(57_600),
                wordlength: serial::WordLength::DataBits8,
                parity: serial::Parity::ParityNone,
                stopbits: serial::StopBits::STOP1,
            },
            &mut rcc,
        )
        .unwrap_or_else(|_| panic!("Could not initialize modem serial"));

        serial_log::init(debug);
        info!("Booting: Streamlog firmware={}", FIRMWARE_VERSION);

        // Check whether we just woke up after a panic
        if let Some(msg) = panic_persist::get_panic_message_utf8() {
            error!("=== FOUND PANIC ===");
            error!("{}", msg.trim_end());
            error!("==== END PANIC ====");
        }

        // Read config from EEPROM
        //
        // Note(unsafe): We need to guarantee that no part of the code can
        // write to EEPROM while it's being read. To ensure that, we hold a
        // mutable reference to the FLASH peripheral.
        let config = match unsafe {
            let _flash = &mut dp.FLASH;
            Config::read_from_eeprom()
        } {
            Ok(c) => c,
            Err(e) => panic!("Error: Could not read config from EEPROM: {}", e),
        };
        info!("Loaded config (v{}) from EEPROM", config.version);
        debug!(
            "Config at 0x{:08x}: {:02x?}",
            config::BASE_ADDR,
            &config.serialize()[..]
        );
        let modem_config = match config.modem_config() {
            Ok(c) => c,
            Err(e) => panic!("Error: Invalid modem wiring in EEPROM: {}", e),
        };

        // The RTC enables the LSE, which also drives the monotonic timer
        let mut rtc = match Rtc::new(dp.RTC, &mut rcc, &pwr, None) {
            Ok(rtc) => rtc,
            Err(_) => panic!("Could not initialize RTC"),
        };
        let mono = ExtendedLptim::init(dp.LPTIM);

        // The RN2483 offers no network time, records carry RTC time as is
        let boot_time = rtc::datetime_to_unix(rtc.now());
        if !network_time::is_epoch_sane(boot_time) {
            warn!("RTC time {} is implausible, record timestamps are off", boot_time);
        }

        // Initialize supply monitor
        let adc = dp.ADC.constrain(&mut rcc);
        let a1 = gpioa.pa1.into_analog();
        let adc_enable_pin = gpioa.pa5.into_push_pull_output().downgrade();
        let mut supply_monitor = SupplyMonitor::new(a1, adc, adc_enable_pin);
        info!("Supply: {:?} mV", supply_monitor.read_supply_mv());

        // Initialize LEDs
        let alert = AlertLeds::new(
            gpiob.pb1.into_push_pull_output().downgrade(),
            gpioa.pa7.into_push_pull_output().downgrade(),
        );

        // Each modem signal has a fixed MCU pin on this board. The config
        // tells which of them are populated.
        let pins = modem_config.pins();
        let lines = ModemLines {
            power: pins
                .is_assigned(PinRole::Power)
                .then(|| gpiob.pb3.into_push_pull_output().downgrade()),
            status: pins
                .is_assigned(PinRole::Status)
                .then(|| gpioa.pa8.into_floating_input().downgrade()),
            reset: pins
                .is_assigned(PinRole::Reset)
                .then(|| gpioa.pa4.into_push_pull_output().downgrade()),
            sleep_request: pins
                .is_assigned(PinRole::SleepRequest)
                .then(|| gpioa.pa0.into_push_pull_output().downgrade()),
            led: pins
                .is_assigned(PinRole::Led)
                .then(|| gpiob.pb0.into_push_pull_output().downgrade()),
        };

        let keys = AbpKeys {
            devaddr: config.devaddr,
            nwkskey: config.nwkskey,
            appskey: config.appskey,
        };
        MODEM_READ_TIMEOUT.set(modem_config.at_response_timeout());
        let modem_serial = DeadlineSerial::new(
            lpuart1,
            LptimMillis::new(monotonics::now),
            &MODEM_READ_TIMEOUT,
        );
        let modem = match ModemController::new(
            modem_config,
            lines,
            Rn2483::new(modem_serial, &MODEM_READ_TIMEOUT, keys),
            LptimMillis::new(monotonics::now),
        ) {
            Ok(modem) => modem,
            Err(e) => panic!("Error: Modem lines do not match config: {}", e),
        };

        // The modem needs the monotonic, which only runs after init
        if setup_modem::spawn().is_err() {
            warn!("Could not spawn modem setup");
        }

        info!("Initialization done");

        (
            Shared { modem, alert },
            Local {
                config,
                rtc,
                supply_monitor,
                backlog: Backlog::new(),
            },
            init::Monotonics(mono),
        )
    }

    /// Validate the modem once, then start measuring.
    #[task(shared = [modem])]
    fn setup_modem(mut ctx: setup_modem::Context) {
        ctx.shared.modem.lock(|modem| {
            if modem.ensure_ready() {
                info!("Modem ready: {}", modem.device_id());
            } else {
                warn!("Modem not ready, records are kept until it recovers");
            }
        });
        if measure::spawn().is_err() {
            error!("Could not start measurements");
        }
    }

    /// Queue a record and transmit the backlog every n-th time.
    #[task(
        shared = [modem, alert],
        local = [config, rtc, supply_monitor, backlog, measurements: u32 = 0, transmissions: u32 = 0]
    )]
    fn measure(mut ctx: measure::Context) {
        let config = ctx.local.config;
        let count = *ctx.local.measurements;
        *ctx.local.measurements = count.wrapping_add(1);

        let mut record = LoggerRecord::new(rtc::datetime_to_unix(ctx.local.rtc.now()));
        record.battery_mv = ctx.local.supply_monitor.read_supply_mv();

        let mut buf = [0; MAX_RECORD_LEN];
        let len = record.encode(&mut buf);
        ctx.local.backlog.push_slice(&buf[..len]);

        if config.transmits_after(count) {
            let transmission = *ctx.local.transmissions;
            *ctx.local.transmissions = transmission.wrapping_add(1);

            let mut mask = PollMask::none();
            if config.polls_diagnostics_at(transmission) {
                mask.enable(PollMask::BATTERY_VOLTAGE);
            }
            let backlog = ctx.local.backlog;
            let outcome = ctx.shared.modem.lock(|modem| {
                modem.set_polling(mask);
                transmit_backlog(modem, backlog, |rn, payload| {
                    rn.transmit(RECORD_PORT, payload)
                })
            });
            if outcome.is_skipped() {
                warn!("Transmission skipped: {:?}", outcome);
            }
            if ctx.shared.alert.lock(|alert| alert.show(outcome)) {
                alert_off::spawn_after(100.millis()).ok();
            }
        }

        let interval = u32::from(config.wakeup_interval_seconds.max(1));
        if measure::spawn_after(interval.secs()).is_err() {
            error!("Could not schedule next measurement");
        }
    }

    #[task(shared = [alert])]
    fn alert_off(mut ctx: alert_off::Context) {
        ctx.shared.alert.lock(|alert| alert.disable_all());
    }
}
