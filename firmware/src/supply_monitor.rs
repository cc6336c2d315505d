use embedded_hal::{adc::OneShot, digital::v2::OutputPin};
use stm32l0xx_hal::{
    adc::{self, Adc, Align},
    gpio::{gpioa::PA1, Analog, Output, Pin, PushPull},
};

/// ADC reference voltage in mV
const SUPPLY_MV: u64 = 3_300;
const ADC_MAX: u64 = 4_095;
/// Voltage divider resistors in 10 Ω
const R_1: u64 = 931;
const R_2: u64 = 604;

/// Manages the supply voltage monitoring circuit
pub struct SupplyMonitor {
    adc_pin: PA1<Analog>,
    adc: Adc<adc::Ready>,
    enable_pin: Pin<Output<PushPull>>,
}

impl SupplyMonitor {
    pub fn new(
        adc_pin: PA1<Analog>,
        mut adc: Adc<adc::Ready>,
        enable_pin: Pin<Output<PushPull>>,
    ) -> Self {
        adc.set_precision(adc::Precision::B_12);
        adc.set_align(Align::Right); // Use 12 least-significant bits to encode data
        adc.set_sample_time(adc::SampleTime::T_79_5);
        SupplyMonitor {
            adc_pin,
            adc,
            enable_pin,
        }
    }

    /// Read the supply voltage ADC channel.
    ///
    /// The voltage divider is only enabled during the measurement.
    pub fn read_supply_raw(&mut self) -> Option<u16> {
        // Infallible
        self.enable_pin.set_high().ok();
        let val: Option<u16> = self.adc.read(&mut self.adc_pin).ok();
        self.enable_pin.set_low().ok();
        val
    }

    /// Read the supply voltage in millivolts.
    pub fn read_supply_mv(&mut self) -> Option<u16> {
        self.read_supply_raw().map(Self::convert_input)
    }

    /// Convert the raw ADC value to the resulting supply voltage in mV
    pub fn convert_input(input: u16) -> u16 {
        (u64::from(input) * SUPPLY_MV * (R_1 + R_2) / (ADC_MAX * R_1)) as u16
    }
}
