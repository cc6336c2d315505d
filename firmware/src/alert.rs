//! The board's alert LEDs.
//!
//! Red flashes when a transmission cycle had to be skipped, green when the
//! backlog went out. The yellow LED is the modem LED and belongs to the modem
//! controller.

use stm32l0xx_hal::{
    gpio::{Output, Pin, PushPull},
    prelude::*,
};
use streamlog_modem::CycleOutcome;

pub struct AlertLeds {
    /// Red status LED
    led_r: Pin<Output<PushPull>>,
    /// Green status LED
    led_g: Pin<Output<PushPull>>,
}

impl AlertLeds {
    pub fn new(led_r: Pin<Output<PushPull>>, led_g: Pin<Output<PushPull>>) -> Self {
        let mut leds = Self { led_r, led_g };
        leds.disable_all();
        leds
    }

    /// Light the LED matching `outcome`. Returns whether an LED was turned
    /// on.
    pub fn show(&mut self, outcome: CycleOutcome) -> bool {
        // Setting GPIOs is infallible
        match outcome {
            CycleOutcome::Idle => false,
            CycleOutcome::Sent { .. } => {
                self.led_g.set_high().ok();
                true
            }
            skipped => {
                debug_assert!(skipped.is_skipped());
                self.led_r.set_high().ok();
                true
            }
        }
    }

    pub fn disable_all(&mut self) {
        self.led_r.set_low().ok();
        self.led_g.set_low().ok();
    }
}
