//! Board wiring: which pin each button, LED and encoder line sits on.
//!
//! Button identity is the key into [`ButtonMap`], the single table that
//! resolves a button to its input pin, its LED and its ready flag.
use std::fmt;
use std::sync::Arc;

use crate::error::HardwareError;
use crate::hardware::{Gpio, Pin, PinMode, Pull};
use crate::led::LedIndicator;
use crate::signal::ReadyFlag;

// Button inputs (BCM), wired to ground
pub const BUTTON_WHITE: Pin = 4;
pub const BUTTON_BLUE: Pin = 17;
pub const BUTTON_GREEN: Pin = 22;
pub const BUTTON_YELLOW: Pin = 23;
pub const BUTTON_RED: Pin = 27;

// LED outputs (BCM)
pub const LED_WHITE: Pin = 16;
pub const LED_BLUE: Pin = 25;
pub const LED_GREEN: Pin = 13;
pub const LED_YELLOW: Pin = 12;
pub const LED_RED: Pin = 24;

// Rotary encoder assembly
pub const ROTARY_PIN_A: Pin = 20; // CLK
pub const ROTARY_PIN_B: Pin = 6; // DT
pub const ROTARY_SWITCH_PIN: Pin = 5;

/// One of the five illuminated buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    White,
    Blue,
    Green,
    Yellow,
    Red,
}

impl Button {
    pub const ALL: [Button; 5] = [
        Button::White,
        Button::Blue,
        Button::Green,
        Button::Yellow,
        Button::Red,
    ];

    /// Position in [`Button::ALL`], also the index into the sound list
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn input_pin(self) -> Pin {
        match self {
            Button::White => BUTTON_WHITE,
            Button::Blue => BUTTON_BLUE,
            Button::Green => BUTTON_GREEN,
            Button::Yellow => BUTTON_YELLOW,
            Button::Red => BUTTON_RED,
        }
    }

    pub fn led_pin(self) -> Pin {
        match self {
            Button::White => LED_WHITE,
            Button::Blue => LED_BLUE,
            Button::Green => LED_GREEN,
            Button::Yellow => LED_YELLOW,
            Button::Red => LED_RED,
        }
    }

    /// Lower-case color, also the name of the button's sound directory
    pub fn color_name(self) -> &'static str {
        match self {
            Button::White => "white",
            Button::Blue => "blue",
            Button::Green => "green",
            Button::Yellow => "yellow",
            Button::Red => "red",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.color_name())
    }
}

/// Everything attached to one button
pub struct ButtonSlot {
    pub button: Button,
    pub input_pin: Pin,
    pub led: Arc<LedIndicator>,
    pub ready: ReadyFlag,
}

/// Immutable button table built once at startup
pub struct ButtonMap {
    slots: [ButtonSlot; 5],
}

impl ButtonMap {
    /// Claim button inputs (pull-up) and LED outputs, and build the table
    pub fn new(gpio: Arc<dyn Gpio>) -> Result<Self, HardwareError> {
        for button in Button::ALL {
            gpio.configure(button.input_pin(), PinMode::Input(Pull::Up))?;
            gpio.configure(button.led_pin(), PinMode::Output)?;
        }

        let slots = Button::ALL.map(|button| ButtonSlot {
            button,
            input_pin: button.input_pin(),
            led: Arc::new(LedIndicator::new(
                Arc::clone(&gpio),
                button.led_pin(),
                button.color_name(),
            )),
            ready: ReadyFlag::new_set(),
        });

        Ok(Self { slots })
    }

    pub fn slot(&self, button: Button) -> &ButtonSlot {
        &self.slots[button.index()]
    }

    pub fn led(&self, button: Button) -> &Arc<LedIndicator> {
        &self.slot(button).led
    }

    pub fn ready(&self, button: Button) -> &ReadyFlag {
        &self.slot(button).ready
    }

    pub fn iter(&self) -> impl Iterator<Item = &ButtonSlot> {
        self.slots.iter()
    }

    /// Mark every button idle again
    pub fn release_all(&self) {
        for slot in &self.slots {
            slot.ready.set();
        }
    }

    pub fn all_ready(&self) -> bool {
        self.slots.iter().all(|slot| slot.ready.is_set())
    }

    pub fn turn_off_all_leds(&self) {
        for slot in &self.slots {
            slot.led.set(false);
        }
    }
}

/// Claim the encoder lines (external pull-ups) and the push switch (internal pull-up)
pub fn configure_encoder(gpio: &dyn Gpio) -> Result<(), HardwareError> {
    gpio.configure(ROTARY_PIN_A, PinMode::Input(Pull::Off))?;
    gpio.configure(ROTARY_PIN_B, PinMode::Input(Pull::Off))?;
    gpio.configure(ROTARY_SWITCH_PIN, PinMode::Input(Pull::Up))?;
    Ok(())
}
