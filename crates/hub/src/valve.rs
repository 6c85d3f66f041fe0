//! Zone valve control via GPIO. The `gpio` feature gates the real rppal
//! driver; without it, a mock implementation only tracks and logs state.
//!
//! Zones come and go at runtime, so pins are registered per zone rather than
//! all at construction.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
pub fn is_valid_gpio_pin(pin: i64) -> bool {
    (2..=27).contains(&pin)
}

// ---------------------------------------------------------------------------
// Real GPIO valve board (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct ValveBoard {
    gpio: Gpio,
    pins: HashMap<String, OutputPin>, // zone_id -> GPIO pin
    active_low: bool,                 // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl ValveBoard {
    pub fn new(active_low: bool) -> Result<Self> {
        Ok(Self {
            gpio: Gpio::new()?,
            pins: HashMap::new(),
            active_low,
        })
    }

    pub fn register(&mut self, zone_id: &str, pin_num: u8) -> Result<()> {
        let mut pin = self.gpio.get(pin_num)?.into_output();

        // Fail-safe: ensure "OFF" on registration
        if self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        self.pins.insert(zone_id.to_string(), pin);
        info!(zone = %zone_id, gpio = pin_num, "valve registered");
        Ok(())
    }

    pub fn unregister(&mut self, zone_id: &str) {
        self.set(zone_id, false);
        self.pins.remove(zone_id);
    }

    pub fn set(&mut self, zone_id: &str, on: bool) {
        if let Some(pin) = self.pins.get_mut(zone_id) {
            // active-low relay: LOW = ON, HIGH = OFF
            match (self.active_low, on) {
                (true, true) | (false, false) => pin.set_low(),
                (true, false) | (false, true) => pin.set_high(),
            }
            info!(zone = %zone_id, "valve set {}", if on { "ON" } else { "OFF" });
        } else {
            warn!(zone = %zone_id, "valve: unknown zone");
        }
    }

    pub fn all_off(&mut self) {
        let keys: Vec<String> = self.pins.keys().cloned().collect();
        for k in keys {
            self.set(&k, false);
        }
    }

    pub fn is_on(&self, zone_id: &str) -> bool {
        self.pins
            .get(zone_id)
            .map(|p| if self.active_low { p.is_set_low() } else { p.is_set_high() })
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Mock valve board (development: no hardware, logs state only)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct ValveBoard {
    zones: HashMap<String, bool>, // zone_id -> on/off state
}

#[cfg(not(feature = "gpio"))]
impl ValveBoard {
    pub fn new(_active_low: bool) -> Result<Self> {
        info!("[mock-gpio] valve board initialised (no hardware)");
        Ok(Self {
            zones: HashMap::new(),
        })
    }

    pub fn register(&mut self, zone_id: &str, pin_num: u8) -> Result<()> {
        info!(zone = %zone_id, gpio = pin_num, "[mock-gpio] registered (not wired)");
        self.zones.insert(zone_id.to_string(), false);
        Ok(())
    }

    pub fn unregister(&mut self, zone_id: &str) {
        self.zones.remove(zone_id);
    }

    pub fn set(&mut self, zone_id: &str, on: bool) {
        if let Some(state) = self.zones.get_mut(zone_id) {
            *state = on;
            info!(zone = %zone_id, "[mock-gpio] valve set {}", if on { "ON" } else { "OFF" });
        } else {
            warn!(zone = %zone_id, "[mock-gpio] unknown zone");
        }
    }

    pub fn all_off(&mut self) {
        let keys: Vec<String> = self.zones.keys().cloned().collect();
        for k in keys {
            self.set(&k, false);
        }
    }

    pub fn is_on(&self, zone_id: &str) -> bool {
        self.zones.get(zone_id).copied().unwrap_or(false)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
