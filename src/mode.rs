//! Tri-state mode selector decode via pull alternation.
//!
//! The selector wires a single GPIO to one of three sources: hard-high,
//! hard-low, or floating. Floating can only be told apart from the two
//! driven rails by reading the pin under two different bias configurations
//! and comparing the two readings, so [`ModeSensor`] is a small state
//! machine parameterised on which bias is currently active, with the two
//! most recent readings as its memory. The two phases are never collapsed
//! into a single read; that would make floating indistinguishable from a
//! driven rail.

use crate::debounce::Debouncer;

/// Which internal/external bias the GPIO is currently configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Internal pull-up enabled, external pull-down disabled.
    PullUp,
    /// Internal pull-up disabled, external pull-down enabled.
    PullDown,
}

/// Decoded mode selector position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Program,
    Run,
    Manual,
}

/// Reseed value used between bias phases: ambiguous (neither `0x00` nor
/// `0xFF`), so the next decode only commits once a full run of 8 fresh
/// samples under the new bias has actually settled.
const AMBIGUOUS_SEED: u8 = 0b0000_1000;

/// Tri-state mode selector decoder.
pub struct ModeSensor {
    debounce: Debouncer,
    bias: Bias,
    /// Last settled reading under `Bias::PullUp`, as `debounce.stable()`
    /// reports it: `Some(true)` means the pin read *low*.
    on_pull_up: Option<bool>,
    /// Last settled reading under `Bias::PullDown`, same convention.
    on_pull_down: Option<bool>,
    mode: Option<Mode>,
}

impl ModeSensor {
    /// A sensor that starts biased to internal pull-up, with no mode
    /// decoded yet and both recorded readings unset.
    pub fn new() -> Self {
        ModeSensor {
            debounce: Debouncer::new_released(),
            bias: Bias::PullUp,
            on_pull_up: None,
            on_pull_down: None,
            mode: None,
        }
    }

    /// The bias the caller must currently be driving the GPIO with.
    pub fn bias(&self) -> Bias {
        self.bias
    }

    /// The most recently decoded mode, if any reading has completed a full
    /// pull-up/pull-down cycle yet.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Tick-ISR half: shift in one raw sample of the selector pin, read
    /// under [`Self::bias`]. Does not decode; call [`Self::service`] from
    /// the foreground to do that.
    pub fn sample(&mut self, raw_level: bool) {
        self.debounce.sample(raw_level);
    }

    /// Foreground half: if the debouncer has settled since the last call,
    /// record the reading, flip bias, reseed to an ambiguous value, and
    /// decode.
    ///
    /// Returns `Some(mode)` exactly when this completes a decode that
    /// differs from the previously-decoded mode, `None` otherwise,
    /// including when the decode reconfirms the mode that was already
    /// active. Safe to call at any cadence relative to [`Self::sample`]:
    /// once the register reaches a terminal value it stays there (and keeps
    /// re-asserting `just_settled`) until this call reseeds it, so no
    /// settled reading is ever missed.
    pub fn service(&mut self) -> Option<Mode> {
        if !self.debounce.just_settled() {
            return None;
        }
        let reading = self.debounce.stable();
        match self.bias {
            Bias::PullUp => self.on_pull_up = Some(reading),
            Bias::PullDown => self.on_pull_down = Some(reading),
        }
        self.debounce.reseed(AMBIGUOUS_SEED);
        self.bias = match self.bias {
            Bias::PullUp => Bias::PullDown,
            Bias::PullDown => Bias::PullUp,
        };

        // `Debouncer::stable()` reports "the line read low", not "read
        // high", so floating (high under pull-up, low under pull-down)
        // decodes as (is_low_on_pull_up=false, is_low_on_pull_down=true).
        let decoded = match (self.on_pull_up, self.on_pull_down) {
            (Some(false), Some(true)) => Some(Mode::Run),
            (Some(true), Some(true)) => Some(Mode::Program),
            (Some(false), Some(false)) => Some(Mode::Manual),
            _ => None,
        };
        match decoded {
            Some(new_mode) if self.mode != Some(new_mode) => {
                self.mode = Some(new_mode);
                Some(new_mode)
            }
            _ => None,
        }
    }

    /// Convenience: sample then immediately service. Equivalent to driving
    /// the ISR and foreground halves back-to-back every cycle, which is
    /// all a test (or a very simple caller) generally needs.
    pub fn tick(&mut self, raw_level: bool) -> Option<Mode> {
        self.sample(raw_level);
        self.service()
    }
}

impl Default for ModeSensor {
    fn default() -> Self {
        Self::new()
    }
}
