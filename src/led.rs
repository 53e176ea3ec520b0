//! The three position LEDs and the blink-phase driver for the targeted
//! stop.
//!
//! `LedState` is the actual three-bit output; `Indicator` is the thing that
//! mutates it, both from the foreground (solid LED follows `current`) and
//! from the tick ISR (the blinking LED follows `next`, toggled at
//! `blinkRate`).

use crate::mode::Mode;
use crate::position::{BlinkRate, Position};

/// Ticks between toggles while a motion command is active.
const BLINK_FAST: u8 = 5;
/// Ticks between toggles otherwise.
const BLINK_SLOW: u8 = 10;

fn ticks_for(rate: BlinkRate) -> u8 {
    match rate {
        BlinkRate::Fast => BLINK_FAST,
        BlinkRate::Slow => BLINK_SLOW,
    }
}

/// The literal on/off state of the three position LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedState {
    pub bot: bool,
    pub mid: bool,
    pub top: bool,
}

impl LedState {
    fn get(&self, pos: Position) -> bool {
        match pos {
            Position::Bot => self.bot,
            Position::Mid => self.mid,
            Position::Top => self.top,
        }
    }

    fn set(&mut self, pos: Position, on: bool) {
        match pos {
            Position::Bot => self.bot = on,
            Position::Mid => self.mid = on,
            Position::Top => self.top = on,
        }
    }

    fn toggle(&mut self, pos: Position) {
        let on = self.get(pos);
        self.set(pos, !on);
    }
}

/// Drives `LedState` from position-machine transitions and from the
/// periodic tick ISR.
pub struct Indicator {
    leds: LedState,
    blink_phase: u8,
}

impl Indicator {
    /// Starts with all LEDs off and the blink rate slow; the boot animation
    /// in `main` drives the LEDs directly before this takes over.
    pub fn new() -> Self {
        Indicator {
            leds: LedState::default(),
            blink_phase: BLINK_SLOW,
        }
    }

    pub fn leds(&self) -> LedState {
        self.leds
    }

    /// Call whenever the position machine's `current` changes, passing the
    /// vacated position (if any, i.e. not at boot) and the new one.
    pub fn set_current(&mut self, from: Option<Position>, to: Position) {
        if let Some(from) = from {
            self.leds.set(from, false);
        }
        self.leds.set(to, true);
    }

    /// Called on every mode change before re-lighting.
    pub fn all_off(&mut self) {
        self.leds = LedState::default();
    }

    /// Fired whenever the settle timer arms: always clears the BOT LED,
    /// independent of which LED is actually current.
    pub fn on_settle_armed(&mut self) {
        self.leds.set(Position::Bot, false);
    }

    /// Tick-ISR hook: toggle the blinking `target` LED (the machine's
    /// `next`) once every `rate` ticks. Suppressed entirely while blocked or
    /// in MANUAL mode, in which case the LED simply holds whatever state it
    /// was last toggled to.
    pub fn tick(&mut self, target: Position, rate: BlinkRate, mode: Mode, blocked: bool) {
        if blocked || mode == Mode::Manual {
            return;
        }
        if self.blink_phase == 0 {
            self.leds.toggle(target);
            self.blink_phase = ticks_for(rate);
        } else {
            self.blink_phase -= 1;
        }
    }
}

impl Default for Indicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_current_moves_the_solid_led() {
        let mut ind = Indicator::new();
        ind.set_current(None, Position::Top);
        assert_eq!(ind.leds(), LedState { bot: false, mid: false, top: true });
        ind.set_current(Some(Position::Top), Position::Bot);
        assert_eq!(ind.leds(), LedState { bot: true, mid: false, top: false });
    }

    #[test]
    fn blink_toggles_target_every_rate_ticks() {
        let mut ind = Indicator::new();
        for _ in 0..BLINK_FAST {
            assert!(!ind.leds().mid);
            ind.tick(Position::Mid, BlinkRate::Fast, Mode::Run, false);
        }
        assert!(ind.leds().mid);
    }

    #[test]
    fn blink_is_suppressed_while_blocked() {
        let mut ind = Indicator::new();
        for _ in 0..20 {
            ind.tick(Position::Mid, BlinkRate::Fast, Mode::Run, true);
        }
        assert!(!ind.leds().mid);
    }

    #[test]
    fn blink_is_suppressed_in_manual_mode() {
        let mut ind = Indicator::new();
        for _ in 0..20 {
            ind.tick(Position::Mid, BlinkRate::Fast, Mode::Manual, false);
        }
        assert!(!ind.leds().mid);
    }

    #[test]
    fn settle_arming_clears_the_bot_led_regardless_of_current() {
        let mut ind = Indicator::new();
        ind.set_current(None, Position::Top);
        ind.leds.set(Position::Bot, true);
        ind.on_settle_armed();
        assert!(!ind.leds().bot);
        assert!(ind.leds().top);
    }

    #[test]
    fn all_off_clears_every_led() {
        let mut ind = Indicator::new();
        ind.set_current(None, Position::Mid);
        ind.all_off();
        assert_eq!(ind.leds(), LedState::default());
    }
}
