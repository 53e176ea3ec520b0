//! Debounced momentary buttons with edge-triggered dispatch.
//!
//! `Button` wraps a [`Debouncer`] with a "last serviced" flag so presses and
//! releases dispatch exactly once each. `Buttons` groups the three physical
//! buttons (UP, DOWN, PROGRAM) and applies their mutual-exclusion sampling
//! order.

use crate::debounce::Debouncer;

/// One debounced, edge-dispatched momentary button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Button {
    debounce: Debouncer,
    last: bool,
}

impl Button {
    /// A button that starts released and un-serviced.
    pub fn new() -> Self {
        Button {
            debounce: Debouncer::new_released(),
            last: false,
        }
    }

    /// Current debounced pressed state, without sampling a new level.
    pub fn is_pressed(&self) -> bool {
        self.debounce.stable()
    }

    /// Shift in a new raw GPIO sample. Buttons are wired active-low, so
    /// `level` is the literal pin reading: `true` (high, pulled up) is
    /// idle, `false` (low) is pressed.
    pub fn sample(&mut self, level: bool) -> bool {
        self.debounce.sample(level)
    }

    /// Dispatch `on_press`/`on_release` exactly on transitions of the
    /// stable flag against the last-serviced value.
    pub fn service(&mut self, mut on_press: impl FnMut(), mut on_release: impl FnMut()) {
        let pressed = self.debounce.stable();
        if pressed && !self.last {
            on_press();
        } else if !pressed && self.last {
            on_release();
        }
        self.last = pressed;
    }
}

impl Default for Button {
    fn default() -> Self {
        Self::new()
    }
}

/// The three physical buttons, sampled under a mutual-exclusion rule: UP and
/// DOWN are sampled only when the other is not currently pressed, and
/// PROGRAM is sampled only when neither UP nor DOWN is pressed. This
/// prevents accidental co-pressing and eliminates ghost combinations in the
/// underlying wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buttons {
    pub up: Button,
    pub down: Button,
    pub program: Button,
}

impl Buttons {
    pub fn new() -> Self {
        Buttons {
            up: Button::new(),
            down: Button::new(),
            program: Button::new(),
        }
    }

    /// Run one debounce tick over the raw, active-low GPIO levels (`true`
    /// == idle/high, `false` == pressed/low) of all three buttons.
    pub fn tick(&mut self, up_level: bool, down_level: bool, program_level: bool) {
        if !self.down.is_pressed() {
            self.up.sample(up_level);
        }
        if !self.up.is_pressed() {
            self.down.sample(down_level);
        }
        if !self.up.is_pressed() && !self.down.is_pressed() {
            self.program.sample(program_level);
        }
    }
}

impl Default for Buttons {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn press(b: &mut Button) {
        for _ in 0..8 {
            b.sample(false);
        }
    }

    fn release(b: &mut Button) {
        for _ in 0..8 {
            b.sample(true);
        }
    }

    #[test]
    fn service_dispatches_on_press_and_release_only() {
        let mut b = Button::new();
        let mut presses = 0;
        let mut releases = 0;
        b.service(|| presses += 1, || releases += 1);
        assert_eq!((presses, releases), (0, 0));

        press(&mut b);
        b.service(|| presses += 1, || releases += 1);
        assert_eq!((presses, releases), (1, 0));
        // servicing again with no state change dispatches nothing further.
        b.service(|| presses += 1, || releases += 1);
        assert_eq!((presses, releases), (1, 0));

        release(&mut b);
        b.service(|| presses += 1, || releases += 1);
        assert_eq!((presses, releases), (1, 1));
    }

    #[test]
    fn up_and_down_are_mutually_exclusive() {
        let mut buttons = Buttons::new();
        // Hold UP down first (both lines pulled low: UP pressed, DOWN too).
        for _ in 0..8 {
            buttons.tick(false, false, true);
        }
        assert!(buttons.up.is_pressed());
        // DOWN never got sampled because UP was already pressed at every
        // tick, so it must still read released.
        assert!(!buttons.down.is_pressed());
    }

    #[test]
    fn program_only_sampled_when_up_and_down_released() {
        let mut buttons = Buttons::new();
        for _ in 0..8 {
            buttons.tick(false, true, false);
        }
        assert!(buttons.up.is_pressed());
        assert!(!buttons.program.is_pressed());

        for _ in 0..8 {
            buttons.tick(true, true, false);
        }
        assert!(buttons.program.is_pressed());
    }
}
