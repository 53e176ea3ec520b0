//! Settle and block one-shot timers.
//!
//! Both are modeled as independent logical resources with `arm`/`cancel`/
//! `expire` semantics, even though the real board shares a single hardware
//! timer between them; they are mutually exclusive in practice (the block
//! timer only arms once an advance has already happened, at which point any
//! settle timer is moot).

/// A single-shot, level-triggered timer.
///
/// `armed` tracks whether the timer is currently counting down; the actual
/// countdown lives in the HAL (a hardware one-shot or a tick counter fed by
/// the long-interval ISR). `expire` is called by that ISR when the hardware
/// timer fires; it is a no-op if the timer was already cancelled in the
/// meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OneShot {
    armed: bool,
}

impl OneShot {
    /// A timer that starts disarmed.
    pub fn new() -> Self {
        OneShot { armed: false }
    }

    /// Is the timer currently counting down?
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the timer. Idempotent.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Cancel the timer before it expires, if armed.
    pub fn cancel(&mut self) {
        self.armed = false;
    }

    /// Called on hardware expiry. Returns `true` if the timer was armed
    /// (i.e. the expiry is meaningful and the caller should act on it), and
    /// clears the armed flag either way.
    pub fn expire(&mut self) -> bool {
        let was_armed = self.armed;
        self.armed = false;
        was_armed
    }
}
