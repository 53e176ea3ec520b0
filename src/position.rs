//! The position machine: current/next position, learned thresholds, motor
//! direction eligibility, and the RUN-mode autostop / PROGRAM-mode teach-in
//! logic built on top of them.
//!
//! This module owns no GPIO state. It is driven by the supervisor once per
//! tick with already-debounced button levels and the currently decoded
//! [`Mode`], and it reports back only what the supervisor should *do*
//! (energise a relay, select a speed). The relays themselves are written
//! exclusively by the supervisor.

use crate::mode::Mode;
use crate::nvram::{Nvram, MIDDLE_OFFSET, TOP_OFFSET};
use crate::timers::OneShot;

/// Grace window, in pulse units, before the learned MIDDLE threshold at
/// which the settle timer arms while coasting with no button held.
const SETTLE_GRACE: i32 = 10;

/// One of the three taught stops, in cyclic order `Bot < Mid < Top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Position {
    Bot,
    Mid,
    Top,
}

impl Position {
    /// The next position in the cycle `Bot -> Mid -> Top -> Bot`.
    pub fn succ(self) -> Position {
        match self {
            Position::Bot => Position::Mid,
            Position::Mid => Position::Top,
            Position::Top => Position::Bot,
        }
    }
}

/// The last commanded motor direction, used to sign Hall pulses.
///
/// Never reset to `None` once a real direction has been commanded: a stray
/// pulse with no motion in progress still counts against whichever
/// direction last moved the carriage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    Up,
    Down,
}

/// Motor speed-select output: MID is approached slowly, BOT/TOP at full
/// speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Full,
    Slow,
}

/// How fast the target-position LED should blink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkRate {
    Slow,
    Fast,
}

/// The learned pulse-count boundaries of the three stops.
///
/// Invariant: `bottom <= middle <= top`, maintained by the `max` clamps
/// applied during teach-in. There is nowhere else thresholds are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub bottom: i32,
    pub middle: i32,
    pub top: i32,
}

impl Thresholds {
    /// Load the persisted MIDDLE/TOP thresholds at boot. BOTTOM is never
    /// persisted and is always `0` until the first teach-in BOT press sets
    /// it explicitly.
    ///
    /// Uninitialised NVRAM contents are used as-is with no validity check;
    /// an untaught device will misbehave.
    pub fn load(nv: &impl Nvram) -> Self {
        Thresholds {
            bottom: 0,
            middle: nv.read_u32(MIDDLE_OFFSET),
            top: nv.read_u32(TOP_OFFSET),
        }
    }

    fn for_position(&self, pos: Position) -> i32 {
        match pos {
            Position::Bot => self.bottom,
            Position::Mid => self.middle,
            Position::Top => self.top,
        }
    }
}

/// What the supervisor should assert on the motor relays and speed-select
/// output this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub up: bool,
    pub down: bool,
    pub speed: Speed,
}

impl MotorCommand {
    const OFF: MotorCommand = MotorCommand {
        up: false,
        down: false,
        speed: Speed::Full,
    };
}

/// Current/next position, thresholds, direction, latched relay state,
/// block/settle timers and blink rate. `currThreshold` is derived on demand
/// from `next` (see [`PositionMachine::curr_threshold`]) rather than stored,
/// and `blinkPhase` is owned by `led`.
pub struct PositionMachine {
    current: Position,
    next: Position,
    thresholds: Thresholds,
    clicks: i32,
    direction: Direction,
    up_relay: bool,
    down_relay: bool,
    blink_rate: BlinkRate,
    settle: OneShot,
    block: OneShot,
}

impl PositionMachine {
    /// Boot state: the carriage is assumed docked at TOP (`clicks` pinned
    /// to the learned `top` threshold), current=TOP, next=BOT.
    pub fn new(thresholds: Thresholds) -> Self {
        PositionMachine {
            current: Position::Top,
            next: Position::Bot,
            clicks: thresholds.top,
            thresholds,
            direction: Direction::None,
            up_relay: false,
            down_relay: false,
            blink_rate: BlinkRate::Slow,
            settle: OneShot::new(),
            block: OneShot::new(),
        }
    }

    pub fn current(&self) -> Position {
        self.current
    }

    pub fn next(&self) -> Position {
        self.next
    }

    pub fn clicks(&self) -> i32 {
        self.clicks
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// The threshold the carriage is currently travelling towards, i.e. the
    /// one learned for `next`.
    pub fn curr_threshold(&self) -> i32 {
        self.thresholds.for_position(self.next)
    }

    pub fn is_blocked(&self) -> bool {
        self.block.is_armed()
    }

    pub fn is_settling(&self) -> bool {
        self.settle.is_armed()
    }

    pub fn blink_rate(&self) -> BlinkRate {
        self.blink_rate
    }

    /// Motor speed for the currently targeted stop: MID is approached
    /// slowly, BOT/TOP at full speed.
    pub fn speed(&self) -> Speed {
        match self.next {
            Position::Mid => Speed::Slow,
            Position::Bot | Position::Top => Speed::Full,
        }
    }

    /// Whether an UP command is currently permitted from the current
    /// position and mode.
    pub fn can_go_up(&self, mode: Mode) -> bool {
        match mode {
            Mode::Program | Mode::Manual => true,
            Mode::Run => matches!(self.current, Position::Bot | Position::Mid),
        }
    }

    /// Whether a DOWN command is currently permitted from the current
    /// position and mode.
    pub fn can_go_down(&self, mode: Mode) -> bool {
        match mode {
            Mode::Program | Mode::Manual => true,
            Mode::Run => matches!(self.current, Position::Mid | Position::Top),
        }
    }

    /// Wire as the UP button's on-press callback. Closes the UP relay only
    /// if the press is currently eligible; the relay then stays latched
    /// shut until release or until autostop/safety opens it, regardless of
    /// how long the button stays held. Returns whether the press was
    /// eligible.
    pub fn on_up_pressed(&mut self, mode: Mode) -> bool {
        if self.can_go_up(mode) {
            self.direction = Direction::Up;
            self.blink_rate = BlinkRate::Fast;
            self.up_relay = true;
            true
        } else {
            false
        }
    }

    /// Wire as the UP button's on-release callback. Opens the UP relay
    /// unconditionally.
    pub fn on_up_released(&mut self) {
        self.blink_rate = BlinkRate::Slow;
        self.up_relay = false;
    }

    /// Wire as the DOWN button's on-press callback. See [`Self::on_up_pressed`].
    pub fn on_down_pressed(&mut self, mode: Mode) -> bool {
        if self.can_go_down(mode) {
            self.direction = Direction::Down;
            self.blink_rate = BlinkRate::Fast;
            self.down_relay = true;
            true
        } else {
            false
        }
    }

    /// Wire as the DOWN button's on-release callback.
    pub fn on_down_released(&mut self) {
        self.blink_rate = BlinkRate::Slow;
        self.down_relay = false;
    }

    /// Pulse-ISR contract: sign the Hall edge by the last commanded
    /// direction, ignoring it entirely if no direction has ever been
    /// commanded yet.
    pub fn on_pulse(&mut self) {
        match self.direction {
            Direction::Up => self.clicks += 1,
            Direction::Down => self.clicks -= 1,
            Direction::None => {}
        }
    }

    /// Advance: current <- next, next recomputed cyclically. `currThreshold`
    /// is derived, not stored, so there is nothing further to update here.
    fn advance(&mut self) {
        self.current = self.next;
        self.next = self.current.succ();
    }

    /// Whether holding DOWN right now would cross below the threshold
    /// learned for the stop just below the one currently being re-taught.
    fn is_going_below_previous_threshold(&self) -> bool {
        (self.next == Position::Mid && self.clicks <= self.thresholds.bottom)
            || (self.next == Position::Top && self.clicks <= self.thresholds.middle)
    }

    /// The main loop's per-iteration body, minus mode-sensor and
    /// PROGRAM-button servicing, which the supervisor handles separately:
    /// given the currently held UP/DOWN levels, evaluate RUN-mode autostop
    /// or PROGRAM-mode safety and return what the relays/speed-select
    /// should assert this tick.
    ///
    /// The relays themselves are edge-latched by
    /// [`Self::on_up_pressed`]/[`Self::on_down_pressed`] and cleared by
    /// release or by this method; `up_held`/`down_held` only select which
    /// branch below to evaluate; they are not used to (re)energise a relay.
    /// This is what stops a resumed UP hold from walking straight through a
    /// stop the autostop just opened: reaching the next threshold clears
    /// the relay, and nothing re-latches it until a fresh press edge.
    pub fn tick(&mut self, mode: Mode, up_held: bool, down_held: bool) -> MotorCommand {
        if self.is_blocked() {
            return MotorCommand::OFF;
        }

        match mode {
            Mode::Run => {
                if up_held {
                    self.settle.cancel();
                    if (self.next == Position::Mid && self.clicks >= self.thresholds.middle)
                        || (self.next == Position::Top && self.clicks >= self.thresholds.top)
                    {
                        self.block.arm();
                        self.blink_rate = BlinkRate::Slow;
                        self.up_relay = false;
                        self.advance();
                    }
                } else if down_held {
                    self.settle.cancel();
                    if self.next == Position::Bot && self.clicks <= self.thresholds.bottom {
                        self.block.arm();
                        self.blink_rate = BlinkRate::Slow;
                        self.down_relay = false;
                        self.advance();
                    }
                } else if self.next == Position::Mid
                    && self.clicks >= self.thresholds.middle - SETTLE_GRACE
                {
                    self.settle.arm();
                }
            }
            Mode::Program => {
                if down_held && self.is_going_below_previous_threshold() {
                    self.up_relay = false;
                    self.down_relay = false;
                }
            }
            Mode::Manual => {}
        }

        MotorCommand {
            up: self.up_relay,
            down: self.down_relay,
            speed: self.speed(),
        }
    }

    /// Settle-timer expiry: advance unconditionally. A no-op if the timer
    /// was already cancelled.
    pub fn expire_settle(&mut self) {
        if self.settle.expire() {
            self.advance();
        }
    }

    /// Block-timer expiry: just clears the latch.
    pub fn expire_block(&mut self) {
        self.block.expire();
    }

    /// Wire as the PROGRAM button's on-press callback while in PROGRAM
    /// mode. Commits one taught stop per press and persists it to `nv`.
    pub fn on_program_pressed(&mut self, nv: &mut impl Nvram) {
        self.current = self.next;
        self.next = self.current.succ();
        match self.current {
            Position::Bot => {
                self.thresholds.bottom = 0;
                self.clicks = 0;
            }
            Position::Mid => {
                self.thresholds.middle = self.clicks.max(self.thresholds.bottom);
                nv.write_u32(MIDDLE_OFFSET, self.thresholds.middle);
            }
            Position::Top => {
                self.thresholds.top = self.clicks.max(self.thresholds.middle);
                nv.write_u32(TOP_OFFSET, self.thresholds.top);
                self.block.arm();
            }
        }
    }

    /// Mode-change hook. LED state itself is derived by `led` from
    /// `current`/`next`/`mode` each tick, so there is nothing to clear here
    /// beyond the settle timer.
    pub fn enter_mode(&mut self, new_mode: Mode) {
        self.settle.cancel();
        match new_mode {
            Mode::Run => {
                self.block.cancel();
            }
            Mode::Program => {
                // Only reset the teach walker when re-entering PROGRAM with
                // TOP as the next target, allowing partial re-teaching.
                if self.next == Position::Top {
                    self.current = Position::Bot;
                    self.next = Position::Mid;
                }
            }
            Mode::Manual => {}
        }
    }
}
