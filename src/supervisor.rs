//! Glue between the debounce/mode/button/position/LED modules: the
//! supervisor loop plus the three interrupt-side entry points (the
//! tick/pulse/long-timer ISRs). `main.rs` owns no logic beyond wiring real
//! GPIO/timer peripherals to the methods below; every decision lives here,
//! hardware-agnostic and host-testable.

use crate::button::Buttons;
use crate::led::{Indicator, LedState};
use crate::mode::{Mode, ModeSensor};
use crate::nvram::Nvram;
use crate::position::{MotorCommand, Position, PositionMachine, Speed, Thresholds};

/// Owns every piece of mutable state the appliance has. Generic over the
/// NVRAM backing store so host tests can use `nvram::RamNvram` while
/// `main.rs` supplies a real flash-backed implementation.
pub struct Supervisor<N> {
    mode_sensor: ModeSensor,
    buttons: Buttons,
    position: PositionMachine,
    indicator: Indicator,
    nvram: N,
}

impl<N: Nvram> Supervisor<N> {
    /// Boot: load thresholds from `nvram`, dock the carriage at TOP, and
    /// light its LED solid.
    pub fn new(nvram: N) -> Self {
        let thresholds = Thresholds::load(&nvram);
        let position = PositionMachine::new(thresholds);
        let mut indicator = Indicator::new();
        indicator.set_current(None, position.current());
        Supervisor {
            mode_sensor: ModeSensor::new(),
            buttons: Buttons::new(),
            position,
            indicator,
            nvram,
        }
    }

    pub fn leds(&self) -> LedState {
        self.indicator.leds()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode_sensor.mode()
    }

    pub fn position(&self) -> &PositionMachine {
        &self.position
    }

    /// Which bias the mode-selector pin must currently be driven with;
    /// `main.rs` reads this every tick to decide whether to flip the
    /// internal pull-up/external pull-down before the next sample.
    pub fn mode_bias(&self) -> crate::mode::Bias {
        self.mode_sensor.bias()
    }

    /// Tick ISR: debounce every input and advance the LED blink phase.
    /// Takes the raw, active-low button levels and the raw mode-selector
    /// level (under whatever bias `mode_bias()` currently reports).
    pub fn on_tick(&mut self, up: bool, down: bool, program: bool, mode_selector: bool) {
        self.buttons.tick(up, down, program);
        self.mode_sensor.sample(mode_selector);
        if let Some(mode) = self.mode_sensor.mode() {
            self.indicator.tick(
                self.position.next(),
                self.position.blink_rate(),
                mode,
                self.position.is_blocked(),
            );
        }
    }

    /// Pulse ISR: one Hall edge.
    pub fn on_pulse(&mut self) {
        self.position.on_pulse();
    }

    /// Long-timer ISR, settle half.
    pub fn on_settle_expiry(&mut self) {
        let before = self.position.current();
        self.position.expire_settle();
        let after = self.position.current();
        if before != after {
            self.indicator.set_current(Some(before), after);
        }
    }

    /// Long-timer ISR, block half.
    pub fn on_block_expiry(&mut self) {
        self.position.expire_block();
    }

    /// The foreground supervisor loop body. Returns what the motor relays
    /// and speed-select output should assert this iteration.
    pub fn service(&mut self) -> MotorCommand {
        if let Some(new_mode) = self.mode_sensor.service() {
            self.indicator.all_off();
            self.position.enter_mode(new_mode);
            if new_mode == Mode::Run {
                self.indicator.set_current(None, self.position.current());
            }
        }

        let mode = match self.mode_sensor.mode() {
            Some(mode) => mode,
            // No mode has ever been decoded yet: do nothing.
            None => return off_command(),
        };

        if mode == Mode::Program {
            let position = &mut self.position;
            let nvram = &mut self.nvram;
            let indicator = &mut self.indicator;
            self.buttons.program.service(
                || {
                    let before = position.current();
                    position.on_program_pressed(nvram);
                    let after = position.current();
                    if before != after {
                        indicator.set_current(Some(before), after);
                    }
                },
                || {},
            );
        }

        if self.position.is_blocked() {
            return MotorCommand {
                up: false,
                down: false,
                speed: self.position.speed(),
            };
        }

        let position = &mut self.position;
        self.buttons.up.service(
            || {
                position.on_up_pressed(mode);
            },
            || {
                position.on_up_released();
            },
        );
        let position = &mut self.position;
        self.buttons.down.service(
            || {
                position.on_down_pressed(mode);
            },
            || {
                position.on_down_released();
            },
        );

        let up_held = self.buttons.up.is_pressed();
        let down_held = self.buttons.down.is_pressed();

        let before = self.position.current();
        let was_settling = self.position.is_settling();
        let cmd = self.position.tick(mode, up_held, down_held);
        let after = self.position.current();
        if before != after {
            self.indicator.set_current(Some(before), after);
        }
        if !was_settling && self.position.is_settling() {
            self.indicator.on_settle_armed();
        }
        cmd
    }
}

fn off_command() -> MotorCommand {
    MotorCommand {
        up: false,
        down: false,
        speed: Speed::Full,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nvram::{RamNvram, MIDDLE_OFFSET, TOP_OFFSET};

    /// Run the mode sensor through one full pull-up/pull-down settle cycle
    /// (the sensor's own `bias()` tells us which level to feed), as a
    /// supervisor would: `on_tick` samples, `service` decodes.
    fn settle_mode(sup: &mut Supervisor<RamNvram>, high_on_pull_up: bool, high_on_pull_down: bool) {
        for _ in 0..2 {
            let starting_bias = sup.mode_bias();
            for _ in 0..16 {
                let level = match sup.mode_bias() {
                    crate::mode::Bias::PullUp => high_on_pull_up,
                    crate::mode::Bias::PullDown => high_on_pull_down,
                };
                sup.on_tick(true, true, true, level);
                sup.service();
                if sup.mode_bias() != starting_bias {
                    break;
                }
            }
        }
    }

    /// The raw mode-selector level that holds the already-decoded mode
    /// steady under whichever bias is currently active. Used by
    /// `press`/`release` so that feeding button edges for 8+ ticks doesn't
    /// incidentally also re-settle (and potentially flip) the mode sensor.
    fn steady_mode_level(sup: &Supervisor<RamNvram>) -> bool {
        let mode = sup.mode().expect("mode must be decided before servicing buttons");
        match (mode, sup.mode_bias()) {
            (Mode::Run, crate::mode::Bias::PullUp) => true,
            (Mode::Run, crate::mode::Bias::PullDown) => false,
            (Mode::Program, _) => false,
            (Mode::Manual, _) => true,
        }
    }

    fn press(sup: &mut Supervisor<RamNvram>, up: bool, down: bool, program: bool) {
        for _ in 0..8 {
            let level = steady_mode_level(sup);
            sup.on_tick(!up, !down, !program, level);
            sup.service();
        }
    }

    fn release(sup: &mut Supervisor<RamNvram>) {
        for _ in 0..8 {
            let level = steady_mode_level(sup);
            sup.on_tick(true, true, true, level);
            sup.service();
        }
    }

    fn pulse(sup: &mut Supervisor<RamNvram>, n: u32) {
        for _ in 0..n {
            sup.on_pulse();
        }
    }

    #[test]
    fn teach_in_from_zero() {
        let mut sup = Supervisor::new(RamNvram::default());
        settle_mode(&mut sup, false, false); // hard-low -> PROGRAM
        assert_eq!(sup.mode(), Some(Mode::Program));

        press(&mut sup, false, false, true); // PROGRAM press: commits BOT
        release(&mut sup);
        assert_eq!(sup.position().thresholds().bottom, 0);
        assert_eq!(sup.position().clicks(), 0);

        press(&mut sup, true, false, false); // hold UP
        pulse(&mut sup, 100);
        release(&mut sup);

        press(&mut sup, false, false, true); // commits MID
        release(&mut sup);
        assert_eq!(sup.position().thresholds().middle, 100);

        press(&mut sup, true, false, false);
        pulse(&mut sup, 150);
        release(&mut sup);

        press(&mut sup, false, false, true); // commits TOP
        release(&mut sup);
        assert_eq!(sup.position().thresholds().top, 250);
        assert!(sup.position().is_blocked());

        // Entering RUN does not reset current/next: the teach walk above
        // left current=TOP, next=BOT, so that is what persists into RUN.
        settle_mode(&mut sup, true, false); // floating -> RUN
        assert_eq!(sup.mode(), Some(Mode::Run));
        assert_eq!(sup.position().current(), Position::Top);
        assert!(sup.leds().top);
        assert!(!sup.leds().bot);
    }

    #[test]
    fn run_autostop_up() {
        // Reach the scenario's starting state (current=BOT, next=MID,
        // clicks=0) the only way the public API allows: teach BOT, then
        // switch to RUN, which (per the mode-change rule above) carries
        // that position straight through.
        let mut sup = Supervisor::new(RamNvram::new(100, 250));
        settle_mode(&mut sup, false, false); // PROGRAM
        press(&mut sup, false, false, true); // commits BOT
        release(&mut sup);
        settle_mode(&mut sup, true, false); // RUN
        assert_eq!(sup.position().current(), Position::Bot);
        assert_eq!(sup.position().next(), Position::Mid);
        assert_eq!(sup.position().clicks(), 0);

        press(&mut sup, true, false, false);
        let cmd = sup.service();
        assert!(cmd.up);

        pulse(&mut sup, 100);
        let cmd = sup.service();
        assert!(!cmd.up);
        assert!(sup.position().is_blocked());
        assert_eq!(sup.position().current(), Position::Mid);
        assert_eq!(sup.position().next(), Position::Top);
    }

    #[test]
    fn autostop_does_not_resume_through_the_full_loop_on_a_held_button() {
        let mut sup = Supervisor::new(RamNvram::new(100, 250));
        settle_mode(&mut sup, false, false); // PROGRAM
        press(&mut sup, false, false, true); // commits BOT
        release(&mut sup);
        settle_mode(&mut sup, true, false); // RUN

        press(&mut sup, true, false, false);
        assert!(sup.service().up);

        pulse(&mut sup, 100);
        assert!(!sup.service().up);
        assert!(sup.position().is_blocked());

        // Block expires with UP still physically held. Nothing re-presses
        // it, so the relay must stay open through every remaining tick.
        sup.position.expire_block();
        for _ in 0..8 {
            let level = steady_mode_level(&sup);
            sup.on_tick(false, true, true, level); // UP still low (held)
            assert!(!sup.service().up);
        }
        assert_eq!(sup.position().current(), Position::Mid);
    }

    #[test]
    fn program_safety_forces_relays_open() {
        let mut sup = Supervisor::new(RamNvram::default());
        settle_mode(&mut sup, false, false); // PROGRAM
        press(&mut sup, false, false, true); // commits BOT: bottom=0, clicks=0, next=MID
        release(&mut sup);
        assert_eq!(sup.position().next(), Position::Mid);
        assert_eq!(sup.position().clicks(), 0);

        press(&mut sup, false, true, false); // hold DOWN: sets direction=Down
        pulse(&mut sup, 1); // clicks = -1 <= bottom (0)
        let cmd = sup.service();
        assert!(!cmd.up);
        assert!(!cmd.down);
    }

    #[test]
    fn mode_cycle_only_commits_on_completed_decode() {
        let mut sup = Supervisor::new(RamNvram::default());
        settle_mode(&mut sup, false, false);
        assert_eq!(sup.mode(), Some(Mode::Program));
        settle_mode(&mut sup, true, false);
        assert_eq!(sup.mode(), Some(Mode::Run));
        settle_mode(&mut sup, true, true);
        assert_eq!(sup.mode(), Some(Mode::Manual));
    }

    #[test]
    fn blocked_forces_both_relays_off_every_iteration() {
        let mut sup = Supervisor::new(RamNvram::new(100, 250));
        settle_mode(&mut sup, false, false); // PROGRAM
        press(&mut sup, false, false, true); // commits BOT: current=BOT, next=MID
        release(&mut sup);
        settle_mode(&mut sup, true, false); // RUN, position carried through

        press(&mut sup, true, false, false); // hold UP
        pulse(&mut sup, 100); // reach the learned MIDDLE threshold
        let cmd = sup.service();
        assert!(sup.position().is_blocked());
        assert!(!cmd.up && !cmd.down);
        let cmd = sup.service();
        assert!(!cmd.up && !cmd.down);
    }

    #[test]
    fn nvram_is_untouched_until_a_program_press_commits() {
        // Booting and running in RUN/MANUAL must not disturb the learned
        // thresholds: only a PROGRAM commit ever writes NVRAM.
        let mut sup = Supervisor::new(RamNvram::new(100, 250));
        assert_eq!(sup.position().thresholds().middle, 100);
        assert_eq!(sup.position().thresholds().top, 250);

        settle_mode(&mut sup, true, false); // RUN
        press(&mut sup, true, false, false);
        pulse(&mut sup, 40);
        release(&mut sup);

        assert_eq!(sup.position().thresholds().middle, 100);
        assert_eq!(sup.position().thresholds().top, 250);
    }

    #[test]
    fn nvram_persists_across_reboot() {
        let mut sup = Supervisor::new(RamNvram::default());
        settle_mode(&mut sup, false, false);
        press(&mut sup, false, false, true); // BOT
        release(&mut sup);
        press(&mut sup, true, false, false);
        pulse(&mut sup, 100);
        release(&mut sup);
        press(&mut sup, false, false, true); // MID: middle=100
        release(&mut sup);

        // Simulate reboot with a fresh Supervisor reading the same NVRAM
        // contents the first one just wrote.
        let mut nv = RamNvram::default();
        nv.write_u32(MIDDLE_OFFSET, 100);
        nv.write_u32(TOP_OFFSET, 0);
        let rebooted = Supervisor::new(nv);
        assert_eq!(rebooted.position().thresholds().middle, 100);
    }
}
