//! Host-testable core of the lift controller firmware: debounce, the mode
//! selector, the three buttons, the position machine, the LED indicator,
//! and the supervisor loop that ties them together. `main.rs` is the only
//! part of the crate that touches real GPIO/flash peripherals; everything
//! in here builds and runs on the host, under `cargo test`, with no
//! hardware at all.

#![no_std]

pub mod button;
pub mod debounce;
pub mod led;
pub mod mode;
pub mod nvram;
pub mod position;
pub mod supervisor;
pub mod timers;
