//! Flat byte-addressed non-volatile storage.
//!
//! Thresholds learned during teach-in are the only state that survives a
//! reboot. The controller does not care how those two 32-bit words are
//! physically stored, only that they can be read at boot and written on a
//! teach-in commit, so the HAL seam is a plain trait instead of a concrete
//! flash/EEPROM driver.

/// Byte-addressed, word-aligned non-volatile store.
///
/// Offsets are given in bytes; `read_u32`/`write_u32` each touch 4 bytes
/// starting at `offset`. Writes are infrequent (only on teach-in commits)
/// and need not be wear-levelled.
pub trait Nvram {
    /// Read a little-endian `u32` at `offset`.
    fn read_u32(&self, offset: u32) -> i32;
    /// Write a little-endian `u32` at `offset`.
    fn write_u32(&mut self, offset: u32, value: i32);
}

/// Offset of the persisted middle threshold.
pub const MIDDLE_OFFSET: u32 = 0;
/// Offset of the persisted top threshold.
pub const TOP_OFFSET: u32 = 4;

/// In-memory `Nvram` test double.
///
/// Models uninitialised flash/EEPROM: fresh storage reads back whatever it
/// was constructed with, which is `0` for [`RamNvram::default`] but can be
/// seeded with [`RamNvram::new`] to model a previously-taught device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RamNvram {
    middle: i32,
    top: i32,
}

impl RamNvram {
    /// Build storage pre-seeded with the given persisted values.
    pub fn new(middle: i32, top: i32) -> Self {
        RamNvram { middle, top }
    }
}

impl Nvram for RamNvram {
    fn read_u32(&self, offset: u32) -> i32 {
        match offset {
            MIDDLE_OFFSET => self.middle,
            TOP_OFFSET => self.top,
            _ => 0,
        }
    }

    fn write_u32(&mut self, offset: u32, value: i32) {
        match offset {
            MIDDLE_OFFSET => self.middle = value,
            TOP_OFFSET => self.top = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_storage_reads_back_seed() {
        let nv = RamNvram::new(100, 250);
        assert_eq!(nv.read_u32(MIDDLE_OFFSET), 100);
        assert_eq!(nv.read_u32(TOP_OFFSET), 250);
    }

    #[test]
    fn default_storage_is_zero() {
        let nv = RamNvram::default();
        assert_eq!(nv.read_u32(MIDDLE_OFFSET), 0);
        assert_eq!(nv.read_u32(TOP_OFFSET), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut nv = RamNvram::default();
        nv.write_u32(MIDDLE_OFFSET, 100);
        nv.write_u32(TOP_OFFSET, 250);
        assert_eq!(nv.read_u32(MIDDLE_OFFSET), 100);
        assert_eq!(nv.read_u32(TOP_OFFSET), 250);
    }
}
