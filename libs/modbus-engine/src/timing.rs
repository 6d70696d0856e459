//! RTU character timing
//!
//! One character on the wire is start bit + data bits + parity slot + stop bits.
//! The parity slot is always counted, so a character is
//! `data_bits + stop_bits + 2` bit times long.

use std::time::Duration;

use crate::constants::{FIXED_DELAY_BAUD_THRESHOLD, FIXED_INTER_FRAME_DELAY_US};
use crate::error::{ModbusError, ModbusResult};

/// Serial line timing derived from baud rate and character format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuTiming {
    baud_rate: u32,
    char_time: Duration,
    inter_frame_delay: Duration,
}

impl RtuTiming {
    pub fn new(baud_rate: u32, data_bits: u8, stop_bits: u8) -> ModbusResult<Self> {
        if baud_rate == 0 {
            return Err(ModbusError::invalid_argument("baud rate must be non-zero"));
        }
        if !(5..=8).contains(&data_bits) || !(1..=2).contains(&stop_bits) {
            return Err(ModbusError::invalid_argument(format!(
                "unsupported character format: {data_bits} data bits, {stop_bits} stop bits"
            )));
        }

        let bits = u64::from(data_bits) + u64::from(stop_bits) + 2;
        let char_nanos = (1_000_000_000 * bits).div_ceil(u64::from(baud_rate));
        let char_time = Duration::from_nanos(char_nanos);

        let inter_frame_delay = if baud_rate < FIXED_DELAY_BAUD_THRESHOLD {
            Duration::from_nanos((char_nanos * 7).div_ceil(2))
        } else {
            Duration::from_micros(FIXED_INTER_FRAME_DELAY_US)
        };

        Ok(Self {
            baud_rate,
            char_time,
            inter_frame_delay,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Time to transmit one character
    pub fn char_time(&self) -> Duration {
        self.char_time
    }

    /// Minimum line silence separating two frames (t3.5)
    pub fn inter_frame_delay(&self) -> Duration {
        self.inter_frame_delay
    }

    /// Time to transmit `bytes` characters back to back
    pub fn transmit_time(&self, bytes: usize) -> Duration {
        self.char_time * u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

impl Default for RtuTiming {
    /// 9600 baud, 8 data bits, 1 stop bit
    fn default() -> Self {
        let bits = 8 + 1 + 2;
        let char_nanos = (1_000_000_000u64 * bits).div_ceil(9600);
        Self {
            baud_rate: 9600,
            char_time: Duration::from_nanos(char_nanos),
            inter_frame_delay: Duration::from_nanos((char_nanos * 7).div_ceil(2)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_char_time_9600_8n1() {
        let timing = RtuTiming::new(9600, 8, 1).unwrap();
        // 11 bits / 9600 baud = 1145.83us
        assert_eq!(timing.char_time().as_micros(), 1145);
        // 3.5 chars = 4010.4us
        assert_eq!(timing.inter_frame_delay().as_micros(), 4010);
        assert_eq!(timing, RtuTiming::default());
    }

    #[test]
    fn test_fixed_delay_at_and_above_19200() {
        let timing = RtuTiming::new(19_200, 8, 1).unwrap();
        assert_eq!(timing.inter_frame_delay(), Duration::from_micros(1750));

        let timing = RtuTiming::new(115_200, 8, 2).unwrap();
        assert_eq!(timing.inter_frame_delay(), Duration::from_micros(1750));
        // 12 bits / 115200 baud = 104.17us
        assert_eq!(timing.char_time().as_micros(), 104);
    }

    #[test]
    fn test_below_threshold_uses_char_multiple() {
        let timing = RtuTiming::new(4800, 7, 2).unwrap();
        // 11 bits at 4800 baud
        let expected = Duration::from_nanos((1_000_000_000u64 * 11).div_ceil(4800) * 7 / 2);
        let diff = timing.inter_frame_delay().as_nanos() as i128 - expected.as_nanos() as i128;
        assert!(diff.abs() <= 1);
    }

    #[test]
    fn test_transmit_time() {
        let timing = RtuTiming::new(9600, 8, 1).unwrap();
        assert_eq!(timing.transmit_time(8), timing.char_time() * 8);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(RtuTiming::new(0, 8, 1).is_err());
        assert!(RtuTiming::new(9600, 9, 1).is_err());
        assert!(RtuTiming::new(9600, 8, 3).is_err());
    }
}
