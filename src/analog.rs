//! Analog input/output adapter.
//!
//! The core talks to the converters in millivolts through [`AnalogIo`].  Two conversion paths
//! exist behind it and are deliberately kept apart:
//!
//! - the Q15 path used by the simulated plant, where a full-scale Q15 value maps to
//!   [`FULL_SCALE_MV`] and reads are scaled back with `>> 15`;
//! - the 10-bit converter path of the real board ([`Hardware10Bit`]), where the DAC receives the
//!   Q15 value shifted down by 5 and reads are scaled back from 10 bits with `>> 10`.

use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::{Q15, Q15_SHIFT};

/// Converter full scale in millivolts.
pub const FULL_SCALE_MV: u16 = 3300;

/// Resolution of the board converters in bits.
pub const CONVERTER_BITS: u32 = 10;

const CONVERTER_MAX: i32 = (1 << CONVERTER_BITS) - 1;

/// Analog channel of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    One = 1,
    Two = 2,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::One, Channel::Two];

    /// Zero-based index of the channel.
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// Channel from its one-based number.
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Channel::One),
            2 => Some(Channel::Two),
            _ => None,
        }
    }
}

/// Millivolt level access to the analog front end.
pub trait AnalogIo {
    /// Drive an output channel.
    fn write_output(&mut self, channel: Channel, millivolts: u16);

    /// Sample an input channel.
    fn read_input(&mut self, channel: Channel) -> u16;
}

impl<T: AnalogIo + ?Sized> AnalogIo for &mut T {
    fn write_output(&mut self, channel: Channel, millivolts: u16) {
        (**self).write_output(channel, millivolts)
    }

    fn read_input(&mut self, channel: Channel) -> u16 {
        (**self).read_input(channel)
    }
}

/// Millivolts to Q15, `round(mv * 32768 / 3300)`.
///
/// # Examples
///
/// ```
/// use fixed_control::analog::{mv_to_q15, q15_to_mv};
///
/// let q = mv_to_q15(2000);
/// assert_eq!(q.to_bits(), 19859);
/// assert_eq!(q15_to_mv(q), 1999);
/// ```
pub fn mv_to_q15(millivolts: u16) -> Q15 {
    let full = i32::from(FULL_SCALE_MV);
    Q15::from_bits(((i32::from(millivolts) << Q15_SHIFT) + full / 2) / full)
}

/// Q15 to millivolts, `(q15 * 3300) >> 15`, clamped to the `u16` range.
pub fn q15_to_mv(value: Q15) -> u16 {
    let mv = (i64::from(value.to_bits()) * i64::from(FULL_SCALE_MV)) >> Q15_SHIFT;
    mv.clamp(0, i64::from(u16::MAX)) as u16
}

/// Volts to a millivolt command, truncating toward zero and saturating to the `u16` range.
pub fn volts_to_mv<T: Float>(volts: T) -> u16 {
    let mv = volts * <T as num_traits::NumCast>::from(1000).unwrap_or_else(T::one);
    mv.max(T::zero())
        .min(<T as num_traits::NumCast>::from(u16::MAX).unwrap_or_else(T::max_value))
        .to_u16()
        .unwrap_or(0)
}

/// Q15 to a 10-bit converter code, clamped to the converter range.
pub fn q15_to_raw(value: Q15) -> u16 {
    (value.to_bits() >> (Q15_SHIFT - CONVERTER_BITS)).clamp(0, CONVERTER_MAX) as u16
}

/// 10-bit converter code to millivolts, `(raw * 3300) >> 10`.
pub fn raw_to_mv(raw: u16) -> u16 {
    ((u32::from(raw) * u32::from(FULL_SCALE_MV)) >> CONVERTER_BITS) as u16
}

/// Register level access to the 10-bit converters of the board.
pub trait AdcDac {
    /// Load a DAC code.
    fn dac_write(&mut self, channel: Channel, raw: u16);

    /// Convert an ADC channel.
    fn adc_read(&mut self, channel: Channel) -> u16;
}

/// Analog front end of the real board.
///
/// Both ADC channels are converted right after every DAC write and the codes are latched; reads
/// return the latched codes.
#[derive(Debug)]
pub struct Hardware10Bit<B> {
    board: B,
    latched: [u16; 2],
}

impl<B: AdcDac> Hardware10Bit<B> {
    pub fn new(board: B) -> Self {
        Self {
            board,
            latched: [0; 2],
        }
    }

    pub fn into_inner(self) -> B {
        self.board
    }
}

impl<B: AdcDac> AnalogIo for Hardware10Bit<B> {
    fn write_output(&mut self, channel: Channel, millivolts: u16) {
        let raw = q15_to_raw(mv_to_q15(millivolts));
        self.board.dac_write(channel, raw);
        for channel in Channel::ALL {
            self.latched[channel.index()] = self.board.adc_read(channel);
        }
    }

    fn read_input(&mut self, channel: Channel) -> u16 {
        raw_to_mv(self.latched[channel.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_numbers() {
        assert_eq!(Channel::from_number(1), Some(Channel::One));
        assert_eq!(Channel::from_number(2), Some(Channel::Two));
        assert_eq!(Channel::from_number(0), None);
        assert_eq!(Channel::from_number(3), None);
        assert_eq!(Channel::Two.index(), 1);
    }

    #[test]
    fn conversion_points() {
        assert_eq!(mv_to_q15(0).to_bits(), 0);
        assert_eq!(mv_to_q15(1000).to_bits(), 9930);
        assert_eq!(mv_to_q15(FULL_SCALE_MV).to_bits(), 32768);
        assert_eq!(q15_to_mv(Q15::from_bits(-100)), 0);
        assert_eq!(q15_to_mv(Q15::from_bits(i32::MAX)), u16::MAX);
        assert_eq!(q15_to_raw(mv_to_q15(FULL_SCALE_MV)), 1023);
        assert_eq!(raw_to_mv(1023), 3296);
        assert_eq!(raw_to_mv(512), 1650);
    }

    #[test]
    fn volts_to_command() {
        assert_eq!(volts_to_mv(1.0f32), 1000);
        assert_eq!(volts_to_mv(0.0f64), 0);
        assert_eq!(volts_to_mv(-1.0f64), 0);
        assert_eq!(volts_to_mv(100.0f64), u16::MAX);
        assert_eq!(volts_to_mv(f64::NAN), 0);
        assert_eq!(volts_to_mv(1.2345f64), 1234);
        assert_eq!(volts_to_mv(2.0 * 2.115f64), 4230);
    }

    #[test]
    fn millivolt_round_trip_within_one() {
        for mv in 0..=FULL_SCALE_MV {
            let back = q15_to_mv(mv_to_q15(mv));
            assert!(mv - back <= 1, "{} came back as {}", mv, back);
        }
    }

    struct Loopback {
        dac: [u16; 2],
        conversions: usize,
    }

    impl AdcDac for Loopback {
        fn dac_write(&mut self, channel: Channel, raw: u16) {
            self.dac[channel.index()] = raw;
        }

        fn adc_read(&mut self, channel: Channel) -> u16 {
            self.conversions += 1;
            self.dac[channel.index()] / 2
        }
    }

    #[test]
    fn hardware_latches_on_write() {
        let mut io = Hardware10Bit::new(Loopback {
            dac: [0; 2],
            conversions: 0,
        });
        assert_eq!(io.read_input(Channel::One), 0);

        io.write_output(Channel::One, 2000);
        // 2000 mV -> Q15 19859 -> 10-bit 620, looped back at half
        assert_eq!(io.read_input(Channel::One), raw_to_mv(310));
        assert_eq!(io.read_input(Channel::Two), 0);
        assert_eq!(io.into_inner().conversions, 2);
    }
}
