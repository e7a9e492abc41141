//! Multi-segment envelopes.
//!
//! Serial layout:
//!
//! ```text
//! u8 flags: 01 initials, 02 velocity, 04 sustain, f0 reserved
//! (u16 initlo, (u16 inithi))      if initials
//! u8 (sustain-1)<<4 | count
//! count * (u16 dtlo, (u16 dthi), u16 vlo, (u16 vhi))
//! ```
//!
//! A flags byte of zero stands for the usage's default envelope.

use crate::encoder::Encoder;
use arrayvec::ArrayVec;
use std::io;

/// Initial point plus up to 15 serialized points.
pub const ENV_POINT_LIMIT: usize = 16;

pub type Polyline = ArrayVec<EnvPoint, ENV_POINT_LIMIT>;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u8 {
        const INITIALS = 0b00000001;
        const VELOCITY = 0b00000010;
        const SUSTAIN = 0b00000100;
        const RESERVED = 0b11110000;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EnvUsage {
    Level,
    Range,
    Pitch,
    Mix,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EnvPoint {
    /// Absolute time in ms.
    pub time: u32,
    pub value: u16,
}

impl EnvPoint {
    #[inline]
    pub const fn new(time: u32, value: u16) -> Self {
        Self { time, value }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Env {
    pub usage: EnvUsage,
    /// Index into `lo` of the held point, 0 for none.
    pub sustain: usize,
    pub lo: Polyline,
    /// Velocity-sensitive layer, same length as `lo`.
    pub hi: Option<Polyline>,
    /// Serialize as empty; the points are the usage's built-in default.
    pub default: bool,
}

impl Env {
    pub fn new_default(usage: EnvUsage) -> Self {
        let (sustain, points): (usize, &[EnvPoint]) = match usage {
            EnvUsage::Level => (
                2,
                &[
                    EnvPoint::new(0, 0),
                    EnvPoint::new(30, 0x8000),
                    EnvPoint::new(50, 0x4000),
                    EnvPoint::new(200, 0),
                ],
            ),
            EnvUsage::Range => (
                1,
                &[
                    EnvPoint::new(0, 0xffff),
                    EnvPoint::new(20, 0xffff),
                    EnvPoint::new(200, 0x8000),
                ],
            ),
            EnvUsage::Pitch => (0, &[EnvPoint::new(0, 0x8000), EnvPoint::new(100, 0x8000)]),
            EnvUsage::Mix => (0, &[EnvPoint::new(0, 0xffff), EnvPoint::new(100, 0xffff)]),
        };
        Self {
            usage,
            sustain,
            lo: points.iter().copied().collect(),
            hi: None,
            default: true,
        }
    }
    /// A flat envelope holding `value` with no segments.
    pub fn constant(usage: EnvUsage, value: u16) -> Self {
        let mut lo = Polyline::new();
        lo.push(EnvPoint::new(0, value));
        Self {
            usage,
            sustain: 0,
            lo,
            hi: None,
            default: false,
        }
    }
    /// True when a velocity layer exists and differs from `lo`.
    pub fn has_velocity(&self) -> bool {
        match &self.hi {
            Some(hi) => hi != &self.lo,
            None => false,
        }
    }
    #[inline]
    pub fn hi_or_lo(&self) -> &Polyline {
        self.hi.as_ref().unwrap_or(&self.lo)
    }
    /// Total run time of the polyline, ignoring sustain.
    pub fn duration(&self) -> u32 {
        let lo = self.lo.last().map(|p| p.time).unwrap_or(0);
        let hi = self.hi_or_lo().last().map(|p| p.time).unwrap_or(0);
        lo.max(hi)
    }
    pub fn flags(&self) -> EnvFlags {
        let mut flags = EnvFlags::empty();
        let velocity = self.has_velocity();
        if velocity {
            flags |= EnvFlags::VELOCITY;
        }
        let initlo = self.lo.first().map(|p| p.value).unwrap_or(0);
        let inithi = match velocity {
            true => self.hi_or_lo().first().map(|p| p.value).unwrap_or(0),
            false => 0,
        };
        if initlo != 0 || inithi != 0 {
            flags |= EnvFlags::INITIALS;
        }
        if self.sustain > 0 && self.sustain < self.lo.len() {
            flags |= EnvFlags::SUSTAIN;
        }
        if flags.is_empty() {
            // Zero is reserved for the default marker.
            flags |= EnvFlags::INITIALS;
        }
        flags
    }
    pub fn encode(&self, e: &mut Encoder) -> io::Result<()> {
        if self.default {
            e.u8(0);
            return Ok(());
        }
        if self.lo.is_empty() {
            return Err(crate::invalid_data("envelope has no points"));
        }
        if let Some(hi) = &self.hi {
            if hi.len() != self.lo.len() {
                return Err(crate::invalid_data(format_args!(
                    "envelope layers differ in length: {} vs {}",
                    self.lo.len(),
                    hi.len()
                )));
            }
        }
        let flags = self.flags();
        let velocity = flags.contains(EnvFlags::VELOCITY);
        let hi = self.hi_or_lo();
        e.u8(flags.bits());
        if flags.contains(EnvFlags::INITIALS) {
            e.u16(self.lo[0].value);
            if velocity {
                e.u16(hi[0].value);
            }
        }
        let count = self.lo.len() - 1;
        let sustain = match flags.contains(EnvFlags::SUSTAIN) {
            true => (self.sustain - 1) as u8,
            false => 0,
        };
        e.u8((sustain << 4) | count as u8);
        for i in 1..self.lo.len() {
            let dtlo = self.lo[i].time.saturating_sub(self.lo[i - 1].time).min(0xffff);
            e.u16(dtlo as u16);
            if velocity {
                let dthi = hi[i].time.saturating_sub(hi[i - 1].time).min(0xffff);
                e.u16(dthi as u16);
            }
            e.u16(self.lo[i].value);
            if velocity {
                e.u16(hi[i].value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;

    const USAGES: [EnvUsage; 4] = [
        EnvUsage::Level,
        EnvUsage::Range,
        EnvUsage::Pitch,
        EnvUsage::Mix,
    ];

    fn encode(env: &Env) -> Vec<u8> {
        let mut e = Encoder::new();
        env.encode(&mut e).unwrap();
        e.finish()
    }

    #[test]
    fn default_law() {
        for usage in USAGES {
            let env = Env::new_default(usage);
            let serial = encode(&env);
            assert_eq!(serial, [0]);
            let back = Decoder::new(&serial).env(usage).unwrap();
            assert!(back.default);
            assert_eq!(back, env, "{usage:?}");
        }
        let level = Env::new_default(EnvUsage::Level);
        assert_eq!(level.sustain, 2);
        assert_eq!(
            level.lo.as_slice(),
            [
                EnvPoint::new(0, 0),
                EnvPoint::new(30, 0x8000),
                EnvPoint::new(50, 0x4000),
                EnvPoint::new(200, 0)
            ]
        );
    }

    #[test]
    fn explicit_level_envelope() {
        let mut env = Env::new_default(EnvUsage::Level);
        env.default = false;
        env.lo[1].value = 0xffff;
        let serial = encode(&env);
        assert_eq!(
            serial,
            [
                0x04, // sustain only, initial value is zero
                0x13, // sustain 2, 3 points
                0x00, 30, 0xff, 0xff, //
                0x00, 20, 0x40, 0x00, //
                0x00, 150, 0x00, 0x00,
            ]
        );
        let back = Decoder::new(&serial).env(EnvUsage::Level).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn velocity_layer_round_trip() {
        let mut env = Env::constant(EnvUsage::Range, 0x1000);
        env.lo.push(EnvPoint::new(100, 0x2000));
        env.lo.push(EnvPoint::new(300, 0));
        let mut hi = env.lo.clone();
        hi[1] = EnvPoint::new(50, 0xffff);
        env.hi = Some(hi);
        env.sustain = 1;
        let serial = encode(&env);
        assert_eq!(serial[0], 0x07);
        let back = Decoder::new(&serial).env(EnvUsage::Range).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn redundant_velocity_layer_dropped() {
        let mut env = Env::constant(EnvUsage::Mix, 0x8000);
        env.lo.push(EnvPoint::new(10, 0));
        env.hi = Some(env.lo.clone());
        let serial = encode(&env);
        assert_eq!(serial, [0x01, 0x80, 0x00, 0x01, 0x00, 10, 0x00, 0x00]);
    }

    #[test]
    fn plain_envelope_not_mistaken_for_default() {
        let mut env = Env::constant(EnvUsage::Level, 0);
        env.lo.push(EnvPoint::new(40, 0xffff));
        let serial = encode(&env);
        assert_eq!(serial, [0x01, 0x00, 0x00, 0x01, 0x00, 40, 0xff, 0xff]);
        let back = Decoder::new(&serial).env(EnvUsage::Level).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn truncation_yields_default() {
        let env = Decoder::new(&[0x01, 0x12]).env(EnvUsage::Pitch).unwrap();
        assert_eq!(env, Env::new_default(EnvUsage::Pitch));
        let env = Decoder::new(&[0x04, 0x02, 0x00, 0x10])
            .env(EnvUsage::Level)
            .unwrap();
        assert!(env.default);
    }

    #[test]
    fn bad_sustain_disabled() {
        // sustain nibble 3 => index 4, only 2 points serialized
        let env = Decoder::new(&[0x04, 0x32, 0, 1, 0, 1, 0, 1, 0, 2])
            .env(EnvUsage::Mix)
            .unwrap();
        assert!(!env.default);
        assert_eq!(env.sustain, 0);
        assert_eq!(env.lo.len(), 3);
        assert_eq!(env.lo[2], EnvPoint::new(2, 2));
    }

    #[test]
    fn reserved_bits_fail() {
        assert!(Decoder::new(&[0x10, 0x00]).env(EnvUsage::Level).is_err());
    }
}
