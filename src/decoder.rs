use crate::{
    env::{Env, EnvFlags, EnvPoint, EnvUsage, Polyline},
    invalid_data,
    wave::{ParamLen, Wave, WaveOp, WAVE_OPS, WAVE_OP_EOF},
};
use std::io;

/// Forward-only reader over a borrowed byte slice.
///
/// Primitive reads never fail: on exhaustion they return the caller's
/// fallback and pin the cursor to the end of input. Only [`Decoder::wave`]
/// and [`Decoder::env`] report structurally impossible input as errors.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    src: &'a [u8],
    p: usize,
}

impl<'a> Decoder<'a> {
    #[inline]
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, p: 0 }
    }
    #[inline]
    pub fn finished(&self) -> bool {
        self.p >= self.src.len()
    }
    #[inline]
    pub fn position(&self) -> usize {
        self.p
    }
    #[inline]
    pub fn remaining(&self) -> usize {
        self.src.len() - self.p
    }
    #[inline]
    fn exhaust(&mut self) {
        self.p = self.src.len();
    }
    /// Next `n` bytes, or `None` (and the cursor pinned to the end).
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        match self.src.get(self.p..self.p.saturating_add(n)) {
            Some(s) => {
                self.p += n;
                Some(s)
            }
            None => {
                self.exhaust();
                None
            }
        }
    }
    #[inline]
    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|s| s.try_into().ok())
    }
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.src.get(self.p).copied()
    }
    #[inline]
    pub fn u8(&mut self, fallback: u8) -> u8 {
        self.array::<1>().map(|b| b[0]).unwrap_or(fallback)
    }
    #[inline]
    pub fn u16(&mut self, fallback: u16) -> u16 {
        self.array().map(u16::from_be_bytes).unwrap_or(fallback)
    }
    #[inline]
    pub fn u24(&mut self, fallback: u32) -> u32 {
        self.array::<3>()
            .map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
            .unwrap_or(fallback)
    }
    #[inline]
    pub fn u32(&mut self, fallback: u32) -> u32 {
        self.array().map(u32::from_be_bytes).unwrap_or(fallback)
    }
    #[inline]
    pub fn u0_8(&mut self, fallback: f32) -> f32 {
        self.array::<1>()
            .map(|b| b[0] as f32 / 256.0)
            .unwrap_or(fallback)
    }
    #[inline]
    pub fn u8_8(&mut self, fallback: f32) -> f32 {
        self.array()
            .map(|b| u16::from_be_bytes(b) as f32 / 256.0)
            .unwrap_or(fallback)
    }
    /// MIDI variable-length quantity, at most 4 bytes.
    pub fn vlq(&mut self, fallback: u32) -> u32 {
        let mut v = 0u32;
        for _ in 0..4 {
            let b = match self.take(1) {
                Some(b) => b[0],
                None => return fallback,
            };
            v = (v << 7) | (b & 0x7f) as u32;
            if b & 0x80 == 0 {
                return v;
            }
        }
        // A fifth continuation byte can't be a valid VLQ.
        self.exhaust();
        fallback
    }
    /// Slice prefixed by a u8 length.
    pub fn len8(&mut self, fallback: &'a [u8]) -> &'a [u8] {
        match self.take(1) {
            Some(len) => self.take(len[0] as usize).unwrap_or(fallback),
            None => fallback,
        }
    }
    /// Slice prefixed by a big-endian u16 length.
    pub fn len16(&mut self, fallback: &'a [u8]) -> &'a [u8] {
        match self.array::<2>() {
            Some(len) => self
                .take(u16::from_be_bytes(len) as usize)
                .unwrap_or(fallback),
            None => fallback,
        }
    }
    /// Everything left; consumes the cursor.
    pub fn remainder(&mut self) -> &'a [u8] {
        let rest = &self.src[self.p.min(self.src.len())..];
        self.exhaust();
        rest
    }

    /// Reads wave opcodes up to a zero opcode or end of input.
    pub fn wave(&mut self) -> io::Result<Wave> {
        let mut wave = Wave::default();
        while let Some(opcode) = self.take(1).map(|b| b[0]) {
            if opcode == WAVE_OP_EOF {
                break;
            }
            let info = WAVE_OPS
                .get(&opcode)
                .ok_or_else(|| invalid_data(format_args!("unknown wave opcode {opcode:#04x}")))?;
            let len = match info.params {
                ParamLen::Fixed(len) => len,
                ParamLen::Harmonics => match self.peek() {
                    Some(count) => 1 + count as usize * 2,
                    None => 1,
                },
            };
            let params = self.take(len).ok_or_else(|| {
                invalid_data(format_args!(
                    "wave op {} needs {len} parameter bytes",
                    info.name
                ))
            })?;
            wave.ops.push(WaveOp::new(opcode, params));
        }
        Ok(wave)
    }

    /// Reads an envelope, falling back to the usage's default on truncation.
    pub fn env(&mut self, usage: EnvUsage) -> io::Result<Env> {
        let flags = match self.take(1) {
            Some(b) => b[0],
            None => return Ok(Env::new_default(usage)),
        };
        let flags = EnvFlags::from_bits_retain(flags);
        if flags.intersects(EnvFlags::RESERVED) {
            return Err(invalid_data(format_args!(
                "illegal envelope flags {:#04x}",
                flags.bits()
            )));
        }
        if !flags.intersects(EnvFlags::INITIALS | EnvFlags::VELOCITY | EnvFlags::SUSTAIN) {
            return Ok(Env::new_default(usage));
        }
        Ok(self
            .env_body(usage, flags)
            .unwrap_or_else(|| Env::new_default(usage)))
    }

    fn env_body(&mut self, usage: EnvUsage, flags: EnvFlags) -> Option<Env> {
        let velocity = flags.contains(EnvFlags::VELOCITY);
        let (mut initlo, mut inithi) = (0, 0);
        if flags.contains(EnvFlags::INITIALS) {
            initlo = u16::from_be_bytes(self.array()?);
            if velocity {
                inithi = u16::from_be_bytes(self.array()?);
            }
        }
        let packed = self.array::<1>()?[0];
        let count = (packed & 0x0f) as usize;
        let mut sustain = match flags.contains(EnvFlags::SUSTAIN) {
            true => (packed >> 4) as usize + 1,
            false => 0,
        };
        let mut lo = Polyline::new();
        let mut hi = Polyline::new();
        lo.push(EnvPoint::new(0, initlo));
        hi.push(EnvPoint::new(0, inithi));
        let (mut tlo, mut thi) = (0u32, 0u32);
        for _ in 0..count {
            tlo += u16::from_be_bytes(self.array()?) as u32;
            if velocity {
                thi += u16::from_be_bytes(self.array()?) as u32;
            }
            let vlo = u16::from_be_bytes(self.array()?);
            lo.push(EnvPoint::new(tlo, vlo));
            if velocity {
                let vhi = u16::from_be_bytes(self.array()?);
                hi.push(EnvPoint::new(thi, vhi));
            }
        }
        if sustain >= lo.len() {
            log::debug!("envelope sustain index {sustain} beyond {} points", lo.len());
            sustain = 0;
        }
        Some(Env {
            usage,
            sustain,
            lo,
            hi: velocity.then_some(hi),
            default: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    #[test]
    fn fallback_pins_to_end() {
        let mut d = Decoder::new(&[1, 2, 3]);
        assert_eq!(d.u16(0), 0x0102);
        assert_eq!(d.u16(0xbeef), 0xbeef);
        assert!(d.finished());
        assert_eq!(d.u8(7), 7);
    }

    #[test]
    fn fixed_point_inverse() {
        let mut d = Decoder::new(&[0x80, 0x01, 0x80]);
        assert_eq!(d.u0_8(0.0), 0.5);
        assert_eq!(d.u8_8(0.0), 1.5);
        assert_eq!(d.u8_8(2.0), 2.0);
    }

    #[test]
    fn length_prefixed() {
        let mut d = Decoder::new(&[2, 0xaa, 0xbb, 0, 1, 0xcc, 0, 9, 0xdd]);
        assert_eq!(d.len8(&[]), [0xaa, 0xbb]);
        assert_eq!(d.len16(&[]), [0xcc]);
        assert_eq!(d.len16(&[0xee]), [0xee]);
        assert!(d.finished());
        assert!(d.remainder().is_empty());
    }

    #[test]
    fn vlq_round_trip() {
        for n in [0, 127, 128, 16383, 16384, 2097151, 2097152, 268435455] {
            let mut e = Encoder::new();
            e.vlq(n).unwrap();
            let serial = e.finish();
            let mut d = Decoder::new(&serial);
            assert_eq!(d.vlq(u32::MAX) as i64, n);
            assert!(d.finished());
        }
    }

    #[test]
    fn vlq_truncated() {
        assert_eq!(Decoder::new(&[0x81]).vlq(99), 99);
        assert_eq!(Decoder::new(&[0xff, 0xff, 0xff, 0xff, 0x7f]).vlq(99), 99);
    }
}
