use crate::encoder::Encoder;
use std::io;

/// Parameter length rule for a wave opcode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamLen {
    Fixed(usize),
    /// First parameter byte is a coefficient count, each coefficient a u16.
    Harmonics,
}

#[derive(Clone, Copy, Debug)]
pub struct WaveOpInfo {
    pub name: &'static str,
    pub params: ParamLen,
}

pub const WAVE_OP_EOF: u8 = 0;
pub const WAVE_OP_SINE: u8 = 1;
pub const WAVE_OP_HARMONICS: u8 = 5;

pub static WAVE_OPS: phf::Map<u8, WaveOpInfo> = phf::phf_map! {
    1u8 => WaveOpInfo { name: "sine", params: ParamLen::Fixed(0) },
    2u8 => WaveOpInfo { name: "square", params: ParamLen::Fixed(1) },
    3u8 => WaveOpInfo { name: "saw", params: ParamLen::Fixed(1) },
    4u8 => WaveOpInfo { name: "triangle", params: ParamLen::Fixed(0) },
    5u8 => WaveOpInfo { name: "harmonics", params: ParamLen::Harmonics },
    6u8 => WaveOpInfo { name: "fm", params: ParamLen::Fixed(4) },
    7u8 => WaveOpInfo { name: "gain", params: ParamLen::Fixed(2) },
    8u8 => WaveOpInfo { name: "clip", params: ParamLen::Fixed(1) },
    9u8 => WaveOpInfo { name: "norm", params: ParamLen::Fixed(1) },
    10u8 => WaveOpInfo { name: "phase", params: ParamLen::Fixed(1) },
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WaveOp {
    pub opcode: u8,
    pub params: Vec<u8>,
}

impl WaveOp {
    #[inline]
    pub fn new(opcode: u8, params: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            params: params.into(),
        }
    }
    #[inline]
    pub fn name(&self) -> &'static str {
        WAVE_OPS.get(&self.opcode).map(|i| i.name).unwrap_or("?")
    }
}

/// Waveform descriptor. An empty op list is the default pure sine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Wave {
    pub ops: Vec<WaveOp>,
}

impl Wave {
    pub fn harmonics(coefs: &[u16]) -> Self {
        let mut params = Vec::with_capacity(1 + coefs.len() * 2);
        params.push(coefs.len() as u8);
        for c in coefs {
            params.extend_from_slice(&c.to_be_bytes());
        }
        Self {
            ops: vec![WaveOp::new(WAVE_OP_HARMONICS, params)],
        }
    }
    /// True for the empty wave and for a lone parameterless sine.
    pub fn is_default(&self) -> bool {
        match self.ops.as_slice() {
            [] => true,
            [op] => op.opcode == WAVE_OP_SINE && op.params.is_empty(),
            [op, eof] => {
                op.opcode == WAVE_OP_SINE && op.params.is_empty() && eof.opcode == WAVE_OP_EOF
            }
            _ => false,
        }
    }
    /// Significant ops, without any explicit terminator.
    fn body(&self) -> &[WaveOp] {
        match self.ops.iter().position(|op| op.opcode == WAVE_OP_EOF) {
            Some(p) => &self.ops[..p],
            None => &self.ops,
        }
    }
    /// Compares the serial forms, treating every spelling of the default alike.
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.is_default() || other.is_default() {
            return self.is_default() && other.is_default();
        }
        self.body() == other.body()
    }
    pub fn encode(&self, e: &mut Encoder, compare: Option<&Wave>) -> io::Result<()> {
        let same = match compare {
            Some(compare) => self.equivalent(compare),
            None => self.is_default(),
        };
        if same {
            e.u8(WAVE_OP_EOF);
            return Ok(());
        }
        if self.ops.is_empty() {
            // Spelled out so it doesn't read back as the comparison wave.
            e.u8(WAVE_OP_SINE);
        }
        for op in &self.ops {
            e.u8(op.opcode);
            e.raw(&op.params);
        }
        if self.ops.last().map(|op| op.opcode) != Some(WAVE_OP_EOF) {
            e.u8(WAVE_OP_EOF);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;

    fn encode(wave: &Wave, compare: Option<&Wave>) -> Vec<u8> {
        let mut e = Encoder::new();
        wave.encode(&mut e, compare).unwrap();
        e.finish()
    }

    #[test]
    fn default_wave_is_one_byte() {
        assert_eq!(encode(&Wave::default(), None), [0]);
        let sine = Wave {
            ops: vec![WaveOp::new(WAVE_OP_SINE, [])],
        };
        assert_eq!(encode(&sine, None), [0]);
    }

    #[test]
    fn harmonics_round_trip() {
        let wave = Wave::harmonics(&[0xffff, 0x4000, 0x1000]);
        let serial = encode(&wave, None);
        assert_eq!(serial, [5, 3, 0xff, 0xff, 0x40, 0x00, 0x10, 0x00, 0]);
        let mut d = Decoder::new(&serial);
        assert_eq!(d.wave().unwrap(), wave);
        assert!(d.finished());
    }

    #[test]
    fn comparison_wave() {
        let a = Wave::harmonics(&[0x8000]);
        assert_eq!(encode(&a, Some(&a)), [0]);
        // Default sine differs from `a`, so it must be explicit.
        assert_eq!(encode(&Wave::default(), Some(&a)), [1, 0]);
    }

    #[test]
    fn unknown_opcode_fails() {
        assert!(Decoder::new(&[0x42, 0]).wave().is_err());
        assert!(Decoder::new(&[5, 2, 0xff]).wave().is_err());
    }

    #[test]
    fn missing_wave_is_default() {
        assert!(Decoder::new(&[]).wave().unwrap().is_default());
        assert!(Decoder::new(&[0]).wave().unwrap().is_default());
    }
}
