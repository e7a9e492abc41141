//! Post-synthesis effect pipeline: a flat run of `{u8 stageid, u8 len, body}`.

use crate::{
    decoder::Decoder,
    encoder::{Elide, Encoder, LenWidth},
};
use std::io;

pub const STAGE_GAIN: u8 = 1;
pub const STAGE_DELAY: u8 = 2;
pub const STAGE_TREMOLO: u8 = 3;
pub const STAGE_DETUNE: u8 = 4;
pub const STAGE_WAVESHAPER: u8 = 5;
pub const STAGE_LOPASS: u8 = 6;
pub const STAGE_HIPASS: u8 = 7;
pub const STAGE_BPASS: u8 = 8;
pub const STAGE_NOTCH: u8 = 9;

#[derive(Clone, Debug, PartialEq)]
pub struct Gain {
    pub gain: f32,
    pub clip: u8,
    pub gate: u8,
    pub extra: Vec<u8>,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            gain: 1.0,
            clip: 0xff,
            gate: 0,
            extra: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delay {
    pub period: f32,
    pub dry: u8,
    pub wet: u8,
    pub store: u8,
    pub feedback: u8,
    pub sparkle: u8,
    pub extra: Vec<u8>,
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            period: 1.0,
            dry: 0x80,
            wet: 0x80,
            store: 0x80,
            feedback: 0x80,
            sparkle: 0x80,
            extra: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tremolo {
    pub period: f32,
    pub depth: u8,
    pub phase: u8,
    pub sparkle: u8,
    pub extra: Vec<u8>,
}

impl Default for Tremolo {
    fn default() -> Self {
        Self {
            period: 1.0,
            depth: 0xff,
            phase: 0,
            sparkle: 0x80,
            extra: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detune {
    pub period: f32,
    pub mix: u8,
    pub depth: u8,
    pub phase: u8,
    pub rightphase: u8,
    pub extra: Vec<u8>,
}

impl Default for Detune {
    fn default() -> Self {
        Self {
            period: 1.0,
            mix: 0x80,
            depth: 0x80,
            phase: 0,
            rightphase: 0,
            extra: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterKind {
    Lopass,
    Hipass,
    Bpass,
    Notch,
}

impl FilterKind {
    #[inline]
    pub fn stageid(self) -> u8 {
        match self {
            Self::Lopass => STAGE_LOPASS,
            Self::Hipass => STAGE_HIPASS,
            Self::Bpass => STAGE_BPASS,
            Self::Notch => STAGE_NOTCH,
        }
    }
    #[inline]
    fn default_width(self) -> u16 {
        match self {
            Self::Lopass | Self::Hipass => 0,
            Self::Bpass | Self::Notch => 100,
        }
    }
}

/// Filter stages are carried for editing; the synthesizer ignores them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter {
    pub kind: FilterKind,
    pub freq: u16,
    pub width: u16,
    pub extra: Vec<u8>,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            freq: 1000,
            width: kind.default_width(),
            extra: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PostStage {
    Gain(Gain),
    Delay(Delay),
    Tremolo(Tremolo),
    Detune(Detune),
    /// Coefficient table; an odd trailing byte is kept in `extra`.
    Waveshaper { coefs: Vec<u16>, extra: Vec<u8> },
    Filter(Filter),
    Unknown { stageid: u8, body: Vec<u8> },
}

impl PostStage {
    pub fn stageid(&self) -> u8 {
        match self {
            Self::Gain(_) => STAGE_GAIN,
            Self::Delay(_) => STAGE_DELAY,
            Self::Tremolo(_) => STAGE_TREMOLO,
            Self::Detune(_) => STAGE_DETUNE,
            Self::Waveshaper { .. } => STAGE_WAVESHAPER,
            Self::Filter(f) => f.kind.stageid(),
            Self::Unknown { stageid, .. } => *stageid,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gain(_) => "gain",
            Self::Delay(_) => "delay",
            Self::Tremolo(_) => "tremolo",
            Self::Detune(_) => "detune",
            Self::Waveshaper { .. } => "waveshaper",
            Self::Filter(f) => match f.kind {
                FilterKind::Lopass => "lopass",
                FilterKind::Hipass => "hipass",
                FilterKind::Bpass => "bpass",
                FilterKind::Notch => "notch",
            },
            Self::Unknown { .. } => "unknown",
        }
    }
    pub fn decode(stageid: u8, body: &[u8]) -> Self {
        let mut d = Decoder::new(body);
        match stageid {
            STAGE_GAIN => {
                let def = Gain::default();
                Self::Gain(Gain {
                    gain: d.u8_8(def.gain),
                    clip: d.u8(def.clip),
                    gate: d.u8(def.gate),
                    extra: d.remainder().to_vec(),
                })
            }
            STAGE_DELAY => {
                let def = Delay::default();
                Self::Delay(Delay {
                    period: d.u8_8(def.period),
                    dry: d.u8(def.dry),
                    wet: d.u8(def.wet),
                    store: d.u8(def.store),
                    feedback: d.u8(def.feedback),
                    sparkle: d.u8(def.sparkle),
                    extra: d.remainder().to_vec(),
                })
            }
            STAGE_TREMOLO => {
                let def = Tremolo::default();
                Self::Tremolo(Tremolo {
                    period: d.u8_8(def.period),
                    depth: d.u8(def.depth),
                    phase: d.u8(def.phase),
                    sparkle: d.u8(def.sparkle),
                    extra: d.remainder().to_vec(),
                })
            }
            STAGE_DETUNE => {
                let def = Detune::default();
                Self::Detune(Detune {
                    period: d.u8_8(def.period),
                    mix: d.u8(def.mix),
                    depth: d.u8(def.depth),
                    phase: d.u8(def.phase),
                    rightphase: d.u8(def.rightphase),
                    extra: d.remainder().to_vec(),
                })
            }
            STAGE_WAVESHAPER => {
                let chunks = body.chunks_exact(2);
                let extra = chunks.remainder().to_vec();
                let coefs = chunks
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Self::Waveshaper { coefs, extra }
            }
            STAGE_LOPASS | STAGE_HIPASS | STAGE_BPASS | STAGE_NOTCH => {
                let kind = match stageid {
                    STAGE_LOPASS => FilterKind::Lopass,
                    STAGE_HIPASS => FilterKind::Hipass,
                    STAGE_BPASS => FilterKind::Bpass,
                    _ => FilterKind::Notch,
                };
                let def = Filter::new(kind);
                Self::Filter(Filter {
                    kind,
                    freq: d.u16(def.freq),
                    width: d.u16(def.width),
                    extra: d.remainder().to_vec(),
                })
            }
            stageid => Self::Unknown {
                stageid,
                body: body.to_vec(),
            },
        }
    }
    fn encode_body(&self, e: &mut Encoder) -> io::Result<()> {
        match self {
            Self::Gain(s) => {
                let def = Gain::default();
                Elide::new()
                    .field(s.gain == def.gain, |e| Ok(e.u8_8(s.gain)))
                    .field(s.clip == def.clip, |e| Ok(e.u8(s.clip)))
                    .field(s.gate == def.gate, |e| Ok(e.u8(s.gate)))
                    .write(e, &s.extra)
            }
            Self::Delay(s) => {
                let def = Delay::default();
                Elide::new()
                    .field(s.period == def.period, |e| Ok(e.u8_8(s.period)))
                    .field(s.dry == def.dry, |e| Ok(e.u8(s.dry)))
                    .field(s.wet == def.wet, |e| Ok(e.u8(s.wet)))
                    .field(s.store == def.store, |e| Ok(e.u8(s.store)))
                    .field(s.feedback == def.feedback, |e| Ok(e.u8(s.feedback)))
                    .field(s.sparkle == def.sparkle, |e| Ok(e.u8(s.sparkle)))
                    .write(e, &s.extra)
            }
            Self::Tremolo(s) => {
                let def = Tremolo::default();
                Elide::new()
                    .field(s.period == def.period, |e| Ok(e.u8_8(s.period)))
                    .field(s.depth == def.depth, |e| Ok(e.u8(s.depth)))
                    .field(s.phase == def.phase, |e| Ok(e.u8(s.phase)))
                    .field(s.sparkle == def.sparkle, |e| Ok(e.u8(s.sparkle)))
                    .write(e, &s.extra)
            }
            Self::Detune(s) => {
                let def = Detune::default();
                Elide::new()
                    .field(s.period == def.period, |e| Ok(e.u8_8(s.period)))
                    .field(s.mix == def.mix, |e| Ok(e.u8(s.mix)))
                    .field(s.depth == def.depth, |e| Ok(e.u8(s.depth)))
                    .field(s.phase == def.phase, |e| Ok(e.u8(s.phase)))
                    .field(s.rightphase == def.rightphase, |e| Ok(e.u8(s.rightphase)))
                    .write(e, &s.extra)
            }
            Self::Waveshaper { coefs, extra } => {
                for c in coefs {
                    e.u16(*c);
                }
                e.raw(extra);
                Ok(())
            }
            Self::Filter(s) => {
                let def = Filter::new(s.kind);
                Elide::new()
                    .field(s.freq == def.freq, |e| Ok(e.u16(s.freq)))
                    .field(s.width == def.width, |e| Ok(e.u16(s.width)))
                    .write(e, &s.extra)
            }
            Self::Unknown { body, .. } => {
                e.raw(body);
                Ok(())
            }
        }
    }
    pub fn encode(&self, e: &mut Encoder) -> io::Result<()> {
        e.u8(self.stageid());
        e.len_prefixed(LenWidth::U8, |e| self.encode_body(e))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Post {
    pub stages: Vec<PostStage>,
    /// Bytes after the last complete stage record.
    pub extra: Vec<u8>,
}

impl Post {
    pub fn decode(src: &[u8]) -> Self {
        let mut d = Decoder::new(src);
        let mut post = Self::default();
        while !d.finished() {
            let start = d.position();
            let stage = d.take(1).and_then(|id| {
                let len = d.take(1)?[0] as usize;
                Some(PostStage::decode(id[0], d.take(len)?))
            });
            match stage {
                Some(stage) => post.stages.push(stage),
                None => {
                    log::warn!("Truncated post stage at offset {start}");
                    post.extra = src[start..].to_vec();
                    break;
                }
            }
        }
        post
    }
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut e = Encoder::new();
        for stage in &self.stages {
            stage.encode(&mut e)?;
        }
        e.raw(&self.extra);
        Ok(e.finish())
    }
}
