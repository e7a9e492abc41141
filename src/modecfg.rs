//! Per-mode channel configuration.
//!
//! Fielded records (trivial, FM, sub) store their fields in a fixed order and
//! omit any run of trailing defaults. Bytes beyond the known fields are kept
//! in `extra` and written back verbatim.

use crate::{
    decoder::Decoder,
    encoder::{Elide, Encoder, LenWidth},
    env::{Env, EnvUsage},
    wave::Wave,
};
use std::io;

pub const MODE_NOOP: u8 = 0;
pub const MODE_TRIVIAL: u8 = 1;
pub const MODE_FM: u8 = 2;
pub const MODE_SUB: u8 = 3;
pub const MODE_DRUM: u8 = 4;

#[inline]
pub fn mode_name(mode: u8) -> &'static str {
    match mode {
        MODE_NOOP => "noop",
        MODE_TRIVIAL => "trivial",
        MODE_FM => "fm",
        MODE_SUB => "sub",
        MODE_DRUM => "drum",
        _ => "opaque",
    }
}

#[inline]
fn is_fielded(mode: u8) -> bool {
    matches!(mode, MODE_TRIVIAL | MODE_FM | MODE_SUB)
}

/// Reads a wave whose absence means `fallback`. An explicit default wave is
/// normalized to the empty spelling.
fn wave_or(d: &mut Decoder, fallback: &Wave) -> io::Result<Wave> {
    let wave = d.wave()?;
    Ok(if wave.ops.is_empty() {
        fallback.clone()
    } else if wave.is_default() {
        Wave::default()
    } else {
        wave
    })
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trivial {
    pub wheelrange: u16,
    pub minlevel: u16,
    pub maxlevel: u16,
    pub minhold: u16,
    pub rlstime: u16,
    pub extra: Vec<u8>,
}

impl Default for Trivial {
    fn default() -> Self {
        Self {
            wheelrange: 200,
            minlevel: 0x2000,
            maxlevel: 0xffff,
            minhold: 100,
            rlstime: 100,
            extra: Vec::new(),
        }
    }
}

impl Trivial {
    pub fn decode(src: &[u8]) -> Self {
        let def = Self::default();
        let mut d = Decoder::new(src);
        Self {
            wheelrange: d.u16(def.wheelrange),
            minlevel: d.u16(def.minlevel),
            maxlevel: d.u16(def.maxlevel),
            minhold: d.u16(def.minhold),
            rlstime: d.u16(def.rlstime),
            extra: d.remainder().to_vec(),
        }
    }
    pub fn encode(&self, e: &mut Encoder) -> io::Result<()> {
        let def = Self::default();
        Elide::new()
            .field(self.wheelrange == def.wheelrange, |e| Ok(e.u16(self.wheelrange)))
            .field(self.minlevel == def.minlevel, |e| Ok(e.u16(self.minlevel)))
            .field(self.maxlevel == def.maxlevel, |e| Ok(e.u16(self.maxlevel)))
            .field(self.minhold == def.minhold, |e| Ok(e.u16(self.minhold)))
            .field(self.rlstime == def.rlstime, |e| Ok(e.u16(self.rlstime)))
            .write(e, &self.extra)
    }
    /// Peak level of a note struck at `velocity`.
    pub fn level(&self, velocity: u8) -> u16 {
        // TODO: this clamp order pins the weight to zero for every velocity;
        // check the synthesizer's output before swapping min and max.
        let weight = 0.0f32.min(1.0f32.max(velocity as f32 / 127.0));
        let span = self.maxlevel as f32 - self.minlevel as f32;
        (self.minlevel as f32 + span * weight).clamp(0.0, 65535.0) as u16
    }
    /// Audible length in ms of a note held for `durms`, including release.
    pub fn note_ms(&self, velocity: u8, durms: u32) -> u32 {
        let hold = durms.max(self.minhold as u32);
        let release = self.rlstime as u32 * self.level(velocity) as u32 / 0xffff;
        hold + release
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fm {
    pub levelenv: Env,
    pub wheelrange: u16,
    pub wavea: Wave,
    /// Empty or equal to `wavea` when both oscillators share a shape.
    pub waveb: Wave,
    pub mixenv: Env,
    pub modrate: u16,
    pub modrange: u16,
    pub rangeenv: Env,
    pub pitchenv: Env,
    pub modwave: Wave,
    pub rangelforate: f32,
    pub rangelfodepth: u8,
    pub rangelfowave: Wave,
    pub mixlforate: f32,
    pub mixlfodepth: u8,
    pub mixlfowave: Wave,
    pub extra: Vec<u8>,
}

impl Default for Fm {
    fn default() -> Self {
        Self {
            levelenv: Env::new_default(EnvUsage::Level),
            wheelrange: 200,
            wavea: Wave::default(),
            waveb: Wave::default(),
            mixenv: Env::new_default(EnvUsage::Mix),
            modrate: 0,
            modrange: 0x0100,
            rangeenv: Env::new_default(EnvUsage::Range),
            pitchenv: Env::new_default(EnvUsage::Pitch),
            modwave: Wave::default(),
            rangelforate: 0.0,
            rangelfodepth: 0xff,
            rangelfowave: Wave::default(),
            mixlforate: 0.0,
            mixlfodepth: 0xff,
            mixlfowave: Wave::default(),
            extra: Vec::new(),
        }
    }
}

impl Fm {
    pub fn decode(src: &[u8]) -> io::Result<Self> {
        let def = Self::default();
        let sine = Wave::default();
        let mut d = Decoder::new(src);
        let levelenv = d.env(EnvUsage::Level)?;
        let wheelrange = d.u16(def.wheelrange);
        let wavea = wave_or(&mut d, &sine)?;
        let waveb = wave_or(&mut d, &wavea)?;
        Ok(Self {
            levelenv,
            wheelrange,
            wavea,
            waveb,
            mixenv: d.env(EnvUsage::Mix)?,
            modrate: d.u16(def.modrate),
            modrange: d.u16(def.modrange),
            rangeenv: d.env(EnvUsage::Range)?,
            pitchenv: d.env(EnvUsage::Pitch)?,
            modwave: wave_or(&mut d, &sine)?,
            rangelforate: d.u8_8(def.rangelforate),
            rangelfodepth: d.u8(def.rangelfodepth),
            rangelfowave: wave_or(&mut d, &sine)?,
            mixlforate: d.u8_8(def.mixlforate),
            mixlfodepth: d.u8(def.mixlfodepth),
            mixlfowave: wave_or(&mut d, &sine)?,
            extra: d.remainder().to_vec(),
        })
    }
    pub fn encode(&self, e: &mut Encoder) -> io::Result<()> {
        let def = Self::default();
        Elide::new()
            .field(self.levelenv.default, |e| self.levelenv.encode(e))
            .field(self.wheelrange == def.wheelrange, |e| Ok(e.u16(self.wheelrange)))
            .field(self.wavea.is_default(), |e| self.wavea.encode(e, None))
            .field(self.waveb.equivalent(&self.wavea), |e| {
                self.waveb.encode(e, Some(&self.wavea))
            })
            .field(self.mixenv.default, |e| self.mixenv.encode(e))
            .field(self.modrate == def.modrate, |e| Ok(e.u16(self.modrate)))
            .field(self.modrange == def.modrange, |e| Ok(e.u16(self.modrange)))
            .field(self.rangeenv.default, |e| self.rangeenv.encode(e))
            .field(self.pitchenv.default, |e| self.pitchenv.encode(e))
            .field(self.modwave.is_default(), |e| self.modwave.encode(e, None))
            .field(self.rangelforate == def.rangelforate, |e| {
                Ok(e.u8_8(self.rangelforate))
            })
            .field(self.rangelfodepth == def.rangelfodepth, |e| {
                Ok(e.u8(self.rangelfodepth))
            })
            .field(self.rangelfowave.is_default(), |e| {
                self.rangelfowave.encode(e, None)
            })
            .field(self.mixlforate == def.mixlforate, |e| Ok(e.u8_8(self.mixlforate)))
            .field(self.mixlfodepth == def.mixlfodepth, |e| Ok(e.u8(self.mixlfodepth)))
            .field(self.mixlfowave.is_default(), |e| self.mixlfowave.encode(e, None))
            .write(e, &self.extra)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sub {
    pub levelenv: Env,
    pub widthlo: u16,
    pub widthhi: u16,
    pub stagec: u8,
    pub gain: f32,
    pub extra: Vec<u8>,
}

impl Default for Sub {
    fn default() -> Self {
        Self {
            levelenv: Env::new_default(EnvUsage::Level),
            widthlo: 200,
            widthhi: 200,
            stagec: 1,
            gain: 1.0,
            extra: Vec::new(),
        }
    }
}

impl Sub {
    pub fn decode(src: &[u8]) -> io::Result<Self> {
        let def = Self::default();
        let mut d = Decoder::new(src);
        let levelenv = d.env(EnvUsage::Level)?;
        let widthlo = d.u16(def.widthlo);
        Ok(Self {
            levelenv,
            widthlo,
            widthhi: d.u16(widthlo),
            stagec: d.u8(def.stagec),
            gain: d.u8_8(def.gain),
            extra: d.remainder().to_vec(),
        })
    }
    pub fn encode(&self, e: &mut Encoder) -> io::Result<()> {
        let def = Self::default();
        Elide::new()
            .field(self.levelenv.default, |e| self.levelenv.encode(e))
            .field(self.widthlo == def.widthlo, |e| Ok(e.u16(self.widthlo)))
            .field(self.widthhi == self.widthlo, |e| Ok(e.u16(self.widthhi)))
            .field(self.stagec == def.stagec, |e| Ok(e.u8(self.stagec)))
            .field(self.gain == def.gain, |e| Ok(e.u8_8(self.gain)))
            .write(e, &self.extra)
    }
}

/// One drum kit entry. `serial` is a complete nested EAU song.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DrumNote {
    pub noteid: u8,
    pub trimlo: u8,
    pub trimhi: u8,
    pub pan: u8,
    pub serial: Vec<u8>,
}

pub fn decode_drums(src: &[u8]) -> Vec<DrumNote> {
    let mut d = Decoder::new(src);
    let mut notes = Vec::new();
    while !d.finished() {
        let start = d.position();
        let entry = d.take(4).and_then(|head| {
            let len = u16::from_be_bytes(d.take(2)?.try_into().ok()?);
            let serial = d.take(len as usize)?;
            Some(DrumNote {
                noteid: head[0],
                trimlo: head[1],
                trimhi: head[2],
                pan: head[3],
                serial: serial.to_vec(),
            })
        });
        match entry {
            Some(note) => notes.push(note),
            None => {
                log::warn!(
                    "Dropping truncated drum entry at offset {start} ({} bytes)",
                    src.len() - start
                );
                break;
            }
        }
    }
    notes
}

pub fn encode_drums(notes: &[DrumNote], e: &mut Encoder) -> io::Result<()> {
    for note in notes {
        e.raw(&[note.noteid, note.trimlo, note.trimhi, note.pan]);
        e.len_raw(LenWidth::U16, &note.serial)?;
    }
    Ok(())
}

/// Typed view of a channel's modecfg block.
#[derive(Clone, Debug, PartialEq)]
pub enum Modecfg {
    Noop(Vec<u8>),
    Trivial(Trivial),
    Fm(Box<Fm>),
    Sub(Sub),
    Drum(Vec<DrumNote>),
    Opaque { mode: u8, data: Vec<u8> },
}

impl Modecfg {
    pub fn decode(mode: u8, src: &[u8]) -> io::Result<Self> {
        Ok(match mode {
            MODE_NOOP => Self::Noop(src.to_vec()),
            MODE_TRIVIAL => Self::Trivial(Trivial::decode(src)),
            MODE_FM => Self::Fm(Box::new(Fm::decode(src)?)),
            MODE_SUB => Self::Sub(Sub::decode(src)?),
            MODE_DRUM => Self::Drum(decode_drums(src)),
            mode => Self::Opaque {
                mode,
                data: src.to_vec(),
            },
        })
    }
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut e = Encoder::new();
        match self {
            Self::Noop(data) | Self::Opaque { data, .. } => e.raw(data),
            Self::Trivial(cfg) => cfg.encode(&mut e)?,
            Self::Fm(cfg) => cfg.encode(&mut e)?,
            Self::Sub(cfg) => cfg.encode(&mut e)?,
            Self::Drum(notes) => encode_drums(notes, &mut e)?,
        }
        Ok(e.finish())
    }
    pub fn mode(&self) -> u8 {
        match self {
            Self::Noop(_) => MODE_NOOP,
            Self::Trivial(_) => MODE_TRIVIAL,
            Self::Fm(_) => MODE_FM,
            Self::Sub(_) => MODE_SUB,
            Self::Drum(_) => MODE_DRUM,
            Self::Opaque { mode, .. } => *mode,
        }
    }
    pub fn levelenv(&self) -> Option<&Env> {
        match self {
            Self::Fm(cfg) => Some(&cfg.levelenv),
            Self::Sub(cfg) => Some(&cfg.levelenv),
            _ => None,
        }
    }
    fn levelenv_mut(&mut self) -> Option<&mut Env> {
        match self {
            Self::Fm(cfg) => Some(&mut cfg.levelenv),
            Self::Sub(cfg) => Some(&mut cfg.levelenv),
            _ => None,
        }
    }
    pub fn wheelrange(&self) -> Option<u16> {
        match self {
            Self::Trivial(cfg) => Some(cfg.wheelrange),
            Self::Fm(cfg) => Some(cfg.wheelrange),
            _ => None,
        }
    }
    fn wheelrange_mut(&mut self) -> Option<&mut u16> {
        match self {
            Self::Trivial(cfg) => Some(&mut cfg.wheelrange),
            Self::Fm(cfg) => Some(&mut cfg.wheelrange),
            _ => None,
        }
    }
}

/// Builds the modecfg for a channel switching from `old_mode` to `new_mode`.
///
/// Fields shared by both modes keep their old values, the rest come from
/// `stash` (the config last used with `new_mode`) or defaults. Transitions
/// involving a non-fielded mode return the stash verbatim.
pub fn merge_modecfg(
    old_mode: u8,
    old: &[u8],
    new_mode: u8,
    stash: Option<&[u8]>,
) -> io::Result<Vec<u8>> {
    if old_mode == new_mode {
        return Ok(old.to_vec());
    }
    if old.is_empty() || !is_fielded(old_mode) || !is_fielded(new_mode) {
        return Ok(stash.map(<[u8]>::to_vec).unwrap_or_default());
    }
    let old = Modecfg::decode(old_mode, old)?;
    let mut new = Modecfg::decode(new_mode, stash.unwrap_or_default())?;
    if let (Some(src), Some(dst)) = (old.levelenv(), new.levelenv_mut()) {
        *dst = src.clone();
    }
    if let (Some(src), Some(dst)) = (old.wheelrange(), new.wheelrange_mut()) {
        *dst = src;
    }
    new.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvPoint;
    use crate::wave::WaveOp;

    #[test]
    fn trivial_elision() {
        assert!(Modecfg::Trivial(Trivial::default())
            .encode()
            .unwrap()
            .is_empty());
        let cfg = Trivial {
            wheelrange: 300,
            ..Default::default()
        };
        assert_eq!(Modecfg::Trivial(cfg).encode().unwrap(), [0x01, 0x2c]);
        let cfg = Trivial {
            minhold: 5,
            ..Default::default()
        };
        assert_eq!(
            Modecfg::Trivial(cfg.clone()).encode().unwrap(),
            [0x00, 0xc8, 0x20, 0x00, 0xff, 0xff, 0x00, 0x05]
        );
        assert_eq!(Trivial::decode(&[0x00, 0xc8, 0x20, 0x00, 0xff, 0xff, 0x00, 0x05]), cfg);
    }

    #[test]
    fn trivial_extra_forces_fields() {
        let cfg = Trivial::decode(&[0, 200, 0x20, 0, 0xff, 0xff, 0, 100, 0, 100, 0xaa]);
        assert_eq!(cfg.extra, [0xaa]);
        assert_eq!(cfg.encode_vec(), [0, 200, 0x20, 0, 0xff, 0xff, 0, 100, 0, 100, 0xaa]);
    }

    impl Trivial {
        fn encode_vec(&self) -> Vec<u8> {
            let mut e = Encoder::new();
            self.encode(&mut e).unwrap();
            e.finish()
        }
    }

    #[test]
    fn trivial_truncated_field_defaults() {
        let cfg = Trivial::decode(&[0x01, 0x00, 0x30]);
        assert_eq!(cfg.wheelrange, 0x100);
        assert_eq!(cfg.minlevel, 0x2000);
        assert!(cfg.extra.is_empty());
    }

    #[test]
    fn trivial_level_ignores_velocity() {
        let cfg = Trivial::default();
        assert_eq!(cfg.level(0), cfg.minlevel);
        assert_eq!(cfg.level(127), cfg.minlevel);
        assert_eq!(cfg.note_ms(127, 10), 100 + 100 * 0x2000 / 0xffff);
    }

    #[test]
    fn fm_default_is_empty() {
        assert!(Modecfg::Fm(Box::default()).encode().unwrap().is_empty());
        let cfg = Fm::decode(&[]).unwrap();
        assert_eq!(cfg, Fm::default());
    }

    #[test]
    fn fm_waveb_follows_wavea() {
        let fm = Fm {
            wavea: Wave::harmonics(&[0xffff, 0x8000]),
            waveb: Wave::harmonics(&[0xffff, 0x8000]),
            ..Default::default()
        };
        let serial = Modecfg::Fm(Box::new(fm.clone())).encode().unwrap();
        // levelenv, wheelrange, wavea; waveb elided as equal to wavea
        assert_eq!(serial, [0, 0, 200, 5, 2, 0xff, 0xff, 0x80, 0x00, 0]);
        let back = Fm::decode(&serial).unwrap();
        assert_eq!(back, fm);

        // Sine on B against a non-sine A must stay explicit.
        let fm = Fm {
            waveb: Wave::default(),
            mixlfodepth: 0x10,
            ..fm
        };
        let serial = Modecfg::Fm(Box::new(fm.clone())).encode().unwrap();
        let back = Fm::decode(&serial).unwrap();
        assert_eq!(back, fm);
    }

    #[test]
    fn fm_late_field() {
        let mut fm = Fm {
            rangelforate: 2.5,
            ..Default::default()
        };
        fm.pitchenv = Env::constant(EnvUsage::Pitch, 0x9000);
        fm.pitchenv.lo.push(EnvPoint::new(10, 0x8000));
        let serial = Modecfg::Fm(Box::new(fm.clone())).encode().unwrap();
        let back = Fm::decode(&serial).unwrap();
        assert_eq!(back, fm);
    }

    #[test]
    fn fm_bad_wave_is_error() {
        assert!(Fm::decode(&[0, 0, 200, 0x7e]).is_err());
    }

    #[test]
    fn sub_widthhi_follows_widthlo() {
        let sub = Sub {
            widthlo: 500,
            widthhi: 500,
            ..Default::default()
        };
        let mut e = Encoder::new();
        sub.encode(&mut e).unwrap();
        assert_eq!(e.as_slice(), [0, 0x01, 0xf4]);
        let back = Sub::decode(e.as_slice()).unwrap();
        assert_eq!(back, sub);
        let sub = Sub {
            gain: 0.5,
            ..Default::default()
        };
        let mut e = Encoder::new();
        sub.encode(&mut e).unwrap();
        assert_eq!(e.as_slice(), [0, 0, 200, 0, 200, 1, 0x00, 0x80]);
    }

    #[test]
    fn drums_truncated_tail() {
        let src = [
            36, 0x40, 0x80, 0x80, 0, 2, 0xaa, 0xbb, //
            38, 0x40, 0x80, 0x80, 0, 9, 0xcc,
        ];
        let notes = decode_drums(&src);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].noteid, 36);
        assert_eq!(notes[0].serial, [0xaa, 0xbb]);
        let cfg = Modecfg::Drum(notes);
        assert_eq!(cfg.encode().unwrap(), src[..8]);
    }

    #[test]
    fn opaque_modes_pass_through() {
        let cfg = Modecfg::decode(9, &[1, 2, 3]).unwrap();
        assert_eq!(
            cfg,
            Modecfg::Opaque {
                mode: 9,
                data: vec![1, 2, 3]
            }
        );
        assert_eq!(cfg.encode().unwrap(), [1, 2, 3]);
        assert_eq!(Modecfg::decode(0, &[4]).unwrap().encode().unwrap(), [4]);
    }

    #[test]
    fn merge_keeps_common_fields() {
        let trivial = Modecfg::Trivial(Trivial {
            wheelrange: 1200,
            minhold: 7,
            ..Default::default()
        })
        .encode()
        .unwrap();
        let fm = merge_modecfg(MODE_TRIVIAL, &trivial, MODE_FM, None).unwrap();
        let fm = Fm::decode(&fm).unwrap();
        assert_eq!(fm.wheelrange, 1200);
        assert_eq!(fm.modrange, 0x100);

        let stash = Modecfg::Fm(Box::new(Fm {
            modrate: 3,
            wavea: Wave {
                ops: vec![WaveOp::new(4, [])],
            },
            ..Default::default()
        }))
        .encode()
        .unwrap();
        let fm = merge_modecfg(MODE_TRIVIAL, &trivial, MODE_FM, Some(&stash)).unwrap();
        let fm = Fm::decode(&fm).unwrap();
        assert_eq!(fm.wheelrange, 1200);
        assert_eq!(fm.modrate, 3);
        assert_eq!(fm.wavea.ops[0].name(), "triangle");
    }

    #[test]
    fn merge_fm_to_sub_keeps_levelenv() {
        let mut levelenv = Env::constant(EnvUsage::Level, 0x1234);
        levelenv.lo.push(EnvPoint::new(5, 0));
        let fm = Modecfg::Fm(Box::new(Fm {
            levelenv: levelenv.clone(),
            ..Default::default()
        }))
        .encode()
        .unwrap();
        let sub = merge_modecfg(MODE_FM, &fm, MODE_SUB, None).unwrap();
        let sub = Sub::decode(&sub).unwrap();
        assert_eq!(sub.levelenv, levelenv);
        assert_eq!(sub.stagec, 1);
    }

    #[test]
    fn merge_across_unfielded_modes_uses_stash() {
        let trivial = [0x01, 0x2c];
        assert!(merge_modecfg(MODE_TRIVIAL, &trivial, MODE_DRUM, None)
            .unwrap()
            .is_empty());
        assert_eq!(
            merge_modecfg(MODE_DRUM, &[1, 2, 3, 4, 0, 0], MODE_TRIVIAL, Some(&[9, 9])).unwrap(),
            [9, 9]
        );
        assert_eq!(
            merge_modecfg(MODE_TRIVIAL, &[], MODE_FM, Some(&[0])).unwrap(),
            [0]
        );
        assert_eq!(
            merge_modecfg(MODE_FM, &trivial, MODE_FM, None).unwrap(),
            trivial
        );
    }
}
