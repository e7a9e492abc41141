use crate::invalid_data;
use std::io;

/// Largest value a MIDI variable-length quantity can carry.
pub const VLQ_MAX: i64 = 0x0fff_ffff;

/// Width of a backfilled length prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LenWidth {
    U8,
    U16,
    U32,
}

impl LenWidth {
    #[inline]
    fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
    #[inline]
    fn max(self) -> usize {
        match self {
            Self::U8 => 0xff,
            Self::U16 => 0xffff,
            Self::U32 => 0xffff_ffff,
        }
    }
}

/// Append-only byte buffer used by every encoder in the crate.
#[derive(Clone, Debug, Default)]
pub struct Encoder {
    v: Vec<u8>,
}

impl Encoder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            v: Vec::with_capacity(capacity),
        }
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.v.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.v
    }
    #[inline]
    pub fn u8(&mut self, v: u8) {
        self.v.push(v);
    }
    #[inline]
    pub fn u16(&mut self, v: u16) {
        self.v.extend_from_slice(&v.to_be_bytes());
    }
    #[inline]
    pub fn u24(&mut self, v: u32) {
        self.v.extend_from_slice(&v.to_be_bytes()[1..]);
    }
    #[inline]
    pub fn u32(&mut self, v: u32) {
        self.v.extend_from_slice(&v.to_be_bytes());
    }
    #[inline]
    pub fn u16le(&mut self, v: u16) {
        self.v.extend_from_slice(&v.to_le_bytes());
    }
    #[inline]
    pub fn u24le(&mut self, v: u32) {
        self.v.extend_from_slice(&v.to_le_bytes()[..3]);
    }
    #[inline]
    pub fn u32le(&mut self, v: u32) {
        self.v.extend_from_slice(&v.to_le_bytes());
    }
    /// Unsigned 0.8 fixed point, for values in 0..1.
    #[inline]
    pub fn u0_8(&mut self, v: f32) {
        self.u8((v * 256.0).round().clamp(0.0, 255.0) as u8);
    }
    /// Unsigned 8.8 fixed point, for values in 0..256.
    #[inline]
    pub fn u8_8(&mut self, v: f32) {
        self.u16((v * 256.0).round().clamp(0.0, 65535.0) as u16);
    }
    #[inline]
    pub fn raw(&mut self, src: &[u8]) {
        self.v.extend_from_slice(src);
    }
    #[inline]
    pub fn string(&mut self, src: &str) {
        self.raw(src.as_bytes());
    }
    pub fn vlq(&mut self, v: i64) -> io::Result<()> {
        if !(0..=VLQ_MAX).contains(&v) {
            return Err(invalid_data(format_args!("VLQ value {v} out of range")));
        }
        let v = v as u32;
        if v >= 0x20_0000 {
            self.u8(0x80 | (v >> 21) as u8);
        }
        if v >= 0x4000 {
            self.u8(0x80 | ((v >> 14) & 0x7f) as u8);
        }
        if v >= 0x80 {
            self.u8(0x80 | ((v >> 7) & 0x7f) as u8);
        }
        self.u8((v & 0x7f) as u8);
        Ok(())
    }
    /// Reserves a length prefix, runs `f` to write the body, then backfills the
    /// body's length big-endian.
    pub fn len_prefixed(
        &mut self,
        width: LenWidth,
        f: impl FnOnce(&mut Self) -> io::Result<()>,
    ) -> io::Result<()> {
        let lenp = self.v.len();
        self.v.resize(lenp + width.bytes(), 0);
        f(self)?;
        let len = self.v.len() - lenp - width.bytes();
        if len > width.max() {
            return Err(invalid_data(format_args!(
                "block of {len} bytes overflows {}-byte length prefix",
                width.bytes()
            )));
        }
        let len = (len as u32).to_be_bytes();
        self.v[lenp..lenp + width.bytes()].copy_from_slice(&len[4 - width.bytes()..]);
        Ok(())
    }
    /// Shorthand for a length-prefixed raw slice.
    #[inline]
    pub fn len_raw(&mut self, width: LenWidth, src: &[u8]) -> io::Result<()> {
        self.len_prefixed(width, |e| {
            e.raw(src);
            Ok(())
        })
    }
    #[inline]
    pub fn finish(self) -> Vec<u8> {
        let mut v = self.v;
        v.shrink_to_fit();
        v
    }
}

impl io::Write for Encoder {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.raw(buf);
        Ok(buf.len())
    }
    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type FieldWriter<'a> = Box<dyn FnOnce(&mut Encoder) -> io::Result<()> + 'a>;

/// Trailing-field-count elision.
///
/// Fields are registered in wire order along with whether they currently hold
/// their default value. [`Elide::write`] emits fields up to and including the
/// last non-default one, then the record's unparsed tail. A non-empty tail
/// forces every field out, since the reader must consume them all to reach it.
#[derive(Default)]
pub struct Elide<'a> {
    fields: Vec<(bool, FieldWriter<'a>)>,
}

impl<'a> Elide<'a> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
    #[inline]
    pub fn field(
        mut self,
        is_default: bool,
        write: impl FnOnce(&mut Encoder) -> io::Result<()> + 'a,
    ) -> Self {
        self.fields.push((is_default, Box::new(write)));
        self
    }
    /// Number of fields that will be written.
    pub fn count(&self, extra: &[u8]) -> usize {
        if !extra.is_empty() {
            return self.fields.len();
        }
        self.fields
            .iter()
            .rposition(|(is_default, _)| !is_default)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
    pub fn write(self, e: &mut Encoder, extra: &[u8]) -> io::Result<()> {
        let count = self.count(extra);
        for (_, write) in self.fields.into_iter().take(count) {
            write(e)?;
        }
        e.raw(extra);
        Ok(())
    }
}
