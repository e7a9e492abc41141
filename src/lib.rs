pub mod convert;
pub mod decoder;
pub mod encoder;
pub mod env;
pub mod events;
pub mod inspect;
pub mod midi;
pub mod modecfg;
pub mod post;
pub mod song;
pub mod wave;

pub use events::{Event, EventKind, MARKER_EOS};
pub use midi::{midi_song_decode, midi_song_decode_with, midi_song_encode, InstrumentSet};
pub use modecfg::merge_modecfg;
pub use song::{Channel, Name, Song};

/// What a file's leading bytes say it is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    Eau,
    Midi,
}

impl FileKind {
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(song::EAU_MAGIC) {
            Some(Self::Eau)
        } else if data.starts_with(b"MThd") {
            Some(Self::Midi)
        } else {
            None
        }
    }
    pub fn decode(self, data: &[u8]) -> std::io::Result<Song> {
        match self {
            Self::Eau => Song::decode(data),
            Self::Midi => midi_song_decode(data),
        }
    }
    pub fn encode(self, song: &Song) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Eau => song.encode(),
            Self::Midi => midi_song_encode(song),
        }
    }
    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Eau => "eau",
            Self::Midi => "mid",
        }
    }
}

fn convert_error<I: std::ops::Deref<Target = [u8]>>(
    input: I,
    e: nom::Err<nom::error::VerboseError<I>>,
) -> String {
    use std::fmt::Write;

    let e = match e {
        nom::Err::Incomplete(nom::Needed::Unknown) => return "Incomplete".into(),
        nom::Err::Incomplete(nom::Needed::Size(n)) => return format!("Need {n} more bytes"),
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
    };
    let mut result = String::new();
    for (i, (substring, kind)) in e.errors.iter().enumerate() {
        let offset = nom::Offset::offset(&*input, substring);

        if i == 0 {
            write!(&mut result, "Parse error at position 0x{offset:x}")
        } else {
            write!(&mut result, ", 0x{offset:x}")
        }
        .unwrap();

        match kind {
            nom::error::VerboseErrorKind::Char(c) => write!(&mut result, " expecting {c:?}"),
            nom::error::VerboseErrorKind::Context(context) => write!(&mut result, " in {context}"),
            nom::error::VerboseErrorKind::Nom(err) => write!(&mut result, " ({err:?})"),
        }
        .unwrap();
    }
    result
}

#[inline]
fn invalid_data(args: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, args.to_string())
}

#[inline]
fn is_log_level(lvl: log::LevelFilter) -> bool {
    lvl <= log::STATIC_MAX_LEVEL && lvl <= log::max_level()
}

pub(crate) trait NoSeekWrite {
    fn write_no_seek<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

impl<T: binrw::BinWrite> NoSeekWrite for T
where
    Self: binrw::meta::WriteEndian,
    for<'a> T::Args<'a>: Default,
{
    fn write_no_seek<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.write(&mut binrw::io::NoSeek::new(writer))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
