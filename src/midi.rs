//! Standard MIDI File bridge.
//!
//! EAU channel headers travel through MIDI as meta event 0x77 so a song
//! survives a round trip. Files without them get channels built from
//! program, bank, volume and pan messages.

use crate::{
    convert_error,
    decoder::Decoder,
    encoder::{Encoder, LenWidth},
    events::{Event, EventKind, MARKER_EOS},
    invalid_data,
    song::{Channel, Song, DEFAULT_TEMPO, MAX_TEMPO},
};
use binrw::BinRead;
use indexmap::IndexMap;
use nom::{
    bytes::complete::{tag, take},
    error::{context, ContextError, ParseError, VerboseError},
    multi::length_data,
    number::complete::{be_u16, be_u32},
    sequence::{pair, preceded, tuple},
};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    io::{self, Cursor},
};

pub const META_CHANNEL_HEADER: u8 = 0x77;
const META_MARKER: u8 = 0x06;
const META_END_OF_TRACK: u8 = 0x2f;
const META_TEMPO: u8 = 0x51;
const DEFAULT_US_PER_QUARTER: u32 = 500000;

const CC_BANK_MSB: u8 = 0;
const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_BANK_LSB: u8 = 32;

/// Supplies channel templates for MIDI programs.
pub trait InstrumentSet {
    /// Template for `program`, which is `bank << 7 | program` with the bank
    /// assembled from CC 0 (high) and CC 32 (low).
    fn instrument(&self, program: u32) -> Option<Channel>;
}

struct Smf<'a> {
    division: u16,
    tracks: Vec<&'a [u8]>,
}

fn parse_smf<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
    data: &'a [u8],
) -> nom::IResult<&'a [u8], Smf<'a>, E> {
    let (mut data, header) = context("MThd", preceded(tag(b"MThd"), length_data(be_u32)))(data)?;
    let (_, (format, ntracks, division)) =
        context("MThd fields", tuple((be_u16, be_u16, be_u16)))(header)?;
    log::debug!("SMF format {format}, {ntracks} tracks, division {division:#06x}");

    let mut tracks = Vec::with_capacity(ntracks as usize);
    while data.len() >= 8 {
        let (d, (id, body)) = context("chunk", pair(take(4usize), length_data(be_u32)))(data)?;
        if id == b"MTrk" {
            tracks.push(body);
        } else {
            log::debug!(
                "Skipping {:?} chunk ({} bytes)",
                String::from_utf8_lossy(id),
                body.len()
            );
        }
        data = d;
    }
    if tracks.len() != ntracks as usize {
        log::warn!("Header announces {ntracks} tracks, found {}", tracks.len());
    }
    Ok((data, Smf { division, tracks }))
}

#[derive(Clone, Copy, Debug)]
enum Msg<'a> {
    NoteOff { channel: u8, key: u8 },
    NoteOn { channel: u8, key: u8, velocity: u8 },
    Control { channel: u8, control: u8, value: u8 },
    Program { channel: u8, program: u8 },
    PitchBend { channel: u8, value: u16 },
    Tempo(u32),
    Marker(&'a [u8]),
    Header(&'a [u8]),
    EndOfTrack,
    Other,
}

#[derive(Clone, Copy, Debug)]
struct Timed<'a> {
    tick: u64,
    track: u16,
    msg: Msg<'a>,
}

fn read_message<'a>(d: &mut Decoder<'a>, status: &mut u8) -> Option<Msg<'a>> {
    let lead = match d.peek()? {
        b if b & 0x80 != 0 => {
            d.take(1)?;
            b
        }
        _ if *status != 0 => *status,
        _ => return None,
    };
    match lead {
        0xff => {
            *status = 0;
            let kind = d.take(1)?[0];
            let len = d.vlq(u32::MAX);
            let data = d.take(len as usize)?;
            Some(match kind {
                META_END_OF_TRACK => Msg::EndOfTrack,
                META_TEMPO if data.len() == 3 => {
                    Msg::Tempo(u32::from_be_bytes([0, data[0], data[1], data[2]]))
                }
                META_MARKER => Msg::Marker(data),
                META_CHANNEL_HEADER => Msg::Header(data),
                _ => Msg::Other,
            })
        }
        0xf0 | 0xf7 => {
            *status = 0;
            let len = d.vlq(u32::MAX);
            d.take(len as usize)?;
            Some(Msg::Other)
        }
        0xf1..=0xfe => None,
        _ => {
            *status = lead;
            let channel = lead & 0x0f;
            let b = match lead & 0xf0 {
                0xc0 | 0xd0 => d.take(1)?,
                _ => d.take(2)?,
            };
            let arg = |i: usize| b[i] & 0x7f;
            Some(match lead & 0xf0 {
                0x80 => Msg::NoteOff {
                    channel,
                    key: arg(0),
                },
                0x90 if arg(1) == 0 => Msg::NoteOff {
                    channel,
                    key: arg(0),
                },
                0x90 => Msg::NoteOn {
                    channel,
                    key: arg(0),
                    velocity: arg(1),
                },
                0xb0 => Msg::Control {
                    channel,
                    control: arg(0),
                    value: arg(1),
                },
                0xc0 => Msg::Program {
                    channel,
                    program: arg(0),
                },
                0xe0 => Msg::PitchBend {
                    channel,
                    value: arg(0) as u16 | (arg(1) as u16) << 7,
                },
                _ => Msg::Other,
            })
        }
    }
}

fn read_track(track: u16, src: &[u8]) -> Vec<Timed<'_>> {
    let mut d = Decoder::new(src);
    let mut out = Vec::new();
    let mut tick = 0u64;
    let mut status = 0u8;
    while !d.finished() {
        let delta = d.vlq(u32::MAX);
        if delta == u32::MAX {
            log::warn!("Truncated delta time in track {track}");
            break;
        }
        tick += delta as u64;
        let start = d.position();
        match read_message(&mut d, &mut status) {
            Some(msg) => {
                out.push(Timed { tick, track, msg });
                if matches!(msg, Msg::EndOfTrack) {
                    break;
                }
            }
            None => {
                log::warn!("Malformed event in track {track} at offset {start:#x}");
                break;
            }
        }
    }
    out
}

#[derive(Clone, Copy, Debug)]
struct TempoPoint {
    tick: u64,
    ms: f64,
    us_per_quarter: u32,
}

#[derive(Clone, Debug)]
enum TempoMap {
    Metrical {
        ticks_per_quarter: u16,
        points: Vec<TempoPoint>,
    },
    Smpte {
        ms_per_tick: f64,
    },
}

impl TempoMap {
    fn new(division: u16, changes: impl Iterator<Item = (u64, u32)>) -> io::Result<Self> {
        if division & 0x8000 != 0 {
            let fps = match ((division >> 8) as u8 as i8).wrapping_neg() {
                29 => 29.97,
                fps @ (24 | 25 | 30) => fps as f64,
                fps => return Err(invalid_data(format_args!("invalid SMPTE rate {fps}"))),
            };
            let ticks_per_frame = division & 0xff;
            if ticks_per_frame == 0 {
                return Err(invalid_data("SMPTE division with zero ticks per frame"));
            }
            return Ok(Self::Smpte {
                ms_per_tick: 1000.0 / (fps * ticks_per_frame as f64),
            });
        }
        if division == 0 {
            return Err(invalid_data("MIDI division is zero"));
        }
        let mut map = Self::Metrical {
            ticks_per_quarter: division,
            points: vec![TempoPoint {
                tick: 0,
                ms: 0.0,
                us_per_quarter: DEFAULT_US_PER_QUARTER,
            }],
        };
        for (tick, us_per_quarter) in changes {
            if us_per_quarter == 0 {
                log::warn!("Ignoring zero tempo at tick {tick}");
                continue;
            }
            let ms = map.ms_exact(tick);
            if let Self::Metrical { points, .. } = &mut map {
                points.push(TempoPoint {
                    tick,
                    ms,
                    us_per_quarter,
                });
            }
        }
        Ok(map)
    }
    /// A tempo change takes effect strictly after its own tick.
    fn ms_exact(&self, tick: u64) -> f64 {
        match self {
            Self::Metrical {
                ticks_per_quarter,
                points,
            } => {
                let i = points.partition_point(|p| p.tick < tick);
                let p = points[i.saturating_sub(1)];
                p.ms + (tick - p.tick) as f64 * p.us_per_quarter as f64
                    / 1000.0
                    / *ticks_per_quarter as f64
            }
            Self::Smpte { ms_per_tick } => tick as f64 * ms_per_tick,
        }
    }
    #[inline]
    fn ms(&self, tick: u64) -> u32 {
        self.ms_exact(tick).round().min(u32::MAX as f64) as u32
    }
}

#[derive(Clone, Debug, Default)]
struct ChannelState {
    program: Option<u8>,
    bank_msb: u8,
    bank_lsb: u8,
    trim: Option<u8>,
    pan: Option<u8>,
    header: Option<Channel>,
}

impl ChannelState {
    fn into_channel(self, chid: u8, instruments: Option<&dyn InstrumentSet>) -> Channel {
        if let Some(header) = self.header {
            return header;
        }
        let bank = (self.bank_msb as u32) << 7 | self.bank_lsb as u32;
        let program = bank << 7 | self.program.unwrap_or(0) as u32;
        let mut channel = match instruments.and_then(|set| set.instrument(program)) {
            Some(template) => Channel {
                chid,
                ..template
            },
            None => {
                if instruments.is_some() {
                    log::warn!("No instrument for program {program:#x} on channel {chid}");
                }
                Channel::new(chid)
            }
        };
        if let Some(trim) = self.trim {
            channel.trim = trim;
        }
        if let Some(pan) = self.pan {
            channel.pan = pan;
        }
        channel
    }
}

#[inline]
pub fn midi_song_decode(src: &[u8]) -> io::Result<Song> {
    decode(src, None)
}

/// Like [`midi_song_decode`], taking channel templates from `instruments`.
#[inline]
pub fn midi_song_decode_with(src: &[u8], instruments: &dyn InstrumentSet) -> io::Result<Song> {
    decode(src, Some(instruments))
}

fn decode(src: &[u8], instruments: Option<&dyn InstrumentSet>) -> io::Result<Song> {
    let (_, smf) = parse_smf::<VerboseError<&[u8]>>(src)
        .map_err(|e| invalid_data(convert_error(src, e)))?;

    let mut timed = smf
        .tracks
        .iter()
        .enumerate()
        .flat_map(|(i, track)| read_track(i as u16, track))
        .collect::<Vec<_>>();
    // Ties go to the lower track, then to stream order within a track.
    timed.sort_by_key(|t| (t.tick, t.track));

    let tempos = timed.iter().filter_map(|t| match t.msg {
        Msg::Tempo(us) => Some((t.tick, us)),
        _ => None,
    });
    let first_tempo = tempos.clone().next();
    let map = TempoMap::new(smf.division, tempos)?;

    let mut song = Song::new();
    song.tempo = match first_tempo {
        Some((_, us)) => (us / 1000).clamp(1, MAX_TEMPO as u32) as u16,
        None => DEFAULT_TEMPO,
    };

    let mut states: IndexMap<u8, ChannelState> = IndexMap::new();
    let mut open: HashMap<(u16, u8, u8), VecDeque<usize>> = HashMap::new();
    let mut end_of_track: Option<(u32, u16)> = None;
    for t in &timed {
        let time = map.ms(t.tick);
        let track = t.track;
        match t.msg {
            Msg::NoteOn {
                channel,
                key,
                velocity,
            } => {
                states.entry(channel).or_default();
                open.entry((track, channel, key))
                    .or_default()
                    .push_back(song.events.len());
                song.events.push(Event {
                    track,
                    ..Event::note(time, channel, key, velocity, 0)
                });
            }
            Msg::NoteOff { channel, key } => {
                match open
                    .get_mut(&(track, channel, key))
                    .and_then(VecDeque::pop_front)
                {
                    Some(i) => {
                        let event = &mut song.events[i];
                        if let EventKind::Note { durms, .. } = &mut event.kind {
                            *durms = time - event.time;
                        }
                    }
                    None => log::warn!(
                        "Unmatched note off: track {track} channel {channel} key {key} at {time} ms"
                    ),
                }
            }
            Msg::PitchBend { channel, value } => {
                states.entry(channel).or_default();
                song.events.push(Event {
                    track,
                    ..Event::wheel(time, channel, value)
                });
            }
            Msg::Control {
                channel,
                control,
                value,
            } => {
                let state = states.entry(channel).or_default();
                match control {
                    CC_BANK_MSB => state.bank_msb = value,
                    CC_BANK_LSB => state.bank_lsb = value,
                    CC_VOLUME => state.trim = Some(value * 2),
                    CC_PAN => state.pan = Some(value * 2),
                    _ => {}
                }
            }
            Msg::Program { channel, program } => {
                states.entry(channel).or_default().program = Some(program);
            }
            Msg::Header(data) => match Channel::read(&mut Cursor::new(data)) {
                Ok(channel) => {
                    let state = states.entry(channel.chid).or_default();
                    match state.header {
                        Some(_) => log::warn!(
                            "Ignoring repeated header for channel {}",
                            channel.chid
                        ),
                        None => state.header = Some(channel),
                    }
                }
                Err(e) => log::warn!("Malformed channel header in track {track}: {e}"),
            },
            Msg::Marker(text) => {
                let mark = std::str::from_utf8(text)
                    .ok()
                    .and_then(|s| s.trim().parse::<i8>().ok())
                    .filter(|m| (0..=0x0f).contains(m));
                if let Some(mark) = mark {
                    song.events.push(Event {
                        track,
                        ..Event::marker(time, mark)
                    });
                }
            }
            Msg::EndOfTrack => {
                if end_of_track.map_or(true, |(t, _)| time > t) {
                    end_of_track = Some((time, track));
                }
            }
            Msg::Tempo(_) | Msg::Other => {}
        }
    }
    for ((track, channel, key), pending) in open {
        for _ in pending {
            log::warn!("Note without note off: track {track} channel {channel} key {key}");
        }
    }

    if let Some((time, track)) = end_of_track {
        let end = song.events.iter().map(Event::end_time).max().unwrap_or(0);
        if time > end {
            song.events.push(Event {
                track,
                ..Event::marker(time, MARKER_EOS)
            });
        }
    }
    for (chid, state) in states {
        song.channels
            .insert(chid, state.into_channel(chid, instruments));
    }
    Ok(song)
}

fn meta(kind: u8, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut e = Encoder::with_capacity(data.len() + 6);
    e.raw(&[0xff, kind]);
    e.vlq(data.len() as i64)?;
    e.raw(data);
    Ok(e.finish())
}

fn check_event(event: &Event) -> io::Result<()> {
    let bad = match event.kind {
        EventKind::Note {
            chid,
            noteid,
            velocity,
            ..
        } => chid >= 0x10 || noteid >= 0x80 || velocity >= 0x80,
        EventKind::Wheel { chid, value } => chid >= 0x10 || value > 0x3fff,
        EventKind::Marker { mark } => mark > 0x0f,
    };
    if bad {
        return Err(invalid_data(format_args!(
            "{:?} at {} ms can't be expressed in MIDI",
            event.kind, event.time
        )));
    }
    Ok(())
}

/// Writes `song` as a format 1 SMF where one tick is one millisecond.
pub fn midi_song_encode(song: &Song) -> io::Result<Vec<u8>> {
    if !(1..=MAX_TEMPO).contains(&song.tempo) {
        return Err(invalid_data(format_args!("tempo {} out of range", song.tempo)));
    }
    let mut tracks = song
        .events
        .iter()
        .map(|e| e.track)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    if tracks.is_empty() {
        tracks.push(0);
    }
    if tracks.len() > u16::MAX as usize {
        return Err(invalid_data(format_args!("{} tracks do not fit in SMF", tracks.len())));
    }
    let slot = |track: u16| tracks.binary_search(&track).unwrap_or(0);
    let mut msgs: Vec<Vec<(u32, Vec<u8>)>> = vec![Vec::new(); tracks.len()];
    let mut ends = vec![0u32; tracks.len()];

    let us_per_quarter = song.tempo as u32 * 1000;
    msgs[0].push((0, meta(META_TEMPO, &us_per_quarter.to_be_bytes()[1..])?));

    for channel in song.channels.values() {
        let first = song
            .events
            .iter()
            .filter(|e| e.chid() == Some(channel.chid))
            .map(|e| e.track)
            .min();
        let track = &mut msgs[first.map(slot).unwrap_or(0)];
        let mut header = Encoder::new();
        channel.write_header(&mut header)?;
        track.push((0, meta(META_CHANNEL_HEADER, header.as_slice())?));
        if channel.chid < 0x10 {
            let status = 0xb0 | channel.chid;
            track.push((0, vec![status, CC_VOLUME, channel.trim >> 1]));
            track.push((0, vec![status, CC_PAN, channel.pan >> 1]));
        }
    }

    for event in &song.events {
        check_event(event)?;
        let i = slot(event.track);
        ends[i] = ends[i].max(event.end_time());
        let time = event.time;
        match event.kind {
            EventKind::Note {
                chid,
                noteid,
                velocity,
                durms,
            } => {
                // velocity 0 would read back as a note off
                msgs[i].push((time, vec![0x90 | chid, noteid, velocity.max(1)]));
                msgs[i].push((time.saturating_add(durms), vec![0x80 | chid, noteid, 0x40]));
            }
            EventKind::Wheel { chid, value } => {
                msgs[i].push((time, vec![0xe0 | chid, (value & 0x7f) as u8, (value >> 7) as u8]));
            }
            EventKind::Marker { mark } if mark < 0 => {}
            EventKind::Marker { mark } => {
                msgs[i].push((time, meta(META_MARKER, mark.to_string().as_bytes())?));
            }
        }
    }

    let mut e = Encoder::new();
    e.raw(b"MThd");
    e.u32(6);
    e.u16(1);
    e.u16(tracks.len() as u16);
    e.u16(song.tempo);
    for (mut track, end) in msgs.into_iter().zip(ends) {
        track.sort_by_key(|(time, _)| *time);
        e.raw(b"MTrk");
        e.len_prefixed(LenWidth::U32, |e| {
            let mut now = 0;
            for (time, bytes) in &track {
                e.vlq((time - now) as i64)?;
                e.raw(bytes);
                now = *time;
            }
            e.vlq((end.max(now) - now) as i64)?;
            e.raw(&[0xff, META_END_OF_TRACK, 0]);
            Ok(())
        })?;
    }
    Ok(e.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modecfg::{Modecfg, Trivial, MODE_NOOP};
    use hex_literal::hex;

    fn smf(division: u16, tracks: &[&[u8]]) -> Vec<u8> {
        let mut e = Encoder::new();
        e.raw(b"MThd");
        e.u32(6);
        e.u16(1);
        e.u16(tracks.len() as u16);
        e.u16(division);
        for track in tracks {
            e.raw(b"MTrk");
            e.len_raw(LenWidth::U32, track).unwrap();
        }
        e.finish()
    }

    #[test]
    fn tempo_mapping() {
        let src = smf(
            96,
            &[&hex!("00 ff5103 0f4240  60 90 3c 64  60 80 3c 00  00 ff2f00")],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.tempo, 1000);
        assert_eq!(song.events, [Event::note(1000, 0, 60, 100, 1000)]);
        assert_eq!(song.channels.len(), 1);
        assert_eq!(song.channel(0), Some(&Channel::new(0)));
    }

    #[test]
    fn tempo_change_mid_song() {
        // 96 ticks at 500 ms/quarter, then 96 ticks at 250 ms/quarter
        let src = smf(
            96,
            &[&hex!("60 ff5103 03d090  00 90 3c 64  60 80 3c 00  00 ff2f00")],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.tempo, 250);
        assert_eq!(song.events, [Event::note(500, 0, 60, 100, 250)]);
    }

    #[test]
    fn running_status() {
        let src = smf(
            500,
            &[&hex!("00 90 3c 64  10 3e 64  10 3c 00  10 3e 00  00 ff2f00")],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.tempo, DEFAULT_TEMPO);
        assert_eq!(
            song.events,
            [Event::note(0, 0, 60, 100, 32), Event::note(16, 0, 62, 100, 32)]
        );
    }

    #[test]
    fn channel_header_beats_controllers() {
        let src = smf(
            500,
            &[&hex!(
                "00 b0 07 10"
                "00 ff77 0a 00 7f 20 01 0002 012c 0000"
                "00 b0 0a 00"
                "00 ff77 08 00 11 11 01 0000 0000"
                "00 91 3c 01"
                "00 b1 07 30"
                "10 81 3c 00"
                "00 ff2f00"
            )],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.channels.keys().copied().collect::<Vec<_>>(), [0, 1]);
        let ch0 = song.channel(0).unwrap();
        assert_eq!((ch0.trim, ch0.pan, ch0.mode), (0x7f, 0x20, 1));
        assert_eq!(
            ch0.config().unwrap(),
            Modecfg::Trivial(Trivial {
                wheelrange: 300,
                ..Default::default()
            })
        );
        assert_eq!(
            song.channel(1),
            Some(&Channel {
                trim: 0x60,
                ..Channel::new(1)
            })
        );
        assert_eq!(song.events, [Event::note(0, 1, 60, 1, 16)]);
    }

    #[test]
    fn smpte_division() {
        // 25 fps, 40 ticks per frame: one tick per ms
        let src = smf(
            0xe728,
            &[&hex!("00 ff5103 0f4240  817a 90 3c 64  8374 80 3c 00  00 ff2f00")],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.events, [Event::note(250, 0, 60, 100, 500)]);
    }

    #[test]
    fn unknown_chunks_skipped() {
        let mut src = smf(500, &[]);
        src.extend_from_slice(&hex!("58464948 00000003 010203"));
        src.extend_from_slice(b"MTrk");
        src.extend_from_slice(&hex!("00000008 00 e0 00 40 00 ff2f00"));
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(song.events, [Event::wheel(0, 0, 0x2000)]);
    }

    #[test]
    fn tracks_merge_in_time_order() {
        let src = smf(
            500,
            &[
                &hex!("00 ff5103 07a120  0a 90 3c 64  0a 80 3c 00  00 ff2f00"),
                &hex!("0a 91 3e 64  0a 81 3e 00  1e ff2f00"),
            ],
        );
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(
            song.events,
            [
                Event::note(10, 0, 60, 100, 10),
                Event {
                    track: 1,
                    ..Event::note(10, 1, 62, 100, 10)
                },
                Event {
                    track: 1,
                    ..Event::marker(50, MARKER_EOS)
                },
            ]
        );
    }

    struct Kit;

    impl InstrumentSet for Kit {
        fn instrument(&self, program: u32) -> Option<Channel> {
            (program == 1 << 7 | 5).then(|| Channel {
                mode: MODE_NOOP,
                trim: 0x22,
                ..Channel::new(0xff)
            })
        }
    }

    #[test]
    fn instrument_templates() {
        let src = smf(
            500,
            &[&hex!("00 b2 00 00  00 b2 20 01  00 c2 05  00 92 40 64  0a 82 40 00  00 ff2f00")],
        );
        let song = midi_song_decode_with(&src, &Kit).unwrap();
        assert_eq!(
            song.channel(2),
            Some(&Channel {
                mode: MODE_NOOP,
                trim: 0x22,
                ..Channel::new(2)
            })
        );
        let plain = midi_song_decode(&src).unwrap();
        assert_eq!(plain.channel(2), Some(&Channel::new(2)));
    }

    #[test]
    fn encode_round_trip() {
        let mut song = Song::new();
        song.add_channel(Channel::new(0));
        let mut lead = Channel::new(1);
        lead.set_config(&Modecfg::Trivial(Trivial {
            wheelrange: 300,
            ..Default::default()
        }))
        .unwrap();
        song.add_channel(lead);
        song.insert_event(Event::note(0, 0, 60, 100, 250));
        song.insert_event(Event::wheel(100, 1, 0x3000));
        song.insert_event(Event::note(500, 1, 64, 90, 1000));
        song.insert_event(Event::marker(1000, 3));
        song.insert_event(Event::marker(2000, MARKER_EOS));

        let serial = midi_song_encode(&song).unwrap();
        assert_eq!(serial[..14], hex!("4d546864 00000006 0001 0001 01f4"));
        assert_eq!(midi_song_decode(&serial).unwrap(), song);
    }

    #[test]
    fn encode_splits_tracks() {
        let mut song = Song::new();
        song.add_channel(Channel::new(4));
        song.add_channel(Channel::new(0));
        song.events.push(Event::note(0, 0, 60, 100, 10));
        song.events.push(Event {
            track: 7,
            ..Event::note(5, 4, 62, 100, 10)
        });
        let serial = midi_song_encode(&song).unwrap();
        assert_eq!(serial[10..12], [0, 2]);
        let back = midi_song_decode(&serial).unwrap();
        assert_eq!(back.events[1].track, 1);
        assert_eq!(back.channel(4), Some(&Channel::new(4)));
    }

    #[test]
    fn encode_rejects_too_many_tracks() {
        let mut song = Song::new();
        song.events = (0..=u16::MAX)
            .map(|track| Event {
                track,
                ..Event::marker(0, MARKER_EOS)
            })
            .collect();
        assert!(midi_song_encode(&song).is_err());
    }

    #[test]
    fn unmatched_notes() {
        let src = smf(500, &[&hex!("00 80 3c 00  10 90 3e 64  10 ff2f00")]);
        let song = midi_song_decode(&src).unwrap();
        assert_eq!(
            song.events,
            [Event::note(16, 0, 62, 100, 0), Event::marker(32, MARKER_EOS)]
        );
        assert_eq!(
            song.events
                .iter()
                .filter(|e| matches!(e.kind, EventKind::Note { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn encode_rejects_wide_channels() {
        let mut song = Song::new();
        song.events.push(Event::note(0, 16, 60, 100, 10));
        assert!(midi_song_encode(&song).is_err());
    }

    #[test]
    fn bad_files() {
        assert!(midi_song_decode(b"MThx\0\0\0\x06\0\x01\0\x01\x01\xf4").is_err());
        assert!(midi_song_decode(&smf(0, &[&hex!("00 ff2f00")])).is_err());
    }
}
