use crate::{
    convert_error,
    decoder::Decoder,
    encoder::{Encoder, LenWidth},
    env::Env,
    events::{decode_events, encode_events, Event},
    invalid_data,
    modecfg::{merge_modecfg, Modecfg, MODE_TRIVIAL},
    post::Post,
    NoSeekWrite,
};
use binrw::BinRead;
use indexmap::{map::Entry, IndexMap};
use nom::{
    bytes::complete::tag,
    combinator::opt,
    error::{context, VerboseError},
    multi::length_data,
    number::complete::{be_u16, be_u32},
};
use std::{collections::BTreeMap, io, io::Cursor};

pub const EAU_MAGIC: &[u8; 4] = b"\0EAU";
pub const DEFAULT_TEMPO: u16 = 500;
pub const MAX_TEMPO: u16 = 0x7fff;
/// Note id naming the channel itself rather than one of its notes.
pub const NAME_CHANNEL: u8 = 0xff;

// binrw goes first so the derives don't see the temp length fields.
#[binrw::binrw]
#[brw(big)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Channel {
    pub chid: u8,
    pub trim: u8,
    pub pan: u8,
    pub mode: u8,
    #[br(temp)]
    #[bw(calc = modecfg.len() as u16)]
    modecfg_len: u16,
    #[br(count = modecfg_len as usize)]
    pub modecfg: Vec<u8>,
    #[br(temp)]
    #[bw(calc = post.len() as u16)]
    post_len: u16,
    #[br(count = post_len as usize)]
    pub post: Vec<u8>,
    /// Last modecfg used with each mode, restored by [`Channel::set_mode`].
    #[brw(ignore)]
    pub stash: BTreeMap<u8, Vec<u8>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Channel {
    pub fn new(chid: u8) -> Self {
        Self {
            chid,
            trim: 0x40,
            pan: 0x80,
            mode: MODE_TRIVIAL,
            modecfg: Vec::new(),
            post: Vec::new(),
            stash: BTreeMap::new(),
        }
    }
    #[inline]
    pub fn config(&self) -> io::Result<Modecfg> {
        Modecfg::decode(self.mode, &self.modecfg)
    }
    pub fn set_config(&mut self, cfg: &Modecfg) -> io::Result<()> {
        self.modecfg = cfg.encode()?;
        self.mode = cfg.mode();
        Ok(())
    }
    #[inline]
    pub fn pipeline(&self) -> Post {
        Post::decode(&self.post)
    }
    pub fn set_pipeline(&mut self, post: &Post) -> io::Result<()> {
        self.post = post.encode()?;
        Ok(())
    }
    /// Switches mode, carrying over shared fields and stashing the old config.
    pub fn set_mode(&mut self, mode: u8) -> io::Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        let merged = merge_modecfg(
            self.mode,
            &self.modecfg,
            mode,
            self.stash.get(&mode).map(Vec::as_slice),
        )?;
        let old = std::mem::replace(&mut self.modecfg, merged);
        self.stash.insert(self.mode, old);
        self.mode = mode;
        Ok(())
    }
    /// Audible length of a note on this channel, release included.
    pub fn note_ms(&self, velocity: u8, durms: u32) -> u32 {
        match self.config() {
            Ok(Modecfg::Trivial(cfg)) => cfg.note_ms(velocity, durms),
            Ok(cfg) => cfg
                .levelenv()
                .map(|env| released_ms(env, durms))
                .unwrap_or(durms),
            Err(_) => durms,
        }
    }
    pub(crate) fn write_header(&self, e: &mut Encoder) -> io::Result<()> {
        for (what, len) in [("modecfg", self.modecfg.len()), ("post", self.post.len())] {
            if len > 0xffff {
                return Err(invalid_data(format_args!(
                    "channel {} {what} is {len} bytes, limit is 65535",
                    self.chid
                )));
            }
        }
        self.write_no_seek(e)
    }
}

fn released_ms(env: &Env, durms: u32) -> u32 {
    let total = env.duration();
    match env.lo.get(env.sustain) {
        Some(hold) if env.sustain > 0 => {
            durms.max(hold.time) + total.saturating_sub(hold.time)
        }
        _ => durms.max(total),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    pub chid: u8,
    pub noteid: u8,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    /// Milliseconds per quarter note.
    pub tempo: u16,
    pub channels: IndexMap<u8, Channel>,
    /// Sorted by time.
    pub events: Vec<Event>,
    names: Vec<Name>,
}

impl Default for Song {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            channels: IndexMap::new(),
            events: Vec::new(),
            names: Vec::new(),
        }
    }
}

struct Blocks<'a> {
    tempo: u16,
    headers: &'a [u8],
    events: &'a [u8],
    text: Option<&'a [u8]>,
}

fn parse_blocks(data: &[u8]) -> nom::IResult<&[u8], Blocks, VerboseError<&[u8]>> {
    let (data, _) = context("magic", tag(EAU_MAGIC))(data)?;
    let (data, tempo) = context("tempo", be_u16)(data)?;
    let (data, headers) = context("channel headers", length_data(be_u32))(data)?;
    let (data, events) = context("events", length_data(be_u32))(data)?;
    let (data, text) = context("text", opt(length_data(be_u32)))(data)?;
    Ok((
        data,
        Blocks {
            tempo,
            headers,
            events,
            text,
        },
    ))
}

fn decode_headers(block: &[u8], channels: &mut IndexMap<u8, Channel>) {
    let mut cursor = Cursor::new(block);
    while (cursor.position() as usize) < block.len() {
        let pos = cursor.position();
        match Channel::read(&mut cursor) {
            Ok(channel) => match channels.entry(channel.chid) {
                Entry::Occupied(_) => {
                    log::warn!("Discarding duplicate header for channel {}", channel.chid)
                }
                Entry::Vacant(v) => {
                    v.insert(channel);
                }
            },
            Err(e) => {
                log::warn!("Malformed channel header at offset {pos}: {e}");
                break;
            }
        }
    }
}

fn decode_names(block: &[u8]) -> Vec<Name> {
    let mut d = Decoder::new(block);
    let mut names = Vec::new();
    while !d.finished() {
        let start = d.position();
        let Some(key) = d.take(2) else {
            log::warn!("Truncated name entry at offset {start}");
            break;
        };
        let Some(text) = d.take(1).and_then(|len| d.take(len[0] as usize)) else {
            log::warn!("Truncated name entry at offset {start}");
            break;
        };
        names.push(Name {
            chid: key[0],
            noteid: key[1],
            text: String::from_utf8_lossy(text).into_owned(),
        });
    }
    if !names.windows(2).all(|w| (w[0].chid, w[0].noteid) < (w[1].chid, w[1].noteid)) {
        log::debug!("Sorting {} names", names.len());
        names.sort_by_key(|n| (n.chid, n.noteid));
        names.dedup_by_key(|n| (n.chid, n.noteid));
    }
    names
}

impl Song {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(src: &[u8]) -> io::Result<Self> {
        let (rest, blocks) = parse_blocks(src).map_err(|e| invalid_data(convert_error(src, e)))?;
        if !rest.is_empty() {
            log::debug!("Ignoring {} trailing bytes", rest.len());
        }
        let tempo = match blocks.tempo {
            1..=MAX_TEMPO => blocks.tempo,
            t => {
                log::warn!("Tempo {t} out of range, using {DEFAULT_TEMPO}");
                DEFAULT_TEMPO
            }
        };
        let mut channels = IndexMap::new();
        decode_headers(blocks.headers, &mut channels);
        let events = decode_events(blocks.events)?;
        for chid in events.iter().filter_map(Event::chid) {
            if let Entry::Vacant(v) = channels.entry(chid) {
                log::warn!("Events on unconfigured channel {chid}, adding a default");
                v.insert(Channel::new(chid));
            }
        }
        let names = blocks.text.map(decode_names).unwrap_or_default();
        Ok(Self {
            tempo,
            channels,
            events,
            names,
        })
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        if !(1..=MAX_TEMPO).contains(&self.tempo) {
            return Err(invalid_data(format_args!("tempo {} out of range", self.tempo)));
        }
        let mut e = Encoder::new();
        e.raw(EAU_MAGIC);
        e.u16(self.tempo);
        e.len_prefixed(LenWidth::U32, |e| {
            for channel in self.channels.values() {
                channel.write_header(e)?;
            }
            Ok(())
        })?;
        e.len_prefixed(LenWidth::U32, |e| encode_events(&self.events, e))?;
        if !self.names.is_empty() {
            e.len_prefixed(LenWidth::U32, |e| {
                for name in &self.names {
                    e.u8(name.chid);
                    e.u8(name.noteid);
                    e.len_raw(LenWidth::U8, name.text.as_bytes())?;
                }
                Ok(())
            })?;
        }
        Ok(e.finish())
    }

    /// Inserts after every event at or before `event.time`; returns its index.
    pub fn insert_event(&mut self, event: Event) -> usize {
        let index = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(index, event);
        index
    }

    #[inline]
    pub fn names(&self) -> &[Name] {
        &self.names
    }
    #[inline]
    fn name_index(&self, chid: u8, noteid: u8) -> Result<usize, usize> {
        self.names
            .binary_search_by_key(&(chid, noteid), |n| (n.chid, n.noteid))
    }
    pub fn get_name(&self, chid: u8, noteid: u8) -> Option<&str> {
        self.name_index(chid, noteid)
            .ok()
            .map(|i| self.names[i].text.as_str())
    }
    /// Sets or replaces a name. An empty name removes the entry.
    pub fn set_name(&mut self, chid: u8, noteid: u8, text: impl Into<String>) {
        let text = text.into();
        match self.name_index(chid, noteid) {
            Ok(i) if text.is_empty() => {
                self.names.remove(i);
            }
            Ok(i) => self.names[i].text = text,
            Err(_) if text.is_empty() => {}
            Err(i) => self.names.insert(
                i,
                Name {
                    chid,
                    noteid,
                    text,
                },
            ),
        }
    }

    #[inline]
    pub fn channel(&self, chid: u8) -> Option<&Channel> {
        self.channels.get(&chid)
    }
    #[inline]
    pub fn channel_mut(&mut self, chid: u8) -> Option<&mut Channel> {
        self.channels.get_mut(&chid)
    }
    /// Adds a channel, replacing one with the same id in place.
    pub fn add_channel(&mut self, channel: Channel) -> &mut Channel {
        match self.channels.entry(channel.chid) {
            Entry::Occupied(mut o) => {
                o.insert(channel);
                o.into_mut()
            }
            Entry::Vacant(v) => v.insert(channel),
        }
    }
    /// Removes a channel along with its events and names.
    pub fn remove_channel(&mut self, chid: u8) -> Option<Channel> {
        let channel = self.channels.shift_remove(&chid)?;
        self.events.retain(|e| e.chid() != Some(chid));
        self.names.retain(|n| n.chid != chid);
        Some(channel)
    }

    /// End of the last sound, counting each note's release.
    pub fn duration_ms(&self) -> u32 {
        self.events
            .iter()
            .map(|event| match event.kind {
                crate::events::EventKind::Note {
                    chid,
                    velocity,
                    durms,
                    ..
                } => {
                    let len = match self.channels.get(&chid) {
                        Some(channel) => channel.note_ms(velocity, durms),
                        None => durms,
                    };
                    event.time.saturating_add(len)
                }
                _ => event.time,
            })
            .max()
            .unwrap_or(0)
    }
}
