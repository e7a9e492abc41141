//! Delta-time event stream.
//!
//! ```text
//! 0x00..0x3f  delay, low 6 bits in ms
//! 0x40..0x7f  delay, ((low 6 bits) + 1) * 64 ms
//! 0x8c nn vv  note off, closes the oldest open note c/nn
//! 0x9c nn vv  note on
//! 0xac        note once: vvvvvvvn nnnnnndd dddddddd, duration in 16 ms units
//! 0xec ll hh  wheel, 14 bits
//! 0xfm        marker m
//! ```

use crate::{decoder::Decoder, encoder::Encoder, invalid_data};
use std::io;

/// End-of-stream sentinel. Carries trailing silence; never serialized itself.
pub const MARKER_EOS: i8 = -1;
/// Longest duration a note-once can carry.
pub const NOTE_ONCE_MAX_MS: u32 = 1023 * 16;
pub const WHEEL_CENTER: u16 = 0x2000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Note {
        chid: u8,
        noteid: u8,
        velocity: u8,
        durms: u32,
    },
    Wheel {
        chid: u8,
        value: u16,
    },
    Marker {
        mark: i8,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Event {
    /// Absolute time in ms.
    pub time: u32,
    /// MIDI track this event belongs to. Not stored in EAU.
    pub track: u16,
    pub kind: EventKind,
}

impl Event {
    #[inline]
    pub fn new(time: u32, kind: EventKind) -> Self {
        Self {
            time,
            track: 0,
            kind,
        }
    }
    #[inline]
    pub fn note(time: u32, chid: u8, noteid: u8, velocity: u8, durms: u32) -> Self {
        Self::new(
            time,
            EventKind::Note {
                chid,
                noteid,
                velocity,
                durms,
            },
        )
    }
    #[inline]
    pub fn wheel(time: u32, chid: u8, value: u16) -> Self {
        Self::new(time, EventKind::Wheel { chid, value })
    }
    #[inline]
    pub fn marker(time: u32, mark: i8) -> Self {
        Self::new(time, EventKind::Marker { mark })
    }
    #[inline]
    pub fn chid(&self) -> Option<u8> {
        match self.kind {
            EventKind::Note { chid, .. } | EventKind::Wheel { chid, .. } => Some(chid),
            EventKind::Marker { .. } => None,
        }
    }
    /// Time at which the event stops sounding.
    #[inline]
    pub fn end_time(&self) -> u32 {
        match self.kind {
            EventKind::Note { durms, .. } => self.time.saturating_add(durms),
            _ => self.time,
        }
    }
}

#[inline]
fn need<'a>(d: &mut Decoder<'a>, n: usize, what: &str) -> io::Result<&'a [u8]> {
    d.take(n)
        .ok_or_else(|| invalid_data(format_args!("truncated {what} event")))
}

pub fn decode_events(src: &[u8]) -> io::Result<Vec<Event>> {
    let mut d = Decoder::new(src);
    let mut events: Vec<Event> = Vec::new();
    // (chid, noteid, index into events), oldest first
    let mut pending: Vec<(u8, u8, usize)> = Vec::new();
    let mut now = 0u32;
    let mut last = 0u32;
    while let Some(lead) = d.take(1).map(|b| b[0]) {
        if lead & 0x80 == 0 {
            now = now.saturating_add(match lead & 0x40 {
                0 => (lead & 0x3f) as u32,
                _ => ((lead & 0x3f) as u32 + 1) << 6,
            });
            continue;
        }
        let chid = lead & 0x0f;
        match lead & 0xf0 {
            0x80 => {
                let b = need(&mut d, 2, "note off")?;
                let noteid = b[0] & 0x7f;
                match pending
                    .iter()
                    .position(|p| p.0 == chid && p.1 == noteid)
                {
                    Some(p) => {
                        let (_, _, index) = pending.remove(p);
                        let event = &mut events[index];
                        if let EventKind::Note { durms, .. } = &mut event.kind {
                            *durms = now - event.time;
                        }
                    }
                    None => log::warn!(
                        "Note off without note on: channel {chid} note {noteid:#04x} at {now} ms"
                    ),
                }
            }
            0x90 => {
                let b = need(&mut d, 2, "note on")?;
                let (noteid, velocity) = (b[0] & 0x7f, b[1] & 0x7f);
                pending.push((chid, noteid, events.len()));
                events.push(Event::note(now, chid, noteid, velocity, 0));
            }
            0xa0 => {
                let b = need(&mut d, 3, "note")?;
                let velocity = b[0] >> 1;
                let noteid = ((b[0] & 1) << 6) | (b[1] >> 2);
                let durms = (((b[1] & 3) as u32) << 8 | b[2] as u32) * 16;
                events.push(Event::note(now, chid, noteid, velocity, durms));
            }
            0xe0 => {
                let b = need(&mut d, 2, "wheel")?;
                let value = (b[0] & 0x7f) as u16 | ((b[1] & 0x7f) as u16) << 7;
                events.push(Event::wheel(now, chid, value));
            }
            0xf0 => {
                events.push(Event::marker(now, chid as i8));
            }
            _ => {
                return Err(invalid_data(format_args!(
                    "illegal event lead byte {lead:#04x} at offset {}",
                    d.position() - 1
                )))
            }
        }
        last = now;
    }
    for (chid, noteid, index) in pending {
        log::warn!(
            "Note on without note off: channel {chid} note {noteid:#04x} at {} ms",
            events[index].time
        );
    }
    if now > last {
        events.push(Event::marker(now, MARKER_EOS));
    }
    Ok(events)
}

#[derive(Clone, Copy, Debug)]
enum Item {
    On { chid: u8, noteid: u8, velocity: u8 },
    Off { chid: u8, noteid: u8 },
    Once { chid: u8, noteid: u8, velocity: u8, dur16: u16 },
    Wheel { chid: u8, value: u16 },
    Marker(u8),
    /// Editor-only; contributes its time but no bytes.
    Silent,
}

fn write_delay(e: &mut Encoder, mut ms: u32) {
    while ms >= 4096 {
        e.u8(0x7f);
        ms -= 4096;
    }
    if ms >= 64 {
        e.u8(0x40 | ((ms >> 6) - 1) as u8);
        ms &= 0x3f;
    }
    if ms > 0 {
        e.u8(ms as u8);
    }
}

fn check_channel(chid: u8, time: u32) -> io::Result<()> {
    if chid >= 0x10 {
        return Err(invalid_data(format_args!(
            "event at {time} ms on channel {chid}, events are limited to 0..15"
        )));
    }
    Ok(())
}

pub fn encode_events(events: &[Event], e: &mut Encoder) -> io::Result<()> {
    let mut items = Vec::with_capacity(events.len());
    for event in events {
        let time = event.time;
        match event.kind {
            EventKind::Note {
                chid,
                noteid,
                velocity,
                durms,
            } => {
                check_channel(chid, time)?;
                if noteid >= 0x80 || velocity >= 0x80 {
                    return Err(invalid_data(format_args!(
                        "note {noteid} velocity {velocity} at {time} ms out of range"
                    )));
                }
                if durms > NOTE_ONCE_MAX_MS {
                    items.push((
                        time,
                        Item::On {
                            chid,
                            noteid,
                            velocity,
                        },
                    ));
                    items.push((time.saturating_add(durms), Item::Off { chid, noteid }));
                } else {
                    let dur16 = ((durms + 8) >> 4).min(0x3ff) as u16;
                    items.push((
                        time,
                        Item::Once {
                            chid,
                            noteid,
                            velocity,
                            dur16,
                        },
                    ));
                }
            }
            EventKind::Wheel { chid, value } => {
                check_channel(chid, time)?;
                if value > 0x3fff {
                    return Err(invalid_data(format_args!(
                        "wheel value {value} at {time} ms out of range"
                    )));
                }
                items.push((time, Item::Wheel { chid, value }));
            }
            EventKind::Marker { mark } if mark < 0 => items.push((time, Item::Silent)),
            EventKind::Marker { mark } => {
                if mark > 0x0f {
                    return Err(invalid_data(format_args!("marker {mark} out of range")));
                }
                items.push((time, Item::Marker(mark as u8)));
            }
        }
    }
    // Stable: simultaneous items keep their list order.
    items.sort_by_key(|(time, _)| *time);

    let mut now = 0;
    for (time, item) in items {
        write_delay(e, time - now);
        now = time;
        match item {
            Item::On {
                chid,
                noteid,
                velocity,
            } => e.raw(&[0x90 | chid, noteid, velocity]),
            Item::Off { chid, noteid } => e.raw(&[0x80 | chid, noteid, 0x40]),
            Item::Once {
                chid,
                noteid,
                velocity,
                dur16,
            } => e.raw(&[
                0xa0 | chid,
                (velocity << 1) | (noteid >> 6),
                ((noteid & 0x3f) << 2) | (dur16 >> 8) as u8,
                dur16 as u8,
            ]),
            Item::Wheel { chid, value } => {
                e.raw(&[0xe0 | chid, (value & 0x7f) as u8, (value >> 7) as u8])
            }
            Item::Marker(mark) => e.u8(0xf0 | mark),
            Item::Silent => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(events: &[Event]) -> Vec<u8> {
        let mut e = Encoder::new();
        encode_events(events, &mut e).unwrap();
        e.finish()
    }

    #[test]
    fn delay_encodings() {
        let serial = encode(&[Event::marker(0, 1), Event::marker(10000, 2)]);
        // 10000 = 2*4096 + 28*64 + 16
        assert_eq!(serial, [0xf1, 0x7f, 0x7f, 0x40 | 27, 16, 0xf2]);
        let events = decode_events(&serial).unwrap();
        assert_eq!(events, [Event::marker(0, 1), Event::marker(10000, 2)]);
    }

    #[test]
    fn short_note_uses_note_once() {
        let serial = encode(&[Event::note(0, 3, 0x45, 0x64, 1000)]);
        // 1000 ms rounds to 63 units of 16 ms
        assert_eq!(serial, [0xa3, 0xc9, 0x14, 63]);
        let events = decode_events(&serial).unwrap();
        assert_eq!(events, [Event::note(0, 3, 0x45, 0x64, 1008)]);
    }

    #[test]
    fn long_note_splits() {
        let serial = encode(&[Event::note(0, 1, 60, 100, 20000)]);
        assert_eq!(serial[..3], [0x91, 60, 100]);
        assert!(!serial.iter().any(|b| b & 0xf0 == 0xa0));
        assert_eq!(serial[serial.len() - 3..], [0x81, 60, 0x40]);
        let events = decode_events(&serial).unwrap();
        assert_eq!(events, [Event::note(0, 1, 60, 100, 20000)]);
    }

    #[test]
    fn split_notes_sort_stably() {
        let events = [
            Event::note(0, 0, 60, 100, 20000),
            Event::note(20000, 0, 62, 100, 32),
            Event::wheel(20000, 1, 0x3000),
        ];
        let serial = encode(&events);
        let back = decode_events(&serial).unwrap();
        assert_eq!(back, events);
        // Off for note 60 precedes the once for note 62 at the same time.
        let off = serial.iter().position(|b| *b == 0x80).unwrap();
        let once = serial.iter().position(|b| *b == 0xa0).unwrap();
        assert!(off < once);
    }

    #[test]
    fn oldest_open_note_closes_first() {
        let serial = [
            0x90, 60, 100, // on @0
            10, 0x90, 60, 90, // on @10
            10, 0x80, 60, 0, // off @20 closes the first
            10, 0x80, 60, 0, // off @30 closes the second
        ];
        let events = decode_events(&serial).unwrap();
        assert_eq!(
            events,
            [Event::note(0, 0, 60, 100, 20), Event::note(10, 0, 60, 90, 20)]
        );
    }

    #[test]
    fn unmatched_notes() {
        let events = decode_events(&[0x80, 1, 0, 0x95, 2, 3]).unwrap();
        assert_eq!(events, [Event::note(0, 5, 2, 3, 0)]);
    }

    #[test]
    fn note_bytes_drop_high_bit() {
        let events = decode_events(&[0x90, 0xc8, 0x64, 0x0a, 0x80, 0xc8, 0x40]).unwrap();
        assert_eq!(events, [Event::note(0, 0, 0x48, 100, 10)]);
        assert_eq!(encode(&events), [0xa0, 0xc9, 0x20, 0x01]);
    }

    #[test]
    fn trailing_delay_becomes_eos_marker() {
        let events = decode_events(&[0xe2, 0x00, 0x40, 0x41]).unwrap();
        assert_eq!(
            events,
            [Event::wheel(0, 2, 0x2000), Event::marker(128, MARKER_EOS)]
        );
        let serial = encode(&events);
        assert_eq!(serial, [0xe2, 0x00, 0x40, 0x41]);
    }

    #[test]
    fn illegal_lead_bytes() {
        for lead in [0xb0, 0xc3, 0xdf] {
            assert!(decode_events(&[lead, 0, 0]).is_err());
        }
        assert!(decode_events(&[0x90, 60]).is_err());
    }

    #[test]
    fn encode_range_checks() {
        let mut e = Encoder::new();
        assert!(encode_events(&[Event::note(0, 16, 60, 100, 0)], &mut e).is_err());
        assert!(encode_events(&[Event::wheel(0, 0, 0x4000)], &mut e).is_err());
        assert!(encode_events(&[Event::marker(0, 16)], &mut e).is_err());
    }
}
