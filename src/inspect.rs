use std::path::PathBuf;

use itertools::Itertools;

use crate::{
    invalid_data,
    modecfg::{mode_name, Modecfg},
    song::NAME_CHANNEL,
    Channel, EventKind, FileKind, Song,
};

#[derive(clap::Args)]
pub struct Args {
    /// EAU or MIDI file to inspect
    input: PathBuf,
    /// Test that re-encoding reproduces the input
    #[arg(short, long, default_value_t = false)]
    test: bool,
}

fn test_conversion(kind: FileKind, orig: &[u8], song: &Song) -> bool {
    let converted = match kind.encode(song) {
        Ok(data) => data,
        Err(e) => {
            log::debug!("re-encoding failed: {e}");
            return false;
        }
    };
    let matches = orig == converted.as_slice();
    if !matches {
        let at = orig
            .iter()
            .zip(&converted)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| orig.len().min(converted.len()));
        log::debug!(
            "re-encoding does not match at offset 0x{at:x}\n  expected: {:02x?}\n       got: {:02x?}",
            &orig[at..orig.len().min(at + 16)],
            &converted[at..converted.len().min(at + 16)],
        );
    }
    matches
}

fn describe_config(channel: &Channel) -> String {
    match channel.config() {
        Ok(Modecfg::Trivial(cfg)) => format!(
            "wheel {} level {:#06x}..{:#06x} hold {} release {}",
            cfg.wheelrange, cfg.minlevel, cfg.maxlevel, cfg.minhold, cfg.rlstime
        ),
        Ok(Modecfg::Fm(cfg)) => format!(
            "wheel {} level {} points, waves {}/{}",
            cfg.wheelrange,
            cfg.levelenv.lo.len(),
            cfg.wavea.ops.iter().map(|op| op.name()).join("+"),
            cfg.waveb.ops.iter().map(|op| op.name()).join("+"),
        ),
        Ok(Modecfg::Sub(cfg)) => format!(
            "width {}..{} stages {} gain {}",
            cfg.widthlo, cfg.widthhi, cfg.stagec, cfg.gain
        ),
        Ok(Modecfg::Drum(notes)) => format!(
            "{} drums: {}",
            notes.len(),
            notes.iter().map(|n| n.noteid).join(",")
        ),
        Ok(Modecfg::Noop(data) | Modecfg::Opaque { data, .. }) => {
            format!("{} bytes", data.len())
        }
        Err(e) => format!("invalid: {e}"),
    }
}

pub fn inspect(args: Args) -> std::io::Result<()> {
    let Args { input, test } = args;
    let verbose = crate::is_log_level(log::LevelFilter::Debug);
    let data = std::fs::read(&input)?;
    let kind = FileKind::sniff(&data).ok_or_else(|| {
        invalid_data(format_args!(
            "`{}` is neither an EAU nor a MIDI file",
            input.display()
        ))
    })?;
    let song = kind.decode(&data)?;

    log::info!("Format: {kind:?}");
    log::info!("Tempo: {} ms/qnote", song.tempo);
    log::info!("Duration: {} ms", song.duration_ms());
    log::info!("Channels: {}", song.channels.len());
    if !song.channels.is_empty() {
        log::info!("  CHID TRIM PAN  MODE    POST                 NAME");
        for channel in song.channels.values() {
            let post = channel.pipeline();
            let mut stages = post.stages.iter().map(|s| s.name()).join(",");
            if !post.extra.is_empty() {
                stages.push_str("+?");
            }
            log::info!(
                "  {: <4} 0x{:02x} 0x{:02x} {: <7} {: <20} {}",
                channel.chid,
                channel.trim,
                channel.pan,
                mode_name(channel.mode),
                stages,
                song.get_name(channel.chid, NAME_CHANNEL).unwrap_or("-"),
            );
            log::info!("       {}", describe_config(channel));
        }
    }

    let notes = song
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Note { .. }))
        .count();
    let tracks = song.events.iter().map(|e| e.track).unique().count();
    log::info!(
        "Events: {} ({notes} notes, {tracks} tracks)",
        song.events.len()
    );
    if verbose {
        log::debug!("  TIME       TRACK EVENT");
        for event in &song.events {
            log::debug!("  {: <10} {: <5} {:?}", event.time, event.track, event.kind);
        }
    }

    let names = song
        .names()
        .iter()
        .filter(|n| n.noteid != NAME_CHANNEL)
        .collect::<Vec<_>>();
    if !names.is_empty() {
        log::info!("Note names: {}", names.len());
        for (chid, group) in &names.iter().group_by(|n| n.chid) {
            log::info!(
                "  {chid: <4} {}",
                group.map(|n| format!("{}={}", n.noteid, n.text)).join(" ")
            );
        }
    }

    if test {
        let stat = match test_conversion(kind, &data, &song) {
            true => "✓",
            false => "FAIL",
        };
        log::info!("Re-encode: {stat}");
    }
    Ok(())
}
