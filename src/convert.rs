use std::path::{Path, PathBuf};

use crate::{invalid_data, FileKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Target {
    Eau,
    Mid,
}

impl From<Target> for FileKind {
    fn from(value: Target) -> Self {
        match value {
            Target::Eau => Self::Eau,
            Target::Mid => Self::Midi,
        }
    }
}

#[derive(clap::Args)]
pub struct Args {
    /// EAU or MIDI file to convert
    input: PathBuf,
    /// Output path [default: INPUT with the target's extension]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Output format [default: from OUTPUT's extension, else the other format]
    #[arg(long, value_enum)]
    to: Option<Target>,
}

fn kind_from_extension(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "eau" => Some(FileKind::Eau),
        "mid" | "midi" | "smf" => Some(FileKind::Midi),
        _ => None,
    }
}

pub fn convert(args: Args) -> std::io::Result<()> {
    let Args { input, output, to } = args;
    let data = std::fs::read(&input)?;
    let from = FileKind::sniff(&data).ok_or_else(|| {
        invalid_data(format_args!(
            "`{}` is neither an EAU nor a MIDI file",
            input.display()
        ))
    })?;
    let target = to
        .map(FileKind::from)
        .or_else(|| output.as_deref().and_then(kind_from_extension))
        .unwrap_or(match from {
            FileKind::Eau => FileKind::Midi,
            FileKind::Midi => FileKind::Eau,
        });
    let output = output.unwrap_or_else(|| input.with_extension(target.extension()));
    if output == input {
        return Err(invalid_data(format_args!(
            "refusing to overwrite input `{}`",
            input.display()
        )));
    }

    let song = from.decode(&data)?;
    log::debug!(
        "{} channels, {} events, tempo {}",
        song.channels.len(),
        song.events.len(),
        song.tempo
    );
    let out = target.encode(&song)?;
    std::fs::write(&output, &out)?;
    log::info!(
        "Converted `{}` ({from:?}) to `{}` ({target:?}, {} bytes)",
        input.display(),
        output.display(),
        out.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup() {
        assert_eq!(kind_from_extension(Path::new("a/b.EAU")), Some(FileKind::Eau));
        assert_eq!(kind_from_extension(Path::new("song.midi")), Some(FileKind::Midi));
        assert_eq!(kind_from_extension(Path::new("song")), None);
        assert_eq!(kind_from_extension(Path::new("song.txt")), None);
    }
}
