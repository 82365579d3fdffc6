use std::path::Path;

use super::path_to_string;

/// Uncompressed codec forced for WAV inputs.
pub const PCM_CODEC: &str = "pcm_s16le";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";

/// Containers that get `-movflags +faststart`.
const FASTSTART_EXTENSIONS: &[&str] = &["mp4", "m4v"];

/// Lowercased extension without the dot; empty when there is none.
pub fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Audio encoder settings after per-input overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoding {
    pub codec: String,
    /// None for PCM, where a bitrate means nothing.
    pub bitrate: Option<String>,
}

/// WAV inputs always become PCM with no bitrate; everything else keeps the selection.
pub fn resolve_audio_encoding(input: &Path, codec: &str, bitrate: &str) -> AudioEncoding {
    if lowercase_extension(input) == "wav" {
        return AudioEncoding {
            codec: PCM_CODEC.to_string(),
            bitrate: None,
        };
    }
    let codec = codec.trim().to_lowercase();
    let codec = if codec.is_empty() {
        DEFAULT_AUDIO_CODEC.to_string()
    } else {
        codec
    };
    let bitrate = bitrate.trim().to_lowercase();
    let bitrate = (!bitrate.is_empty() && codec != PCM_CODEC).then_some(bitrate);
    AudioEncoding { codec, bitrate }
}

/// Everything needed to denoise one file.
#[derive(Debug, Clone)]
pub struct DenoiseCommand<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub filter_chain: &'a str,
    pub has_video: bool,
    pub copy_video: bool,
    pub audio: &'a AudioEncoding,
}

/// ffmpeg arguments, in the order input, map, video decision, audio filter,
/// audio codec/bitrate, container flags, trim, output.
pub fn build_denoise_args(cmd: &DenoiseCommand<'_>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        path_to_string(cmd.input),
        "-map".to_string(),
        "0".to_string(),
    ];

    if cmd.has_video {
        if cmd.copy_video {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        } else {
            args.push("-vn".to_string());
        }
    }

    args.extend(["-af".to_string(), cmd.filter_chain.to_string()]);
    args.extend(["-c:a".to_string(), cmd.audio.codec.clone()]);
    if let Some(ref bitrate) = cmd.audio.bitrate {
        args.extend(["-b:a".to_string(), bitrate.clone()]);
    }

    let ext = lowercase_extension(cmd.input);
    if FASTSTART_EXTENSIONS.contains(&ext.as_str()) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.push("-shortest".to_string());
    args.push(path_to_string(cmd.output));

    log::debug!(
        target: "denoiser::ffmpeg::builder",
        "Building FFmpeg command: codec={}, bitrate={:?}, video={}, input={} -> output={}",
        cmd.audio.codec,
        cmd.audio.bitrate,
        if !cmd.has_video {
            "none"
        } else if cmd.copy_video {
            "copy"
        } else {
            "dropped"
        },
        cmd.input.display(),
        cmd.output.display()
    );
    args
}

/// One flag (with its value) per line, for logs and command previews.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = "aresample=48000,arnndn=m='/m.rnnn':mix=0.85";

    fn args_for(input: &str, has_video: bool, copy_video: bool, codec: &str, br: &str) -> Vec<String> {
        let input = Path::new(input);
        let output = Path::new("/out/result");
        let audio = resolve_audio_encoding(input, codec, br);
        build_denoise_args(&DenoiseCommand {
            input,
            output,
            filter_chain: CHAIN,
            has_video,
            copy_video,
            audio: &audio,
        })
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("missing {flag} in {args:?}"))
    }

    #[test]
    fn wav_forces_pcm_without_bitrate() {
        let args = args_for("/in/Voice.WAV", false, true, "libmp3lame", "256k");
        let codec = position(&args, "-c:a");
        assert_eq!(args[codec + 1], PCM_CODEC);
        assert!(!args.contains(&"-b:a".to_string()));
        assert!(!args.contains(&"256k".to_string()));
    }

    #[test]
    fn selected_codec_and_bitrate_for_compressed_audio() {
        let args = args_for("/in/a.mp3", false, true, "libmp3lame", "256k");
        let codec = position(&args, "-c:a");
        assert_eq!(args[codec + 1], "libmp3lame");
        let br = position(&args, "-b:a");
        assert_eq!(args[br + 1], "256k");
    }

    #[test]
    fn pcm_selection_drops_bitrate() {
        let enc = resolve_audio_encoding(Path::new("/a.flac"), "pcm_s16le", "192k");
        assert_eq!(enc.bitrate, None);
    }

    #[test]
    fn mp4_gets_faststart_wav_does_not() {
        let mp4 = args_for("/in/clip.mp4", true, true, "aac", "192k");
        let flags = position(&mp4, "-movflags");
        assert_eq!(mp4[flags + 1], "+faststart");

        let m4v = args_for("/in/clip.M4V", true, true, "aac", "192k");
        assert!(m4v.contains(&"-movflags".to_string()));

        let wav = args_for("/in/a.wav", false, true, "aac", "192k");
        assert!(!wav.contains(&"-movflags".to_string()));

        let mkv = args_for("/in/a.mkv", true, true, "aac", "192k");
        assert!(!mkv.contains(&"-movflags".to_string()));
    }

    #[test]
    fn video_copy_only_when_present_and_enabled() {
        let copy = args_for("/in/clip.mov", true, true, "aac", "192k");
        let cv = position(&copy, "-c:v");
        assert_eq!(copy[cv + 1], "copy");

        let dropped = args_for("/in/clip.mov", true, false, "aac", "192k");
        assert!(!dropped.contains(&"-c:v".to_string()));
        assert!(dropped.contains(&"-vn".to_string()));

        let audio_only = args_for("/in/a.ogg", false, true, "aac", "192k");
        assert!(!audio_only.contains(&"-c:v".to_string()));
        assert!(!audio_only.contains(&"-vn".to_string()));
    }

    #[test]
    fn argument_order_is_preserved() {
        let args = args_for("/in/clip.mp4", true, true, "aac", "192k");
        assert_eq!(&args[..2], ["-y", "-hide_banner"]);
        let order = [
            position(&args, "-i"),
            position(&args, "-map"),
            position(&args, "-c:v"),
            position(&args, "-af"),
            position(&args, "-c:a"),
            position(&args, "-b:a"),
            position(&args, "-movflags"),
            position(&args, "-shortest"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "order: {order:?}");
        assert_eq!(args[position(&args, "-map") + 1], "0");
        assert_eq!(args[position(&args, "-af") + 1], CHAIN);
        assert_eq!(args.last().unwrap(), "/out/result");
    }

    #[test]
    fn display_pairs_flags_with_values() {
        let args: Vec<String> = ["-y", "-i", "/in.wav", "-shortest", "/out.wav"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -y\n  -i /in.wav\n  -shortest /out.wav"
        );
    }
}
