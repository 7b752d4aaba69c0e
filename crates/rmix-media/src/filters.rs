//! FFmpeg filter graphs used by the composition stages.

use std::path::Path;

use crate::layout::TextLayout;

/// Hook text styling.
pub const HOOK_FONT_COLOR: &str = "white";
pub const HOOK_BORDER_COLOR: &str = "black";
pub const HOOK_BORDER_WIDTH: u32 = 3;

/// Scale into the target frame preserving aspect ratio, letterbox the rest.
pub fn frame_filter(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1,fps={fps}",
        w = width,
        h = height,
        fps = fps
    )
}

/// Escape a path used as a filter option value inside `-filter_complex`.
///
/// FFmpeg unescapes twice: once when splitting the graph into filters and
/// once when splitting a filter's `key=value` options. The value is escaped
/// for the option level first, then the result for the graph level; no
/// quoting is used, since a quote cannot be escaped inside a quoted span.
pub fn escape_filter_path(path: &Path) -> String {
    let option_level = backslash_escape(&path.to_string_lossy(), &['\\', '\'', ':']);
    backslash_escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn backslash_escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Burn the laid-out hook into the frame.
///
/// The text itself is read from `text_file` with expansion disabled, so `%`
/// sequences and filtergraph metacharacters in hooks are rendered literally.
pub fn drawtext_filter(layout: &TextLayout, text_file: &Path, font_file: Option<&Path>) -> String {
    let mut filter = String::from("drawtext=");
    if let Some(font) = font_file {
        filter.push_str(&format!("fontfile={}:", escape_filter_path(font)));
    }
    filter.push_str(&format!(
        "textfile={}:expansion=none:fontsize={}:fontcolor={}:line_spacing={}:\
         borderw={}:bordercolor={}:x={}:y={}",
        escape_filter_path(text_file),
        layout.font_size,
        HOOK_FONT_COLOR,
        layout.line_spacing,
        HOOK_BORDER_WIDTH,
        HOOK_BORDER_COLOR,
        layout.x,
        layout.y
    ));
    filter
}

/// Video chain for one segment: `[0:v]` in, `[v]` out.
pub fn segment_video_graph(frame: &str, drawtext: Option<&str>) -> String {
    match drawtext {
        Some(drawtext) => format!("[0:v]{frame},{drawtext}[v]"),
        None => format!("[0:v]{frame}[v]"),
    }
}

/// Silent stereo source for clips without audio.
pub fn silent_audio_source(sample_rate: u32) -> String {
    format!("anullsrc=channel_layout=stereo:sample_rate={sample_rate}")
}

/// Music (input 1) under program audio (input 0), program at full gain.
pub fn music_mix_graph(music_volume: f64) -> String {
    format!(
        "[1:a]volume={:.3}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]",
        music_volume
    )
}

/// Concat demuxer manifest listing `segments` in order.
pub fn concat_manifest(segments: &[&Path]) -> String {
    segments
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}
