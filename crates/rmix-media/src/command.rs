//! FFmpeg command builder and stage invocations.
//!
//! Every pipeline stage is described as data (program, argument list and the
//! single output file it is expected to write) so runners can be swapped in
//! tests without spawning anything.

use std::fmt;
use std::path::{Path, PathBuf};

use rmix_models::EncodingConfig;

/// One subprocess-bounded step of the composition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Scale, pad, trim and burn the hook into the reaction clip
    Reaction,
    /// Scale, pad and trim the demo clip
    Demo,
    /// Stream-copy concatenation of the normalized segments
    Concat,
    /// Music mixed under the program audio
    Mix,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reaction => "reaction",
            Stage::Demo => "demo",
            Stage::Concat => "concat",
            Stage::Mix => "mix",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully described subprocess invocation for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: Stage,
    pub program: String,
    pub args: Vec<String>,
    /// The one file this invocation is expected to write
    pub output: PathBuf,
}

impl StageInvocation {
    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

impl FfmpegInput {
    /// A media file input.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// A lavfi source graph (e.g. `anullsrc=...`).
    pub fn lavfi(graph: impl Into<String>) -> Self {
        Self {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: graph.into(),
        }
    }

    /// A concat demuxer manifest.
    pub fn concat_list(path: impl AsRef<Path>) -> Self {
        Self {
            args: vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
            ],
            source: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Add an input option.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set seek position (input seeking).
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format!("{:.3}", seconds))
    }

    /// Limit the amount of input read.
    pub fn duration(self, seconds: f64) -> Self {
        self.arg("-t").arg(format!("{:.3}", seconds))
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input.
    pub fn input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Re-encode with the shared profile.
    pub fn encoding(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Copy video, re-encode audio with the shared profile.
    pub fn video_copy(self, encoding: &EncodingConfig) -> Self {
        self.output_arg("-c:v")
            .output_arg("copy")
            .output_args(encoding.audio_args())
    }

    /// Output frame rate.
    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    /// Stop at the shortest stream.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Drop container metadata so identical inputs give identical files.
    pub fn strip_metadata(self) -> Self {
        self.output_arg("-map_metadata").output_arg("-1")
    }

    /// Move the index to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());

        args
    }

    /// Turn this command into a stage invocation of `program`.
    pub fn into_invocation(self, stage: Stage, program: impl Into<String>) -> StageInvocation {
        StageInvocation {
            stage,
            program: program.into(),
            args: self.build_args(),
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input(FfmpegInput::file("in.mp4").seek(10.0).duration(4.5))
            .input(FfmpegInput::lavfi("anullsrc=channel_layout=stereo:sample_rate=44100"))
            .map("[v]")
            .shortest();

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let first_input = args.iter().position(|a| a == "in.mp4").unwrap();
        assert!(ss < first_input, "seek must precede its input");
        assert_eq!(args[ss + 1], "10.000");
        assert!(args.contains(&"4.500".to_string()));
        assert!(args.contains(&"lavfi".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_concat_input() {
        let args = FfmpegCommand::new("final.mp4")
            .input(FfmpegInput::concat_list("/tmp/list.txt"))
            .codec_copy()
            .build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i /tmp/list.txt -c copy final.mp4"));
    }

    #[test]
    fn test_into_invocation() {
        let inv = FfmpegCommand::new("/w/reaction.mp4")
            .input(FfmpegInput::file("/u/r.mp4"))
            .into_invocation(Stage::Reaction, "ffmpeg");
        assert_eq!(inv.stage, Stage::Reaction);
        assert_eq!(inv.output, PathBuf::from("/w/reaction.mp4"));
        assert!(inv.command_line().starts_with("ffmpeg -y"));
    }
}
