//! Composition pipeline: reaction segment, demo segment, concat, music mix.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rmix_models::encoding::{FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH};
use rmix_models::{Clip, EncodingConfig, RenderJob, TrimWindow};
use tracing::{debug, info, warn};

use crate::artifacts::{
    self, ArtifactScope, DEMO_SEGMENT, FINAL, HOOK_TEXT, PROGRAM, REACTION_SEGMENT, SEGMENT_LIST,
};
use crate::command::{FfmpegCommand, FfmpegInput, Stage, StageInvocation};
use crate::error::PipelineError;
use crate::filters;
use crate::layout::{self, TextLayout};
use crate::probe::MediaProbe;
use crate::runner::StageRunner;

/// Default length of the reaction segment in seconds.
pub const DEFAULT_REACTION_SECONDS: f64 = 4.5;

/// Pipeline settings shared by every job of a worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which per-job artifact scopes are created
    pub work_dir: PathBuf,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: u32,
    /// Reaction length when the combination gives no trim duration
    pub reaction_seconds: f64,
    pub encoding: EncodingConfig,
    pub font_file: Option<PathBuf>,
    pub ffmpeg_program: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("rmix"),
            frame_width: FRAME_WIDTH,
            frame_height: FRAME_HEIGHT,
            frame_rate: FRAME_RATE,
            reaction_seconds: DEFAULT_REACTION_SECONDS,
            encoding: EncodingConfig::default(),
            font_file: None,
            ffmpeg_program: "ffmpeg".to_string(),
        }
    }
}

/// A rendered output.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub output_path: PathBuf,
    pub url: String,
    /// The hook had to be cut to fit the line limit
    pub hook_truncated: bool,
    pub elapsed: Duration,
}

/// Renders one [`RenderJob`] into its output file.
pub struct CompositionPipeline {
    runner: Arc<dyn StageRunner>,
    probe: Arc<dyn MediaProbe>,
    config: PipelineConfig,
}

impl CompositionPipeline {
    pub fn new(runner: Arc<dyn StageRunner>, probe: Arc<dyn MediaProbe>, config: PipelineConfig) -> Self {
        Self {
            runner,
            probe,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all stages for `job`.
    ///
    /// Stages run strictly in order and the first failure aborts the rest.
    /// The job's artifact scope is removed before returning on every path,
    /// and the output path is only written once the last stage succeeded.
    pub async fn render(&self, job: &RenderJob) -> Result<RenderOutput, PipelineError> {
        let started = Instant::now();

        let clips = [Some(&job.reaction), Some(&job.demo), job.music.as_ref()];
        for clip in clips.into_iter().flatten() {
            if !tokio::fs::try_exists(&clip.path).await.unwrap_or(false) {
                return Err(PipelineError::MissingAsset(clip.path.clone()));
            }
        }

        let scope = ArtifactScope::create(&self.config.work_dir, &job.artifact_stem())?;
        let result = self.render_in(job, &scope).await;

        if let Err(e) = scope.close() {
            warn!(job_id = %job.job_id, "Failed to remove artifact scope: {}", e);
        }

        let hook_truncated = result?;
        Ok(RenderOutput {
            output_path: job.output_path.clone(),
            url: job.output_url.clone(),
            hook_truncated,
            elapsed: started.elapsed(),
        })
    }

    async fn render_in(&self, job: &RenderJob, scope: &ArtifactScope) -> Result<bool, PipelineError> {
        let layout = layout::layout_text(
            &job.hook,
            &job.text,
            self.config.frame_width,
            self.config.frame_height,
        );
        if layout.truncated {
            warn!(
                job_id = %job.job_id,
                "Hook text truncated to {} lines of {} chars",
                layout.lines.len(),
                layout.chars_per_line
            );
        }

        let hook_file = scope.artifact(HOOK_TEXT);
        if !layout.is_empty() {
            tokio::fs::write(&hook_file, layout.text()).await?;
        }

        let reaction_audio = self.has_audio(&job.reaction).await?;
        let reaction = self.reaction_invocation(job, &layout, &hook_file, reaction_audio, scope);
        self.run(job, &reaction)
            .await
            .map_err(PipelineError::ReactionStageFailed)?;

        let demo_audio = self.has_audio(&job.demo).await?;
        let demo = self.demo_invocation(job, demo_audio, scope);
        self.run(job, &demo).await.map_err(PipelineError::DemoStageFailed)?;

        let final_path = scope.artifact(FINAL);
        let concat_output = if job.music.is_some() {
            scope.artifact(PROGRAM)
        } else {
            final_path.clone()
        };

        let manifest = scope.artifact(SEGMENT_LIST);
        tokio::fs::write(
            &manifest,
            filters::concat_manifest(&[&reaction.output, &demo.output]),
        )
        .await?;
        let concat = self.concat_invocation(&manifest, &concat_output);
        self.run(job, &concat).await.map_err(PipelineError::ConcatFailed)?;

        if let Some(music) = &job.music {
            let mix = self.mix_invocation(&concat_output, music, job.audio.music_volume, &final_path);
            self.run(job, &mix).await.map_err(PipelineError::MixStageFailed)?;
        }

        artifacts::promote(&final_path, &job.output_path).await?;
        info!(
            job_id = %job.job_id,
            "Rendered {}",
            job.output_path.display()
        );

        Ok(layout.truncated)
    }

    async fn has_audio(&self, clip: &Clip) -> Result<bool, PipelineError> {
        let info = self.probe.probe(&clip.path).await.map_err(PipelineError::Probe)?;
        if !info.has_audio {
            debug!(clip = %clip.id, "Clip has no audio, synthesizing silence");
        }
        Ok(info.has_audio)
    }

    async fn run(&self, job: &RenderJob, invocation: &StageInvocation) -> crate::MediaResult<()> {
        debug!(job_id = %job.job_id, stage = %invocation.stage, "Starting stage");
        self.runner.run(invocation).await
    }

    /// Scale, pad, trim and burn in the hook.
    pub fn reaction_invocation(
        &self,
        job: &RenderJob,
        layout: &TextLayout,
        hook_file: &Path,
        has_audio: bool,
        scope: &ArtifactScope,
    ) -> StageInvocation {
        let drawtext = (!layout.is_empty()).then(|| {
            filters::drawtext_filter(layout, hook_file, self.config.font_file.as_deref())
        });
        self.segment_invocation(
            Stage::Reaction,
            &job.reaction,
            job.reaction_trim.as_ref(),
            Some(self.config.reaction_seconds),
            drawtext.as_deref(),
            has_audio,
            &scope.artifact(REACTION_SEGMENT),
        )
    }

    pub fn demo_invocation(&self, job: &RenderJob, has_audio: bool, scope: &ArtifactScope) -> StageInvocation {
        self.segment_invocation(
            Stage::Demo,
            &job.demo,
            job.demo_trim.as_ref(),
            None,
            None,
            has_audio,
            &scope.artifact(DEMO_SEGMENT),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn segment_invocation(
        &self,
        stage: Stage,
        clip: &Clip,
        trim: Option<&TrimWindow>,
        default_duration: Option<f64>,
        drawtext: Option<&str>,
        has_audio: bool,
        output: &Path,
    ) -> StageInvocation {
        let cfg = &self.config;

        let mut input = FfmpegInput::file(&clip.path);
        if let Some(start) = trim.map(|t| t.start).filter(|s| *s > 0.0) {
            input = input.seek(start);
        }
        if let Some(duration) = trim.and_then(|t| t.duration).or(default_duration) {
            input = input.duration(duration);
        }

        let frame = filters::frame_filter(cfg.frame_width, cfg.frame_height, cfg.frame_rate);
        let mut cmd = FfmpegCommand::new(output)
            .input(input)
            .filter_complex(filters::segment_video_graph(&frame, drawtext))
            .map("[v]");

        cmd = if has_audio {
            cmd.map("0:a:0")
        } else {
            cmd.input(FfmpegInput::lavfi(filters::silent_audio_source(
                cfg.encoding.sample_rate,
            )))
            .map("1:a:0")
            .shortest()
        };

        cmd.encoding(&cfg.encoding)
            .frame_rate(cfg.frame_rate)
            .strip_metadata()
            .into_invocation(stage, &cfg.ffmpeg_program)
    }

    fn concat_invocation(&self, manifest: &Path, output: &Path) -> StageInvocation {
        FfmpegCommand::new(output)
            .input(FfmpegInput::concat_list(manifest))
            .codec_copy()
            .strip_metadata()
            .faststart()
            .into_invocation(Stage::Concat, &self.config.ffmpeg_program)
    }

    fn mix_invocation(&self, program: &Path, music: &Clip, volume: f64, output: &Path) -> StageInvocation {
        FfmpegCommand::new(output)
            .input(FfmpegInput::file(program))
            .input(FfmpegInput::file(&music.path).arg("-stream_loop").arg("-1"))
            .filter_complex(filters::music_mix_graph(volume))
            .map("0:v")
            .map("[aout]")
            .video_copy(&self.config.encoding)
            .strip_metadata()
            .faststart()
            .into_invocation(Stage::Mix, &self.config.ffmpeg_program)
    }
}
