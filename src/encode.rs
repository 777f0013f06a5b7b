use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::process::Command;

use crate::{
    cache::artifacts::{EncodedArtifact, OutputFormat},
    error::{PreviewError, PreviewResult},
    frame::{FrameSet, RasterImage},
};

/// Encoder parameters shared by both formats.
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    /// Playback rate of the looping image.
    pub loop_fps: u32,
    /// Playback rate of the video.
    pub video_fps: u32,
    /// The looping image is scaled down to this width (GIF payloads grow
    /// quickly with resolution).
    pub loop_max_width: u32,
    /// Bound on one workspace initialization attempt.
    pub init_timeout: Duration,
    /// Initialization attempts before giving up for this run.
    pub init_attempts: u32,
    /// Base delay of the capped exponential backoff between attempts.
    pub init_backoff: Duration,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            loop_fps: 12,
            video_fps: 24,
            loop_max_width: 480,
            init_timeout: Duration::from_secs(30),
            init_attempts: 3,
            init_backoff: Duration::from_millis(250),
        }
    }
}

/// Progress sink for encode runs: a human-readable step message plus an
/// optional percent.
pub type ProgressFn = dyn Fn(&str, Option<f32>) + Send + Sync;

/// The encoder process behind the workspace.
///
/// Injected rather than reached through a global so independent pipelines
/// (and tests) never share encoder state.
#[async_trait::async_trait]
pub trait EncoderBackend: Send + Sync {
    /// Cheap availability check, used while initializing the workspace.
    async fn probe(&self) -> PreviewResult<()>;

    /// One encoder conversation against `workdir`. The final argument names
    /// the output file relative to `workdir`.
    async fn run(&self, workdir: &Path, args: &[String]) -> PreviewResult<()>;
}

/// Drives the system `ffmpeg` binary.
pub struct FfmpegRunner;

#[async_trait::async_trait]
impl EncoderBackend for FfmpegRunner {
    async fn probe(&self) -> PreviewResult<()> {
        let status = Command::new("ffmpeg")
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| {
                PreviewError::encoder_init(format!(
                    "ffmpeg not runnable (is it installed and on PATH?): {e}"
                ))
            })?;
        if !status.success() {
            return Err(PreviewError::encoder_init("ffmpeg -version failed"));
        }
        Ok(())
    }

    async fn run(&self, workdir: &Path, args: &[String]) -> PreviewResult<()> {
        let output = Command::new("ffmpeg")
            .current_dir(workdir)
            .args(args)
            .output()
            .await
            .map_err(|e| PreviewError::Other(anyhow::anyhow!("failed to spawn ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::Other(anyhow::anyhow!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

struct Workspace {
    root: PathBuf,
    ready: bool,
}

/// Consumes a selected frame subset and produces one encoded artifact.
///
/// All encode conversations, for either format and any fingerprint, funnel
/// through the workspace mutex: the workspace directory and the encoder
/// behind it are a single shared resource.
pub struct FormatEncoder {
    backend: Arc<dyn EncoderBackend>,
    workspace: tokio::sync::Mutex<Workspace>,
    cfg: EncodeConfig,
}

impl FormatEncoder {
    pub fn new(backend: Arc<dyn EncoderBackend>, workspace_root: PathBuf, cfg: EncodeConfig) -> Self {
        Self {
            backend,
            workspace: tokio::sync::Mutex::new(Workspace {
                root: workspace_root,
                ready: false,
            }),
            cfg,
        }
    }

    /// Encode the frames at `indices` (in order) into `format`.
    ///
    /// A failure here is scoped to this format; the caller decides what to
    /// do about the sibling.
    pub async fn encode(
        &self,
        set: &FrameSet,
        indices: &[usize],
        format: OutputFormat,
        progress: &(dyn Fn(&str, Option<f32>) + Send + Sync),
    ) -> PreviewResult<EncodedArtifact> {
        if indices.is_empty() {
            return Err(PreviewError::encode(format, "no frames selected"));
        }

        let mut ws = self.workspace.lock().await;
        self.ensure_ready(&mut ws).await?;
        reset_workspace(&ws.root).await;

        self.write_frames(&ws.root, set, indices, format, progress)
            .await?;

        progress(&format!("encoding {format}"), Some(60.0));
        let out_name = format!("out.{}", format.file_extension());
        match format {
            OutputFormat::LoopImage => self.run_loop_image(&ws.root, &out_name).await?,
            OutputFormat::Video => self.run_video(&ws.root, &out_name).await?,
        }

        let bytes = tokio::fs::read(ws.root.join(&out_name))
            .await
            .map_err(|e| {
                PreviewError::encode(format, format!("failed to read encoder output: {e}"))
            })?;
        if bytes.is_empty() {
            return Err(PreviewError::encode(format, "encoder produced an empty file"));
        }

        progress(&format!("{format} ready"), Some(100.0));
        reset_workspace(&ws.root).await;

        Ok(EncodedArtifact {
            format,
            fingerprint: set.fingerprint(),
            bytes,
        })
    }

    async fn write_frames(
        &self,
        root: &Path,
        set: &FrameSet,
        indices: &[usize],
        format: OutputFormat,
        progress: &(dyn Fn(&str, Option<f32>) + Send + Sync),
    ) -> PreviewResult<()> {
        let frames = set.frames();
        for (seq, &idx) in indices.iter().enumerate() {
            let frame = frames.get(idx).ok_or_else(|| {
                PreviewError::encode(format, format!("selected index {idx} out of range"))
            })?;
            let png = encode_png(frame, format)?;
            let name = format!("frame_{seq:04}.png");
            tokio::fs::write(root.join(name), png).await.map_err(|e| {
                PreviewError::encode(format, format!("failed to write workspace frame: {e}"))
            })?;

            if seq % 16 == 0 {
                let pct = seq as f32 / indices.len() as f32 * 50.0;
                progress("writing frames", Some(pct));
            }
        }
        Ok(())
    }

    /// Palette-based two-pass GIF; falls back to a single pass when palette
    /// generation fails.
    async fn run_loop_image(&self, root: &Path, out_name: &str) -> PreviewResult<()> {
        let fps = self.cfg.loop_fps;
        let scale = format!(
            "scale='min({},iw)':-2:flags=lanczos",
            self.cfg.loop_max_width
        );

        let palette_args = args([
            "-y",
            "-loglevel",
            "error",
            "-framerate",
            &fps.to_string(),
            "-i",
            "frame_%04d.png",
            "-vf",
            &format!("{scale},palettegen=stats_mode=diff"),
            "palette.png",
        ]);

        match self.backend.run(root, &palette_args).await {
            Ok(()) => {
                let use_args = args([
                    "-y",
                    "-loglevel",
                    "error",
                    "-framerate",
                    &fps.to_string(),
                    "-i",
                    "frame_%04d.png",
                    "-i",
                    "palette.png",
                    "-lavfi",
                    &format!("{scale}[s];[s][1:v]paletteuse=dither=sierra2_4a"),
                    "-loop",
                    "0",
                    out_name,
                ]);
                self.backend
                    .run(root, &use_args)
                    .await
                    .map_err(|e| PreviewError::encode(OutputFormat::LoopImage, e.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "palette generation failed, using single-pass gif");
                let fallback_args = args([
                    "-y",
                    "-loglevel",
                    "error",
                    "-framerate",
                    &fps.to_string(),
                    "-i",
                    "frame_%04d.png",
                    "-vf",
                    &scale,
                    "-loop",
                    "0",
                    out_name,
                ]);
                self.backend
                    .run(root, &fallback_args)
                    .await
                    .map_err(|e| PreviewError::encode(OutputFormat::LoopImage, e.to_string()))
            }
        }
    }

    /// Fixed-framerate single-pass MP4. Dimensions are forced even for
    /// yuv420p output.
    async fn run_video(&self, root: &Path, out_name: &str) -> PreviewResult<()> {
        let video_args = args([
            "-y",
            "-loglevel",
            "error",
            "-framerate",
            &self.cfg.video_fps.to_string(),
            "-i",
            "frame_%04d.png",
            "-an",
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
            out_name,
        ]);
        self.backend
            .run(root, &video_args)
            .await
            .map_err(|e| PreviewError::encode(OutputFormat::Video, e.to_string()))
    }

    async fn ensure_ready(&self, ws: &mut Workspace) -> PreviewResult<()> {
        if ws.ready {
            return Ok(());
        }

        let mut delay = self.cfg.init_backoff;
        let mut last_err = String::new();
        for attempt in 1..=self.cfg.init_attempts.max(1) {
            match tokio::time::timeout(self.cfg.init_timeout, self.try_init(&ws.root)).await {
                Ok(Ok(())) => {
                    ws.ready = true;
                    return Ok(());
                }
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => {
                    last_err = format!("timed out after {:?}", self.cfg.init_timeout);
                }
            }
            if attempt < self.cfg.init_attempts {
                tracing::warn!(attempt, error = %last_err, "encoder init failed, backing off");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
        }

        Err(PreviewError::encoder_init(format!(
            "gave up after {} attempts: {last_err}",
            self.cfg.init_attempts.max(1)
        )))
    }

    async fn try_init(&self, root: &Path) -> PreviewResult<()> {
        self.backend.probe().await?;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| PreviewError::encoder_init(format!("failed to create workspace: {e}")))?;
        Ok(())
    }
}

/// Remove prior intermediates. Failures are logged and tolerated; a missing
/// file here is the expected steady state.
async fn reset_workspace(root: &Path) {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error = %e, "workspace reset found nothing to list");
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::debug!(
                path = %entry.path().display(),
                error = %e,
                "workspace cleanup skipped an entry"
            );
        }
    }
}

fn encode_png(frame: &RasterImage, format: OutputFormat) -> PreviewResult<Vec<u8>> {
    use image::ImageEncoder;

    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| PreviewError::encode(format, format!("png encode failed: {e}")))?;
    Ok(out)
}

fn args<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use parking_lot::Mutex;

    struct FakeBackend {
        fail_probe: bool,
        fail_palette: bool,
        fail_video: bool,
        runs: Mutex<Vec<Vec<String>>>,
        probes: Mutex<u32>,
    }

    impl FakeBackend {
        fn ok() -> Self {
            Self {
                fail_probe: false,
                fail_palette: false,
                fail_video: false,
                runs: Mutex::new(Vec::new()),
                probes: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EncoderBackend for FakeBackend {
        async fn probe(&self) -> PreviewResult<()> {
            *self.probes.lock() += 1;
            if self.fail_probe {
                return Err(PreviewError::encoder_init("no encoder here"));
            }
            Ok(())
        }

        async fn run(&self, workdir: &Path, args: &[String]) -> PreviewResult<()> {
            self.runs.lock().push(args.to_vec());
            let is_palette_pass = args.iter().any(|a| a.contains("palettegen"));
            if self.fail_palette && is_palette_pass {
                return Err(PreviewError::Other(anyhow::anyhow!("palettegen refused")));
            }
            if self.fail_video && args.iter().any(|a| a == "libx264") {
                return Err(PreviewError::Other(anyhow::anyhow!("codec missing")));
            }
            let out = workdir.join(args.last().expect("args never empty"));
            tokio::fs::write(out, b"ENCODED").await.unwrap();
            Ok(())
        }
    }

    fn frame_set(count: usize) -> FrameSet {
        let frames = (0..count)
            .map(|i| RasterImage::from_rgba8(4, 4, vec![(i % 255) as u8; 64]).unwrap())
            .collect();
        FrameSet::new(Fingerprint { hi: 1, lo: 2 }, frames)
    }

    fn fast_cfg() -> EncodeConfig {
        EncodeConfig {
            init_timeout: Duration::from_millis(100),
            init_attempts: 2,
            init_backoff: Duration::from_millis(1),
            ..EncodeConfig::default()
        }
    }

    fn no_progress() -> Box<ProgressFn> {
        Box::new(|_msg: &str, _pct: Option<f32>| {})
    }

    #[tokio::test]
    async fn video_encode_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::ok());
        let encoder = FormatEncoder::new(
            Arc::clone(&backend) as Arc<dyn EncoderBackend>,
            dir.path().join("ws"),
            fast_cfg(),
        );

        let set = frame_set(6);
        let artifact = encoder
            .encode(&set, &[0, 2, 4], OutputFormat::Video, &*no_progress())
            .await
            .unwrap();

        assert_eq!(artifact.format, OutputFormat::Video);
        assert_eq!(artifact.bytes, b"ENCODED");
        assert_eq!(backend.runs.lock().len(), 1);

        // The workspace is cleaned after a successful run.
        let mut leftovers = std::fs::read_dir(dir.path().join("ws")).unwrap();
        assert!(leftovers.next().is_none());
    }

    #[tokio::test]
    async fn loop_image_uses_two_passes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::ok());
        let encoder = FormatEncoder::new(
            Arc::clone(&backend) as Arc<dyn EncoderBackend>,
            dir.path().join("ws"),
            fast_cfg(),
        );

        let set = frame_set(4);
        encoder
            .encode(&set, &[0, 1, 2, 3], OutputFormat::LoopImage, &*no_progress())
            .await
            .unwrap();

        let runs = backend.runs.lock();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].iter().any(|a| a.contains("palettegen")));
        assert!(runs[1].iter().any(|a| a.contains("paletteuse")));
    }

    #[tokio::test]
    async fn loop_image_falls_back_to_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            fail_palette: true,
            ..FakeBackend::ok()
        });
        let encoder = FormatEncoder::new(
            Arc::clone(&backend) as Arc<dyn EncoderBackend>,
            dir.path().join("ws"),
            fast_cfg(),
        );

        let set = frame_set(4);
        let artifact = encoder
            .encode(&set, &[0, 1, 2, 3], OutputFormat::LoopImage, &*no_progress())
            .await
            .unwrap();

        assert_eq!(artifact.bytes, b"ENCODED");
        let runs = backend.runs.lock();
        assert_eq!(runs.len(), 2);
        assert!(!runs[1].iter().any(|a| a.contains("paletteuse")));
    }

    #[tokio::test]
    async fn init_exhausts_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            fail_probe: true,
            ..FakeBackend::ok()
        });
        let encoder = FormatEncoder::new(
            Arc::clone(&backend) as Arc<dyn EncoderBackend>,
            dir.path().join("ws"),
            fast_cfg(),
        );

        let set = frame_set(2);
        let err = encoder
            .encode(&set, &[0, 1], OutputFormat::Video, &*no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, PreviewError::EncoderInit(_)));
        assert_eq!(*backend.probes.lock(), 2);
    }

    #[tokio::test]
    async fn out_of_range_selection_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::ok());
        let encoder = FormatEncoder::new(
            backend as Arc<dyn EncoderBackend>,
            dir.path().join("ws"),
            fast_cfg(),
        );

        let set = frame_set(2);
        let err = encoder
            .encode(&set, &[0, 9], OutputFormat::Video, &*no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Encode { .. }));
    }
}
