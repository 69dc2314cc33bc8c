//! Frame sampling.
//!
//! The sampler walks the source video at a fixed interval and captures a
//! still for each timestamp. These stills are what the user clicks on and
//! what the intent service sees as the "current frame".

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vmask_models::SampledFrame;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Frame sampler configuration.
#[derive(Debug, Clone)]
pub struct FrameSamplerConfig {
    /// Seconds between sampled frames
    pub interval_secs: f64,
    /// Directory captured stills are written to
    pub output_dir: PathBuf,
    /// Image extension for captured stills
    pub image_extension: String,
    /// Per-capture timeout
    pub capture_timeout: Duration,
}

impl Default for FrameSamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0.2,
            output_dir: PathBuf::from("/tmp/vmask/frames"),
            image_extension: "jpg".to_string(),
            capture_timeout: Duration::from_secs(30),
        }
    }
}

impl FrameSamplerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            interval_secs: std::env::var("FRAME_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(0.2),
            output_dir: std::env::var("FRAME_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vmask/frames")),
            image_extension: std::env::var("FRAME_IMAGE_EXT").unwrap_or_else(|_| "jpg".to_string()),
            capture_timeout: Duration::from_secs(
                std::env::var("FRAME_CAPTURE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Decoder able to seek a video and capture a still.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    /// Seek to `timestamp_seconds`, wait for the seek to settle, and capture
    /// a still. `slot` is the position in the timestamp schedule.
    async fn capture(&self, timestamp_seconds: f64, slot: usize) -> MediaResult<String>;
}

/// Captures stills with one FFmpeg invocation per timestamp.
///
/// Each decoder writes into its own subdirectory of the configured output
/// directory, so stills of different videos never share a path.
pub struct FfmpegFrameDecoder {
    video: String,
    output_dir: PathBuf,
    image_extension: String,
    timeout: Duration,
}

impl FfmpegFrameDecoder {
    pub fn new(video: impl Into<String>, config: &FrameSamplerConfig) -> Self {
        Self {
            video: video.into(),
            output_dir: config.output_dir.join(format!("video_{}", Uuid::new_v4())),
            image_extension: config.image_extension.clone(),
            timeout: config.capture_timeout,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn output_path(&self, slot: usize) -> PathBuf {
        self.output_dir
            .join(format!("frame_{:05}.{}", slot, self.image_extension))
    }
}

/// Remove a still left over from an earlier capture.
async fn remove_stale(path: &Path) -> MediaResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn capture(&self, timestamp_seconds: f64, slot: usize) -> MediaResult<String> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_path(slot);
        remove_stale(&output).await?;

        let cmd = FfmpegCommand::new(self.video.clone(), &output)
            .seek(timestamp_seconds)
            .single_frame()
            .image_quality(3);

        FfmpegRunner::new()
            .with_timeout(self.timeout)
            .run(&cmd)
            .await
            .map_err(|e| MediaError::seek_failed(timestamp_seconds, e.to_string()))?;

        // FFmpeg exits cleanly without writing anything when the seek lands
        // past the last decodable frame.
        let written = tokio::fs::metadata(&output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(MediaError::seek_failed(timestamp_seconds, "no frame decoded"));
        }

        Ok(output.to_string_lossy().to_string())
    }
}

/// Timestamps sampled for a video of `duration` seconds.
///
/// Always contains `0.0`; never contains a value greater than `duration`.
pub fn sample_timestamps(duration: f64, interval: f64) -> Vec<f64> {
    if !duration.is_finite() || duration <= 0.0 || !interval.is_finite() || interval <= 0.0 {
        return vec![0.0];
    }

    // Integer stepping avoids accumulated float drift past the end.
    let count = (duration / interval + 1e-9).floor() as usize;
    (0..=count)
        .map(|i| ((i as f64 * interval) * 1000.0).round() / 1000.0)
        .map(|t| t.min(duration))
        .collect()
}

/// Lazy, restartable sequence of sampled frames for one video.
pub struct FrameSampler {
    decoder: Arc<dyn FrameDecoder>,
    duration: f64,
    interval: f64,
}

impl FrameSampler {
    pub fn new(decoder: Arc<dyn FrameDecoder>, duration: f64, interval: f64) -> MediaResult<Self> {
        if !interval.is_finite() || interval <= 0.0 {
            return Err(MediaError::invalid_input(format!(
                "frame interval must be positive, got {interval}"
            )));
        }
        Ok(Self {
            decoder,
            duration,
            interval,
        })
    }

    /// Probe a local video and build an FFmpeg-backed sampler for it.
    pub async fn for_video(
        path: impl AsRef<Path>,
        config: &FrameSamplerConfig,
    ) -> MediaResult<(Self, VideoInfo)> {
        let path = path.as_ref();
        let info = probe_video(path).await?;
        info!(
            video = %path.display(),
            duration = info.duration,
            interval = config.interval_secs,
            "Preparing frame sampler"
        );
        let decoder = Arc::new(FfmpegFrameDecoder::new(
            path.to_string_lossy().to_string(),
            config,
        ));
        let sampler = Self::new(decoder, info.duration, config.interval_secs)?;
        Ok((sampler, info))
    }

    pub fn timestamps(&self) -> Vec<f64> {
        sample_timestamps(self.duration, self.interval)
    }

    /// Stream of captured frames, one seek at a time.
    ///
    /// Each call starts over from the first timestamp. A failed capture is
    /// logged and skipped; indices stay contiguous over the frames produced.
    pub fn frames(&self) -> impl Stream<Item = SampledFrame> + '_ {
        stream::iter(self.timestamps().into_iter().enumerate())
            .filter_map(move |(slot, timestamp)| async move {
                match self.decoder.capture(timestamp, slot).await {
                    Ok(image_ref) => Some((timestamp, image_ref)),
                    Err(e) => {
                        warn!(timestamp, error = %e, "Skipping frame after failed capture");
                        None
                    }
                }
            })
            .enumerate()
            .map(|(index, (timestamp_seconds, image_ref))| SampledFrame {
                index,
                timestamp_seconds,
                image_ref,
            })
    }

    /// Capture every frame.
    pub async fn collect(&self) -> Vec<SampledFrame> {
        let frames: Vec<SampledFrame> = self.frames().collect().await;
        debug!(count = frames.len(), "Frame sampling finished");
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_timestamps_end_within_duration() {
        let ts = sample_timestamps(1.0, 0.2);
        assert_eq!(ts, vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);

        let ts = sample_timestamps(1.05, 0.2);
        assert_eq!(ts.last().copied(), Some(1.0));

        for duration in [0.3, 0.7, 2.99, 10.0, 59.94] {
            let ts = sample_timestamps(duration, 0.2);
            assert!(ts.iter().all(|t| *t <= duration), "duration {duration}");
            assert_eq!(ts[0], 0.0);
        }
    }

    #[test]
    fn test_zero_length_video_yields_one_frame() {
        assert_eq!(sample_timestamps(0.0, 0.2), vec![0.0]);
        assert_eq!(sample_timestamps(f64::NAN, 0.2), vec![0.0]);
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let decoder = Arc::new(ScriptedDecoder::default());
        assert!(FrameSampler::new(decoder, 1.0, 0.0).is_err());
    }

    #[derive(Default)]
    struct ScriptedDecoder {
        fail_slots: Vec<usize>,
        seeks: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl FrameDecoder for ScriptedDecoder {
        async fn capture(&self, timestamp_seconds: f64, slot: usize) -> MediaResult<String> {
            self.seeks.lock().unwrap().push(timestamp_seconds);
            if self.fail_slots.contains(&slot) {
                return Err(MediaError::seek_failed(timestamp_seconds, "decoder stalled"));
            }
            Ok(format!("frame_{slot}.jpg"))
        }
    }

    #[tokio::test]
    async fn test_failed_seek_is_skipped() {
        let decoder = Arc::new(ScriptedDecoder {
            fail_slots: vec![2],
            ..Default::default()
        });
        let sampler = FrameSampler::new(decoder.clone(), 1.0, 0.2).unwrap();

        let frames = sampler.collect().await;
        assert_eq!(frames.len(), 5);
        assert_eq!(
            frames.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(frames[2].timestamp_seconds, 0.6);
        assert_eq!(frames[2].image_ref, "frame_3.jpg");
        assert_eq!(decoder.seeks.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_frames_are_restartable() {
        let decoder = Arc::new(ScriptedDecoder::default());
        let sampler = FrameSampler::new(decoder, 0.4, 0.2).unwrap();

        let first = sampler.collect().await;
        let second = sampler.collect().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_decoders_never_share_still_paths() {
        let config = FrameSamplerConfig {
            output_dir: PathBuf::from("/tmp/vmask-test/frames"),
            ..Default::default()
        };
        let a = FfmpegFrameDecoder::new("/videos/a.mp4", &config);
        let b = FfmpegFrameDecoder::new("/videos/b.mp4", &config);

        assert_ne!(a.output_path(3), b.output_path(3));
        assert!(a.output_dir().starts_with(&config.output_dir));
        assert_eq!(
            a.output_path(3).file_name().and_then(|n| n.to_str()),
            Some("frame_00003.jpg")
        );
    }

    #[tokio::test]
    async fn test_stale_still_is_removed_before_capture() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("frame_00000.jpg");
        tokio::fs::write(&stale, b"old still").await.unwrap();

        remove_stale(&stale).await.unwrap();
        assert!(!stale.exists());
        // nothing to remove is fine
        remove_stale(&stale).await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_are_lazy() {
        let decoder = Arc::new(ScriptedDecoder::default());
        let sampler = FrameSampler::new(decoder.clone(), 10.0, 0.2).unwrap();

        let first_two: Vec<_> = sampler.frames().take(2).collect().await;
        assert_eq!(first_two.len(), 2);
        assert_eq!(decoder.seeks.lock().unwrap().len(), 2);
    }
}
