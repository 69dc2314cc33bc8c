//! Pixel-level primitives and frame sampling for the mask workflow.
//!
//! This crate provides:
//! - Coordinate normalization and scale reconciliation
//! - Color-heuristic mask hit-testing over decoded rasters
//! - Interior-point sampling used to retain selected instances
//! - A frame sampler that captures timestamped stills through FFmpeg

pub mod command;
pub mod error;
pub mod frames;
pub mod geometry;
pub mod probe;
pub mod raster;
pub mod sampling;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{
    sample_timestamps, FfmpegFrameDecoder, FrameDecoder, FrameSampler, FrameSamplerConfig,
};
pub use geometry::{denormalize, find_nearest_point, normalize, reconcile_scale};
pub use probe::{probe_video, VideoInfo};
pub use raster::{hit_test, is_mask_rgb, FfmpegRasterLoader, MaskRaster, RasterCache, RasterLoader};
pub use sampling::{grid_step, sample_interior_points};
