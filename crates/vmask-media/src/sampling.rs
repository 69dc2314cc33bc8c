//! Interior-point sampling over a mask raster.
//!
//! When the user excludes one instance of an object, the other instances
//! that were already selected must stay selected. We scan the mask on a
//! coarse grid and pick a few mask-positive points away from the exclusion
//! click to resubmit as include points.

use rand::seq::IndexedRandom;
use rand::Rng;

use vmask_models::PixelPoint;

use crate::raster::{hit_test, MaskRaster};

/// Grid step used when scanning a raster: `max(50, min(w, h) / 20)`.
pub fn grid_step(raster: &MaskRaster) -> u32 {
    (raster.resolution().min_side() / 20).max(50)
}

/// Up to `max_samples` mask-positive grid points at least `exclude_radius`
/// away from `exclude`, chosen uniformly at random without replacement.
///
/// All coordinates are in raster pixels.
pub fn sample_interior_points<R>(
    raster: &MaskRaster,
    exclude: PixelPoint,
    exclude_radius: f64,
    max_samples: usize,
    rng: &mut R,
) -> Vec<PixelPoint>
where
    R: Rng + ?Sized,
{
    if max_samples == 0 {
        return Vec::new();
    }

    let step = grid_step(raster) as usize;
    let res = raster.resolution();

    let mut candidates = Vec::new();
    for y in (0..res.height).step_by(step) {
        for x in (0..res.width).step_by(step) {
            let point = PixelPoint::new(x as f64, y as f64);
            if hit_test(raster, point.x, point.y) && point.distance_to(&exclude) >= exclude_radius {
                candidates.push(point);
            }
        }
    }

    candidates
        .choose_multiple(rng, max_samples)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 400x400 black raster with two green squares.
    fn two_instances() -> MaskRaster {
        let mut image = RgbaImage::from_pixel(400, 400, Rgba([0, 0, 0, 255]));
        for y in 0..400 {
            for x in 0..400 {
                let left = (40..160).contains(&x) && (40..160).contains(&y);
                let right = (240..360).contains(&x) && (240..360).contains(&y);
                if left || right {
                    image.put_pixel(x, y, Rgba([0, 200, 0, 255]));
                }
            }
        }
        MaskRaster::new(image)
    }

    #[test]
    fn test_grid_step_floor() {
        assert_eq!(grid_step(&two_instances()), 50);
        let big = MaskRaster::new(RgbaImage::new(4000, 2000));
        assert_eq!(grid_step(&big), 100);
    }

    #[test]
    fn test_samples_avoid_excluded_instance() {
        let raster = two_instances();
        let mut rng = StdRng::seed_from_u64(7);
        let click = PixelPoint::new(100.0, 100.0);

        let samples = sample_interior_points(&raster, click, 120.0, 10, &mut rng);
        assert!(!samples.is_empty());
        for p in &samples {
            assert!(hit_test(&raster, p.x, p.y));
            assert!(p.distance_to(&click) >= 120.0);
            assert!(p.x >= 240.0 && p.y >= 240.0, "sample {p:?} is in the excluded instance");
        }
    }

    #[test]
    fn test_samples_are_distinct_and_bounded() {
        let raster = two_instances();
        let mut rng = StdRng::seed_from_u64(1);
        let samples =
            sample_interior_points(&raster, PixelPoint::new(-1000.0, -1000.0), 0.0, 3, &mut rng);
        assert_eq!(samples.len(), 3);
        for (i, a) in samples.iter().enumerate() {
            for b in &samples[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_no_candidates() {
        let raster = MaskRaster::new(RgbaImage::from_pixel(200, 200, Rgba([50, 50, 50, 255])));
        let mut rng = StdRng::seed_from_u64(3);
        assert!(sample_interior_points(&raster, PixelPoint::default(), 0.0, 5, &mut rng).is_empty());
    }
}
