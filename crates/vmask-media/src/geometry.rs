//! Coordinate normalization and scale reconciliation.
//!
//! Clicks are measured against whatever surface the user sees; masks are
//! rasterized at whatever resolution the segmentation model produced. Every
//! pixel lookup goes through [`reconcile_scale`] first.

use vmask_models::{NormalizedPoint, PixelPoint, Resolution};

/// Map a pixel coordinate into `[0, 1]` on both axes.
///
/// An empty resolution maps everything to the origin.
pub fn normalize(pixel: PixelPoint, resolution: Resolution) -> NormalizedPoint {
    if resolution.is_empty() {
        return NormalizedPoint::default();
    }
    NormalizedPoint::new(
        clamp_unit(pixel.x / resolution.width as f64),
        clamp_unit(pixel.y / resolution.height as f64),
    )
}

/// Map a normalized coordinate back into `[0, w] x [0, h]`.
pub fn denormalize(point: NormalizedPoint, resolution: Resolution) -> PixelPoint {
    let w = resolution.width as f64;
    let h = resolution.height as f64;
    PixelPoint::new(
        (clamp_unit(point.x) * w).clamp(0.0, w),
        (clamp_unit(point.y) * h).clamp(0.0, h),
    )
}

/// Scale a click measured against `display` into `raster` pixel space.
///
/// Both axes are scaled independently. A click against an empty display
/// resolution is returned unchanged.
pub fn reconcile_scale(click: PixelPoint, display: Resolution, raster: Resolution) -> PixelPoint {
    if display.is_empty() || display == raster {
        return click;
    }
    let sx = raster.width as f64 / display.width as f64;
    let sy = raster.height as f64 / display.height as f64;
    PixelPoint::new(click.x * sx, click.y * sy)
}

/// Nearest item to `click` under Euclidean distance, if within `tolerance`.
pub fn find_nearest_point<'a, T, F>(
    click: PixelPoint,
    points: &'a [T],
    tolerance: f64,
    pixel_of: F,
) -> Option<&'a T>
where
    F: Fn(&T) -> PixelPoint,
{
    points
        .iter()
        .map(|p| (p, click.distance_to(&pixel_of(p))))
        .filter(|(_, d)| *d <= tolerance)
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(p, _)| p)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_clamps() {
        let res = Resolution::new(200, 100);
        assert_eq!(
            normalize(PixelPoint::new(100.0, 50.0), res),
            NormalizedPoint::new(0.5, 0.5)
        );
        assert_eq!(
            normalize(PixelPoint::new(-10.0, 500.0), res),
            NormalizedPoint::new(0.0, 1.0)
        );
        assert_eq!(
            normalize(PixelPoint::new(10.0, 10.0), Resolution::new(0, 0)),
            NormalizedPoint::default()
        );
    }

    #[test]
    fn test_denormalize_clamps() {
        let res = Resolution::new(640, 480);
        assert_eq!(
            denormalize(NormalizedPoint::new(1.5, -0.2), res),
            PixelPoint::new(640.0, 0.0)
        );
    }

    #[test]
    fn test_normalize_denormalize_round_trip() {
        let resolutions = [
            Resolution::new(1, 1),
            Resolution::new(640, 480),
            Resolution::new(1920, 1080),
            Resolution::new(333, 7),
        ];
        for res in resolutions {
            for i in 0..=100 {
                let n = i as f64 / 100.0;
                let p = denormalize(NormalizedPoint::new(n, 1.0 - n), res);
                let back = normalize(p, res);
                assert!((back.x - n).abs() < 1e-9, "x {n} at {res}");
                assert!((back.y - (1.0 - n)).abs() < 1e-9, "y {n} at {res}");
            }
        }
    }

    #[test]
    fn test_reconcile_scale_upscales() {
        let scaled = reconcile_scale(
            PixelPoint::new(100.0, 100.0),
            Resolution::new(200, 200),
            Resolution::new(400, 400),
        );
        assert_eq!(scaled, PixelPoint::new(200.0, 200.0));
    }

    #[test]
    fn test_reconcile_scale_axes_independent() {
        let scaled = reconcile_scale(
            PixelPoint::new(960.0, 540.0),
            Resolution::new(1920, 1080),
            Resolution::new(1024, 1024),
        );
        assert!((scaled.x - 512.0).abs() < 1e-9);
        assert!((scaled.y - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_scale_identity() {
        let click = PixelPoint::new(12.5, 7.0);
        let res = Resolution::new(100, 100);
        assert_eq!(reconcile_scale(click, res, res), click);
        assert_eq!(reconcile_scale(click, Resolution::new(0, 0), res), click);
    }

    #[test]
    fn test_find_nearest_point() {
        let points = vec![
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(10.0, 0.0),
            PixelPoint::new(100.0, 100.0),
        ];
        let nearest = find_nearest_point(PixelPoint::new(8.0, 1.0), &points, 5.0, |p| *p);
        assert_eq!(nearest, Some(&PixelPoint::new(10.0, 0.0)));

        let none = find_nearest_point(PixelPoint::new(50.0, 50.0), &points, 5.0, |p| *p);
        assert_eq!(none, None);

        let empty: Vec<PixelPoint> = Vec::new();
        assert_eq!(find_nearest_point(PixelPoint::new(0.0, 0.0), &empty, 5.0, |p| *p), None);
    }
}
