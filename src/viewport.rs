//! The rectangle of the complex plane currently on screen.

use num_complex::Complex64;

/// Keeps the image from skewing as the view is zoomed in and out. Equals
/// `(top - bottom) / (right - left)` for the default viewport.
pub const MAGIC_RATIO: f64 = 0.75;

/// Axis-aligned rectangle of the complex plane, plus the pan/zoom step size.
///
/// `top` is the greater imaginary value; image rows grow downward through
/// decreasing imaginary parts. Invariants: `left < right`, `bottom < top`,
/// `zoom_factor > 0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    pub zoom_factor: f64,
}

impl Viewport {
    /// The whole-set view.
    pub fn home() -> Self {
        Viewport {
            left: -2.0,
            right: 1.0,
            top: 1.125,
            bottom: -1.125,
            zoom_factor: 0.1,
        }
    }

    /// A deep detail view whose tiles carry a relatively even amount of
    /// work, used for timing compute passes.
    pub fn benchmark() -> Self {
        Viewport {
            left: -0.7454,
            right: -0.7426,
            top: 0.14905,
            bottom: 0.14695,
            zoom_factor: 0.0001,
        }
    }

    /// The build-time initial viewport.
    pub fn initial() -> Self {
        if cfg!(feature = "benchmark") {
            Self::benchmark()
        } else {
            Self::home()
        }
    }

    /// Visible width of the complex plane.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// The complex parameter for pixel `(x, y)` of a `width x height` raster.
    pub fn point_at(&self, x: usize, y: usize, width: usize, height: usize) -> Complex64 {
        Complex64::new(
            self.left + x as f64 * (self.right - self.left) / width as f64,
            self.top + y as f64 * (self.bottom - self.top) / height as f64,
        )
    }

    /// Tighten the bounds by one zoom step. When the visible width drops
    /// under five zoom steps, the step collapses by 10x so that holding the
    /// key keeps making progress instead of inverting the rectangle.
    pub fn zoom_in(&mut self) {
        if self.width() < self.zoom_factor * 5.0 {
            self.zoom_factor *= 0.1;
        }

        self.top -= self.zoom_factor * MAGIC_RATIO;
        self.left += self.zoom_factor;
        self.bottom += self.zoom_factor * MAGIC_RATIO;
        self.right -= self.zoom_factor;
    }

    /// Widen the bounds by one zoom step, growing the step 10x once the
    /// visible width exceeds fifty of them.
    pub fn zoom_out(&mut self) {
        if self.width() > self.zoom_factor * 50.0 {
            self.zoom_factor *= 10.0;
        }

        self.top += self.zoom_factor * MAGIC_RATIO;
        self.left -= self.zoom_factor;
        self.bottom -= self.zoom_factor * MAGIC_RATIO;
        self.right += self.zoom_factor;
    }

    pub fn pan_up(&mut self) {
        self.top += self.zoom_factor;
        self.bottom += self.zoom_factor;
    }

    pub fn pan_down(&mut self) {
        self.top -= self.zoom_factor;
        self.bottom -= self.zoom_factor;
    }

    pub fn pan_left(&mut self) {
        self.left -= self.zoom_factor;
        self.right -= self.zoom_factor;
    }

    pub fn pan_right(&mut self) {
        self.left += self.zoom_factor;
        self.right += self.zoom_factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_pixel_maps_to_upper_left_bound() {
        let viewport = Viewport::home();
        let c = viewport.point_at(0, 0, 1024, 768);
        assert_eq!(c, Complex64::new(-2.0, 1.125));
    }

    #[test]
    fn center_pixel_maps_to_cardioid() {
        let viewport = Viewport::home();
        let c = viewport.point_at(512, 384, 1024, 768);
        assert_eq!(c, Complex64::new(-0.5, 0.0));
    }

    #[test]
    fn mapping_works_on_single_pixel_raster() {
        let viewport = Viewport::home();
        let c = viewport.point_at(0, 0, 1, 1);
        assert_eq!(c, Complex64::new(-2.0, 1.125));
    }

    #[test]
    fn zoom_in_tightens_all_four_bounds() {
        let mut viewport = Viewport::home();
        viewport.zoom_in();
        assert_eq!(viewport.left, -1.9);
        assert_eq!(viewport.right, 0.9);
        assert_eq!(viewport.top, 1.05);
        assert_eq!(viewport.bottom, -1.05);
        // 3.0 wide is nowhere near 5 zoom steps, so the step is unchanged.
        assert_eq!(viewport.zoom_factor, 0.1);
    }

    #[test]
    fn zoom_in_keeps_step_on_benchmark_view() {
        let mut viewport = Viewport::benchmark();
        let step = viewport.zoom_factor;
        viewport.zoom_in();
        // width 0.0028 exceeds 5 * 0.0001, so no collapse yet.
        assert_eq!(viewport.zoom_factor, step);
        assert!(viewport.left < viewport.right);
        assert!(viewport.bottom < viewport.top);
    }

    #[test]
    fn zoom_step_collapses_when_view_gets_narrow() {
        let mut viewport = Viewport::home();
        viewport.zoom_factor = 1.0;
        // width 3.0 < 5.0, so the step must collapse before being applied.
        viewport.zoom_in();
        assert_eq!(viewport.zoom_factor, 0.1);
    }

    #[test]
    fn zoom_step_grows_when_view_gets_wide() {
        let mut viewport = Viewport::home();
        viewport.zoom_factor = 0.01;
        // width 3.0 > 50 * 0.01, so the step grows before being applied.
        viewport.zoom_out();
        assert_eq!(viewport.zoom_factor, 0.1);
    }

    #[test]
    fn opposite_pans_restore_the_viewport_exactly() {
        let start = Viewport::home();

        let mut viewport = start;
        viewport.pan_up();
        viewport.pan_down();
        assert_eq!(viewport, start);

        let mut viewport = start;
        viewport.pan_left();
        viewport.pan_right();
        assert_eq!(viewport, start);
    }

    #[test]
    fn zoom_preserves_aspect_ratio() {
        let mut viewport = Viewport::home();
        let ratio = (viewport.top - viewport.bottom) / viewport.width();
        viewport.zoom_in();
        let zoomed = (viewport.top - viewport.bottom) / viewport.width();
        assert!((ratio - zoomed).abs() < 1e-12);
        assert!((ratio - MAGIC_RATIO).abs() < 1e-12);
    }
}
