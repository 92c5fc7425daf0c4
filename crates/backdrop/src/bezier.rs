//! Cubic-bezier easing shared by all opacity fades.
//!
//! CSS-style curve with endpoints pinned to (0,0) and (1,1); only the two
//! control points are configurable. `solve_t_for_x` inverts the x
//! polynomial with a few Newton iterations, falling back to bisection when
//! the derivative flattens out near the ends of the curve.

/// A unit cubic bezier with precomputed polynomial coefficients.
#[derive(Debug, Clone, Copy)]
pub struct Bezier {
    ax: f64,
    bx: f64,
    cx: f64,
    ay: f64,
    by: f64,
    cy: f64,
}

const NEWTON_ITERATIONS: u32 = 8;
const SOLVE_EPSILON: f64 = 1e-6;

impl Bezier {
    /// Build a curve from its two control points.
    #[must_use]
    pub fn new(p1x: f64, p1y: f64, p2x: f64, p2y: f64) -> Self {
        let cx = 3.0 * p1x;
        let bx = 3.0 * (p2x - p1x) - cx;
        let ax = 1.0 - cx - bx;
        let cy = 3.0 * p1y;
        let by = 3.0 * (p2y - p1y) - cy;
        let ay = 1.0 - cy - by;
        Self {
            ax,
            bx,
            cx,
            ay,
            by,
            cy,
        }
    }

    fn sample_x(&self, t: f64) -> f64 {
        ((self.ax * t + self.bx) * t + self.cx) * t
    }

    fn sample_y(&self, t: f64) -> f64 {
        ((self.ay * t + self.by) * t + self.cy) * t
    }

    fn sample_dx(&self, t: f64) -> f64 {
        (3.0 * self.ax * t + 2.0 * self.bx) * t + self.cx
    }

    /// Find the curve parameter whose x coordinate is `x`.
    #[must_use]
    pub fn solve_t_for_x(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);

        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let err = self.sample_x(t) - x;
            if err.abs() < SOLVE_EPSILON {
                return t;
            }
            let dx = self.sample_dx(t);
            if dx.abs() < SOLVE_EPSILON {
                break;
            }
            t -= err / dx;
        }

        // Newton stalled; the curve is monotonic in x, so bisect.
        let mut lo = 0.0f64;
        let mut hi = 1.0f64;
        t = x;
        while hi - lo > SOLVE_EPSILON {
            if self.sample_x(t) < x {
                lo = t;
            } else {
                hi = t;
            }
            t = (hi + lo) / 2.0;
        }
        t
    }

    /// Map normalized progress `x` through the curve, clamped to [0, 1].
    #[must_use]
    pub fn ease(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }
        self.sample_y(self.solve_t_for_x(x)).clamp(0.0, 1.0)
    }
}

/// Linear interpolation between `from` and `to`.
#[inline]
#[must_use]
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}
