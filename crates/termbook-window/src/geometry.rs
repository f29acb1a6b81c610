use termbook_core::config::WindowSettings;
use termbook_core::types::Window;
use termbook_core::{Error, Result};

/// Fixed row height plus overscan. Row height makes pixel offsets and record
/// indices interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    record_height_px: u32,
    overscan: usize,
}

impl WindowGeometry {
    pub fn new(record_height_px: u32, overscan: usize) -> Result<Self> {
        if record_height_px == 0 {
            return Err(Error::InvalidConfig("record height must be > 0".into()));
        }
        Ok(Self { record_height_px, overscan })
    }

    pub fn from_settings(settings: &WindowSettings) -> Result<Self> {
        Self::new(settings.record_height_px, settings.overscan)
    }

    pub fn record_height_px(&self) -> u32 {
        self.record_height_px
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    /// The slice to materialize for `total` records at the given scroll position.
    ///
    /// `start` is clamped to `[0, total)` and `start + count <= total`; an
    /// empty collection yields an empty window with zero height.
    pub fn compute(&self, total: usize, scroll_px: f64, viewport_px: f64) -> Window {
        if total == 0 {
            return Window::default();
        }
        let height = f64::from(self.record_height_px);
        let start = ((sanitize(scroll_px) / height).floor() as usize).min(total - 1);
        let visible = (sanitize(viewport_px) / height).ceil() as usize;
        let count = visible.saturating_add(self.overscan).min(total - start);
        Window {
            start,
            count,
            top_offset_px: start as u64 * u64::from(self.record_height_px),
            total_height_px: total as u64 * u64::from(self.record_height_px),
        }
    }
}

fn sanitize(px: f64) -> f64 {
    if px.is_finite() && px > 0.0 { px } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo() -> WindowGeometry {
        WindowGeometry::new(45, 2).unwrap()
    }

    #[test]
    fn initial_viewport_with_overscan() {
        let w = geo().compute(1000, 0.0, 450.0);
        assert_eq!((w.start, w.count, w.top_offset_px), (0, 12, 0));
        assert_eq!(w.total_height_px, 45_000);
    }

    #[test]
    fn partial_rows_round_as_specified() {
        // 100px scrolled: row 2 is at the top; 100px viewport needs 3 rows.
        let w = geo().compute(1000, 100.0, 100.0);
        assert_eq!((w.start, w.count, w.top_offset_px), (2, 5, 90));
    }

    #[test]
    fn clamps_at_the_end_of_the_collection() {
        let w = geo().compute(10, 400.0, 450.0);
        assert_eq!(w.start, 8);
        assert_eq!(w.end(), 10);

        let past = geo().compute(10, 1.0e9, 450.0);
        assert_eq!((past.start, past.count), (9, 1));
    }

    #[test]
    fn empty_and_garbage_inputs() {
        assert_eq!(geo().compute(0, 500.0, 450.0), Window::default());
        let w = geo().compute(5, -30.0, f64::NAN);
        assert_eq!((w.start, w.count), (0, 2));
        assert!(WindowGeometry::new(0, 2).is_err());
    }

    #[test]
    fn slice_is_contained_and_start_is_monotonic() {
        let g = geo();
        for total in [0usize, 1, 2, 7, 100, 4_321] {
            for viewport in [0.0, 1.0, 44.0, 45.0, 46.0, 450.0, 10_000.0] {
                let mut last_start = 0;
                let mut scroll = 0.0;
                while scroll < (total as f64 + 5.0) * 45.0 {
                    let w = g.compute(total, scroll, viewport);
                    assert!(w.end() <= total, "total={total} scroll={scroll} viewport={viewport}");
                    if total > 0 {
                        assert!(w.start < total);
                    }
                    assert!(w.start >= last_start, "start must not move backwards");
                    last_start = w.start;
                    scroll += 17.5;
                }
            }
        }
    }
}
