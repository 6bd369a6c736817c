//! Conversion between report coordinates (top-left origin, y down) and PDF
//! user space (bottom-left origin, y up).

use serde::{Deserialize, Serialize};

/// A rectangle given by its origin corner and size, in points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// The visible area of one page, taken from its MediaBox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    /// Lower-left corner of the MediaBox. Almost always `(0, 0)`.
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageFrame {
    pub const fn new(width: f32, height: f32) -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            width,
            height,
        }
    }

    /// Top-left rect to PDF space: `y' = H - y - h`.
    pub fn rect_to_native(&self, rect: Rect) -> Rect {
        Rect {
            x: self.origin_x + rect.x,
            y: self.origin_y + self.height - rect.y - rect.h,
            ..rect
        }
    }

    /// Inverse of [`PageFrame::rect_to_native`].
    pub fn rect_from_native(&self, rect: Rect) -> Rect {
        Rect {
            x: rect.x - self.origin_x,
            y: self.origin_y + self.height - rect.y - rect.h,
            ..rect
        }
    }

    pub fn x_to_native(&self, x: f32) -> f32 {
        self.origin_x + x
    }

    /// A baseline measured downward from the page top, in PDF space.
    pub fn baseline_to_native(&self, y_down: f32) -> f32 {
        self.origin_y + self.height - y_down
    }
}

/// Largest rect with the image's aspect ratio that fits `area`, centred in it.
/// Degenerate image sizes fill the area as-is.
pub fn fit_within(area: Rect, img_w: f32, img_h: f32) -> Rect {
    if img_w <= 0.0 || img_h <= 0.0 {
        return area;
    }
    let scale = (area.w / img_w).min(area.h / img_h);
    let (w, h) = (img_w * scale, img_h * scale);
    Rect {
        x: area.x + (area.w - w) / 2.0,
        y: area.y + (area.h - h) / 2.0,
        w,
        h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const A4: PageFrame = PageFrame::new(595.0, 842.0);

    #[test]
    fn rect_is_flipped_once() {
        let native = A4.rect_to_native(Rect::new(50.0, 100.0, 200.0, 40.0));
        assert_eq!(native, Rect::new(50.0, 702.0, 200.0, 40.0));
    }

    #[test]
    fn rect_round_trip() {
        for rect in [
            Rect::new(0.0, 0.0, 595.0, 842.0),
            Rect::new(50.0, 100.0, 200.0, 40.0),
            Rect::new(12.5, 800.25, 30.0, 41.75),
        ] {
            assert_eq!(A4.rect_from_native(A4.rect_to_native(rect)), rect);
        }
    }

    #[test]
    fn round_trip_with_offset_media_box() {
        let frame = PageFrame {
            origin_x: 10.0,
            origin_y: 20.0,
            width: 400.0,
            height: 600.0,
        };
        let rect = Rect::new(30.0, 40.0, 50.0, 60.0);
        let native = frame.rect_to_native(rect);
        assert_eq!(native, Rect::new(40.0, 520.0, 50.0, 60.0));
        assert_eq!(frame.rect_from_native(native), rect);
    }

    #[test]
    fn baseline_measured_from_top() {
        assert_eq!(A4.baseline_to_native(0.0), 842.0);
        assert_eq!(A4.baseline_to_native(112.0), 730.0);
    }

    #[test]
    fn fit_within_preserves_aspect() {
        let area = Rect::new(0.0, 0.0, 200.0, 100.0);
        assert_eq!(fit_within(area, 50.0, 50.0), Rect::new(50.0, 0.0, 100.0, 100.0));
        assert_eq!(fit_within(area, 400.0, 100.0), Rect::new(0.0, 25.0, 200.0, 50.0));
        assert_eq!(fit_within(area, 0.0, 10.0), area);
    }
}
