//! Page-space points and rectangles

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, `x0 <= x1` and `y0 <= y1`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    /// Build from two corners in any order
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn from_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Smallest box that identifies a point-anchored annotation
    pub fn unit_at(point: Point) -> Self {
        Self::new(point.x, point.y, point.x + 1.0, point.y + 1.0)
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// True if the overlap has nonzero area
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && self.x1 > other.x0 && self.y0 < other.y1 && self.y1 > other.y0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x0 && point.x <= self.x1 && point.y >= self.y0 && point.y <= self.y1
    }

    /// Bounding box of several rectangles
    pub fn union_all<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Option<Rect> {
        rects.into_iter().fold(None, |acc, rect| {
            Some(match acc {
                None => *rect,
                Some(acc) => Rect::new(
                    acc.x0.min(rect.x0),
                    acc.y0.min(rect.y0),
                    acc.x1.max(rect.x1),
                    acc.y1.max(rect.y1),
                ),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_edges_do_not_intersect() {
        let a = Rect::from_size(0.0, 0.0, 10.0, 10.0);
        let b = Rect::from_size(10.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Rect::from_size(9.5, 9.5, 1.0, 1.0)));
    }

    #[test]
    fn unit_box_covers_anchor() {
        let rect = Rect::unit_at(Point::new(100.0, 200.0));
        assert_eq!(rect, Rect::new(100.0, 200.0, 101.0, 201.0));
        assert!(rect.contains(Point::new(100.0, 200.0)));
    }

    #[test]
    fn union_of_rects() {
        let rects = [Rect::new(0.0, 5.0, 2.0, 6.0), Rect::new(1.0, 0.0, 4.0, 3.0)];
        assert_eq!(Rect::union_all(&rects), Some(Rect::new(0.0, 0.0, 4.0, 6.0)));
        assert_eq!(Rect::union_all(&[] as &[Rect]), None);
    }
}
