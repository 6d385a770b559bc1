//! Planar polygon geometry for census blocks and boundaries.
//!
//! Coordinates are assumed to be in a projected CRS, so distances are plain
//! Euclidean distances in the CRS units (the search radius uses the same units).

use geo::line_measures::Distance;
use geo::{BoundingRect, Euclidean, Intersects, Rect};

pub use geo::{Coord, LineString, MultiPolygon, Polygon};

pub mod wkb;

/// Axis-aligned search window, in the column order of the R*Tree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    /// `None` for a geometry without any coordinates.
    pub fn of<G: BoundingRect<f64, Output = Option<Rect<f64>>>>(geom: &G) -> Option<BBox> {
        geom.bounding_rect().map(BBox::from)
    }

    /// Grow by `r` on every side.
    pub fn expand(&self, r: f64) -> BBox {
        BBox { minx: self.minx - r, miny: self.miny - r, maxx: self.maxx + r, maxy: self.maxy + r }
    }

    /// Lower bound of the distance between any two points of the boxes.
    pub fn gap(&self, other: &BBox) -> f64 {
        let dx = (other.minx - self.maxx).max(self.minx - other.maxx).max(0.0);
        let dy = (other.miny - self.maxy).max(self.miny - other.maxy).max(0.0);
        dx.hypot(dy)
    }
}

impl From<Rect<f64>> for BBox {
    fn from(r: Rect<f64>) -> Self {
        BBox { minx: r.min().x, miny: r.min().y, maxx: r.max().x, maxy: r.max().y }
    }
}

/// Minimum Euclidean distance between the two areas; 0 when they touch, overlap
/// or one contains the other.
pub fn distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    if a.0.is_empty() || b.0.is_empty() {
        return f64::INFINITY;
    }
    if a.intersects(b) {
        return 0.0;
    }
    Euclidean.distance(a, b)
}

/// `distance(a, b) <= radius`. Box gaps reject far pairs before the exact test.
pub fn within_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, radius: f64) -> bool {
    match (BBox::of(a), BBox::of(b)) {
        (Some(ba), Some(bb)) if ba.gap(&bb) <= radius => distance(a, b) <= radius,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x0 + side, y: y0 + side }).to_polygon()
    }

    fn mp(polys: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
        MultiPolygon::new(polys)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn holes_keep_inner_parts_apart() {
        let donut = Polygon::new(square(0.0, 0.0, 10.0).exterior().clone(), vec![square(4.0, 4.0, 2.0).exterior().clone()]);
        // A small square floating in the hole is 0.5 away from the hole edge
        let inner = mp(vec![square(4.5, 4.5, 1.0)]);
        let donut = mp(vec![donut]);
        assert!(close(distance(&donut, &inner), 0.5));
        assert!(!donut.intersects(&inner));
        assert!(within_distance(&donut, &inner, 0.5));
        assert!(!within_distance(&donut, &inner, 0.4));
    }

    #[test]
    fn distances_between_squares() {
        let a = mp(vec![square(0.0, 0.0, 1.0)]);
        assert!(close(distance(&a, &mp(vec![square(3.0, 0.0, 1.0)])), 2.0));
        assert!(close(distance(&a, &mp(vec![square(4.0, 5.0, 1.0)])), 5.0));
        assert_eq!(distance(&a, &mp(vec![square(1.0, 0.0, 1.0)])), 0.0);
        assert_eq!(distance(&a, &mp(vec![square(0.5, 0.5, 1.0)])), 0.0);
        let contained = mp(vec![square(0.25, 0.25, 0.5)]);
        assert_eq!(distance(&a, &contained), 0.0);
        assert_eq!(distance(&contained, &a), 0.0);
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn distance_is_true_not_bbox() {
        // L-shaped block whose bbox covers the other square but whose area does not
        let l = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 1.0), (1.0, 1.0), (1.0, 10.0), (0.0, 10.0)]),
            vec![],
        );
        let l = mp(vec![l]);
        let other = mp(vec![square(6.0, 6.0, 1.0)]);
        let (bl, bo) = (BBox::of(&l).unwrap(), BBox::of(&other).unwrap());
        assert_eq!(bl.gap(&bo), 0.0);
        assert!(close(distance(&l, &other), 5.0));
        assert!(!within_distance(&l, &other, 4.9));
        assert!(within_distance(&l, &other, 5.0));
    }

    #[test]
    fn multipolygon_distance_uses_nearest_part() {
        let a = mp(vec![square(0.0, 0.0, 1.0), square(100.0, 0.0, 1.0)]);
        let b = mp(vec![square(103.0, 0.0, 1.0)]);
        assert!(close(distance(&a, &b), 2.0));
        assert!(within_distance(&a, &b, 2.0));
        assert!(!within_distance(&a, &b, 1.99));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&mp(vec![square(0.5, 0.5, 0.1)])));
    }

    #[test]
    fn empty_geometry_is_never_near() {
        let a = mp(vec![square(0.0, 0.0, 1.0)]);
        let empty = mp(vec![]);
        assert_eq!(BBox::of(&empty), None);
        assert!(!within_distance(&a, &empty, 1e9));
        assert!(!within_distance(&empty, &empty, 0.0));
    }

    #[test]
    fn bbox_helpers() {
        let b = BBox::of(&square(0.0, 0.0, 2.0)).unwrap();
        assert_eq!(b, BBox { minx: 0.0, miny: 0.0, maxx: 2.0, maxy: 2.0 });
        assert_eq!(b.expand(1.0), BBox { minx: -1.0, miny: -1.0, maxx: 3.0, maxy: 3.0 });
        let far = BBox { minx: 5.0, miny: 6.0, maxx: 7.0, maxy: 7.0 };
        assert!(close(b.gap(&far), 5.0));
    }
}
