//! Pure planar geometry over page-pixel points
//!
//! Every function here works in raster pixel units. Converting to real-world
//! units is the caller's job: multiply lengths by the scale factor and areas by
//! its square.

use doc_model::Point;

/// Euclidean distance between two points
pub fn distance(a: &Point, b: &Point) -> f64 {
    a.distance_to(b)
}

/// Area enclosed by a polygon (shoelace formula)
///
/// Returns `0.0` for fewer than three points or for collinear input. The result
/// does not depend on vertex winding or on which vertex the sequence starts at.
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].x * points[j].y;
        twice_area -= points[j].x * points[i].y;
    }
    (twice_area / 2.0).abs()
}

/// Total length of the path through `points` in order
///
/// Returns `0.0` for fewer than two points.
pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| distance(&w[0], &w[1])).sum()
}

/// Vertex average, used as the default label anchor of a polygon
pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|p| p.x).sum();
    let sum_y: f64 = points.iter().map(|p| p.y).sum();
    Some(Point::new(sum_x / n, sum_y / n))
}

/// The vertex in the middle of the sequence (index `len / 2`)
pub fn middle_vertex(points: &[Point]) -> Option<Point> {
    points.get(points.len() / 2).copied()
}

/// Round to two decimal places, the precision stored values are kept at
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_unit_square_area() {
        let square = pts(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        assert_eq!(polygon_area(&square), 1.0);
    }

    #[test]
    fn test_area_invariant_under_reversal_and_rotation() {
        let shape = pts(&[(0.0, 0.0), (40.0, 0.0), (55.0, 30.0), (20.0, 45.0), (-5.0, 20.0)]);
        let expected = polygon_area(&shape);
        assert!(expected > 0.0);

        let mut reversed = shape.clone();
        reversed.reverse();
        assert!((polygon_area(&reversed) - expected).abs() < 1e-9);

        for start in 1..shape.len() {
            let mut rotated = shape.clone();
            rotated.rotate_left(start);
            assert!((polygon_area(&rotated) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_degenerate_polygons_have_zero_area() {
        assert_eq!(polygon_area(&[]), 0.0);
        assert_eq!(polygon_area(&pts(&[(1.0, 1.0)])), 0.0);
        assert_eq!(polygon_area(&pts(&[(0.0, 0.0), (5.0, 5.0)])), 0.0);
        assert_eq!(polygon_area(&pts(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)])), 0.0);
    }

    #[test]
    fn test_triangle_area() {
        // 0.5 * base * height = 0.5 * 10 * 10
        let triangle = pts(&[(0.0, 0.0), (10.0, 0.0), (5.0, 10.0)]);
        assert_eq!(polygon_area(&triangle), 50.0);
    }

    #[test]
    fn test_polyline_length() {
        assert_eq!(polyline_length(&pts(&[(0.0, 0.0), (3.0, 0.0), (3.0, 4.0)])), 7.0);
        assert_eq!(polyline_length(&pts(&[(0.0, 0.0), (3.0, 4.0)])), 5.0);
        assert_eq!(polyline_length(&pts(&[(2.0, 2.0)])), 0.0);
        assert_eq!(polyline_length(&[]), 0.0);
    }

    #[test]
    fn test_centroid_and_middle_vertex() {
        let square = pts(&[(0.0, 0.0), (60.0, 0.0), (60.0, 60.0), (0.0, 60.0)]);
        assert_eq!(centroid(&square), Some(Point::new(30.0, 30.0)));
        assert_eq!(centroid(&[]), None);

        let path = pts(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        assert_eq!(middle_vertex(&path), Some(Point::new(10.0, 0.0)));
        assert_eq!(middle_vertex(&[]), None);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(3.14159), 3.14);
        assert_eq!(round2(2.675_1), 2.68);
        assert_eq!(round2(10.0), 10.0);
    }
}
