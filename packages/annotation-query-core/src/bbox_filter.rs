// Envelope tests run before exact spatial predicates.
// Bounding boxes are [min_x, min_y, max_x, max_y] in image pixel space.
use geo::{BoundingRect, Geometry};

use crate::predicate::SpatialRelation;

// Bounding box of a geometry, None for empty geometries
pub fn geometry_bbox(geometry: &Geometry<f64>) -> Option<[f64; 4]> {
    geometry
        .bounding_rect()
        .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

// Function to check if a point is inside a bounding box (edges included)
pub fn point_in_bbox(point: [f64; 2], bbox: &[f64; 4]) -> bool {
    point[0] >= bbox[0] && point[0] <= bbox[2] && point[1] >= bbox[1] && point[1] <= bbox[3]
}

// Two boxes overlap if they share at least one point
pub fn bboxes_overlap(a: &[f64; 4], b: &[f64; 4]) -> bool {
    !(a[2] < b[0] || a[0] > b[2] || a[3] < b[1] || a[1] > b[3])
}

pub fn bbox_contains(outer: &[f64; 4], inner: &[f64; 4]) -> bool {
    point_in_bbox([inner[0], inner[1]], outer) && point_in_bbox([inner[2], inner[3]], outer)
}

pub fn expand_bbox(bbox: &[f64; 4], margin: f64) -> [f64; 4] {
    [bbox[0] - margin, bbox[1] - margin, bbox[2] + margin, bbox[3] + margin]
}

// Whether `subject relation reference` can possibly hold given only the envelopes.
// A false here is final; a true still needs the exact test.
pub fn bbox_prefilter(relation: SpatialRelation, subject: &[f64; 4], reference: &[f64; 4]) -> bool {
    match relation {
        SpatialRelation::Intersects
        | SpatialRelation::Touches
        | SpatialRelation::Crosses
        | SpatialRelation::Overlaps => bboxes_overlap(subject, reference),
        SpatialRelation::Within => bbox_contains(reference, subject),
        SpatialRelation::Contains => bbox_contains(subject, reference),
        SpatialRelation::Nearest { distance } => {
            bboxes_overlap(subject, &expand_bbox(reference, distance))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon};

    #[test]
    fn bbox_of_polygon_and_point() {
        let square: Geometry<f64> = polygon![
            (x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 0.0, y: 2.0)
        ]
        .into();
        assert_eq!(geometry_bbox(&square), Some([0.0, 0.0, 4.0, 2.0]));
        let p: Geometry<f64> = point!(x: 3.0, y: 1.0).into();
        assert_eq!(geometry_bbox(&p), Some([3.0, 1.0, 3.0, 1.0]));
    }

    #[test]
    fn touching_edges_overlap() {
        assert!(bboxes_overlap(&[0.0, 0.0, 1.0, 1.0], &[1.0, 0.0, 2.0, 1.0]));
        assert!(!bboxes_overlap(&[0.0, 0.0, 1.0, 1.0], &[1.5, 0.0, 2.0, 1.0]));
    }

    #[test]
    fn prefilter_respects_direction() {
        let small = [1.0, 1.0, 2.0, 2.0];
        let large = [0.0, 0.0, 10.0, 10.0];
        assert!(bbox_prefilter(SpatialRelation::Within, &small, &large));
        assert!(!bbox_prefilter(SpatialRelation::Within, &large, &small));
        assert!(bbox_prefilter(SpatialRelation::Contains, &large, &small));
        assert!(!bbox_prefilter(SpatialRelation::Contains, &small, &large));
    }

    #[test]
    fn nearest_prefilter_expands_by_distance() {
        let a = [0.0, 0.0, 1.0, 1.0];
        let b = [3.0, 0.0, 4.0, 1.0];
        assert!(!bbox_prefilter(SpatialRelation::Nearest { distance: 1.0 }, &a, &b));
        assert!(bbox_prefilter(SpatialRelation::Nearest { distance: 2.0 }, &a, &b));
    }
}
