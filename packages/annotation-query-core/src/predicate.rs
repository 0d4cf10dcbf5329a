// Single-clause predicates: numeric ranges, categorical sets and spatial
// relations. Every evaluation is a pure function of its inputs.

use geo::{Distance, Euclidean, Geometry, Intersects, Relate};
use serde_json::Value;

use crate::bbox_filter::{bbox_prefilter, geometry_bbox};
use crate::error::{QueryError, Result};
use crate::property::PropertyValue;

/// Named planar relation between a subject and a reference geometry.
///
/// `Within` and `Contains` include the closed boundary (covered-by / covers),
/// so a point on a polygon's edge is within that polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialRelation {
    Intersects,
    Within,
    Contains,
    Touches,
    Crosses,
    Overlaps,
    Nearest { distance: f64 },
}

impl SpatialRelation {
    /// Parse a relation name. `nearest` needs a finite, non-negative distance.
    pub fn parse(name: &str, distance: Option<f64>) -> Result<Self> {
        let relation = match name {
            "intersects" => SpatialRelation::Intersects,
            "within" => SpatialRelation::Within,
            "contains" => SpatialRelation::Contains,
            "touches" => SpatialRelation::Touches,
            "crosses" => SpatialRelation::Crosses,
            "overlaps" => SpatialRelation::Overlaps,
            "nearest" => match distance {
                Some(d) if d.is_finite() && d >= 0.0 => SpatialRelation::Nearest { distance: d },
                Some(d) => {
                    return Err(QueryError::MalformedClause(format!(
                        "nearest distance must be a non-negative number, got {}",
                        d
                    )))
                }
                None => {
                    return Err(QueryError::MalformedClause(
                        "nearest requires a distance".to_string(),
                    ))
                }
            },
            other => return Err(QueryError::UnknownRelation(other.to_string())),
        };
        Ok(relation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpatialRelation::Intersects => "intersects",
            SpatialRelation::Within => "within",
            SpatialRelation::Contains => "contains",
            SpatialRelation::Touches => "touches",
            SpatialRelation::Crosses => "crosses",
            SpatialRelation::Overlaps => "overlaps",
            SpatialRelation::Nearest { .. } => "nearest",
        }
    }

    /// Exact test of `subject <relation> reference`.
    pub fn evaluate(&self, subject: &Geometry<f64>, reference: &Geometry<f64>) -> bool {
        match self {
            SpatialRelation::Intersects => subject.intersects(reference),
            SpatialRelation::Nearest { distance } => Euclidean.distance(subject, reference) <= *distance,
            SpatialRelation::Within => subject.relate(reference).is_coveredby(),
            SpatialRelation::Contains => subject.relate(reference).is_covers(),
            SpatialRelation::Touches => subject.relate(reference).is_touches(),
            SpatialRelation::Crosses => subject.relate(reference).is_crosses(),
            SpatialRelation::Overlaps => subject.relate(reference).is_overlaps(),
        }
    }

    /// Envelope prefilter followed by the exact test.
    pub fn holds(&self, subject: &IndexedGeometry, reference: &IndexedGeometry) -> bool {
        match (&subject.bbox, &reference.bbox) {
            (Some(a), Some(b)) => bbox_prefilter(*self, a, b) && self.evaluate(&subject.geometry, &reference.geometry),
            // Empty geometries relate to nothing
            _ => false,
        }
    }
}

/// Geometry with its bounding box computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedGeometry {
    pub geometry: Geometry<f64>,
    pub bbox: Option<[f64; 4]>,
}

impl IndexedGeometry {
    pub fn new(geometry: Geometry<f64>) -> Self {
        let bbox = geometry_bbox(&geometry);
        IndexedGeometry { geometry, bbox }
    }
}

/// Test applied by a single filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Inclusive numeric bounds.
    Range { min: f64, max: f64 },
    /// Exact membership in a set of scalar categories.
    Categories(Vec<Value>),
    /// Passes if the relation holds against any reference geometry.
    Spatial {
        relation: SpatialRelation,
        references: Vec<IndexedGeometry>,
    },
}

impl Predicate {
    pub fn range(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(QueryError::MalformedClause(format!(
                "numeric range must be an ordered [min, max] pair, got [{}, {}]",
                min, max
            )));
        }
        Ok(Predicate::Range { min, max })
    }

    pub fn categories(values: Vec<Value>) -> Result<Self> {
        if values.is_empty() {
            return Err(QueryError::MalformedClause(
                "categorical set must not be empty".to_string(),
            ));
        }
        if let Some(bad) = values
            .iter()
            .find(|v| !(v.is_string() || v.is_number() || v.is_boolean()))
        {
            return Err(QueryError::MalformedClause(format!(
                "categories must be strings, numbers or booleans, got {}",
                bad
            )));
        }
        Ok(Predicate::Categories(values))
    }

    /// Interpret a `range` array: two ordered numbers form a numeric range,
    /// anything containing a non-number is a categorical set.
    pub fn from_range_values(values: Vec<Value>) -> Result<Self> {
        if values.is_empty() {
            return Err(QueryError::MalformedClause("range must not be empty".to_string()));
        }
        if values.iter().all(Value::is_number) {
            if values.len() != 2 {
                return Err(QueryError::MalformedClause(format!(
                    "numeric range must have exactly two bounds, got {}",
                    values.len()
                )));
            }
            // as_f64 only fails for arbitrary precision numbers
            let min = values[0].as_f64().unwrap_or(f64::NAN);
            let max = values[1].as_f64().unwrap_or(f64::NAN);
            return Predicate::range(min, max);
        }
        Predicate::categories(values)
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, Predicate::Spatial { .. })
    }

    /// Property predicates. Spatial predicates never pass on a property value.
    pub fn test_value(&self, value: PropertyValue<'_>) -> bool {
        match self {
            Predicate::Range { min, max } => match value.as_number() {
                Some(n) => *min <= n && n <= *max,
                None => false,
            },
            Predicate::Categories(categories) => {
                !value.is_missing() && categories.iter().any(|c| value.matches(c))
            }
            Predicate::Spatial { .. } => false,
        }
    }

    /// Spatial predicates. Features without a usable geometry fail.
    pub fn test_geometry(&self, subject: Option<&IndexedGeometry>) -> bool {
        match (self, subject) {
            (Predicate::Spatial { relation, references }, Some(subject)) => {
                references.iter().any(|reference| relation.holds(subject, reference))
            }
            _ => false,
        }
    }
}
