use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// Geometry part of a feature, kept as raw JSON so features pass through unmodified
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeatureGeometry {
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub coordinates: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// GeoJSON feature: one annotated structure
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "RawFeature", into = "RawFeature")]
pub struct Feature {
    pub r#type: String,
    pub geometry: Option<FeatureGeometry>,
    // Empty when the input had null or no properties
    pub properties: Map<String, Value>,
    // id, bbox and anything else a producer attached
    pub extra: Map<String, Value>,
    properties_form: PropertiesForm,
}

// How "properties" appeared in the input, so an empty bag is written back the same way
#[derive(Clone, Copy, Debug, PartialEq)]
enum PropertiesForm {
    Object,
    Null,
    Absent,
}

// Wire form of a feature
#[derive(Serialize, Deserialize)]
struct RawFeature {
    #[serde(default = "feature_type")]
    r#type: String,
    #[serde(default)]
    geometry: Option<FeatureGeometry>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    properties: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawFeature> for Feature {
    type Error = String;

    fn try_from(raw: RawFeature) -> Result<Self, Self::Error> {
        let (properties, properties_form) = match raw.properties {
            None => (Map::new(), PropertiesForm::Absent),
            Some(Value::Null) => (Map::new(), PropertiesForm::Null),
            Some(Value::Object(map)) => (map, PropertiesForm::Object),
            Some(other) => return Err(format!("feature properties must be an object, got {}", other)),
        };
        Ok(Feature {
            r#type: raw.r#type,
            geometry: raw.geometry,
            properties,
            extra: raw.extra,
            properties_form,
        })
    }
}

impl From<Feature> for RawFeature {
    fn from(feature: Feature) -> Self {
        let properties = match (feature.properties.is_empty(), feature.properties_form) {
            (true, PropertiesForm::Absent) => None,
            (true, PropertiesForm::Null) => Some(Value::Null),
            _ => Some(Value::Object(feature.properties)),
        };
        RawFeature {
            r#type: feature.r#type,
            geometry: feature.geometry,
            properties,
            extra: feature.extra,
        }
    }
}

// Ordered set of features sharing one pixel coordinate frame
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeatureCollection {
    #[serde(default = "collection_type")]
    pub r#type: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    // Layer-level properties; "name" identifies the structure layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

// Some(Null) for an explicit null, None only when the member is absent
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Feature {
    pub fn new(geometry: Option<FeatureGeometry>, properties: Map<String, Value>) -> Self {
        Feature {
            r#type: feature_type(),
            geometry,
            properties,
            extra: Map::new(),
            properties_form: PropertiesForm::Object,
        }
    }

    /// Planar geometry of this feature, `None` when absent or unparseable.
    pub fn to_geometry(&self) -> Option<Geometry<f64>> {
        self.geometry.as_ref().and_then(FeatureGeometry::to_geo)
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        FeatureCollection {
            r#type: collection_type(),
            features,
            properties: None,
            extra: Map::new(),
        }
    }

    /// Same layer metadata, different features.
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        FeatureCollection {
            r#type: self.r#type.clone(),
            features,
            properties: self.properties.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn name(&self, name_property: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|props| props.get(name_property))
            .and_then(Value::as_str)
    }

    /// Layer name, falling back to `Structure_<index>` for unnamed layers.
    pub fn layer_name(&self, index: usize, name_property: &str) -> String {
        self.name(name_property)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Structure_{}", index))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FeatureGeometry {
    pub fn new(r#type: &str, coordinates: Value) -> Self {
        FeatureGeometry {
            r#type: r#type.to_string(),
            coordinates,
            extra: Map::new(),
        }
    }

    // Convert GeoJSON coordinates into a geo geometry
    pub fn to_geo(&self) -> Option<Geometry<f64>> {
        let coords = &self.coordinates;
        match self.r#type.as_str() {
            "Point" => parse_coord(coords).map(|c| Geometry::Point(Point::from(c))),
            "MultiPoint" => {
                let points = parse_coords(coords)?;
                Some(Geometry::MultiPoint(MultiPoint::new(
                    points.into_iter().map(Point::from).collect(),
                )))
            }
            "LineString" => parse_line(coords).map(Geometry::LineString),
            "MultiLineString" => {
                let lines = coords
                    .as_array()?
                    .iter()
                    .map(parse_line)
                    .collect::<Option<Vec<_>>>()?;
                Some(Geometry::MultiLineString(MultiLineString::new(lines)))
            }
            "Polygon" => parse_polygon(coords).map(Geometry::Polygon),
            "MultiPolygon" => {
                let polygons = coords
                    .as_array()?
                    .iter()
                    .map(parse_polygon)
                    .collect::<Option<Vec<_>>>()?;
                if polygons.is_empty() {
                    return None;
                }
                Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
            _ => None,
        }
    }
}

// [x, y] or [x, y, z]; extra ordinates are ignored
fn parse_coord(value: &Value) -> Option<Coord<f64>> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    let x = pair[0].as_f64()?;
    let y = pair[1].as_f64()?;
    Some(Coord { x, y })
}

fn parse_coords(value: &Value) -> Option<Vec<Coord<f64>>> {
    value.as_array()?.iter().map(parse_coord).collect()
}

fn parse_line(value: &Value) -> Option<LineString<f64>> {
    let coords = parse_coords(value)?;
    if coords.len() < 2 {
        return None;
    }
    Some(LineString::new(coords))
}

fn parse_ring(value: &Value) -> Option<LineString<f64>> {
    let coords = parse_coords(value)?;
    // Polygon::new closes open rings
    if coords.len() < 3 {
        return None;
    }
    Some(LineString::new(coords))
}

fn parse_polygon(value: &Value) -> Option<Polygon<f64>> {
    let mut rings = value
        .as_array()?
        .iter()
        .map(parse_ring)
        .collect::<Option<Vec<_>>>()?
        .into_iter();
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_polygon_with_hole() {
        let geometry = FeatureGeometry::new(
            "Polygon",
            json!([
                [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                [[2.0, 2.0], [4.0, 2.0], [4.0, 4.0], [2.0, 2.0]]
            ]),
        );
        match geometry.to_geo() {
            Some(Geometry::Polygon(polygon)) => {
                assert_eq!(polygon.exterior().0.len(), 5);
                assert_eq!(polygon.interiors().len(), 1);
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn unparseable_geometry_is_none() {
        assert!(FeatureGeometry::new("Polygon", json!([])).to_geo().is_none());
        assert!(FeatureGeometry::new("Point", json!(["a", 1])).to_geo().is_none());
        assert!(FeatureGeometry::new("Circle", json!([0, 0])).to_geo().is_none());
    }

    #[test]
    fn feature_round_trips_unknown_members() {
        let raw = json!({
            "type": "Feature",
            "id": 7,
            "geometry": {"type": "Point", "coordinates": [1, 2]},
            "properties": null
        });
        let feature: Feature = serde_json::from_value(raw.clone()).unwrap();
        assert!(feature.properties.is_empty());
        assert_eq!(feature.extra.get("id"), Some(&json!(7)));
        let back = serde_json::to_value(&feature).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn empty_properties_keep_their_input_form() {
        let absent = json!({"type": "Feature", "geometry": null});
        let feature: Feature = serde_json::from_value(absent.clone()).unwrap();
        assert_eq!(serde_json::to_value(&feature).unwrap(), absent);

        let empty = json!({"type": "Feature", "geometry": null, "properties": {}});
        let feature: Feature = serde_json::from_value(empty.clone()).unwrap();
        assert_eq!(serde_json::to_value(&feature).unwrap(), empty);

        // Properties added later are written as an object
        let mut feature: Feature =
            serde_json::from_value(json!({"type": "Feature", "geometry": null, "properties": null})).unwrap();
        feature.properties.insert("count".to_string(), json!(2));
        assert_eq!(serde_json::to_value(&feature).unwrap()["properties"], json!({"count": 2}));

        assert!(serde_json::from_value::<Feature>(json!({"type": "Feature", "properties": 3})).is_err());
    }

    #[test]
    fn unnamed_layer_falls_back_to_index() {
        let collection = FeatureCollection::new(Vec::new());
        assert_eq!(collection.layer_name(3, "name"), "Structure_3");
    }
}
