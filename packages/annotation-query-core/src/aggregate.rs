// Spatial aggregation of candidate structure properties onto parent regions.
// Candidates satisfying `parent <relation> candidate` contribute the value at a
// property path, summarised (mean / count / min / max / sum) or returned raw.
// A parent whose values are all missing gets the missing sentinel, never zero.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, Geometry, MultiPolygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::console_log;
use crate::error::{QueryError, Result};
use crate::geojson_features::{Feature, FeatureCollection};
use crate::predicate::{IndexedGeometry, SpatialRelation};
use crate::property::{PropertyPath, PropertyValue};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AggregationSpec {
    /// Property path resolved on each matched candidate.
    pub property: String,
    #[serde(default)]
    pub separate_by_type: bool,
    /// `true` for mean/count summaries, `false` for the raw value list.
    #[serde(default = "default_summarize")]
    pub summarize: bool,
    /// Relation tested as `parent <relation> candidate`.
    #[serde(default = "default_relation")]
    pub relation: String,
    #[serde(default)]
    pub distance: Option<f64>,
    /// Property the result is attached under; defaults to `property`.
    #[serde(default)]
    pub output_key: Option<String>,
}

fn default_summarize() -> bool {
    true
}

fn default_relation() -> String {
    "intersects".to_string()
}

impl AggregationSpec {
    pub fn new(property: &str) -> Self {
        AggregationSpec {
            property: property.to_string(),
            separate_by_type: false,
            summarize: true,
            relation: default_relation(),
            distance: None,
            output_key: None,
        }
    }

    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.property)
    }
}

/// Numeric summary over the values that could be read as numbers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Summary {
    pub mean: f64,
    /// Contributing (non-missing, numeric) values.
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl Summary {
    /// `None` when no value contributes.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Summary> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return None;
        }
        Some(Summary {
            mean: sum / count as f64,
            count,
            min,
            max,
            sum,
        })
    }
}

/// Aggregate of one group of candidate values.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Aggregate {
    /// No candidate contributed a value (serialised as `null`).
    Missing,
    Summary(Summary),
    Values(Vec<Value>),
}

impl Aggregate {
    pub fn is_missing(&self) -> bool {
        matches!(self, Aggregate::Missing)
    }

    fn collect<'a, I>(values: I, summarize: bool) -> Aggregate
    where
        I: Iterator<Item = PropertyValue<'a>>,
    {
        if summarize {
            Summary::from_values(values.filter_map(|v| v.as_number()))
                .map_or(Aggregate::Missing, Aggregate::Summary)
        } else {
            let raw: Vec<Value> = values.filter(|v| !v.is_missing()).map(|v| v.to_json()).collect();
            if raw.is_empty() {
                Aggregate::Missing
            } else {
                Aggregate::Values(raw)
            }
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum AggregateValue {
    #[serde(rename = "value")]
    Combined(Aggregate),
    #[serde(rename = "by_type")]
    ByType(BTreeMap<String, Aggregate>),
}

/// Result for one parent feature.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ParentAggregate {
    /// Candidates satisfying the spatial relation, whether or not the property was present.
    pub matched: usize,
    #[serde(flatten)]
    pub value: AggregateValue,
}

impl ParentAggregate {
    /// Combined aggregate, `None` when separated by type.
    pub fn combined(&self) -> Option<&Aggregate> {
        match &self.value {
            AggregateValue::Combined(aggregate) => Some(aggregate),
            AggregateValue::ByType(_) => None,
        }
    }

    pub fn by_type(&self) -> Option<&BTreeMap<String, Aggregate>> {
        match &self.value {
            AggregateValue::ByType(groups) => Some(groups),
            AggregateValue::Combined(_) => None,
        }
    }
}

// Candidate with its geometry, value and type read once
struct Candidate<'a> {
    geometry: IndexedGeometry,
    value: PropertyValue<'a>,
    kind: String,
}

fn type_label(value: PropertyValue<'_>, config: &EngineConfig) -> String {
    match value {
        PropertyValue::Text(s) => s.to_string(),
        PropertyValue::Number(n) => n.to_string(),
        PropertyValue::Boolean(b) => b.to_string(),
        _ => config.unlabeled_type.clone(),
    }
}

/// Aggregate `spec.property` of `candidates` onto each parent, in parent order.
pub fn aggregate(
    parents: &FeatureCollection,
    candidates: &FeatureCollection,
    spec: &AggregationSpec,
    config: &EngineConfig,
) -> Result<Vec<ParentAggregate>> {
    if spec.property.is_empty() {
        return Err(QueryError::InvalidRequest(
            "aggregation needs a property to summarise".to_string(),
        ));
    }
    let relation = SpatialRelation::parse(&spec.relation, spec.distance)?;
    let path = PropertyPath::parse(&spec.property, &config.path_separator);
    let type_path = PropertyPath::parse(&config.type_property, &config.path_separator);

    // Candidates without a usable geometry can never match
    let prepared: Vec<Candidate<'_>> = candidates
        .features
        .iter()
        .filter_map(|feature| {
            feature.to_geometry().map(|geometry| Candidate {
                geometry: IndexedGeometry::new(geometry),
                value: path.resolve(&feature.properties),
                kind: type_label(type_path.resolve(&feature.properties), config),
            })
        })
        .collect();

    let results: Vec<ParentAggregate> = parents
        .features
        .par_iter()
        .map(|parent| {
            let matched: Vec<&Candidate<'_>> = match parent.to_geometry() {
                Some(geometry) => {
                    let parent_geometry = IndexedGeometry::new(geometry);
                    prepared
                        .iter()
                        .filter(|c| relation.holds(&parent_geometry, &c.geometry))
                        .collect()
                }
                None => Vec::new(),
            };
            let value = if spec.separate_by_type {
                let mut groups: BTreeMap<String, Vec<PropertyValue<'_>>> = BTreeMap::new();
                for candidate in &matched {
                    groups.entry(candidate.kind.clone()).or_default().push(candidate.value);
                }
                AggregateValue::ByType(
                    groups
                        .into_iter()
                        .map(|(kind, values)| (kind, Aggregate::collect(values.into_iter(), spec.summarize)))
                        .collect(),
                )
            } else {
                AggregateValue::Combined(Aggregate::collect(
                    matched.iter().map(|c| c.value),
                    spec.summarize,
                ))
            };
            ParentAggregate {
                matched: matched.len(),
                value,
            }
        })
        .collect();

    console_log!(
        "Aggregated \"{}\" from {} candidates onto {} parents",
        spec.property,
        prepared.len(),
        results.len()
    );
    Ok(results)
}

/// Copy of `parents` with each aggregate stored under `output_key`.
pub fn attach_aggregates(
    parents: &FeatureCollection,
    aggregates: &[ParentAggregate],
    output_key: &str,
) -> Result<FeatureCollection> {
    if parents.features.len() != aggregates.len() {
        return Err(QueryError::InvalidRequest(format!(
            "{} aggregates for {} parent features",
            aggregates.len(),
            parents.features.len()
        )));
    }
    let features = parents
        .features
        .iter()
        .zip(aggregates)
        .map(|(parent, aggregate)| {
            let mut feature = parent.clone();
            feature
                .properties
                .insert(output_key.to_string(), serde_json::to_value(aggregate)?);
            Ok(feature)
        })
        .collect::<Result<Vec<Feature>>>()?;
    Ok(parents.with_features(features))
}

/// `aggregate` followed by `attach_aggregates`.
pub fn aggregate_onto(
    parents: &FeatureCollection,
    candidates: &FeatureCollection,
    spec: &AggregationSpec,
    config: &EngineConfig,
) -> Result<FeatureCollection> {
    let aggregates = aggregate(parents, candidates, spec, config)?;
    attach_aggregates(parents, &aggregates, spec.output_key())
}

// Polygonal part of a geometry, used for overlap areas
fn polygonal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon.clone()])),
        Geometry::MultiPolygon(multi) => Some(multi.clone()),
        _ => None,
    }
}

fn overlap_area(a: &Geometry<f64>, b: &Geometry<f64>) -> f64 {
    match (polygonal(a), polygonal(b)) {
        (Some(a), Some(b)) => a.intersection(&b).unsigned_area(),
        _ => 0.0,
    }
}

// Summary of one candidate layer within one target region
fn summarize_matches(target: &Geometry<f64>, matches: &[&Feature], ignore: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("count".to_string(), Value::from(matches.len()));
    let area: f64 = matches
        .iter()
        .filter_map(|f| f.to_geometry())
        .map(|g| overlap_area(target, &g))
        .sum();
    out.insert("area".to_string(), Value::from(area));

    let mut columns: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for feature in matches {
        for (key, value) in &feature.properties {
            if !value.is_null() && !ignore.iter().any(|i| i == key) {
                columns.entry(key.as_str()).or_default().push(value);
            }
        }
    }

    for (key, values) in columns {
        if values.iter().all(|v| v.is_number()) {
            if let Some(summary) = Summary::from_values(values.iter().filter_map(|v| v.as_f64())) {
                out.insert(format!("{} Max", key), Value::from(summary.max));
                out.insert(format!("{} Min", key), Value::from(summary.min));
                out.insert(format!("{} Mean", key), Value::from(summary.mean));
                out.insert(format!("{} Sum", key), Value::from(summary.sum));
            }
        } else if values.iter().all(|v| v.is_string()) {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for v in &values {
                *counts.entry(v.as_str().unwrap_or_default()).or_default() += 1;
            }
            let counts: Map<String, Value> = counts
                .into_iter()
                .map(|(k, n)| (k.to_string(), Value::from(n)))
                .collect();
            out.insert(key.to_string(), Value::Object(counts));
        } else if values.iter().all(|v| v.is_object()) {
            // Per sub-key statistics over numeric entries
            let mut sub_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
            for map in values.iter().filter_map(|v| v.as_object()) {
                for (sub_key, sub_value) in map {
                    if let Some(n) = sub_value.as_f64() {
                        sub_values.entry(sub_key.as_str()).or_default().push(n);
                    }
                }
            }
            let mut means = Map::new();
            let mut maxes = Map::new();
            let mut mins = Map::new();
            let mut sums = Map::new();
            for (sub_key, numbers) in sub_values {
                if let Some(summary) = Summary::from_values(numbers) {
                    means.insert(sub_key.to_string(), Value::from(summary.mean));
                    maxes.insert(sub_key.to_string(), Value::from(summary.max));
                    mins.insert(sub_key.to_string(), Value::from(summary.min));
                    sums.insert(sub_key.to_string(), Value::from(summary.sum));
                }
            }
            let mut nested = Map::new();
            nested.insert("mean".to_string(), Value::Object(means));
            nested.insert("max".to_string(), Value::Object(maxes));
            nested.insert("min".to_string(), Value::Object(mins));
            nested.insert("sum".to_string(), Value::Object(sums));
            out.insert(key.to_string(), Value::Object(nested));
        }
        // Mixed-type columns are skipped
    }
    out
}

/// For every target feature and every candidate layer, summarise the candidates
/// intersecting it under the layer's name. Layers with no intersecting candidate
/// add nothing.
pub fn summarize_layers(
    target: &FeatureCollection,
    layers: &[FeatureCollection],
    config: &EngineConfig,
) -> FeatureCollection {
    let prepared: Vec<(String, Vec<(&Feature, IndexedGeometry)>)> = layers
        .iter()
        .enumerate()
        .map(|(idx, layer)| {
            let features = layer
                .features
                .iter()
                .filter_map(|f| f.to_geometry().map(|g| (f, IndexedGeometry::new(g))))
                .collect();
            (layer.layer_name(idx, &config.name_property), features)
        })
        .collect();

    let features: Vec<Feature> = target
        .features
        .par_iter()
        .map(|feature| {
            let mut out = feature.clone();
            let geometry = match feature.to_geometry() {
                Some(g) => IndexedGeometry::new(g),
                None => return out,
            };
            for (name, candidates) in &prepared {
                let matches: Vec<&Feature> = candidates
                    .iter()
                    .filter(|(_, g)| SpatialRelation::Intersects.holds(&geometry, g))
                    .map(|(f, _)| *f)
                    .collect();
                if !matches.is_empty() {
                    let summary = summarize_matches(&geometry.geometry, &matches, &config.ignore_properties);
                    out.properties.insert(name.clone(), Value::Object(summary));
                }
            }
            out
        })
        .collect();

    console_log!(
        "Summarized {} layers onto {} target features",
        layers.len(),
        features.len()
    );
    target.with_features(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fc(value: Value) -> FeatureCollection {
        serde_json::from_value(value).unwrap()
    }

    fn region() -> FeatureCollection {
        fc(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]},
                 "properties": {"name": "FTU"}},
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[500,500],[600,500],[600,600],[500,600],[500,500]]]},
                 "properties": {"name": "FTU"}}
            ]
        }))
    }

    fn point(x: f64, y: f64, properties: Value) -> Value {
        json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": [x, y]}, "properties": properties})
    }

    #[test]
    fn summary_and_raw_values() {
        let candidates = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"value": 10})),
            point(20.0, 20.0, json!({"value": 20})),
            point(900.0, 900.0, json!({"value": 99}))
        ]}));
        let config = EngineConfig::default();
        let mut spec = AggregationSpec::new("value");
        spec.relation = "contains".to_string();

        let result = aggregate(&region(), &candidates, &spec, &config).unwrap();
        match result[0].combined() {
            Some(Aggregate::Summary(summary)) => {
                assert_eq!(summary.mean, 15.0);
                assert_eq!(summary.count, 2);
                assert_eq!(summary.min, 10.0);
                assert_eq!(summary.max, 20.0);
            }
            other => panic!("expected summary, got {:?}", other),
        }
        assert_eq!(result[0].matched, 2);
        // Nothing inside the second region
        assert_eq!(result[1].matched, 0);
        assert_eq!(result[1].combined(), Some(&Aggregate::Missing));

        spec.summarize = false;
        let raw = aggregate(&region(), &candidates, &spec, &config).unwrap();
        assert_eq!(raw[0].combined(), Some(&Aggregate::Values(vec![json!(10), json!(20)])));
    }

    #[test]
    fn raw_values_are_the_candidates_own() {
        let candidates = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"value": 10})),
            point(20.0, 20.0, json!({"value": 9007199254740993u64})),
            point(30.0, 30.0, json!({"value": 2.5}))
        ]}));
        let mut spec = AggregationSpec::new("value");
        spec.relation = "contains".to_string();
        spec.summarize = false;
        let result = aggregate(&region(), &candidates, &spec, &EngineConfig::default()).unwrap();
        let attached = serde_json::to_value(&result[0]).unwrap();
        assert_eq!(attached["value"], json!([10, 9007199254740993u64, 2.5]));
    }

    #[test]
    fn separate_by_type_gives_per_type_means() {
        let candidates = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"type": "A", "value": 10})),
            point(20.0, 20.0, json!({"type": "B", "value": 20})),
            point(30.0, 30.0, json!({"value": 30}))
        ]}));
        let mut spec = AggregationSpec::new("value");
        spec.separate_by_type = true;
        let result = aggregate(&region(), &candidates, &spec, &EngineConfig::default()).unwrap();
        let groups = result[0].by_type().unwrap();
        let mean = |key: &str| match &groups[key] {
            Aggregate::Summary(s) => s.mean,
            other => panic!("expected summary for {}, got {:?}", key, other),
        };
        assert_eq!(mean("A"), 10.0);
        assert_eq!(mean("B"), 20.0);
        assert_eq!(mean("unlabeled"), 30.0);
        assert!(result[1].by_type().unwrap().is_empty());
    }

    #[test]
    fn missing_is_not_zero() {
        let zeros = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"value": 0})),
            point(20.0, 20.0, json!({"value": 0}))
        ]}));
        let absent = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"other": 1})),
            point(20.0, 20.0, json!({"value": "n/a"}))
        ]}));
        let spec = AggregationSpec::new("value");
        let config = EngineConfig::default();

        let with_zeros = aggregate(&region(), &zeros, &spec, &config).unwrap();
        match with_zeros[0].combined() {
            Some(Aggregate::Summary(s)) => {
                assert_eq!(s.mean, 0.0);
                assert_eq!(s.count, 2);
            }
            other => panic!("expected summary, got {:?}", other),
        }

        let with_absent = aggregate(&region(), &absent, &spec, &config).unwrap();
        assert_eq!(with_absent[0].matched, 2);
        assert_eq!(with_absent[0].combined(), Some(&Aggregate::Missing));
    }

    #[test]
    fn attached_output_shape() {
        let candidates = fc(json!({"type": "FeatureCollection", "features": [
            point(10.0, 10.0, json!({"Stats": {"value": 4}}))
        ]}));
        let mut spec = AggregationSpec::new("Stats --> value");
        spec.output_key = Some("Spot value".to_string());
        let parents = region();
        let out = aggregate_onto(&parents, &candidates, &spec, &EngineConfig::default()).unwrap();
        assert_eq!(
            out.features[0].properties["Spot value"],
            json!({"matched": 1, "value": {"mean": 4.0, "count": 1, "min": 4.0, "max": 4.0, "sum": 4.0}})
        );
        assert_eq!(out.features[1].properties["Spot value"], json!({"matched": 0, "value": null}));
        // Inputs untouched
        assert!(!parents.features[0].properties.contains_key("Spot value"));
    }

    #[test]
    fn bad_relation_is_rejected() {
        let mut spec = AggregationSpec::new("value");
        spec.relation = "inside".to_string();
        let err = aggregate(&region(), &region(), &spec, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownRelation(_)));
        assert!(aggregate(&region(), &region(), &AggregationSpec::new(""), &EngineConfig::default()).is_err());
    }

    #[test]
    fn layer_summary_counts_areas_and_categories() {
        let tubules = fc(json!({
            "type": "FeatureCollection",
            "properties": {"name": "Tubules"},
            "features": [
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[50,50],[150,50],[150,150],[50,150],[50,50]]]},
                 "properties": {"Area": 10, "Status": "atrophic", "Cell Types": {"PT": 0.5}}},
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]},
                 "properties": {"Area": 30, "Status": "normal", "Cell Types": {"PT": 0.1}}}
            ]
        }));
        let out = summarize_layers(&region(), &[tubules], &EngineConfig::default());
        let summary = &out.features[0].properties["Tubules"];
        assert_eq!(summary["count"], json!(2));
        // 50x50 overlap plus the fully contained 10x10 square
        assert!((summary["area"].as_f64().unwrap() - 2600.0).abs() < 1e-6);
        assert_eq!(summary["Area Mean"], json!(20.0));
        assert_eq!(summary["Area Sum"], json!(40.0));
        assert_eq!(summary["Status"], json!({"atrophic": 1, "normal": 1}));
        assert!((summary["Cell Types"]["mean"]["PT"].as_f64().unwrap() - 0.3).abs() < 1e-9);
        assert!(!out.features[1].properties.contains_key("Tubules"));
    }
}
