// Structure queries across several annotation layers of one slide.
// Property and spatial filters are AND-ed; spatial filters may name any loaded layer.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::console_log;
use crate::error::Result;
use crate::geojson_features::{Feature, FeatureCollection};
use crate::query::{CompileContext, FeatureView, Query};

/// Layer name selecting every layer in `include_structures`.
pub const ALL_STRUCTURES: &str = "all";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StructureQuery {
    #[serde(default, alias = "Filters")]
    pub filters: Value,
    #[serde(default, alias = "Spatial")]
    pub spatial: Value,
    #[serde(default = "all_structures")]
    pub include_structures: Vec<String>,
}

fn all_structures() -> Vec<String> {
    vec![ALL_STRUCTURES.to_string()]
}

impl Default for StructureQuery {
    fn default() -> Self {
        StructureQuery {
            filters: Value::Null,
            spatial: Value::Null,
            include_structures: all_structures(),
        }
    }
}

// Origin of one feature in the merged output
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FeatureReference {
    pub layer: String,
    pub layer_index: usize,
    pub feature_index: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StructureQueryResult {
    pub features: FeatureCollection,
    // Parallel to features.features
    pub references: Vec<FeatureReference>,
}

pub fn query_layers(
    layers: &[FeatureCollection],
    request: &StructureQuery,
    config: &EngineConfig,
) -> Result<StructureQueryResult> {
    let ctx = CompileContext::new(config, layers);
    let query = Query::All(vec![
        Query::compile(&request.filters, &ctx)?,
        Query::compile(&request.spatial, &ctx)?,
    ]);
    let include_all = request.include_structures.iter().any(|s| s == ALL_STRUCTURES);

    let mut features: Vec<Feature> = Vec::new();
    let mut references = Vec::new();
    for (layer_index, layer) in layers.iter().enumerate() {
        let name = layer.layer_name(layer_index, &config.name_property);
        if !include_all && !request.include_structures.contains(&name) {
            continue;
        }
        for (feature_index, feature) in layer.features.iter().enumerate() {
            if query.evaluate(&FeatureView::new(feature)) {
                features.push(feature.clone());
                references.push(FeatureReference {
                    layer: name.clone(),
                    layer_index,
                    feature_index,
                });
            }
        }
    }

    console_log!(
        "Structure query kept {} features from {} layers",
        features.len(),
        layers.len()
    );
    Ok(StructureQueryResult {
        features: FeatureCollection::new(features),
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use serde_json::json;

    fn layers() -> Vec<FeatureCollection> {
        let glomeruli = json!({
            "type": "FeatureCollection",
            "properties": {"name": "Glomeruli"},
            "features": [
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]},
                 "properties": {"Area": 100, "Status": "healthy"}},
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[50,50],[60,50],[60,60],[50,60],[50,50]]]},
                 "properties": {"Area": 400, "Status": "sclerotic"}}
            ]
        });
        let spots = json!({
            "type": "FeatureCollection",
            "properties": {"name": "Spots"},
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [5, 5]},
                 "properties": {"Area": 1}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [80, 80]},
                 "properties": {"Area": 1}}
            ]
        });
        vec![
            serde_json::from_value(glomeruli).unwrap(),
            serde_json::from_value(spots).unwrap(),
        ]
    }

    #[test]
    fn includes_selected_structures_only() {
        let request = StructureQuery {
            include_structures: vec!["Spots".to_string()],
            ..StructureQuery::default()
        };
        let result = query_layers(&layers(), &request, &EngineConfig::default()).unwrap();
        assert_eq!(result.features.features.len(), 2);
        assert!(result.references.iter().all(|r| r.layer == "Spots" && r.layer_index == 1));
    }

    #[test]
    fn property_and_spatial_filters_combine() {
        let request: StructureQuery = serde_json::from_value(json!({
            "Filters": [{"mod": "and", "name": "Area", "range": [0, 200]}],
            "Spatial": [{"mod": "and", "type": "intersects", "structure": "Spots"}],
            "include_structures": ["all"]
        }))
        .unwrap();
        let result = query_layers(&layers(), &request, &EngineConfig::default()).unwrap();
        // First glomerulus and the spot inside it (each spot intersects itself)
        assert_eq!(
            result.references,
            vec![
                FeatureReference { layer: "Glomeruli".to_string(), layer_index: 0, feature_index: 0 },
                FeatureReference { layer: "Spots".to_string(), layer_index: 1, feature_index: 0 },
                FeatureReference { layer: "Spots".to_string(), layer_index: 1, feature_index: 1 },
            ]
        );
        assert_eq!(result.features.features.len(), result.references.len());
    }

    #[test]
    fn unknown_include_name_selects_nothing() {
        let request = StructureQuery {
            include_structures: vec!["Tubules".to_string()],
            ..StructureQuery::default()
        };
        let result = query_layers(&layers(), &request, &EngineConfig::default()).unwrap();
        assert!(result.features.features.is_empty());
        assert!(result.references.is_empty());
    }

    #[test]
    fn spatial_filter_on_unknown_layer_is_an_error() {
        let request = StructureQuery {
            spatial: json!([{"type": "within", "structure": "Tubules"}]),
            ..StructureQuery::default()
        };
        let err = query_layers(&layers(), &request, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownStructure(name) if name == "Tubules"));
    }

    #[test]
    fn empty_layers_give_empty_result() {
        let result = query_layers(&[], &StructureQuery::default(), &EngineConfig::default()).unwrap();
        assert!(result.features.features.is_empty());
    }
}
