// Flattened view of nested feature properties and per-path value statistics,
// used by the caller to populate filter controls.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::console_log;
use crate::geojson_features::FeatureCollection;

/// List `path -> value` pairs of `properties` down to `depth` levels.
///
/// Mappings above the last level are descended into; at the last level only
/// numbers and strings are listed. Paths are joined with `separator`.
pub fn flatten_properties(properties: &Map<String, Value>, depth: usize, separator: &str) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(properties, depth, separator, None, &mut out);
    out
}

fn flatten_into(
    properties: &Map<String, Value>,
    depth: usize,
    separator: &str,
    prefix: Option<&str>,
    out: &mut Vec<(String, Value)>,
) {
    if depth == 0 {
        return;
    }
    for (key, value) in properties {
        let path = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, separator, key),
            None => key.clone(),
        };
        match value {
            Value::Number(_) | Value::String(_) => out.push((path, value.clone())),
            Value::Object(nested) if depth > 1 => flatten_into(nested, depth - 1, separator, Some(&path), out),
            _ if depth > 1 => out.push((path, value.clone())),
            _ => {}
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PropertyInfo {
    Numeric { min: f64, max: f64, distinct: usize },
    Categorical { unique: Vec<String>, distinct: usize },
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct PropertyCatalog {
    /// Sorted, de-duplicated property paths.
    pub properties: Vec<String>,
    /// Layer names in input order.
    pub structures: Vec<String>,
    pub info: BTreeMap<String, PropertyInfo>,
}

enum Accumulator {
    Numeric(Vec<f64>),
    Categorical(BTreeSet<String>),
}

impl Accumulator {
    fn start(value: &Value) -> Option<Accumulator> {
        match value {
            Value::Number(n) => n.as_f64().map(|n| Accumulator::Numeric(vec![n])),
            Value::String(s) => Some(Accumulator::Categorical(BTreeSet::from([s.clone()]))),
            _ => None,
        }
    }

    // Values of a different kind than the first one seen are ignored
    fn push(&mut self, value: &Value) {
        match (self, value) {
            (Accumulator::Numeric(values), Value::Number(n)) => values.extend(n.as_f64()),
            (Accumulator::Categorical(values), Value::String(s)) => {
                values.insert(s.clone());
            }
            _ => {}
        }
    }

    fn finish(self) -> PropertyInfo {
        match self {
            Accumulator::Numeric(mut values) => {
                values.sort_by(f64::total_cmp);
                let min = values.first().copied().unwrap_or_default();
                let max = values.last().copied().unwrap_or_default();
                values.dedup();
                PropertyInfo::Numeric {
                    min,
                    max,
                    distinct: values.len(),
                }
            }
            Accumulator::Categorical(values) => PropertyInfo::Categorical {
                distinct: values.len(),
                unique: values.into_iter().collect(),
            },
        }
    }
}

/// Catalog of the properties present across every feature of every layer.
pub fn property_catalog(layers: &[FeatureCollection], config: &EngineConfig) -> PropertyCatalog {
    let mut paths: BTreeSet<String> = BTreeSet::new();
    let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();

    for feature in layers.iter().flat_map(|layer| layer.features.iter()) {
        for (path, value) in flatten_properties(&feature.properties, config.nested_depth, &config.path_separator) {
            if config.ignore_properties.iter().any(|ignored| *ignored == path) {
                continue;
            }
            match accumulators.get_mut(&path) {
                Some(acc) => acc.push(&value),
                None => {
                    if let Some(acc) = Accumulator::start(&value) {
                        accumulators.insert(path.clone(), acc);
                    }
                }
            }
            paths.insert(path);
        }
    }

    let structures = layers
        .iter()
        .enumerate()
        .map(|(idx, layer)| layer.layer_name(idx, &config.name_property))
        .collect();

    console_log!("Catalogued {} properties over {} layers", paths.len(), layers.len());
    PropertyCatalog {
        properties: paths.into_iter().collect(),
        structures,
        info: accumulators.into_iter().map(|(path, acc)| (path, acc.finish())).collect(),
    }
}
