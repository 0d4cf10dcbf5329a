// Compound queries: parsing a caller's filter specification into a tree of
// clauses combined with NOT / AND / OR, and filtering collections with it.
//
// Accepted specification shapes:
//
//   [
//     {"name": "area", "range": [0, 100]},
//     {"name": "Main --> Sub", "range": ["X", "Y"], "not": true},
//     {"or": [{"name": "a", "range": [0, 1]}, {"name": "b", "values": [1, 2]}]},
//     {"relation": "within", "geometry": {"type": "Polygon", "coordinates": [...]}},
//     {"type": "nearest", "structure": "Glomeruli", "distance": 50}
//   ]
//
// A list is an AND group. Clauses carrying the dashboard's "mod" field
// ("and", "or", "not") are also understood: every "or" clause of a list
// goes into one OR group that joins the list's AND.

use std::cell::OnceCell;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::console_log;
use crate::error::{QueryError, Result};
use crate::geojson_features::{Feature, FeatureCollection, FeatureGeometry};
use crate::predicate::{IndexedGeometry, Predicate, SpatialRelation};
use crate::property::PropertyPath;

/// One testable predicate bound to the value or geometry it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Empty for spatial clauses.
    pub path: PropertyPath,
    /// Looked up inside the mapping the path resolves to.
    pub sub_key: Option<String>,
    pub predicate: Predicate,
}

impl Clause {
    pub fn property(path: PropertyPath, predicate: Predicate) -> Self {
        Clause { path, sub_key: None, predicate }
    }

    pub fn spatial(relation: SpatialRelation, references: Vec<IndexedGeometry>) -> Self {
        Clause {
            path: PropertyPath::from_segments(Vec::<String>::new()),
            sub_key: None,
            predicate: Predicate::Spatial { relation, references },
        }
    }

    pub fn matches(&self, feature: &FeatureView<'_>) -> bool {
        if self.predicate.is_spatial() {
            return self.predicate.test_geometry(feature.geometry());
        }
        let mut value = self.path.resolve(&feature.feature.properties);
        if let Some(key) = &self.sub_key {
            value = value.sub_key(key);
        }
        self.predicate.test_value(value)
    }
}

/// Boolean combination of clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Clause(Clause),
    Not(Box<Query>),
    /// Passes when every member passes; empty passes everything.
    All(Vec<Query>),
    /// Passes when any member passes; empty passes nothing.
    Any(Vec<Query>),
}

impl Query {
    /// Query that keeps every feature.
    pub fn identity() -> Self {
        Query::All(Vec::new())
    }

    pub fn negate(query: Query) -> Self {
        Query::Not(Box::new(query))
    }

    /// Parse and validate a specification.
    pub fn compile(spec: &Value, ctx: &CompileContext<'_>) -> Result<Query> {
        match spec {
            Value::Array(items) => compile_list(items, ctx),
            Value::Object(map) => Ok(compile_object(map, ctx)?.0),
            Value::Null => Ok(Query::identity()),
            other => Err(QueryError::MalformedClause(format!(
                "expected a clause object or a list of clauses, got {}",
                other
            ))),
        }
    }

    pub fn has_spatial(&self) -> bool {
        match self {
            Query::Clause(clause) => clause.predicate.is_spatial(),
            Query::Not(inner) => inner.has_spatial(),
            Query::All(members) | Query::Any(members) => members.iter().any(Query::has_spatial),
        }
    }

    /// Short-circuits on the first failing AND member and the first passing OR member.
    pub fn evaluate(&self, feature: &FeatureView<'_>) -> bool {
        match self {
            Query::Clause(clause) => clause.matches(feature),
            Query::Not(inner) => !inner.evaluate(feature),
            Query::All(members) => members.iter().all(|m| m.evaluate(feature)),
            Query::Any(members) => members.iter().any(|m| m.evaluate(feature)),
        }
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        self.evaluate(&FeatureView::new(feature))
    }
}

/// Feature under evaluation; its geometry is parsed on first spatial use.
pub struct FeatureView<'f> {
    pub feature: &'f Feature,
    geometry: OnceCell<Option<IndexedGeometry>>,
}

impl<'f> FeatureView<'f> {
    pub fn new(feature: &'f Feature) -> Self {
        FeatureView {
            feature,
            geometry: OnceCell::new(),
        }
    }

    pub fn geometry(&self) -> Option<&IndexedGeometry> {
        self.geometry
            .get_or_init(|| self.feature.to_geometry().map(IndexedGeometry::new))
            .as_ref()
    }
}

/// What a specification may refer to while compiling.
pub struct CompileContext<'a> {
    pub config: &'a EngineConfig,
    /// Layers that `"structure"` references are resolved against.
    pub layers: &'a [FeatureCollection],
}

impl<'a> CompileContext<'a> {
    pub fn new(config: &'a EngineConfig, layers: &'a [FeatureCollection]) -> Self {
        CompileContext { config, layers }
    }

    // Every parseable geometry of the named layer
    fn structure_geometries(&self, structure: &str) -> Result<Vec<IndexedGeometry>> {
        let layer = self
            .layers
            .iter()
            .enumerate()
            .find(|(idx, layer)| layer.layer_name(*idx, &self.config.name_property) == structure)
            .map(|(_, layer)| layer)
            .ok_or_else(|| QueryError::UnknownStructure(structure.to_string()))?;
        Ok(layer
            .features
            .iter()
            .filter_map(Feature::to_geometry)
            .map(IndexedGeometry::new)
            .collect())
    }
}

// Raw clause as sent by callers; "not" and "mod" are read from the object directly
#[derive(Deserialize, Debug, Default)]
struct ClauseSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    range: Option<Vec<Value>>,
    #[serde(default)]
    values: Option<Vec<Value>>,
    #[serde(default, alias = "type")]
    relation: Option<String>,
    #[serde(default)]
    geometry: Option<FeatureGeometry>,
    #[serde(default)]
    structure: Option<String>,
    #[serde(default)]
    distance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modifier {
    And,
    Or,
    Not,
}

fn parse_modifier(value: Option<&str>) -> Result<Option<Modifier>> {
    match value {
        None => Ok(None),
        Some("and") => Ok(Some(Modifier::And)),
        Some("or") => Ok(Some(Modifier::Or)),
        Some("not") => Ok(Some(Modifier::Not)),
        Some(other) => Err(QueryError::MalformedClause(format!(
            "unknown modifier \"{}\" (expected and, or, not)",
            other
        ))),
    }
}

fn compile_list(items: &[Value], ctx: &CompileContext<'_>) -> Result<Query> {
    let mut all = Vec::new();
    let mut legacy_or = Vec::new();
    for item in items {
        match item {
            Value::Object(map) => {
                let (query, modifier) = compile_object(map, ctx)?;
                if modifier == Some(Modifier::Or) {
                    legacy_or.push(query);
                } else {
                    all.push(query);
                }
            }
            other => all.push(Query::compile(other, ctx)?),
        }
    }
    if !legacy_or.is_empty() {
        all.push(Query::Any(legacy_or));
    }
    Ok(Query::All(all))
}

fn group_members(value: &Value, key: &str, ctx: &CompileContext<'_>) -> Result<Vec<Query>> {
    let items = value.as_array().ok_or_else(|| {
        QueryError::MalformedClause(format!("\"{}\" must hold a list of clauses", key))
    })?;
    items.iter().map(|item| Query::compile(item, ctx)).collect()
}

fn negated(map: &Map<String, Value>) -> Result<bool> {
    match map.get("not") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(QueryError::MalformedClause(format!(
            "\"not\" must be a boolean, got {}",
            other
        ))),
    }
}

// Keys that make an object a single clause rather than a group
const CLAUSE_KEYS: [&str; 9] = [
    "name", "value", "range", "values", "relation", "type", "geometry", "structure", "distance",
];

// A group is either "or" or "and", and carries no clause fields
fn check_group_shape(map: &Map<String, Value>) -> Result<()> {
    let group = match (map.contains_key("or"), map.contains_key("and")) {
        (true, true) => {
            return Err(QueryError::MalformedClause(
                "object has both \"or\" and \"and\" groups".to_string(),
            ))
        }
        (true, false) => "or",
        (false, true) => "and",
        (false, false) => return Ok(()),
    };
    match CLAUSE_KEYS.iter().find(|key| map.contains_key(**key)) {
        Some(key) => Err(QueryError::MalformedClause(format!(
            "\"{}\" group also carries clause field \"{}\"",
            group, key
        ))),
        None => Ok(()),
    }
}

fn compile_object(map: &Map<String, Value>, ctx: &CompileContext<'_>) -> Result<(Query, Option<Modifier>)> {
    let modifier = parse_modifier(map.get("mod").and_then(Value::as_str))?;
    check_group_shape(map)?;
    let group = if let Some(members) = map.get("or") {
        Some(Query::Any(group_members(members, "or", ctx)?))
    } else if let Some(members) = map.get("and") {
        Some(Query::All(group_members(members, "and", ctx)?))
    } else {
        None
    };
    let query = match group {
        Some(group) => group,
        None => {
            let spec: ClauseSpec = serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| QueryError::MalformedClause(e.to_string()))?;
            Query::Clause(compile_clause(spec, ctx)?)
        }
    };
    let query = if negated(map)? || modifier == Some(Modifier::Not) {
        Query::negate(query)
    } else {
        query
    };
    Ok((query, modifier))
}

fn compile_clause(spec: ClauseSpec, ctx: &CompileContext<'_>) -> Result<Clause> {
    match (spec.relation, spec.name) {
        (Some(_), Some(name)) => Err(QueryError::MalformedClause(format!(
            "clause on \"{}\" mixes a property name with a spatial relation",
            name
        ))),
        (Some(relation), None) => {
            let relation = SpatialRelation::parse(&relation, spec.distance)?;
            let references = match (spec.geometry, spec.structure) {
                (Some(geometry), _) => {
                    let parsed = geometry.to_geo().ok_or_else(|| {
                        QueryError::InvalidGeometry(format!(
                            "cannot read {} reference geometry",
                            geometry.r#type
                        ))
                    })?;
                    vec![IndexedGeometry::new(parsed)]
                }
                (None, Some(structure)) => ctx.structure_geometries(&structure)?,
                (None, None) => {
                    return Err(QueryError::MalformedClause(format!(
                        "{} clause needs a reference geometry or structure",
                        relation.name()
                    )))
                }
            };
            Ok(Clause::spatial(relation, references))
        }
        (None, Some(name)) => {
            let predicate = match (spec.values, spec.range) {
                (Some(_), Some(_)) => {
                    return Err(QueryError::MalformedClause(format!(
                        "clause on \"{}\" has both a range and values",
                        name
                    )))
                }
                (Some(values), None) => Predicate::categories(values)?,
                (None, Some(range)) => Predicate::from_range_values(range)?,
                (None, None) => {
                    return Err(QueryError::MalformedClause(format!(
                        "clause on \"{}\" has no range or values",
                        name
                    )))
                }
            };
            Ok(Clause {
                path: PropertyPath::parse(&name, &ctx.config.path_separator),
                sub_key: spec.value,
                predicate,
            })
        }
        (None, None) => Err(QueryError::MalformedClause(
            "clause has neither a property name nor a spatial relation".to_string(),
        )),
    }
}

/// Keep the features passing `query`, in their original order and unmodified.
pub fn filter_collection(collection: &FeatureCollection, query: &Query) -> FeatureCollection {
    let kept: Vec<Feature> = collection
        .features
        .iter()
        .filter(|feature| query.matches(feature))
        .cloned()
        .collect();
    console_log!("Filter kept {} of {} features", kept.len(), collection.len());
    collection.with_features(kept)
}

/// Compile `spec` and filter `collection` with it.
pub fn filter_features(
    collection: &FeatureCollection,
    spec: &Value,
    layers: &[FeatureCollection],
    config: &EngineConfig,
) -> Result<FeatureCollection> {
    let query = Query::compile(spec, &CompileContext::new(config, layers))?;
    Ok(filter_collection(collection, &query))
}
