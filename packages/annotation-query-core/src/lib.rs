use wasm_bindgen::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

// Console logging for wasm and native builds
pub mod console;
// Engine configuration
pub mod config;
pub mod error;
// GeoJSON feature model
pub mod geojson_features;
// Nested property paths and typed values
pub mod property;
// Bounding box prefilter for spatial relations
pub mod bbox_filter;
// Range, category and spatial predicates
pub mod predicate;
// Compound query compilation and filtering
pub mod query;
// Structure queries over several layers
pub mod layers;
// Spatial aggregation of candidate properties
pub mod aggregate;
// Property catalog for filter controls
pub mod property_info;
// Request envelopes for the JS entry points
pub mod models;

pub use aggregate::{aggregate, aggregate_onto, attach_aggregates, summarize_layers, Aggregate, AggregationSpec, ParentAggregate, Summary};
pub use config::EngineConfig;
pub use error::{QueryError, Result};
pub use geojson_features::{Feature, FeatureCollection, FeatureGeometry};
pub use layers::{query_layers, StructureQuery, StructureQueryResult};
pub use predicate::{Predicate, SpatialRelation};
pub use property::{PropertyPath, PropertyValue};
pub use property_info::{flatten_properties, property_catalog, PropertyCatalog, PropertyInfo};
pub use query::{filter_collection, filter_features, Query};

use models::{AggregateRequest, CatalogRequest, FilterRequest, StructureQueryRequest, SummaryRequest};

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

use std::sync::Once;
static INIT: Once = Once::new();

#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        console_log!("Annotation query module initialized");
    });
}

fn from_js<T: DeserializeOwned>(value: JsValue, what: &str) -> std::result::Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", what, e)))
}

// Maps become plain JS objects rather than Map instances
fn to_js<T: Serialize>(value: &T) -> std::result::Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize result: {}", e)))
}

fn to_js_error(err: QueryError) -> JsValue {
    console::warn(&format!("Query failed: {}", err));
    JsValue::from_str(&err.to_string())
}

/// Filter one FeatureCollection with a compound query.
///
/// Request: `{collection, query, layers?, config?}`; returns the filtered collection.
#[wasm_bindgen]
pub fn filter_features_js(request: JsValue) -> std::result::Result<JsValue, JsValue> {
    let request: FilterRequest = from_js(request, "filter request")?;
    let filtered = request.run().map_err(to_js_error)?;
    to_js(&filtered)
}

/// Query several layers at once.
///
/// Request: `{layers, filters?, spatial?, include_structures?, config?}`; returns
/// `{features, references}`.
#[wasm_bindgen]
pub fn query_structures_js(request: JsValue) -> std::result::Result<JsValue, JsValue> {
    let request: StructureQueryRequest = from_js(request, "structure query")?;
    let result = request.run().map_err(to_js_error)?;
    to_js(&result)
}

#[wasm_bindgen]
pub fn aggregate_properties_js(request: JsValue) -> std::result::Result<JsValue, JsValue> {
    let request: AggregateRequest = from_js(request, "aggregation request")?;
    let response = request.run().map_err(to_js_error)?;
    to_js(&response)
}

#[wasm_bindgen]
pub fn summarize_structures_js(request: JsValue) -> std::result::Result<JsValue, JsValue> {
    let request: SummaryRequest = from_js(request, "summary request")?;
    to_js(&request.run())
}

#[wasm_bindgen]
pub fn extract_property_info_js(request: JsValue) -> std::result::Result<JsValue, JsValue> {
    let request: CatalogRequest = from_js(request, "property info request")?;
    to_js(&request.run())
}

// Same operations over JSON strings, usable from workers that pass text
#[wasm_bindgen]
pub fn filter_features_json(request_json: &str) -> std::result::Result<String, JsValue> {
    let request: FilterRequest = serde_json::from_str(request_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid filter request: {}", e)))?;
    let filtered = request.run().map_err(to_js_error)?;
    serde_json::to_string(&filtered)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize result: {}", e)))
}

#[wasm_bindgen]
pub fn get_wasm_info() -> String {
    format!(
        "{} {} (rayon threads: {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        rayon::current_num_threads()
    )
}
