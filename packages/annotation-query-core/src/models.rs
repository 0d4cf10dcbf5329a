// Request and response envelopes shared by the JS entry points.
// Every request may carry an optional "config" overriding the engine defaults.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{aggregate, attach_aggregates, summarize_layers, AggregationSpec, ParentAggregate};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::geojson_features::FeatureCollection;
use crate::layers::{query_layers, StructureQuery, StructureQueryResult};
use crate::property_info::{property_catalog, PropertyCatalog};
use crate::query::filter_features;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FilterRequest {
    pub collection: FeatureCollection,
    #[serde(default)]
    pub query: Value,
    /// Layers spatial clauses may reference by name.
    #[serde(default)]
    pub layers: Vec<FeatureCollection>,
    #[serde(default)]
    pub config: EngineConfig,
}

impl FilterRequest {
    pub fn run(&self) -> Result<FeatureCollection> {
        filter_features(&self.collection, &self.query, &self.layers, &self.config)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StructureQueryRequest {
    pub layers: Vec<FeatureCollection>,
    #[serde(flatten)]
    pub query: StructureQuery,
    #[serde(default)]
    pub config: EngineConfig,
}

impl StructureQueryRequest {
    pub fn run(&self) -> Result<StructureQueryResult> {
        query_layers(&self.layers, &self.query, &self.config)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AggregateRequest {
    pub parents: FeatureCollection,
    pub candidates: FeatureCollection,
    pub spec: AggregationSpec,
    #[serde(default)]
    pub config: EngineConfig,
}

#[derive(Serialize, Clone, Debug)]
pub struct AggregateResponse {
    /// One entry per parent feature, in parent order.
    pub aggregates: Vec<ParentAggregate>,
    /// Parents with the aggregates attached under the output key.
    pub features: FeatureCollection,
}

impl AggregateRequest {
    pub fn run(&self) -> Result<AggregateResponse> {
        let aggregates = aggregate(&self.parents, &self.candidates, &self.spec, &self.config)?;
        let features = attach_aggregates(&self.parents, &aggregates, self.spec.output_key())?;
        Ok(AggregateResponse { aggregates, features })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SummaryRequest {
    pub target: FeatureCollection,
    pub layers: Vec<FeatureCollection>,
    #[serde(default)]
    pub config: EngineConfig,
}

impl SummaryRequest {
    pub fn run(&self) -> FeatureCollection {
        summarize_layers(&self.target, &self.layers, &self.config)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CatalogRequest {
    pub layers: Vec<FeatureCollection>,
    #[serde(default)]
    pub config: EngineConfig,
}

impl CatalogRequest {
    pub fn run(&self) -> PropertyCatalog {
        property_catalog(&self.layers, &self.config)
    }
}
