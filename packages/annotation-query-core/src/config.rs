// Engine configuration, optionally embedded as "config" in every request.
use serde::{Deserialize, Serialize};

/// Separator between nested property keys, e.g. `"Main --> Sub"`.
pub const DEFAULT_PATH_SEPARATOR: &str = " --> ";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub path_separator: String,
    // Candidate property used to partition aggregates by structure type
    pub type_property: String,
    // Collection-level property naming a layer
    pub name_property: String,
    // Group key for candidates whose type cannot be read
    pub unlabeled_type: String,
    // How deep the property catalog descends into nested mappings
    pub nested_depth: usize,
    pub ignore_properties: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            path_separator: DEFAULT_PATH_SEPARATOR.to_string(),
            type_property: "type".to_string(),
            name_property: "name".to_string(),
            unlabeled_type: "unlabeled".to_string(),
            nested_depth: 4,
            ignore_properties: Vec::new(),
        }
    }
}
