// Nested property access for feature property bags.
// A path such as "Main --> Sub" resolves to a PropertyValue; anything that cannot
// be resolved is Missing, which is distinct from 0, false and the empty string.

use serde_json::{Map, Number, Value};

/// Resolved property value, borrowed from the feature it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue<'a> {
    /// The feature's own number, so integers keep their exact value.
    Number(&'a Number),
    Text(&'a str),
    Boolean(bool),
    Mapping(&'a Map<String, Value>),
    List(&'a [Value]),
    Missing,
}

impl<'a> PropertyValue<'a> {
    /// Classify a JSON value. `null` counts as missing.
    pub fn from_json(value: &'a Value) -> Self {
        match value {
            Value::Null => PropertyValue::Missing,
            Value::Bool(b) => PropertyValue::Boolean(*b),
            Value::Number(n) => PropertyValue::Number(n),
            Value::String(s) => PropertyValue::Text(s),
            Value::Array(items) => PropertyValue::List(items),
            Value::Object(map) => PropertyValue::Mapping(map),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, PropertyValue::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&'a Map<String, Value>> {
        match self {
            PropertyValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Exact categorical equality: no coercion between strings, numbers and booleans.
    /// Missing values and containers never match.
    pub fn matches(&self, category: &Value) -> bool {
        match (self, category) {
            (PropertyValue::Number(n), Value::Number(c)) => numbers_equal(n, c),
            (PropertyValue::Text(s), Value::String(c)) => *s == c.as_str(),
            (PropertyValue::Boolean(b), Value::Bool(c)) => b == c,
            _ => false,
        }
    }

    /// Owned JSON form; the missing sentinel becomes `null`.
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Number(n) => Value::Number(Number::clone(n)),
            PropertyValue::Text(s) => Value::String((*s).to_string()),
            PropertyValue::Boolean(b) => Value::Bool(*b),
            PropertyValue::Mapping(map) => Value::Object((*map).clone()),
            PropertyValue::List(items) => Value::Array(items.to_vec()),
            PropertyValue::Missing => Value::Null,
        }
    }

    /// Look up `key` inside a mapping value.
    pub fn sub_key(self, key: &str) -> PropertyValue<'a> {
        match self {
            PropertyValue::Mapping(map) => map.get(key).map_or(PropertyValue::Missing, PropertyValue::from_json),
            _ => PropertyValue::Missing,
        }
    }
}

// Integers compare exactly; a float on either side compares as f64
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    if a.is_f64() || b.is_f64() {
        return a.as_f64() == b.as_f64();
    }
    // One negative and one above i64::MAX
    false
}

/// Ordered key segments leading into nested property mappings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    /// Split `path` on `separator`. An empty string yields an empty path.
    pub fn parse(path: &str, separator: &str) -> Self {
        if path.is_empty() {
            return PropertyPath { segments: Vec::new() };
        }
        let segments = if separator.is_empty() {
            vec![path.to_string()]
        } else {
            path.split(separator).map(str::to_string).collect()
        };
        PropertyPath { segments }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyPath {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn join(&self, separator: &str) -> String {
        self.segments.join(separator)
    }

    /// Walk the segments through `properties`.
    ///
    /// Fails with `Missing` as soon as a segment is absent or the current value
    /// is not a mapping while segments remain. The final value is returned as-is,
    /// including mappings and lists.
    pub fn resolve<'a>(&self, properties: &'a Map<String, Value>) -> PropertyValue<'a> {
        let mut current = properties;
        let mut segments = self.segments.iter().peekable();
        while let Some(segment) = segments.next() {
            let value = match current.get(segment) {
                Some(value) => value,
                None => return PropertyValue::Missing,
            };
            if segments.peek().is_none() {
                return PropertyValue::from_json(value);
            }
            current = match value {
                Value::Object(map) => map,
                _ => return PropertyValue::Missing,
            };
        }
        // Only reached for an empty path
        PropertyValue::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resolves_nested_path() {
        let bag = props(json!({"Main": {"Sub": "X", "Deep": {"n": 3}}}));
        let path = PropertyPath::parse("Main --> Sub", " --> ");
        assert_eq!(path.segments(), &["Main".to_string(), "Sub".to_string()]);
        assert_eq!(path.resolve(&bag), PropertyValue::Text("X"));
        let deep = PropertyPath::parse("Main --> Deep --> n", " --> ");
        assert_eq!(deep.resolve(&bag).as_number(), Some(3.0));
    }

    #[test]
    fn missing_segment_or_scalar_midway_is_missing() {
        let bag = props(json!({"Main": {"Sub": "X"}, "area": 5}));
        assert!(PropertyPath::parse("Main --> Nope", " --> ").resolve(&bag).is_missing());
        assert!(PropertyPath::parse("area --> more", " --> ").resolve(&bag).is_missing());
        assert!(PropertyPath::parse("", " --> ").resolve(&bag).is_missing());
    }

    #[test]
    fn zero_false_and_empty_string_are_not_missing() {
        let bag = props(json!({"a": 0, "b": false, "c": "", "d": null}));
        let sep = " --> ";
        assert_eq!(PropertyPath::parse("a", sep).resolve(&bag).as_number(), Some(0.0));
        assert_eq!(PropertyPath::parse("b", sep).resolve(&bag), PropertyValue::Boolean(false));
        assert_eq!(PropertyPath::parse("c", sep).resolve(&bag), PropertyValue::Text(""));
        assert!(PropertyPath::parse("d", sep).resolve(&bag).is_missing());
    }

    #[test]
    fn mapping_is_returned_as_is_and_sub_key_descends() {
        let bag = props(json!({"Cell Types": {"POD": 0.4, "PT": 0.6}}));
        let resolved = PropertyPath::parse("Cell Types", " --> ").resolve(&bag);
        assert!(resolved.as_mapping().is_some());
        assert_eq!(resolved.sub_key("PT").as_number(), Some(0.6));
        assert!(resolved.sub_key("TAL").is_missing());
        assert!(PropertyValue::from_json(&json!(1)).sub_key("PT").is_missing());
    }

    #[test]
    fn categorical_match_does_not_coerce() {
        assert!(PropertyValue::Text("1").matches(&json!("1")));
        assert!(!PropertyValue::Text("1").matches(&json!(1)));
        assert!(PropertyValue::from_json(&json!(1)).matches(&json!(1)));
        assert!(PropertyValue::from_json(&json!(1.0)).matches(&json!(1)));
        assert!(!PropertyValue::from_json(&json!(1)).matches(&json!("1")));
        assert!(!PropertyValue::Text("x").matches(&json!("X")));
        assert!(!PropertyValue::Missing.matches(&Value::Null));
    }

    #[test]
    fn large_integers_stay_exact() {
        let bag = props(json!({"id": 9007199254740993u64, "neg": -1}));
        let id = PropertyPath::parse("id", " --> ").resolve(&bag);
        assert_eq!(id.to_json(), json!(9007199254740993u64));
        assert!(id.matches(&json!(9007199254740993u64)));
        // Same f64 as the value above, different integer
        assert!(!id.matches(&json!(9007199254740992u64)));
        assert!(!PropertyPath::parse("neg", " --> ").resolve(&bag).matches(&json!(u64::MAX)));
    }
}
