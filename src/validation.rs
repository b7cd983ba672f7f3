//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`], including the
//! allowed-value, integer-range and length constraints attached to
//! attributes. Resources run this before their own cross-field checks.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_aws::schema::{Schema, Attribute};
//! use hemmer_provider_aws::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("shard_count", Attribute::optional_int64().with_int_range(1, 100_000));
//!
//! assert!(validate(&schema, &json!({"name": "events", "shard_count": 2})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "events", "shard_count": 0}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("shard_count".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    Schema,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Strings must be one of the allowed values, if any are declared, and
///   within the maximum length
/// - Integers must fall inside the declared range
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        // Nothing more to check on an absent block
        Value::Null => return,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_value(attr, &attr.attr_type, v, path, diagnostics),
    }
}

fn validate_value(
    attr: &Attribute,
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => match value.as_str() {
            Some(s) => check_string(attr, s, path, diagnostics),
            None => diagnostics.push(type_error(path, "string", value)),
        },
        AttributeType::Int64 => match as_int64(value) {
            Some(n) => check_int(attr, n, path, diagnostics),
            None => diagnostics.push(type_error(path, "int64", value)),
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            let Some(arr) = value.as_array() else {
                let expected = if attr_type.is_set() { "set" } else { "list" };
                diagnostics.push(type_error(path, expected, value));
                return;
            };
            for (i, elem) in arr.iter().enumerate() {
                let elem_path = format!("{}.{}", path, i);
                validate_value(attr, element_type, elem, &elem_path, diagnostics);
            }
            if attr_type.is_set() {
                check_unique(arr, path, diagnostics);
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_value(attr, value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

fn check_string(attr: &Attribute, s: &str, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if !attr.allowed_values.is_empty() && !attr.allowed_values.iter().any(|v| v == s) {
        diagnostics.push(
            Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                .with_detail(format!(
                    "\"{}\" is not one of: {}",
                    s,
                    attr.allowed_values.join(", ")
                ))
                .with_attribute(path),
        );
    }
    if let Some(max) = attr.max_length {
        let len = s.chars().count();
        if len > max {
            diagnostics.push(
                Diagnostic::error(format!("Value too long for attribute '{}'", path))
                    .with_detail(format!("Length {} exceeds maximum of {}", len, max))
                    .with_attribute(path),
            );
        }
    }
}

fn check_int(attr: &Attribute, n: i64, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(range) = attr.int_range {
        if n < range.min || n > range.max {
            diagnostics.push(
                Diagnostic::error(format!("Value out of range for attribute '{}'", path))
                    .with_detail(format!(
                        "Expected a value between {} and {}, got {}",
                        range.min, range.max, n
                    ))
                    .with_attribute(path),
            );
        }
    }
}

fn check_unique(arr: &[Value], path: &str, diagnostics: &mut Vec<Diagnostic>) {
    for (i, elem) in arr.iter().enumerate() {
        if arr[..i].contains(elem) {
            diagnostics.push(
                Diagnostic::error(format!("Duplicate element in set '{}'", path))
                    .with_detail(format!("{} appears more than once", elem))
                    .with_attribute(path),
            );
            return;
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => validate_single_block(nested, value, path, diagnostics),
        BlockNestingMode::List | BlockNestingMode::Set => {
            validate_list_block(nested, value, path, diagnostics)
        },
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Integer view of a JSON number, accepting floats with no fractional part.
pub(crate) fn as_int64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "test"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        assert_eq!(validate(&schema, &json!({"name": null})).len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("display_name", Attribute::optional_string());

        assert!(validate(&schema, &json!({"display_name": "Alerts"})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"display_name": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"display_name": 7})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("arn", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"arn": 123})).is_empty());
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("shard_count", Attribute::required_int64());

        assert!(validate(&schema, &json!({"shard_count": 42})).is_empty());
        assert!(validate(&schema, &json!({"shard_count": 42.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"shard_count": 42.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"shard_count": "42"})).len(), 1);
    }

    #[test]
    fn test_validate_int_range() {
        let schema = Schema::v0().with_attribute(
            "retention_period",
            Attribute::optional_int64().with_int_range(24, 8760),
        );

        assert!(validate(&schema, &json!({"retention_period": 24})).is_empty());
        assert!(validate(&schema, &json!({"retention_period": 8760})).is_empty());

        let diagnostics = validate(&schema, &json!({"retention_period": 23}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("out of range"));

        assert_eq!(validate(&schema, &json!({"retention_period": 8761})).len(), 1);
    }

    #[test]
    fn test_validate_allowed_values() {
        let schema = Schema::v0().with_attribute(
            "comparison_operator",
            Attribute::required_string().with_allowed_values(["EQ", "NE", "LE", "LT", "GE", "GT"]),
        );

        assert!(validate(&schema, &json!({"comparison_operator": "GT"})).is_empty());

        let diagnostics = validate(&schema, &json!({"comparison_operator": "gt"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("EQ, NE"));
    }

    #[test]
    fn test_validate_allowed_values_in_set() {
        let schema = Schema::v0().with_attribute(
            "shard_level_metrics",
            Attribute::optional_string_set().with_allowed_values(["IncomingBytes", "OutgoingBytes"]),
        );

        assert!(validate(&schema, &json!({"shard_level_metrics": ["IncomingBytes"]})).is_empty());

        let diagnostics = validate(
            &schema,
            &json!({"shard_level_metrics": ["IncomingBytes", "Bogus"]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("shard_level_metrics.1".to_string())
        );
    }

    #[test]
    fn test_validate_set_duplicates() {
        let schema = Schema::v0().with_attribute("metrics", Attribute::optional_string_set());

        let diagnostics = validate(&schema, &json!({"metrics": ["a", "b", "a"]}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Duplicate"));
    }

    #[test]
    fn test_validate_max_length() {
        let schema = Schema::v0()
            .with_attribute("data_id", Attribute::required_string().with_max_length(4));

        assert!(validate(&schema, &json!({"data_id": "abcd"})).is_empty());
        assert_eq!(validate(&schema, &json!({"data_id": "abcde"})).len(), 1);
    }

    #[test]
    fn test_validate_list() {
        let schema = Schema::v0().with_attribute(
            "names",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::required(),
            ),
        );

        assert!(validate(&schema, &json!({"names": ["a", "b", "c"]})).is_empty());
        assert!(validate(&schema, &json!({"names": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"names": ["a", 123, "c"]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("names.1".to_string()));

        assert_eq!(validate(&schema, &json!({"names": "not a list"})).len(), 1);
    }

    #[test]
    fn test_validate_map() {
        let schema = Schema::v0().with_attribute("tags", Attribute::optional_string_map());

        assert!(validate(&schema, &json!({"tags": {"env": "prod", "app": "web"}})).is_empty());

        let diagnostics = validate(&schema, &json!({"tags": {"env": "prod", "count": 42}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("tags.count".to_string()));
    }

    #[test]
    fn test_validate_nested_block_single() {
        let schema = Schema::v0().with_block(
            "waf",
            NestedBlock::single(
                Block::new().with_attribute("max_attempts", Attribute::optional_int64()),
            ),
        );

        assert!(validate(&schema, &json!({"waf": {"max_attempts": 3}})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());

        let diagnostics = validate(&schema, &json!({"waf": {"max_attempts": "three"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("waf.max_attempts".to_string()));
    }

    #[test]
    fn test_validate_nested_block_set() {
        let schema = Schema::v0().with_block(
            "predicates",
            NestedBlock::set(Block::new().with_attribute("negated", Attribute::required_bool()))
                .with_min_items(1)
                .with_max_items(2),
        );

        assert!(validate(&schema, &json!({"predicates": [{"negated": false}]})).is_empty());

        let diagnostics = validate(&schema, &json!({"predicates": []}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(
            &schema,
            &json!({"predicates": [{"negated": true}, {"negated": false}, {"negated": true}]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));

        let diagnostics = validate(&schema, &json!({"predicates": [{"negated": "no"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("predicates.0.negated".to_string()));
    }

    #[test]
    fn test_validate_deeply_nested() {
        let schema = Schema::v0().with_block(
            "size_constraints",
            NestedBlock::set(
                Block::new()
                    .with_attribute("size", Attribute::required_int64())
                    .with_block(
                        "field_to_match",
                        NestedBlock::set(
                            Block::new().with_attribute(
                                "type",
                                Attribute::required_string().with_allowed_values(["URI", "BODY"]),
                            ),
                        )
                        .with_min_items(1)
                        .with_max_items(1),
                    ),
            ),
        );

        let valid = json!({
            "size_constraints": [{
                "size": 10,
                "field_to_match": [{"type": "BODY"}]
            }]
        });
        assert!(validate(&schema, &valid).is_empty());

        let diagnostics = validate(
            &schema,
            &json!({
                "size_constraints": [{
                    "size": 10,
                    "field_to_match": [{"type": "COOKIE"}]
                }]
            }),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("size_constraints.0.field_to_match.0.type".to_string())
        );

        let diagnostics = validate(&schema, &json!({"size_constraints": [{"size": 10}]}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("count", Attribute::required_int64())
            .with_attribute("enabled", Attribute::required_bool());

        let diagnostics = validate(
            &schema,
            &json!({"name": 123, "count": "not a number", "enabled": "yes"}),
        );
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_helpers() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(!is_valid(&schema, &json!({})));

        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    #[test]
    fn test_as_int64() {
        assert_eq!(as_int64(&json!(5)), Some(5));
        assert_eq!(as_int64(&json!(5.0)), Some(5));
        assert_eq!(as_int64(&json!(5.5)), None);
        assert_eq!(as_int64(&json!("5")), None);
    }
}
