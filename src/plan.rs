//! Schema-driven planning.
//!
//! [`diff`] compares the prior state of a resource with the proposed
//! configuration and produces a [`PlanResult`]. Comparison is type-aware:
//! set-typed attributes and set blocks ignore element order, an absent
//! collection equals an empty one, and `42.0` equals `42` for integers.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};
use crate::validation::as_int64;

/// Plan a change from `prior` to `proposed`.
///
/// - No prior state (or `null`): create. Defaults are applied and computed
///   attributes are left `null` until apply.
/// - `proposed` is `null`: destroy.
/// - Otherwise: update. Computed attributes carry over from `prior`. An
///   optional+computed attribute the configuration leaves unset keeps its
///   prior value. When `suppress(name, old, new)` returns true the change is
///   dropped and the prior value is kept. Changing a force-new attribute
///   or block marks the plan as a replacement and blanks every computed
///   value.
pub fn diff<S>(schema: &Schema, prior: Option<&Value>, proposed: &Value, suppress: S) -> PlanResult
where
    S: Fn(&str, &Value, &Value) -> bool,
{
    let prior = prior.filter(|v| !v.is_null());

    if proposed.is_null() {
        return match prior {
            Some(prior) => plan_destroy(schema, prior),
            None => PlanResult::no_change(Value::Null),
        };
    }

    let proposed = apply_defaults(schema, proposed);
    match prior {
        None => plan_create(schema, proposed),
        Some(prior) => plan_update(schema, prior, proposed, suppress),
    }
}

/// Fill in schema defaults for top-level attributes that are absent or `null`.
pub fn apply_defaults(schema: &Schema, value: &Value) -> Value {
    let mut obj = value.as_object().cloned().unwrap_or_default();
    for (name, attr) in &schema.block.attributes {
        if let Some(default) = &attr.default {
            let unset = obj.get(name).map_or(true, Value::is_null);
            if unset {
                obj.insert(name.clone(), default.clone());
            }
        }
    }
    Value::Object(obj)
}

/// Whether two values of `attr_type` are equal once normalised.
pub fn attribute_values_equal(attr_type: &AttributeType, a: Option<&Value>, b: Option<&Value>) -> bool {
    normalize_attr(attr_type, a) == normalize_attr(attr_type, b)
}

/// Whether two values of a nested block are equal once normalised.
pub fn block_values_equal(nested: &NestedBlock, a: Option<&Value>, b: Option<&Value>) -> bool {
    normalize_nested(nested, a) == normalize_nested(nested, b)
}

fn plan_create(schema: &Schema, mut planned: Value) -> PlanResult {
    let mut changes = Vec::new();
    if let Some(obj) = planned.as_object_mut() {
        for name in sorted_keys(&schema.block.attributes) {
            let attr = &schema.block.attributes[name];
            if attr.flags.is_computed_only() {
                obj.insert(name.to_string(), Value::Null);
                continue;
            }
            if let Some(value) = obj.get(name).filter(|v| !v.is_null()) {
                changes.push(AttributeChange::added(name, value.clone()));
            }
        }
        for name in sorted_keys(&schema.block.blocks) {
            if let Some(value) = obj.get(name).filter(|v| !is_empty_value(v)) {
                changes.push(AttributeChange::added(name, value.clone()));
            }
        }
    }
    PlanResult::with_changes(planned, changes, false)
}

fn plan_destroy(schema: &Schema, prior: &Value) -> PlanResult {
    let changes = sorted_keys(&schema.block.attributes)
        .into_iter()
        .chain(sorted_keys(&schema.block.blocks))
        .filter_map(|name| {
            prior
                .get(name)
                .filter(|v| !is_empty_value(v))
                .map(|v| AttributeChange::removed(name, v.clone()))
        })
        .collect();
    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update<S>(schema: &Schema, prior: &Value, proposed: Value, suppress: S) -> PlanResult
where
    S: Fn(&str, &Value, &Value) -> bool,
{
    let mut planned: Map<String, Value> = proposed.as_object().cloned().unwrap_or_default();
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in sorted_keys(&schema.block.attributes) {
        let attr = &schema.block.attributes[name];
        let old = prior.get(name).cloned().unwrap_or(Value::Null);
        let new = proposed.get(name).cloned().unwrap_or(Value::Null);

        if attr.flags.is_computed_only() || (attr.flags.computed && new.is_null()) {
            planned.insert(name.to_string(), old);
            continue;
        }

        if attribute_values_equal(&attr.attr_type, Some(&old), Some(&new)) {
            continue;
        }
        if suppress(name, &old, &new) {
            planned.insert(name.to_string(), old);
            continue;
        }

        requires_replace |= attr.force_new;
        changes.push(AttributeChange::modified(name, old, new));
    }

    for name in sorted_keys(&schema.block.blocks) {
        let nested = &schema.block.blocks[name];
        let old = prior.get(name).cloned().unwrap_or(Value::Null);
        let new = proposed.get(name).cloned().unwrap_or(Value::Null);

        if block_values_equal(nested, Some(&old), Some(&new)) {
            continue;
        }
        requires_replace |= nested.force_new;
        changes.push(AttributeChange::modified(name, old, new));
    }

    if requires_replace {
        blank_computed(schema, &mut planned);
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

/// A replacement gets a new identity, so nothing the provider computed
/// for the old resource survives.
fn blank_computed(schema: &Schema, planned: &mut Map<String, Value>) {
    for (name, attr) in &schema.block.attributes {
        if attr.flags.is_computed_only() {
            planned.insert(name.clone(), Value::Null);
        }
    }
}

fn normalize_attr(attr_type: &AttributeType, value: Option<&Value>) -> Value {
    let value = value.filter(|v| !v.is_null());
    match attr_type {
        AttributeType::Int64 => match value.and_then(as_int64) {
            Some(n) => Value::from(n),
            None => value.cloned().unwrap_or(Value::Null),
        },
        AttributeType::List(element) | AttributeType::Set(element) => {
            let mut items: Vec<Value> = value
                .and_then(Value::as_array)
                .map(|arr| arr.iter().map(|e| normalize_attr(element, Some(e))).collect())
                .unwrap_or_default();
            if attr_type.is_set() {
                sort_canonical(&mut items);
                items.dedup();
            }
            Value::Array(items)
        },
        AttributeType::Map(element) => Value::Object(
            value
                .and_then(Value::as_object)
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| (k.clone(), normalize_attr(element, Some(v))))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        AttributeType::String | AttributeType::Bool => value.cloned().unwrap_or(Value::Null),
    }
}

fn normalize_block(block: &Block, value: Option<&Value>) -> Value {
    let mut obj = Map::new();
    for (name, attr) in &block.attributes {
        obj.insert(name.clone(), normalize_attr(&attr.attr_type, value.and_then(|v| v.get(name))));
    }
    for (name, nested) in &block.blocks {
        obj.insert(name.clone(), normalize_nested(nested, value.and_then(|v| v.get(name))));
    }
    Value::Object(obj)
}

fn normalize_nested(nested: &NestedBlock, value: Option<&Value>) -> Value {
    let value = value.filter(|v| !v.is_null());
    match nested.nesting_mode {
        BlockNestingMode::Single => match value {
            Some(v) => normalize_block(&nested.block, Some(v)),
            None => Value::Null,
        },
        BlockNestingMode::List | BlockNestingMode::Set => {
            let mut items: Vec<Value> = value
                .and_then(Value::as_array)
                .map(|arr| arr.iter().map(|e| normalize_block(&nested.block, Some(e))).collect())
                .unwrap_or_default();
            if nested.nesting_mode == BlockNestingMode::Set {
                sort_canonical(&mut items);
                items.dedup();
            }
            Value::Array(items)
        },
    }
}

fn sort_canonical(items: &mut [Value]) {
    items.sort_by_cached_key(|v| v.to_string());
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn sorted_keys<V>(map: &std::collections::HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}
