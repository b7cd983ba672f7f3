//! Structural comparison of IAM-style policy documents.
//!
//! AWS rewrites policies it stores: whitespace goes away, single-element
//! arrays may come back as scalars and statement order is not preserved.
//! Two documents are equivalent when they agree after normalising those
//! differences.

use serde_json::{json, Map, Value};

/// Keys whose array values are unordered.
const SET_KEYS: [&str; 7] = [
    "Statement",
    "Action",
    "NotAction",
    "Resource",
    "NotResource",
    "AWS",
    "Service",
];

/// Whether two policy documents grant the same thing.
///
/// Text that is not JSON is compared verbatim after trimming.
///
/// ```
/// use hemmer_provider_aws::sns::policies_equivalent;
///
/// assert!(policies_equivalent(
///     r#"{"Statement":[{"Action":["sns:Publish"],"Effect":"Allow"}]}"#,
///     r#"{"Statement":{"Effect":"Allow","Action":"sns:Publish"}}"#,
/// ));
/// ```
pub fn policies_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(a), Ok(b)) => normalize(&a, false) == normalize(&b, false),
        _ => a.trim() == b.trim(),
    }
}

/// Compact JSON form of a policy, or `None` if it is not JSON.
pub(crate) fn compact(policy: &str) -> Option<String> {
    serde_json::from_str::<Value>(policy)
        .ok()
        .map(|v| v.to_string())
}

fn normalize(value: &Value, unordered: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                let mut v = normalize(v, SET_KEYS.contains(&key.as_str()));
                if key == "Principal" && v == json!("*") {
                    v = json!({"AWS": "*"});
                }
                out.insert(key.clone(), v);
            }
            Value::Object(out)
        },
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(|v| normalize(v, false)).collect();
            if unordered {
                items.sort_by_cached_key(|v| v.to_string());
                items.dedup();
            }
            if items.len() == 1 {
                items.remove(0)
            } else {
                Value::Array(items)
            }
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED: &str = r#"{"Statement":[{"Sid":"Stmt1445931846145","Effect":"Allow","Principal":{"AWS":"*"},"Action":"sns:Publish","Resource":"arn:aws:sns:us-west-2::example"}],"Version":"2012-10-17","Id":"Policy1445931846145"}"#;

    #[test]
    fn test_whitespace_and_key_order() {
        let pretty = r#"
{
  "Statement": [
    {
      "Sid": "Stmt1445931846145",
      "Effect": "Allow",
      "Principal": {
        "AWS": "*"
       },
      "Action": "sns:Publish",
      "Resource": "arn:aws:sns:us-west-2::example"
    }
  ],
  "Version": "2012-10-17",
  "Id": "Policy1445931846145"
}
"#;
        assert!(policies_equivalent(pretty, EXPECTED));
    }

    #[test]
    fn test_scalar_equals_single_element_array() {
        let arrays = r#"{"Statement":[{"Sid":"Stmt1445931846145","Effect":"Allow","Principal":{"AWS":["*"]},"Action":["sns:Publish"],"Resource":["arn:aws:sns:us-west-2::example"]}],"Version":"2012-10-17","Id":"Policy1445931846145"}"#;
        assert!(policies_equivalent(arrays, EXPECTED));
    }

    #[test]
    fn test_star_principal() {
        let star = EXPECTED.replace(r#"{"AWS":"*"}"#, r#""*""#);
        assert!(policies_equivalent(&star, EXPECTED));
    }

    #[test]
    fn test_unordered_actions_and_statements() {
        let a = r#"{"Statement":[
            {"Effect":"Allow","Action":["sns:Publish","sns:Subscribe"],"Resource":"*"},
            {"Effect":"Deny","Action":"sns:DeleteTopic","Resource":"*"}
        ]}"#;
        let b = r#"{"Statement":[
            {"Effect":"Deny","Action":"sns:DeleteTopic","Resource":"*"},
            {"Effect":"Allow","Action":["sns:Subscribe","sns:Publish"],"Resource":"*"}
        ]}"#;
        assert!(policies_equivalent(a, b));
    }

    #[test]
    fn test_different_policies() {
        let other = EXPECTED.replace("Allow", "Deny");
        assert!(!policies_equivalent(&other, EXPECTED));

        let extra = EXPECTED.replace(r#""sns:Publish""#, r#"["sns:Publish","sns:Subscribe"]"#);
        assert!(!policies_equivalent(&extra, EXPECTED));
    }

    #[test]
    fn test_non_json() {
        assert!(policies_equivalent(" not json ", "not json"));
        assert!(!policies_equivalent("not json", EXPECTED));
        assert_eq!(compact("not json"), None);
        assert_eq!(compact("{ \"a\" : 1 }").as_deref(), Some(r#"{"a":1}"#));
    }
}
