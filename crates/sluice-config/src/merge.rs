use serde_json::{Map, Value};

/// Merge `defaults` into `target` without overwriting anything `target` sets.
///
/// Keys missing from `target` are copied over. When both sides hold an object
/// under the same key the objects are merged recursively; any other collision
/// keeps the value already in `target`.
pub fn merge_missing(target: &mut Map<String, Value>, defaults: &Map<String, Value>) {
  for (key, default) in defaults {
    match target.get_mut(key) {
      Some(Value::Object(existing)) => {
        if let Value::Object(nested) = default {
          merge_missing(existing, nested);
        }
      }
      Some(_) => {}
      None => {
        target.insert(key.clone(), default.clone());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn object(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn test_explicit_values_win() {
    let mut target = object(json!({"storage": {"bucket": "mine"}, "retries": 1}));
    let defaults = object(json!({
      "storage": {"bucket": "default", "prefix": "tmp"},
      "retries": 5,
      "region": "eu"
    }));

    merge_missing(&mut target, &defaults);

    assert_eq!(
      Value::Object(target),
      json!({
        "storage": {"bucket": "mine", "prefix": "tmp"},
        "retries": 1,
        "region": "eu"
      })
    );
  }

  #[test]
  fn test_scalar_does_not_become_object() {
    let mut target = object(json!({"storage": "inline"}));
    let defaults = object(json!({"storage": {"bucket": "default"}}));

    merge_missing(&mut target, &defaults);

    assert_eq!(target["storage"], json!("inline"));
  }
}
