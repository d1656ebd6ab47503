use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sluice_config::{VariableDecl, merge_missing};

/// Identity of the running application, exposed as the `app` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
  pub id: String,
  pub hostname: String,
  pub service_account_name: String,
}

impl Default for AppIdentity {
  fn default() -> Self {
    Self {
      id: "sluice".to_string(),
      hostname: "localhost".to_string(),
      service_account_name: "sluice@localhost".to_string(),
    }
  }
}

/// Where run temporaries live, exposed as the `storage` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
  pub bucket: String,
  #[serde(default)]
  pub prefix: String,
}

impl Default for StorageSettings {
  fn default() -> Self {
    Self {
      bucket: "sluice".to_string(),
      prefix: String::new(),
    }
  }
}

impl StorageSettings {
  /// Read `options.storage.{bucket,prefix}`, falling back to the defaults.
  pub fn from_options(options: &Map<String, Value>) -> Self {
    let defaults = Self::default();
    let storage = options.get("storage").and_then(Value::as_object);
    let field = |name: &str| {
      storage
        .and_then(|s| s.get(name))
        .and_then(Value::as_str)
        .map(str::to_string)
    };

    Self {
      bucket: field("bucket").unwrap_or(defaults.bucket),
      prefix: field("prefix").unwrap_or(defaults.prefix),
    }
  }

  /// `store://<bucket>/<prefix>`.
  pub fn url(&self) -> String {
    format!("store://{}/{}", self.bucket, self.prefix.trim_matches('/'))
  }

  /// Location prefix for one run's temporaries, always ending in `/`.
  pub fn run_prefix(&self, run_id: &str) -> String {
    let url = self.url();
    if url.ends_with('/') {
      format!("{url}{run_id}/")
    } else {
      format!("{url}/{run_id}/")
    }
  }
}

/// The variable namespace a pipeline document is rendered against.
///
/// Layers are merged with "first writer wins" semantics: a key set by an
/// earlier layer is never replaced by a later one, nested objects are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunVariableBindings {
  values: Map<String, Value>,
}

impl RunVariableBindings {
  /// Built-in bindings for a run on the given day.
  pub fn new(identity: &AppIdentity, storage: &StorageSettings, today: NaiveDate) -> Self {
    let builtins = json!({
      "app": {
        "id": identity.id,
        "hostname": identity.hostname,
        "serviceAccountName": identity.service_account_name,
      },
      "storage": {
        "bucket": storage.bucket,
        "prefix": storage.prefix,
        "url": storage.url(),
      },
      "date": {
        "iso": today.format("%Y-%m-%d").to_string(),
        "ymd": today.format("%Y%m%d").to_string(),
      },
    });

    let values = match builtins {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    Self { values }
  }

  /// Built-in bindings dated with the current UTC day.
  pub fn for_today(identity: &AppIdentity, storage: &StorageSettings) -> Self {
    Self::new(identity, storage, chrono::Utc::now().date_naive())
  }

  /// Layer trigger parameters. Dotted keys become nested objects.
  pub fn with_params<I, K, V>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
  {
    merge_missing(&mut self.values, &expand_params(params));
    self
  }

  /// Layer pipeline options.
  pub fn with_options(mut self, options: &Map<String, Value>) -> Self {
    merge_missing(&mut self.values, options);
    self
  }

  /// Layer the defaults of declared pipeline variables.
  pub fn with_declared(mut self, variables: &BTreeMap<String, VariableDecl>) -> Self {
    let defaults = expand_params(
      variables
        .iter()
        .filter_map(|(name, decl)| decl.default.clone().map(|value| (name, value))),
    );
    merge_missing(&mut self.values, &defaults);
    self
  }

  /// Look up a dotted path such as `storage.url`.
  pub fn lookup(&self, path: &str) -> Option<&Value> {
    let mut segments = path.split('.');
    let mut current = self.values.get(segments.next()?)?;
    for segment in segments {
      current = current.as_object()?.get(segment)?;
    }
    Some(current)
  }

  pub fn values(&self) -> &Map<String, Value> {
    &self.values
  }
}

/// Expand CGI-style parameters into nested objects.
///
/// `storage.prefix=x` becomes `{"storage": {"prefix": "x"}}`. A later dotted
/// key replaces an earlier scalar that sits on its path.
pub fn expand_params<I, K, V>(params: I) -> Map<String, Value>
where
  I: IntoIterator<Item = (K, V)>,
  K: AsRef<str>,
  V: Into<String>,
{
  let mut expanded = Map::new();
  for (key, value) in params {
    insert_path(&mut expanded, key.as_ref(), Value::String(value.into()));
  }
  expanded
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
  match path.split_once('.') {
    None => {
      target.insert(path.to_string(), value);
    }
    Some((head, rest)) => {
      let entry = target
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
      if !entry.is_object() {
        *entry = Value::Object(Map::new());
      }
      if let Value::Object(nested) = entry {
        insert_path(nested, rest, value);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
  }

  #[test]
  fn test_builtins() {
    let storage = StorageSettings {
      bucket: "exports".to_string(),
      prefix: "tmp/".to_string(),
    };
    let bindings = RunVariableBindings::new(&AppIdentity::default(), &storage, day());

    assert_eq!(bindings.lookup("app.id"), Some(&json!("sluice")));
    assert_eq!(bindings.lookup("storage.url"), Some(&json!("store://exports/tmp")));
    assert_eq!(bindings.lookup("date.iso"), Some(&json!("2024-03-09")));
    assert_eq!(bindings.lookup("date.ymd"), Some(&json!("20240309")));
    assert_eq!(bindings.lookup("date.missing"), None);
    assert_eq!(bindings.lookup("app.id.deeper"), None);
  }

  #[test]
  fn test_builtins_win_over_params() {
    let bindings = RunVariableBindings::new(&AppIdentity::default(), &StorageSettings::default(), day())
      .with_params([("app.id", "spoofed"), ("region", "eu")]);

    assert_eq!(bindings.lookup("app.id"), Some(&json!("sluice")));
    assert_eq!(bindings.lookup("region"), Some(&json!("eu")));
  }

  #[test]
  fn test_params_win_over_declared_defaults() {
    let mut declared = BTreeMap::new();
    declared.insert(
      "table".to_string(),
      VariableDecl {
        default: Some("events".to_string()),
        description: None,
      },
    );
    declared.insert(
      "limit".to_string(),
      VariableDecl {
        default: Some("10".to_string()),
        description: None,
      },
    );

    let bindings = RunVariableBindings::default()
      .with_params([("table", "orders")])
      .with_declared(&declared);

    assert_eq!(bindings.lookup("table"), Some(&json!("orders")));
    assert_eq!(bindings.lookup("limit"), Some(&json!("10")));
  }

  #[test]
  fn test_expand_params_nests_dotted_keys() {
    let expanded = expand_params([("storage.prefix", "daily"), ("storage.bucket", "b"), ("x", "1")]);
    assert_eq!(
      Value::Object(expanded),
      json!({"storage": {"prefix": "daily", "bucket": "b"}, "x": "1"})
    );
  }

  #[test]
  fn test_storage_settings_from_options() {
    let options = json!({"storage": {"bucket": "warehouse"}});
    let settings = StorageSettings::from_options(options.as_object().unwrap());
    assert_eq!(settings.bucket, "warehouse");
    assert_eq!(settings.prefix, "");
    assert_eq!(settings.url(), "store://warehouse/");
    assert_eq!(settings.run_prefix("r1"), "store://warehouse/r1/");

    let nested = StorageSettings {
      bucket: "warehouse".to_string(),
      prefix: "staging".to_string(),
    };
    assert_eq!(nested.run_prefix("r1"), "store://warehouse/staging/r1/");
  }
}
