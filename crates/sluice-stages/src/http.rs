use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use sluice_stage::{FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use sluice_storage::{DEFAULT_CONTENT_TYPE, write_all};
use tracing::info;

#[derive(Debug, Deserialize)]
struct HttpInputParams {
  url: String,
  #[serde(default)]
  headers: BTreeMap<String, String>,
}

fn request_error(err: reqwest::Error) -> StageError {
  if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
    StageError::transient(err.to_string())
  } else {
    StageError::permanent(err.to_string())
  }
}

/// Downloads a URL into the run's storage.
pub struct HttpInput;

#[async_trait]
impl Stage for HttpInput {
  fn describe(&self) -> &'static str {
    "# HttpInput\n\n\
     Downloads a URL with `GET` and stores the response body in its sink.\n\n\
     - `url` (required): an `http` or `https` URL.\n\
     - `headers`: an object of request headers.\n\n\
     Connection failures, timeouts, `429` and `5xx` responses are transient \
     and retried; other error statuses fail the stage."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default().idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    linter.field("url", FieldKind::String, true);
    linter.validate("url", |value| {
      let raw = value.as_str().unwrap_or_default();
      let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid URL: {e}"))?;
      match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported URL scheme '{other}'")),
      }
    });
    if linter.field("headers", FieldKind::Object, false).is_some() {
      linter.validate("headers", |value| {
        let all_strings = value
          .as_object()
          .is_some_and(|headers| headers.values().all(|v| v.is_string()));
        if all_strings {
          Ok(())
        } else {
          Err("Header values must be strings".to_string())
        }
      });
    }
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let params: HttpInputParams = ctx.params()?;
    let sink = ctx.sink(0)?;

    let client = reqwest::Client::new();
    let mut request = client.get(&params.url);
    for (name, value) in &params.headers {
      request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await.map_err(request_error)?;
    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
      return Err(StageError::transient(format!("{} returned {status}", params.url)));
    }
    if !status.is_success() {
      return Err(StageError::permanent(format!("{} returned {status}", params.url)));
    }

    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or(DEFAULT_CONTENT_TYPE)
      .to_string();
    let body = response.bytes().await.map_err(request_error)?;

    info!(
      stage_id = %ctx.stage_id,
      url = %params.url,
      bytes = body.len(),
      "http_downloaded"
    );
    write_all(ctx.store.as_ref(), sink, body, &content_type).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use sluice_stage::CheckResult;

  fn lint(params: serde_json::Value) -> BTreeMap<String, CheckResult> {
    let params = params.as_object().cloned().unwrap();
    let mut linter = StageLinter::new(&params);
    HttpInput.lint(&mut linter);
    linter.into_checks()
  }

  #[test]
  fn test_lint_accepts_http_url() {
    let checks = lint(json!({"url": "https://example.com/data.csv", "headers": {"accept": "text/csv"}}));
    assert!(checks.values().all(|c| c.pass), "{checks:?}");
  }

  #[test]
  fn test_lint_rejects_bad_urls() {
    let checks = lint(json!({"url": "ftp://example.com/data.csv"}));
    assert!(!checks["FieldValid [url]"].pass);

    let checks = lint(json!({"url": "not a url"}));
    assert!(!checks["FieldValid [url]"].pass);

    let checks = lint(json!({}));
    assert!(!checks["FieldExists [url]"].pass);
  }

  #[test]
  fn test_lint_rejects_non_string_headers() {
    let checks = lint(json!({"url": "http://example.com", "headers": {"x-retries": 3}}));
    assert!(!checks["FieldValid [headers]"].pass);
  }
}
