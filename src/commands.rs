use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use sluice_config::{PipelineConfig, strip_comments};
use sluice_lint::{LintDebouncer, LintResult, Linter};
use sluice_resolver::WiringResolver;
use sluice_runtime::{Runtime, RuntimeConfig};
use sluice_storage::{FsStore, LocationAllocator};
use sluice_template::{StorageSettings, referenced_variables};
use sluice_trigger::{PipelineCatalog, RunBoard, RunQueue, TriggerService, router};
use sluice_workflow::{Graph, WiredGraph};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::settings::Settings;

const WATCH_INTERVAL: Duration = Duration::from_millis(250);
const LINT_WINDOW: Duration = Duration::from_millis(300);

fn linter(settings: &Settings) -> Arc<Linter> {
  Arc::new(Linter::new(
    sluice_stages::registry(),
    settings.default_options.clone(),
  ))
}

fn read_config(file: &Path) -> Result<String> {
  std::fs::read_to_string(file)
    .with_context(|| format!("failed to read pipeline: {}", file.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Lint `file`, printing the summary. Fails when the document is not runnable.
pub async fn lint(
  settings: &Settings,
  file: &Path,
  vars: &[(String, String)],
  watch: bool,
) -> Result<()> {
  let linter = linter(settings);
  if watch {
    return watch_lint(settings, linter, file, vars).await;
  }

  let text = read_config(file)?;
  let bindings = (!vars.is_empty()).then(|| settings.bindings(&text, vars));
  let result = linter.lint(&text, bindings.as_ref());
  print_json(&result.summary())?;

  if !result.is_runnable() {
    bail!("{} is not runnable", file.display());
  }
  Ok(())
}

/// Re-lint `file` whenever its contents change, until ctrl-c.
async fn watch_lint(
  settings: &Settings,
  linter: Arc<Linter>,
  file: &Path,
  vars: &[(String, String)],
) -> Result<()> {
  let cancel = CancellationToken::new();
  let (results_tx, mut results) = mpsc::unbounded_channel::<LintResult>();
  let debouncer = LintDebouncer::spawn(linter.clone(), LINT_WINDOW, results_tx, cancel.clone());

  let mut interval = tokio::time::interval(WATCH_INTERVAL);
  let mut last_seen: Option<String> = None;
  eprintln!("Watching {} (ctrl-c to stop)", file.display());

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        cancel.cancel();
        return Ok(());
      }

      _ = interval.tick() => {
        let text = match std::fs::read_to_string(file) {
          Ok(text) => text,
          Err(e) => {
            eprintln!("Cannot read {}: {}", file.display(), e);
            continue;
          }
        };
        if last_seen.as_deref() == Some(text.as_str()) {
          continue;
        }
        if !vars.is_empty() {
          let missing = linter
            .missing_variables(&text, &settings.bindings(&text, vars))
            .unwrap_or_default();
          if !missing.is_empty() {
            eprintln!("Missing variables: {}", missing.join(", "));
          }
        }
        last_seen = Some(text.clone());
        if !debouncer.edit(text) {
          return Ok(());
        }
      }

      result = results.recv() => {
        let Some(result) = result else { return Ok(()) };
        let summary = result.summary();
        eprintln!(
          "{} ({} failed checks)",
          if summary.runnable { "runnable" } else { "not runnable" },
          summary.error_count()
        );
        print_json(&summary)?;
      }
    }
  }
}

/// Lint, substitute and check variables, returning a runnable config.
fn prepare(
  settings: &Settings,
  linter: &Linter,
  text: &str,
  vars: &[(String, String)],
) -> Result<PipelineConfig> {
  let bindings = settings.bindings(text, vars);
  let missing = linter.missing_variables(text, &bindings)?;
  if !missing.is_empty() {
    bail!("missing variables: {}", missing.join(", "));
  }

  let result = linter.lint(text, Some(&bindings));
  if !result.is_runnable() {
    print_json(&result.summary())?;
  }
  let mut config = result.into_config()?;
  config.options = settings.effective_options(text, vars);
  Ok(config)
}

fn wire_config(
  linter: &Linter,
  config: &PipelineConfig,
  run_id: &str,
  allocator: &LocationAllocator,
) -> Result<WiredGraph> {
  let graph = WiringResolver::new(linter.registry().clone()).resolve(config, run_id, allocator)?;
  Ok(graph)
}

/// The wired graph plus the data flow between its stages.
fn wire_report(graph: &WiredGraph) -> Value {
  let edges = Graph::new(graph);
  let flow: Vec<Value> = graph
    .stages()
    .map(|stage| {
      json!({
        "stageId": stage.stage_id,
        "upstream": edges.upstream(&stage.stage_id),
        "downstream": edges.downstream(&stage.stage_id),
      })
    })
    .collect();

  json!({
    "graph": graph,
    "entryPoints": edges.entry_points(),
    "externalSources": edges.external_sources(),
    "flow": flow,
  })
}

/// Print the wired graph for `file` without running it.
pub fn wire(settings: &Settings, file: &Path, vars: &[(String, String)]) -> Result<()> {
  let linter = linter(settings);
  let text = read_config(file)?;
  let config = prepare(settings, &linter, &text, vars)?;

  let run_id = "dry-run";
  let storage = StorageSettings::from_options(&config.options);
  let allocator = LocationAllocator::sequential(storage.run_prefix(run_id));
  let graph = wire_config(&linter, &config, run_id, &allocator)?;
  print_json(&wire_report(&graph))
}

/// Run `file` to completion against the local store.
pub async fn run(settings: &Settings, file: &Path, vars: &[(String, String)]) -> Result<()> {
  let linter = linter(settings);
  let text = read_config(file)?;
  let config = prepare(settings, &linter, &text, vars)?;

  let run_id = uuid::Uuid::new_v4().to_string();
  let storage = StorageSettings::from_options(&config.options);
  let allocator = LocationAllocator::new(storage.run_prefix(&run_id));
  let graph = wire_config(&linter, &config, &run_id, &allocator)?;

  let store = Arc::new(FsStore::new(settings.storage_dir()));
  let runtime = Runtime::new(linter.registry().clone(), store, RuntimeConfig::default());

  let cancel = CancellationToken::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Cancelling run...");
      ctrl_c.cancel();
    }
  });

  eprintln!("Running {} as {}", file.display(), run_id);
  let report = runtime
    .invoke(&graph, cancel)
    .await
    .with_context(|| format!("run {} failed", run_id))?;
  print_json(&report)
}

/// List the variables `file` references and which are still unbound.
pub fn vars(settings: &Settings, file: &Path, vars: &[(String, String)]) -> Result<()> {
  let linter = linter(settings);
  let text = read_config(file)?;
  let referenced = referenced_variables(&strip_comments(&text))?;
  let missing = linter.missing_variables(&text, &settings.bindings(&text, vars))?;

  print_json(&json!({
    "referenced": referenced,
    "missing": missing,
  }))
}

/// Print help for every stage type, or for one.
pub fn stages(stage_type: Option<&str>) -> Result<()> {
  let registry = sluice_stages::registry();
  match stage_type {
    Some(stage_type) => {
      let help = registry.describe(stage_type)?;
      println!("{}", help.trim_end());
    }
    None => {
      for name in registry.names() {
        let help = registry.describe(name)?;
        let summary = help.lines().next().unwrap_or_default();
        println!("{:<16} {}", name, summary);
      }
    }
  }
  Ok(())
}

/// Serve the trigger API for the pipelines under `<data_dir>/pipelines`.
pub async fn serve(settings: &Settings, addr: SocketAddr) -> Result<()> {
  let pipelines_dir = settings.pipelines_dir();
  let catalog = PipelineCatalog::load(&pipelines_dir)
    .await
    .with_context(|| format!("failed to load pipelines from {}", pipelines_dir.display()))?;
  info!(pipelines = catalog.len(), dir = %pipelines_dir.display(), "catalog_loaded");

  let linter = linter(settings);
  let board = Arc::new(RunBoard::new());
  let store = Arc::new(FsStore::new(settings.storage_dir()));
  let runtime = Runtime::new(linter.registry().clone(), store, RuntimeConfig::default())
    .with_notifier(board.clone());
  let queue = RunQueue::new(Arc::new(runtime), board.clone());
  let service = TriggerService::new(
    Arc::new(catalog),
    linter,
    settings.identity.clone(),
    board,
    queue.sender(),
  );

  let cancel = CancellationToken::new();
  let queue_task = tokio::spawn(queue.start(cancel.clone()));

  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .with_context(|| format!("failed to bind {}", addr))?;
  eprintln!("Listening on {}", addr);

  let shutdown = cancel.clone();
  axum::serve(listener, router(Arc::new(service)))
    .with_graceful_shutdown(async move {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown.cancelled() => {}
      }
    })
    .await
    .context("server error")?;

  cancel.cancel();
  queue_task.await.context("run queue panicked")?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn wired(config: Value) -> Result<WiredGraph> {
    let linter = Linter::new(sluice_stages::registry(), serde_json::Map::new());
    let config = PipelineConfig::from_value(config)?;
    let allocator = LocationAllocator::sequential("store://sluice/dry-run");
    wire_config(&linter, &config, "dry-run", &allocator)
  }

  #[test]
  fn test_wire_report_lists_data_flow() {
    let graph = wired(json!({
      "inputs": [{"type": "FileInput", "path": "/data/in.csv"}],
      "transforms": [{"type": "MatchReplace", "pattern": ",", "replacement": ";"}],
      "outputs": [
        {"type": "FileOutput", "path": "/data/out.csv"},
        {"type": "Deleter", "sources": ["store://data/stale"]}
      ]
    }))
    .unwrap();
    let report = wire_report(&graph);

    assert_eq!(report["graph"]["runId"], "dry-run");
    assert_eq!(report["entryPoints"], json!(["inputs[0]", "outputs[1]"]));
    assert_eq!(report["externalSources"], json!(["store://data/stale"]));
    assert_eq!(report["flow"][1], json!({
      "stageId": "transforms[0]",
      "upstream": ["inputs[0]"],
      "downstream": ["outputs[0]"],
    }));
    assert_eq!(report["flow"][3]["upstream"], json!([]));
  }

  #[test]
  fn test_wire_rejects_shared_sinks() {
    let err = wired(json!({
      "inputs": [{"type": "FileInput", "path": "/data/in.csv", "sinks": ["store://d/raw"]}],
      "transforms": [
        {"type": "MatchReplace", "pattern": "a", "sinks": ["store://d/raw2"]},
        {"type": "MatchReplace", "pattern": "b", "sinks": ["store://d/raw2"]}
      ]
    }))
    .unwrap_err();
    assert!(err.to_string().contains("store://d/raw2"), "{err}");
  }
}
