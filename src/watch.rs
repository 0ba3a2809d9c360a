//! The watch loop: debounced filesystem events are matched against the
//! standing watch bindings and every match re-runs its bound dev task on the
//! runtime. A failed run is reported and the loop keeps watching; firings of
//! the same binding are independent and never serialized.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::config::{AssetKind, Config, PathRole};
use crate::error::{ConfigError, WatchError};
use crate::graph::Registry;
use crate::task::glob_base;

const DEBOUNCE: Duration = Duration::from_millis(250);

/// A standing subscription created at startup: file events matching
/// `pattern` re-run `task`. Lives for the process lifetime.
pub struct WatchBinding {
    raw: Utf8PathBuf,
    pattern: glob::Pattern,
    task: &'static str,
}

impl WatchBinding {
    pub fn new(pattern: &Utf8Path, task: &'static str) -> Result<Self, ConfigError> {
        Ok(Self {
            raw: pattern.to_owned(),
            pattern: glob::Pattern::new(pattern.as_str())?,
            task,
        })
    }

    pub fn task(&self) -> &'static str {
        self.task
    }

    pub fn matches(&self, rel: &Utf8Path) -> bool {
        self.pattern.matches_path(rel.as_std_path())
    }
}

impl std::fmt::Debug for WatchBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchBinding")
            .field("pattern", &self.raw)
            .field("task", &self.task)
            .finish()
    }
}

/// The fixed dev-mode bindings: one per asset kind with a dev task.
pub fn bindings(config: &Config) -> Result<Vec<WatchBinding>, ConfigError> {
    let paths = &config.paths;

    Ok(vec![
        WatchBinding::new(paths.resolve(AssetKind::Markup, PathRole::Watch)?, "html:dev")?,
        WatchBinding::new(paths.resolve(AssetKind::Style, PathRole::Watch)?, "styles:dev")?,
        WatchBinding::new(paths.resolve(AssetKind::Script, PathRole::Watch)?, "js:dev")?,
    ])
}

/// Which tasks a changed path triggers, deduplicated, in binding order.
pub fn tasks_matching(bindings: &[WatchBinding], rel: &Utf8Path) -> Vec<&'static str> {
    let mut tasks = Vec::new();
    for binding in bindings {
        if binding.matches(rel) && !tasks.contains(&binding.task) {
            tasks.push(binding.task);
        }
    }
    tasks
}

pub async fn watch(registry: Arc<Registry>, bindings: Vec<WatchBinding>) -> Result<(), WatchError> {
    let root = std::env::current_dir()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result| {
        let _ = tx.send(result);
    })?;

    let mut watched = HashSet::new();
    for binding in &bindings {
        watched.insert(glob_base(&binding.raw));
    }

    for path in collapse_watch_paths(watched) {
        if path.exists() {
            tracing::info!("watching {path}");
            debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
        } else {
            tracing::warn!("watch root '{path}' does not exist, skipping");
        }
    }

    while let Some(result) = rx.recv().await {
        let events = match result {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
                continue;
            }
        };

        let mut triggered: Vec<&'static str> = Vec::new();
        for de in &events {
            if !matches!(
                de.event.kind,
                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
            ) {
                continue;
            }

            for path in &de.event.paths {
                let rel = path.strip_prefix(&root).unwrap_or(path);
                let Ok(rel) = Utf8PathBuf::try_from(rel.to_path_buf()) else {
                    continue;
                };

                for task in tasks_matching(&bindings, &rel) {
                    if !triggered.contains(&task) {
                        triggered.push(task);
                    }
                }
            }
        }

        // independent dispatch per binding; a failed dev run only logs
        for task in triggered {
            tracing::info!(task, "change detected, re-running");
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(err) = registry.run(task).await {
                    tracing::error!(task, "{err}");
                }
            });
        }
    }

    Ok(())
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `a` and `a/b`, we only need to watch `a` because the watcher
/// is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
