//! Task graph: named tasks composed into series and groups.
//!
//! `Series` starts each child only after the previous one resolved and
//! fails fast. `Group` starts every child together and joins on all of
//! them; siblings run to completion even when one fails, and the composite
//! reports the first failure. Composites reference other tasks by name, so
//! unknown references and cycles are checked once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, join_all};
use petgraph::graph::DiGraph;

use crate::error::{BuildError, ConfigError, UnitError};
use crate::task::TaskUnit;

pub type ActionFn = Arc<dyn Fn() -> Result<(), UnitError> + Send + Sync>;

pub enum TaskNode {
    Unit(Arc<TaskUnit>),
    /// A plain build step with no input glob, e.g. `clean`.
    Action { name: &'static str, run: ActionFn },
    /// Reference to a named task in the registry.
    Ref(&'static str),
    Series(Vec<TaskNode>),
    Group(Vec<TaskNode>),
}

pub fn unit(unit: TaskUnit) -> TaskNode {
    TaskNode::Unit(Arc::new(unit))
}

pub fn action<F>(name: &'static str, run: F) -> TaskNode
where
    F: Fn() -> Result<(), UnitError> + Send + Sync + 'static,
{
    TaskNode::Action {
        name,
        run: Arc::new(run),
    }
}

pub fn task(name: &'static str) -> TaskNode {
    TaskNode::Ref(name)
}

pub fn series(nodes: Vec<TaskNode>) -> TaskNode {
    TaskNode::Series(nodes)
}

pub fn group(nodes: Vec<TaskNode>) -> TaskNode {
    TaskNode::Group(nodes)
}

#[derive(Default)]
pub struct Registry {
    tasks: BTreeMap<&'static str, TaskNode>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, node: TaskNode) -> Result<(), ConfigError> {
        if self.tasks.contains_key(name) {
            return Err(ConfigError::DuplicateTask(name.to_string()));
        }
        self.tasks.insert(name, node);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.keys().copied()
    }

    /// Startup validation: every `Ref` resolves and the reference graph is
    /// acyclic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut graph = DiGraph::<&'static str, ()>::new();
        let mut index = BTreeMap::new();

        for name in self.tasks.keys() {
            index.insert(*name, graph.add_node(*name));
        }

        for (name, node) in &self.tasks {
            let mut refs = Vec::new();
            collect_refs(node, &mut refs);

            for target in refs {
                let Some(to) = index.get(target) else {
                    return Err(ConfigError::UnknownRef {
                        from: name.to_string(),
                        to: target.to_string(),
                    });
                };
                graph.add_edge(index[name], *to, ());
            }
        }

        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| ConfigError::Cycle(graph[cycle.node_id()].to_string()))?;

        Ok(())
    }

    pub async fn run(&self, name: &str) -> Result<(), BuildError> {
        let node = self
            .tasks
            .get(name)
            .ok_or_else(|| BuildError::UnknownTask(name.to_string()))?;

        tracing::info!(task = name, "starting");
        let result = self.run_node(node).await;
        match &result {
            Ok(()) => tracing::info!(task = name, "finished"),
            Err(err) => tracing::error!(task = name, "{err}"),
        }

        result
    }

    fn run_node<'a>(&'a self, node: &'a TaskNode) -> BoxFuture<'a, Result<(), BuildError>> {
        match node {
            TaskNode::Unit(unit) => {
                let unit = unit.clone();
                async move {
                    let name = unit.name();
                    tokio::task::spawn_blocking(move || unit.execute())
                        .await
                        .map_err(|_| BuildError::Panic(name.to_string()))?
                        .map_err(|source| BuildError::Task {
                            name: name.to_string(),
                            source,
                        })
                }
                .boxed()
            }
            TaskNode::Action { name, run } => {
                let run = run.clone();
                let name = *name;
                async move {
                    tokio::task::spawn_blocking(move || (*run)())
                        .await
                        .map_err(|_| BuildError::Panic(name.to_string()))?
                        .map_err(|source| BuildError::Task {
                            name: name.to_string(),
                            source,
                        })
                }
                .boxed()
            }
            TaskNode::Ref(name) => {
                async move {
                    let node = self
                        .tasks
                        .get(*name)
                        .ok_or_else(|| BuildError::UnknownTask(name.to_string()))?;
                    self.run_node(node).await
                }
                .boxed()
            }
            TaskNode::Series(nodes) => {
                async move {
                    for node in nodes {
                        self.run_node(node).await?;
                    }
                    Ok(())
                }
                .boxed()
            }
            TaskNode::Group(nodes) => {
                async move {
                    let results = join_all(nodes.iter().map(|node| self.run_node(node))).await;

                    let mut first = None;
                    for result in results {
                        if let Err(err) = result {
                            if first.is_none() {
                                first = Some(err);
                            } else {
                                tracing::error!("{err}");
                            }
                        }
                    }

                    match first {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
                .boxed()
            }
        }
    }
}

fn collect_refs(node: &TaskNode, refs: &mut Vec<&'static str>) {
    match node {
        TaskNode::Ref(name) => refs.push(*name),
        TaskNode::Series(nodes) | TaskNode::Group(nodes) => {
            for node in nodes {
                collect_refs(node, refs);
            }
        }
        TaskNode::Unit(_) | TaskNode::Action { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str, u64) -> TaskNode) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();

        let make = move |name: &'static str, delay_ms: u64| {
            let log = log2.clone();
            action(name, move || {
                std::thread::sleep(Duration::from_millis(delay_ms));
                log.lock().unwrap().push(name);
                Ok(())
            })
        };

        (log, make)
    }

    fn failing(name: &'static str) -> TaskNode {
        action(name, || {
            Err(UnitError::Io(std::io::Error::other("simulated")))
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = Registry::new();
        registry.insert("a", action("a", || Ok(()))).unwrap();
        let err = registry.insert("a", action("a", || Ok(()))).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask(_)));
    }

    #[test]
    fn unknown_references_fail_validation() {
        let mut registry = Registry::new();
        registry.insert("prod", series(vec![task("missing")])).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRef { .. }));
    }

    #[test]
    fn reference_cycles_fail_validation() {
        let mut registry = Registry::new();
        registry.insert("a", series(vec![task("b")])).unwrap();
        registry.insert("b", group(vec![task("a")])).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Cycle(_)));
    }

    #[tokio::test]
    async fn series_runs_in_declared_order() {
        let (log, make) = recorder();
        let mut registry = Registry::new();
        registry
            .insert("all", series(vec![make("slow", 50), make("fast", 0)]))
            .unwrap();

        registry.run("all").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn series_fails_fast() {
        let (log, make) = recorder();
        let mut registry = Registry::new();
        registry
            .insert("all", series(vec![failing("boom"), make("after", 0)]))
            .unwrap();

        let err = registry.run("all").await.unwrap_err();
        assert!(matches!(err, BuildError::Task { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_joins_all_even_when_one_fails() {
        let (log, make) = recorder();
        let mut registry = Registry::new();
        registry
            .insert(
                "all",
                group(vec![make("a", 30), failing("boom"), make("c", 0)]),
            )
            .unwrap();

        let err = registry.run("all").await.unwrap_err();
        assert!(matches!(err, BuildError::Task { name, .. } if name == "boom"));

        // siblings ran to completion and their outcome is observable
        let done = log.lock().unwrap();
        assert!(done.contains(&"a"));
        assert!(done.contains(&"c"));
    }

    #[tokio::test]
    async fn composites_resolve_named_references() {
        let (log, make) = recorder();
        let mut registry = Registry::new();
        registry.insert("clean", make("clean", 10)).unwrap();
        registry.insert("build", make("build", 0)).unwrap();
        registry
            .insert("prod", series(vec![task("clean"), task("build")]))
            .unwrap();

        registry.validate().unwrap();
        registry.run("prod").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["clean", "build"]);
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let registry = Registry::new();
        let err = registry.run("nope").await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownTask(_)));
    }
}
