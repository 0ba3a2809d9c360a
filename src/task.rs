//! A task unit reads every file matching its input glob, runs each through
//! the unit's pipeline on the rayon pool, and writes the results under the
//! output directory. Re-running a unit on unchanged inputs produces
//! byte-identical outputs.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::UnitError;
use crate::pipeline::{Artifact, Pipeline};
use crate::server::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Per-file failures are reported and skipped; the invocation succeeds
    /// so the watch loop stays alive.
    Dev,
    /// The first failure aborts the invocation.
    Prod,
}

pub struct TaskUnit {
    name: &'static str,
    mode: RunMode,
    input: Utf8PathBuf,
    /// Static prefix of the input glob; outputs keep their path relative
    /// to it.
    base: Utf8PathBuf,
    pipeline: Pipeline,
    output: Utf8PathBuf,
    notifier: Option<Notifier>,
    progress: bool,
}

impl TaskUnit {
    pub fn new(
        name: &'static str,
        mode: RunMode,
        input: &Utf8Path,
        pipeline: Pipeline,
        output: &Utf8Path,
    ) -> Self {
        Self {
            name,
            mode,
            input: input.to_owned(),
            base: glob_base(input),
            pipeline,
            output: output.to_owned(),
            notifier: None,
            progress: false,
        }
    }

    /// Push a reload notification with the written paths after each run.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.progress = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn execute(&self) -> Result<(), UnitError> {
        let files = self.sources()?;
        tracing::debug!(task = self.name, files = files.len(), "running task unit");

        let written = match self.mode {
            RunMode::Prod if self.progress => {
                let bar = ProgressBar::new(files.len() as u64).with_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .expect("Error setting progress bar template")
                        .progress_chars("#>-"),
                );
                let written = files
                    .par_iter()
                    .progress_with(bar.clone())
                    .map(|file| self.process(file))
                    .collect::<Result<Vec<_>, _>>()?;
                bar.finish_with_message(format!("{} done", self.name));
                written
            }
            RunMode::Prod => files
                .par_iter()
                .map(|file| self.process(file))
                .collect::<Result<Vec<_>, _>>()?,
            RunMode::Dev => files
                .par_iter()
                .filter_map(|file| match self.process(file) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        tracing::error!(task = self.name, "{err}");
                        None
                    }
                })
                .collect(),
        };

        if let Some(notifier) = &self.notifier {
            notifier.notify(written);
        }

        Ok(())
    }

    fn sources(&self) -> Result<Vec<Utf8PathBuf>, UnitError> {
        let mut files = Vec::new();

        for entry in glob::glob(self.input.as_str())? {
            let path = entry?;
            if path.is_file() {
                files.push(Utf8PathBuf::try_from(path)?);
            }
        }

        files.sort();
        Ok(files)
    }

    fn process(&self, file: &Utf8Path) -> Result<Utf8PathBuf, UnitError> {
        let data = fs::read(file)?;
        let rel = file.strip_prefix(&self.base).unwrap_or(file).to_owned();

        let artifact = self
            .pipeline
            .run(Artifact::new(file.to_owned(), rel, data))
            .map_err(|source| UnitError::Transform {
                file: file.to_owned(),
                source,
            })?;

        let dest = self.output.join(&artifact.rel);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&dest, &artifact.data)?;

        Ok(dest)
    }
}

impl std::fmt::Debug for TaskUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskUnit")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Splits a glob string into its static root: the components before the
/// first wildcard, or the parent directory for a concrete file path.
pub fn glob_base(pattern: &Utf8Path) -> Utf8PathBuf {
    let components: Vec<_> = pattern.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or_else(|| components.len().saturating_sub(1));

    components.iter().take(split).collect()
}
