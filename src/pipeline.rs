//! A task unit's pipeline is an explicit ordered sequence of transforms,
//! applied with plain function composition. Each transform takes the whole
//! artifact so it can rewrite the contents, the output path, or both.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransformError;

/// One file moving through a pipeline.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// The source file this artifact was read from.
    pub source: Utf8PathBuf,
    /// Output path relative to the unit's output directory. Transforms such
    /// as rename rewrite this.
    pub rel: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(source: Utf8PathBuf, rel: Utf8PathBuf, data: Vec<u8>) -> Self {
        Self { source, rel, data }
    }

    pub fn utf8(&self) -> Result<&str, TransformError> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_text(self, text: String) -> Self {
        self.with_data(text.into_bytes())
    }

    pub fn with_extension(mut self, ext: &str) -> Self {
        self.rel = self.rel.with_extension(ext);
        self
    }
}

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError>;
}

/// Fixed at registration, never mutated after startup.
pub struct Pipeline {
    steps: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }

    /// A pipeline with no steps; the artifact is written out unchanged.
    pub fn passthrough() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn run(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        self.steps.iter().try_fold(artifact, |artifact, step| {
            tracing::trace!(step = step.name(), file = %artifact.source, "applying transform");
            step.apply(artifact)
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_tuple("Pipeline").field(&names).finish()
    }
}

/// The rename step: replace the output file name, or splice a suffix in
/// front of the extension (`main.js` → `main.min.js`).
pub enum Rename {
    To(&'static str),
    Suffix(&'static str),
}

impl Transform for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, mut artifact: Artifact) -> Result<Artifact, TransformError> {
        let dir = artifact.rel.parent().unwrap_or(Utf8Path::new(""));

        artifact.rel = match self {
            Rename::To(name) => dir.join(name),
            Rename::Suffix(suffix) => {
                let stem = artifact.rel.file_stem().unwrap_or_default();
                let mut name = format!("{stem}{suffix}");
                if let Some(ext) = artifact.rel.extension() {
                    name.push('.');
                    name.push_str(ext);
                }
                dir.join(name)
            }
        };

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Append(&'static str);

    impl Transform for Append {
        fn name(&self) -> &'static str {
            "append"
        }

        fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
            let mut text = artifact.utf8()?.to_string();
            text.push_str(self.0);
            Ok(artifact.with_text(text))
        }
    }

    fn artifact(rel: &str, data: &[u8]) -> Artifact {
        Artifact::new("src/a".into(), rel.into(), data.to_vec())
    }

    #[test]
    fn steps_apply_in_declared_order() {
        let pipeline = Pipeline::new(vec![Box::new(Append(" one")), Box::new(Append(" two"))]);
        let out = pipeline.run(artifact("a.txt", b"zero")).unwrap();
        assert_eq!(out.utf8().unwrap(), "zero one two");
    }

    #[test]
    fn passthrough_leaves_the_artifact_alone() {
        let out = Pipeline::passthrough()
            .run(artifact("f/a.woff", b"\x00\x01"))
            .unwrap();
        assert_eq!(out.rel, "f/a.woff");
        assert_eq!(out.data, b"\x00\x01");
    }

    #[test]
    fn rename_to_replaces_the_file_name() {
        let out = Rename::To("style.min.css")
            .apply(artifact("main.css", b""))
            .unwrap();
        assert_eq!(out.rel, "style.min.css");
    }

    #[test]
    fn rename_suffix_keeps_directory_and_extension() {
        let out = Rename::Suffix(".min")
            .apply(artifact("sub/main.js", b""))
            .unwrap();
        assert_eq!(out.rel, "sub/main.min.js");
    }

    #[test]
    fn binary_input_to_a_text_step_is_a_transform_error() {
        let pipeline = Pipeline::new(vec![Box::new(Append("x"))]);
        let err = pipeline.run(artifact("a.bin", &[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, TransformError::Utf8(_)));
    }
}
