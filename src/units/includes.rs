//! File-inclusion directives: `//= include path` in scripts and
//! `<!--= include path -->` in markup. Paths are resolved relative to the
//! including file and expanded recursively; the path stack guards against
//! cycles.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransformError;
use crate::pipeline::{Artifact, Transform};

#[derive(Debug, Clone, Copy)]
pub enum IncludeStyle {
    Script,
    Markup,
}

pub struct ResolveIncludes {
    style: IncludeStyle,
}

impl ResolveIncludes {
    pub fn new(style: IncludeStyle) -> Self {
        Self { style }
    }
}

impl Transform for ResolveIncludes {
    fn name(&self) -> &'static str {
        "include"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let text = artifact.utf8()?;
        let mut stack = vec![artifact.source.clone()];
        let out = expand(text, &artifact.source, self.style, &mut stack)?;
        Ok(artifact.with_text(out))
    }
}

fn expand(
    text: &str,
    from: &Utf8Path,
    style: IncludeStyle,
    stack: &mut Vec<Utf8PathBuf>,
) -> Result<String, TransformError> {
    let dir = from.parent().unwrap_or(Utf8Path::new(""));
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let Some(target) = directive(line, style) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        let path = dir.join(target);
        if stack.contains(&path) {
            return Err(TransformError::IncludeCycle(path));
        }

        let included =
            fs::read_to_string(&path).map_err(|_| TransformError::MissingInclude {
                include: path.clone(),
                from: from.to_owned(),
            })?;

        stack.push(path.clone());
        let expanded = expand(&included, &path, style, stack)?;
        stack.pop();

        out.push_str(&expanded);
    }

    Ok(out)
}

fn directive(line: &str, style: IncludeStyle) -> Option<&str> {
    let line = line.trim();

    let body = match style {
        IncludeStyle::Script => line.strip_prefix("//=")?,
        IncludeStyle::Markup => line
            .strip_prefix("<!--=")?
            .strip_suffix("-->")?,
    };

    let body = body.trim();
    let target = body
        .strip_prefix("include")
        .or_else(|| body.strip_prefix("require"))?
        .trim();

    (!target.is_empty()).then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Utf8Path, name: &str, text: &str) -> Utf8PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn resolve(style: IncludeStyle, entry: &Utf8Path) -> Result<String, TransformError> {
        let data = fs::read(entry).unwrap();
        let artifact = Artifact::new(entry.to_owned(), "main".into(), data);
        let out = ResolveIncludes::new(style).apply(artifact)?;
        Ok(out.utf8().unwrap().to_string())
    }

    #[test]
    fn script_includes_are_spliced_in_place() {
        let (_tmp, dir) = root();
        write(&dir, "util.js", "function util() {}\n");
        let entry = write(&dir, "main.js", "//= include util.js\nutil();\n");

        let out = resolve(IncludeStyle::Script, &entry).unwrap();
        assert_eq!(out, "function util() {}\nutil();\n");
    }

    #[test]
    fn includes_nest_relative_to_the_including_file() {
        let (_tmp, dir) = root();
        fs::create_dir(dir.join("lib")).unwrap();
        write(&dir.join("lib"), "deep.js", "deep();\n");
        write(&dir.join("lib"), "mid.js", "//= include deep.js\nmid();\n");
        let entry = write(&dir, "main.js", "//= require lib/mid.js\n");

        let out = resolve(IncludeStyle::Script, &entry).unwrap();
        assert_eq!(out, "deep();\nmid();\n");
    }

    #[test]
    fn markup_style_uses_comment_directives() {
        let (_tmp, dir) = root();
        write(&dir, "header.html", "<header></header>\n");
        let entry = write(&dir, "index.html", "<!--= include header.html -->\n<main></main>\n");

        let out = resolve(IncludeStyle::Markup, &entry).unwrap();
        assert_eq!(out, "<header></header>\n<main></main>\n");
    }

    #[test]
    fn missing_include_names_both_files() {
        let (_tmp, dir) = root();
        let entry = write(&dir, "main.js", "//= include nope.js\n");

        let err = resolve(IncludeStyle::Script, &entry).unwrap_err();
        assert!(matches!(err, TransformError::MissingInclude { .. }));
    }

    #[test]
    fn include_cycles_are_detected() {
        let (_tmp, dir) = root();
        write(&dir, "a.js", "//= include b.js\n");
        write(&dir, "b.js", "//= include a.js\n");
        let entry = dir.join("a.js");

        let err = resolve(IncludeStyle::Script, &entry).unwrap_err();
        assert!(matches!(err, TransformError::IncludeCycle(_)));
    }

    #[test]
    fn ordinary_comments_pass_through() {
        let (_tmp, dir) = root();
        let entry = write(&dir, "main.js", "// plain comment\nlet x = 1;\n");

        let out = resolve(IncludeStyle::Script, &entry).unwrap();
        assert_eq!(out, "// plain comment\nlet x = 1;\n");
    }
}
