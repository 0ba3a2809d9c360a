//! Style transforms: scss compilation via `grass`, vendor prefixing for the
//! static browser target list, and the unused-selector strip applied to the
//! production stylesheet.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransformError;
use crate::pipeline::{Artifact, Transform};

pub struct CompileScss {
    load_path: Utf8PathBuf,
    style: grass::OutputStyle,
}

impl CompileScss {
    pub fn new(load_path: &Utf8Path, style: grass::OutputStyle) -> Self {
        Self {
            load_path: load_path.to_owned(),
            style,
        }
    }
}

impl Transform for CompileScss {
    fn name(&self) -> &'static str {
        "scss"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let source = artifact.utf8()?.to_string();
        let options = grass::Options::default()
            .style(self.style)
            .load_path(self.load_path.as_std_path());

        let css = grass::from_string(source, &options)?;
        Ok(artifact.with_text(css).with_extension("css"))
    }
}

/// Vendor prefixes needed by the oldest browsers on the target list, keyed
/// by property family.
const PREFIXES: &[(&str, &[&str])] = &[
    ("animation", &["-webkit-"]),
    ("appearance", &["-webkit-", "-moz-"]),
    ("backdrop-filter", &["-webkit-"]),
    ("box-decoration-break", &["-webkit-"]),
    ("column", &["-webkit-", "-moz-"]),
    ("columns", &["-webkit-", "-moz-"]),
    ("filter", &["-webkit-"]),
    ("hyphens", &["-webkit-", "-ms-"]),
    ("transform", &["-webkit-", "-ms-"]),
    ("transition", &["-webkit-", "-o-"]),
    ("user-select", &["-webkit-", "-moz-", "-ms-"]),
];

pub struct Autoprefix {
    targets: Vec<String>,
}

impl Autoprefix {
    pub fn new(targets: &[&str]) -> Self {
        Self {
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Transform for Autoprefix {
    fn name(&self) -> &'static str {
        "autoprefix"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        if self.targets.is_empty() {
            return Ok(artifact);
        }
        let css = autoprefix(artifact.utf8()?);
        Ok(artifact.with_text(css))
    }
}

fn autoprefix(css: &str) -> String {
    let mut out = String::with_capacity(css.len() + css.len() / 4);
    let mut buf = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut prev = '\0';

    for ch in css.chars() {
        let sink = if depth > 0 { &mut buf } else { &mut out };

        if let Some(q) = quote {
            sink.push(ch);
            if ch == q && prev != '\\' {
                quote = None;
            }
            prev = ch;
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                sink.push(ch);
            }
            '{' => {
                // the buffer held a nested selector or at-rule header
                out.push_str(&buf);
                buf.clear();
                depth += 1;
                out.push('{');
            }
            ';' if depth > 0 => {
                flush_declaration(&mut out, &buf);
                out.push(';');
                buf.clear();
            }
            '}' => {
                if !buf.trim().is_empty() {
                    flush_declaration(&mut out, &buf);
                } else {
                    out.push_str(&buf);
                }
                buf.clear();
                depth = depth.saturating_sub(1);
                out.push('}');
            }
            _ => sink.push(ch),
        }

        prev = ch;
    }

    out.push_str(&buf);
    out
}

/// Write the prefixed copies of a declaration, then the declaration itself
/// (without its terminator).
fn flush_declaration(out: &mut String, decl: &str) {
    if let Some((head, value)) = decl.split_once(':') {
        let prop = head.trim();
        let indent = &head[..head.len() - head.trim_start().len()];

        if !prop.starts_with('-') {
            for prefix in prefixes_for(prop) {
                out.push_str(indent);
                out.push_str(prefix);
                out.push_str(prop);
                out.push(':');
                out.push_str(value);
                out.push(';');
            }

            // old flexbox needs the value prefixed, not the property
            if prop == "display" {
                let display = value.trim();
                if display == "flex" || display == "inline-flex" {
                    out.push_str(indent);
                    out.push_str("display:-webkit-");
                    out.push_str(display);
                    out.push(';');
                }
            }
        }
    }

    out.push_str(decl);
}

fn prefixes_for(prop: &str) -> &'static [&'static str] {
    for (family, prefixes) in PREFIXES {
        let exact = prop == *family;
        let member = prop.len() > family.len()
            && prop.starts_with(family)
            && prop.as_bytes()[family.len()] == b'-';
        if exact || member {
            return prefixes;
        }
    }
    &[]
}

/// Drops top-level rules whose every selector names only classes and ids
/// that appear in none of the markup sources. Element selectors and
/// selectors with at least one referenced token are always kept, as is any
/// at-rule other than `@media` (which is filtered recursively).
pub struct StripUnusedCss {
    markup: Vec<Utf8PathBuf>,
}

impl StripUnusedCss {
    pub fn new(markup: Vec<Utf8PathBuf>) -> Self {
        Self { markup }
    }
}

impl Transform for StripUnusedCss {
    fn name(&self) -> &'static str {
        "uncss"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let used = used_tokens(&self.markup)?;
        let css = strip(artifact.utf8()?, &used);
        Ok(artifact.with_text(css))
    }
}

fn used_tokens(patterns: &[Utf8PathBuf]) -> Result<HashSet<String>, TransformError> {
    let mut used = HashSet::new();

    for pattern in patterns {
        for entry in glob::glob(pattern.as_str())?.flatten() {
            if let Ok(text) = fs::read_to_string(&entry) {
                scan_attributes(&text, &mut used);
            }
        }
    }

    Ok(used)
}

fn scan_attributes(html: &str, used: &mut HashSet<String>) {
    for (attr, multi) in [("class=", true), ("id=", false)] {
        let mut rest = html;

        while let Some(at) = rest.find(attr) {
            let after = &rest[at + attr.len()..];
            rest = after;

            let Some(q) = after.chars().next().filter(|q| *q == '"' || *q == '\'') else {
                continue;
            };
            let Some(end) = after[1..].find(q) else {
                continue;
            };
            let value = &after[1..1 + end];

            if multi {
                for token in value.split_whitespace() {
                    used.insert(token.to_string());
                }
            } else if !value.trim().is_empty() {
                used.insert(value.trim().to_string());
            }
        }
    }
}

fn strip(css: &str, used: &HashSet<String>) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    loop {
        let trimmed = rest.trim_start();
        out.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;

        if rest.is_empty() {
            break;
        }

        if rest.starts_with('@') {
            let brace = rest.find('{');
            let semi = rest.find(';');

            match (brace, semi) {
                // blockless at-rule such as @import or @charset
                (None, Some(s)) | (Some(_), Some(s)) if brace.is_none_or(|b| s < b) => {
                    out.push_str(&rest[..=s]);
                    rest = &rest[s + 1..];
                }
                (Some(b), _) => {
                    let Some(close) = matching_brace(rest, b) else {
                        out.push_str(rest);
                        break;
                    };
                    let header = &rest[..b];
                    let body = &rest[b + 1..close];

                    if header.trim_start().starts_with("@media") {
                        out.push_str(header);
                        out.push('{');
                        out.push_str(&strip(body, used));
                        out.push('}');
                    } else {
                        out.push_str(&rest[..=close]);
                    }
                    rest = &rest[close + 1..];
                }
                (None, None) => {
                    out.push_str(rest);
                    break;
                }
            }
            continue;
        }

        let Some(b) = rest.find('{') else {
            out.push_str(rest);
            break;
        };
        let Some(close) = matching_brace(rest, b) else {
            out.push_str(rest);
            break;
        };

        let selectors = &rest[..b];
        let body = &rest[b + 1..close];

        let kept: Vec<&str> = selectors
            .split(',')
            .filter(|sel| selector_used(sel, used))
            .collect();

        if !kept.is_empty() {
            out.push_str(kept.join(",").trim_end());
            out.push('{');
            out.push_str(body);
            out.push('}');
        }

        rest = &rest[close + 1..];
    }

    out
}

fn matching_brace(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;

    for (i, ch) in s[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }

    None
}

fn selector_used(selector: &str, used: &HashSet<String>) -> bool {
    let tokens = selector_tokens(selector);
    tokens.is_empty() || tokens.iter().any(|t| used.contains(t))
}

/// Class and id names mentioned by a selector.
fn selector_tokens(selector: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = selector.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '.' && ch != '#' {
            continue;
        }

        let mut name = String::new();
        while let Some(c) = chars.peek() {
            if c.is_alphanumeric() || *c == '-' || *c == '_' {
                name.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        if !name.is_empty() {
            tokens.push(name);
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scss_compiles_and_switches_the_extension() {
        let scss = "$c: #333;\nbody { color: $c; }\n";
        let artifact = Artifact::new("src/style/main.scss".into(), "main.scss".into(), scss.into());

        let out = CompileScss::new("src/style".into(), grass::OutputStyle::Expanded)
            .apply(artifact)
            .unwrap();

        assert_eq!(out.rel, "main.css");
        assert!(out.utf8().unwrap().contains("color: #333"));
    }

    #[test]
    fn invalid_scss_is_a_transform_error() {
        let artifact = Artifact::new(
            "src/style/main.scss".into(),
            "main.scss".into(),
            b"body { color: ; }".to_vec(),
        );
        let err = CompileScss::new("src/style".into(), grass::OutputStyle::Expanded)
            .apply(artifact)
            .unwrap_err();
        assert!(matches!(err, TransformError::Scss(_)));
    }

    #[test]
    fn prefixable_properties_gain_their_prefixes() {
        let css = ".spin{transform:rotate(45deg);color:red}";
        let out = autoprefix(css);
        assert_eq!(
            out,
            ".spin{-webkit-transform:rotate(45deg);-ms-transform:rotate(45deg);transform:rotate(45deg);color:red}"
        );
    }

    #[test]
    fn display_flex_gets_the_value_prefix() {
        let out = autoprefix(".row{display:flex}");
        assert_eq!(out, ".row{display:-webkit-flex;display:flex}");
    }

    #[test]
    fn already_prefixed_declarations_are_left_alone() {
        let css = ".a{-webkit-transform:none}";
        assert_eq!(autoprefix(css), css);
    }

    #[test]
    fn prefixes_apply_inside_media_queries() {
        let css = "@media (min-width:600px){.a{user-select:none}}";
        let out = autoprefix(css);
        assert!(out.contains("-webkit-user-select:none;"));
        assert!(out.contains("-moz-user-select:none;"));
        assert!(out.starts_with("@media (min-width:600px){"));
    }

    #[test]
    fn formatted_css_keeps_its_indentation() {
        let css = ".a {\n  transition: all 1s;\n}\n";
        let out = autoprefix(css);
        assert!(out.contains("\n  -webkit-transition: all 1s;"));
        assert!(out.contains("\n  transition: all 1s;"));
    }

    fn used(tokens: &[&str]) -> HashSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn unused_class_rules_are_dropped() {
        let css = ".used{color:red}.unused{color:blue}";
        assert_eq!(strip(css, &used(&["used"])), ".used{color:red}");
    }

    #[test]
    fn element_selectors_are_always_kept() {
        let css = "body{margin:0}.unused{color:blue}";
        assert_eq!(strip(css, &used(&[])), "body{margin:0}");
    }

    #[test]
    fn a_selector_list_is_filtered_per_selector() {
        let css = ".used,.unused{color:red}";
        assert_eq!(strip(css, &used(&["used"])), ".used{color:red}");
    }

    #[test]
    fn media_blocks_are_filtered_recursively_and_imports_kept() {
        let css = "@import url(x.css);@media screen{.unused{a:b}.used{c:d}}@font-face{src:url(f.woff)}";
        let out = strip(css, &used(&["used"]));
        assert_eq!(
            out,
            "@import url(x.css);@media screen{.used{c:d}}@font-face{src:url(f.woff)}"
        );
    }

    #[test]
    fn markup_attributes_feed_the_used_set() {
        let mut tokens = HashSet::new();
        scan_attributes(
            r#"<div class="btn btn-large" id='hero'><span class='x'></span></div>"#,
            &mut tokens,
        );
        assert!(tokens.contains("btn"));
        assert!(tokens.contains("btn-large"));
        assert!(tokens.contains("hero"));
        assert!(tokens.contains("x"));
    }

    #[test]
    fn strip_reads_markup_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("index.html"), r#"<p class="keep"></p>"#).unwrap();

        let artifact = Artifact::new(
            "main.css".into(),
            "style.min.css".into(),
            b".keep{a:b}.drop{c:d}".to_vec(),
        );
        let out = StripUnusedCss::new(vec![root.join("*.html")])
            .apply(artifact)
            .unwrap();

        assert_eq!(out.utf8().unwrap(), ".keep{a:b}");
    }
}
