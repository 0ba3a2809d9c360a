//! Conservative script minification: comments go, indentation and blank
//! lines go, everything else stays. Line breaks are preserved so automatic
//! semicolon insertion keeps its meaning, and identifiers are never touched.

use crate::error::TransformError;
use crate::pipeline::{Artifact, Transform};

pub struct MinifyJs;

impl Transform for MinifyJs {
    fn name(&self) -> &'static str {
        "minify-js"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let out = minify(artifact.utf8()?);
        Ok(artifact.with_text(out))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Code,
    Str(char),
    Template,
    LineComment,
    BlockComment,
    Regex,
    RegexClass,
}

/// Words after which a `/` opens a regex literal rather than division.
const REGEX_KEYWORDS: [&str; 10] = [
    "return", "typeof", "instanceof", "in", "of", "new", "void", "delete", "case", "do",
];

fn minify(src: &str) -> String {
    let stripped = strip_comments(src);

    let mut out = String::with_capacity(stripped.len());
    for line in stripped.lines() {
        let line = line.trim();
        if !line.is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut prev = '\0';
    let mut word = String::new();
    let mut last_significant = '\0';
    let mut chars = src.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::Code => {
                if ch == '/' {
                    match chars.peek() {
                        Some('/') => {
                            chars.next();
                            state = State::LineComment;
                            prev = '\0';
                            continue;
                        }
                        Some('*') => {
                            chars.next();
                            state = State::BlockComment;
                            prev = '\0';
                            continue;
                        }
                        _ => {
                            if regex_position(last_significant, &word) {
                                state = State::Regex;
                            }
                            out.push(ch);
                        }
                    }
                } else {
                    match ch {
                        '"' | '\'' => state = State::Str(ch),
                        '`' => state = State::Template,
                        _ => {}
                    }
                    out.push(ch);
                }

                if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                    word.push(ch);
                } else if !ch.is_whitespace() || state != State::Code {
                    // whitespace keeps the word alive, so `return /re/`
                    // still sees the keyword; anything else resets it
                    word.clear();
                }
                if !ch.is_whitespace() {
                    last_significant = ch;
                }
            }
            State::Str(quote) => {
                out.push(ch);
                if ch == quote && prev != '\\' {
                    state = State::Code;
                    last_significant = ch;
                }
            }
            State::Template => {
                out.push(ch);
                if ch == '`' && prev != '\\' {
                    state = State::Code;
                    last_significant = ch;
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if ch == '/' && prev == '*' {
                    state = State::Code;
                } else if ch == '\n' {
                    // keep the line structure around multi-line comments
                    out.push('\n');
                }
            }
            State::Regex => {
                out.push(ch);
                if ch == '[' && prev != '\\' {
                    state = State::RegexClass;
                } else if ch == '/' && prev != '\\' {
                    state = State::Code;
                    last_significant = ch;
                }
            }
            State::RegexClass => {
                out.push(ch);
                if ch == ']' && prev != '\\' {
                    state = State::Regex;
                }
            }
        }

        // a doubled backslash must not mask the next delimiter
        prev = if ch == '\\' && prev == '\\' { '\0' } else { ch };
    }

    out
}

fn regex_position(last_significant: char, word: &str) -> bool {
    if REGEX_KEYWORDS.contains(&word) {
        return true;
    }

    !(last_significant.is_alphanumeric()
        || matches!(last_significant, '_' | '$' | ')' | ']' | '"' | '\'' | '`'))
}
