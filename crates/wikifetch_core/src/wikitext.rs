//! Best-effort projection of wikitext onto plain text.
//!
//! The projection is a fixed sequence of independent rewrite rules. None of
//! them parse; they scan for the markup they own and leave anything they do
//! not recognize in place, so malformed input degrades to stray punctuation
//! instead of failing.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::titles::{is_category_title, is_file_title};

/// One named step of the wikitext projection.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRule {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

/// Rules in the order they are applied.
pub const RULES: &[RewriteRule] = &[
    RewriteRule {
        name: "strip-comments",
        apply: strip_comments,
    },
    RewriteRule {
        name: "strip-references",
        apply: strip_references,
    },
    RewriteRule {
        name: "strip-templates",
        apply: strip_templates,
    },
    RewriteRule {
        name: "strip-tables",
        apply: strip_tables,
    },
    RewriteRule {
        name: "strip-file-and-category-links",
        apply: strip_file_and_category_links,
    },
    RewriteRule {
        name: "resolve-internal-links",
        apply: resolve_internal_links,
    },
    RewriteRule {
        name: "resolve-external-links",
        apply: resolve_external_links,
    },
    RewriteRule {
        name: "strip-tags",
        apply: strip_tags,
    },
    RewriteRule {
        name: "strip-emphasis",
        apply: strip_emphasis,
    },
    RewriteRule {
        name: "strip-headings",
        apply: strip_headings,
    },
    RewriteRule {
        name: "collapse-whitespace",
        apply: collapse_whitespace,
    },
];

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("comment pattern"));
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<ref\b[^>]*?/\s*>|<ref\b[^>]*>.*?</ref\s*>").expect("ref pattern")
});
static EXTERNAL_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:https?:)?//[^\s\]]+(?:[ \t]+([^\]]*))?\]").expect("external link pattern")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>").expect("tag pattern"));
static EMPHASIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'{2,}").expect("emphasis pattern"));
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*=+[ \t]*(.*?)[ \t]*=+[ \t]*$").expect("heading pattern"));
static HORIZONTAL_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("space pattern"));

/// Run every rule in order and trim the result.
pub fn wikitext_to_plain(markup: &str) -> String {
    RULES
        .iter()
        .fold(markup.to_string(), |text, rule| (rule.apply)(&text))
        .trim()
        .to_string()
}

pub fn rule(name: &str) -> Option<&'static RewriteRule> {
    RULES.iter().find(|rule| rule.name == name)
}

pub fn strip_comments(text: &str) -> String {
    COMMENT_RE.replace_all(text, "").into_owned()
}

pub fn strip_references(text: &str) -> String {
    REFERENCE_RE.replace_all(text, "").into_owned()
}

/// Drop `{{...}}` invocations, nested ones included. An unterminated
/// invocation loses only its opening braces; the text after them is kept
/// with any closed invocations inside it still removed.
pub fn strip_templates(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut outer_open = 0usize;
    let mut index = 0usize;
    loop {
        while index < chars.len() {
            let pair = (chars[index], chars.get(index + 1).copied());
            match pair {
                ('{', Some('{')) => {
                    if depth == 0 {
                        outer_open = index;
                    }
                    depth += 1;
                    index += 2;
                }
                ('}', Some('}')) if depth > 0 => {
                    depth -= 1;
                    index += 2;
                }
                _ => {
                    if depth == 0 {
                        output.push(chars[index]);
                    }
                    index += 1;
                }
            }
        }
        if depth == 0 {
            return output;
        }
        // Rescan from just past the unmatched opener.
        depth = 0;
        index = outer_open + 2;
    }
}

/// Drop `{| ... |}` tables line by line, tracking nesting.
pub fn strip_tables(text: &str) -> String {
    let mut depth = 0usize;
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("{|") {
            depth += 1;
            continue;
        }
        if depth > 0 {
            if trimmed.starts_with("|}") {
                depth -= 1;
            }
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Drop `[[File:...]]` and `[[Category:...]]` links, including captions that
/// themselves contain links.
pub fn strip_file_and_category_links(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut index = 0usize;
    while index < chars.len() {
        if chars[index] == '[' && chars.get(index + 1) == Some(&'[') {
            let head = chars[index + 2..].iter().take(32).collect::<String>();
            let head = head.trim_start_matches(':');
            if (is_file_title(head) || is_category_title(head))
                && let Some(end) = matching_link_end(&chars, index)
            {
                index = end;
                continue;
            }
        }
        output.push(chars[index]);
        index += 1;
    }
    output
}

/// `[[target|label]]` becomes `label`, `[[target]]` becomes `target`.
pub fn resolve_internal_links(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut index = 0usize;
    while index < chars.len() {
        if index + 1 < chars.len() && chars[index] == '[' && chars[index + 1] == '[' {
            let mut cursor = index + 2;
            let mut found = None::<usize>;
            while cursor + 1 < chars.len() {
                if chars[cursor] == '[' && chars[cursor + 1] == '[' {
                    break;
                }
                if chars[cursor] == ']' && chars[cursor + 1] == ']' {
                    found = Some(cursor);
                    break;
                }
                cursor += 1;
            }
            if let Some(end) = found {
                let inner = chars[index + 2..end].iter().collect::<String>();
                let mut parts = inner.rsplitn(2, '|');
                let last = parts.next().unwrap_or("").trim();
                let target = parts.next().map(str::trim);
                let rendered = match target {
                    Some(target) if last.is_empty() => target,
                    _ => last,
                };
                output.push_str(rendered.trim_start_matches(':'));
                index = end + 2;
                continue;
            }
        }
        output.push(chars[index]);
        index += 1;
    }
    output
}

/// `[https://example.org label]` becomes `label`; a bare bracketed URL vanishes.
pub fn resolve_external_links(text: &str) -> String {
    EXTERNAL_LINK_RE
        .replace_all(text, |captures: &Captures| {
            captures
                .get(1)
                .map(|label| label.as_str().trim().to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

pub fn strip_emphasis(text: &str) -> String {
    EMPHASIS_RE.replace_all(text, "").into_owned()
}

/// `== Heading ==` becomes `Heading`.
pub fn strip_headings(text: &str) -> String {
    HEADING_RE.replace_all(text, "$1").into_owned()
}

/// Squeeze runs of spaces, trim every line, and keep at most one blank line
/// between paragraphs.
pub fn collapse_whitespace(text: &str) -> String {
    let mut lines = Vec::new();
    let mut previous_blank = true;
    for line in text.lines() {
        let squeezed = HORIZONTAL_SPACE_RE.replace_all(line, " ");
        let trimmed = squeezed.trim();
        if trimmed.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }
        lines.push(trimmed.to_string());
        previous_blank = false;
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

/// Index just past the `]]` closing the link opened at `start`, honoring
/// nested `[[...]]` pairs.
fn matching_link_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < chars.len() {
        if chars[index] == '[' && chars[index + 1] == '[' {
            depth += 1;
            index += 2;
            continue;
        }
        if chars[index] == ']' && chars[index + 1] == ']' {
            depth -= 1;
            index += 2;
            if depth == 0 {
                return Some(index);
            }
            continue;
        }
        index += 1;
    }
    None
}
