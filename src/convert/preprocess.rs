//! Rewrites planning-document markup into plain markdown.
//!
//! Passes run in a fixed order: front matter, alert section tags, other custom
//! section tags, `<details>` blocks, and finally any leftover HTML element the
//! parser cannot render. Each pass leaves non-matching text untouched, and no
//! pass rewrites anything inside a fenced code block.

use std::{ops::Range, sync::LazyLock};

use itertools::Itertools as _;
use regex::{Captures, Regex};

use crate::hierarchy::title_case;

/// Section tags rendered as alert callouts: tag, alert kind, label.
const ALERT_TAGS: &[(&str, &str, &str)] = &[
    ("domain", "NOTE", "Domain"),
    ("decisions", "IMPORTANT", "Decisions"),
    ("specifics", "TIP", "Specifics"),
    ("deferred", "CAUTION", "Deferred"),
];

/// HTML elements that are never treated as custom section tags.
const HTML_TAGS: &[&str] = &[
    "br", "img", "a", "em", "strong", "code", "pre", "b", "i", "u", "s", "del", "ins", "sup",
    "sub", "hr", "span", "div", "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "dl",
    "dt", "dd", "table", "thead", "tbody", "tr", "th", "td", "blockquote", "details", "summary",
];

static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)").unwrap()
});

static ALERT_PATTERNS: LazyLock<Vec<(Regex, &'static str, &'static str)>> = LazyLock::new(|| {
    ALERT_TAGS
        .iter()
        .map(|(tag, kind, label)| {
            let pattern = format!(r"(?s)<{tag}>(.*?)</{tag}>");
            (Regex::new(&pattern).unwrap(), *kind, *label)
        })
        .collect()
});

static SECTION_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)(\s[^<>]*)?>").unwrap());

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([A-Za-z_][A-Za-z0-9_-]*)(?:\s[^<>]*)?>").unwrap());

static HTML_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z][A-Za-z0-9-]*)(\s[^<>]*)?>").unwrap());

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_][\w-]*)="([^"]*)""#).unwrap());

static DETAILS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<details>\s*<summary>(.*?)</summary>(.*?)</details>").unwrap()
});

pub fn preprocess(markdown: &str) -> String {
    let text = convert_front_matter(markdown);
    let text = convert_alert_tags(&text);
    let text = convert_section_tags(&text);
    let text = convert_details(&text);
    wrap_unsupported_html(&text)
}

/// Prefix every line with `> `, leaving blank lines as a bare `>`.
fn quote_lines(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_owned()
            } else {
                format!("> {line}")
            }
        })
        .join("\n")
}

/// Byte ranges of fenced code blocks, including fences nested in quotes.
fn code_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, char, usize)> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let stripped = line.trim_start_matches([' ', '\t', '>']);
        let fence_char = match stripped.chars().next() {
            Some(c @ ('`' | '~')) => c,
            _ => continue,
        };
        let fence_len = stripped.chars().take_while(|c| *c == fence_char).count();
        if fence_len < 3 {
            continue;
        }
        match open {
            None => open = Some((start, fence_char, fence_len)),
            Some((begin, c, len)) if c == fence_char && fence_len >= len => {
                if stripped[fence_len..].trim().is_empty() {
                    ranges.push(begin..offset);
                    open = None;
                }
            }
            Some(_) => {}
        }
    }
    if let Some((begin, _, _)) = open {
        ranges.push(begin..text.len());
    }
    ranges
}

fn in_code(ranges: &[Range<usize>], position: usize) -> bool {
    ranges.iter().any(|range| range.contains(&position))
}

/// `Regex::replace_all` that leaves matches starting inside code untouched.
fn replace_outside_code(text: &str, pattern: &Regex, render: impl Fn(&Captures) -> String) -> String {
    let code = code_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if in_code(&code, whole.start()) {
            continue;
        }
        output.push_str(&text[last..whole.start()]);
        output.push_str(&render(&captures));
        last = whole.end();
    }
    output.push_str(&text[last..]);
    output
}

fn convert_front_matter(text: &str) -> String {
    let Some(captures) = FRONT_MATTER.captures(text) else {
        return text.to_owned();
    };
    let Some(whole) = captures.get(0) else {
        return text.to_owned();
    };
    let rest = &text[whole.end()..];
    let yaml = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if yaml.trim().is_empty() {
        return rest.to_owned();
    }
    let body = yaml
        .lines()
        .map(|line| format!("> {line}").trim_end().to_owned())
        .join("\n");
    format!("> **Front Matter**\n>\n> ```yaml\n{body}\n> ```\n\n{rest}")
}

fn convert_alert_tags(text: &str) -> String {
    ALERT_PATTERNS
        .iter()
        .fold(text.to_owned(), |text, (pattern, kind, label)| {
            replace_outside_code(&text, pattern, |captures| {
                let content = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let content = content.trim_matches(['\n', '\r']).trim_end();
                if content.trim().is_empty() {
                    format!("> [!{kind}]\n> **{label}**\n")
                } else {
                    format!("> [!{kind}]\n> **{label}**\n>\n{}\n", quote_lines(content))
                }
            })
        })
}

fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HTML_TAGS.contains(&lower.as_str()) || ALERT_TAGS.iter().any(|(tag, _, _)| *tag == lower)
}

/// Locate the `</name>` matching an already-consumed opening tag, honoring
/// nested tags with the same name. Returns the close tag's byte range.
fn find_close(text: &str, name: &str, from: usize, code: &[Range<usize>]) -> Option<Range<usize>> {
    let mut depth = 1usize;
    for captures in ANY_TAG.captures_iter(&text[from..]) {
        if &captures[2] != name {
            continue;
        }
        let whole = captures.get(0)?;
        let range = (from + whole.start())..(from + whole.end());
        if in_code(code, range.start) {
            continue;
        }
        if captures.get(1).is_some_and(|m| !m.is_empty()) {
            depth -= 1;
            if depth == 0 {
                return Some(range);
            }
        } else {
            depth += 1;
        }
    }
    None
}

fn convert_section_tags(text: &str) -> String {
    convert_section_tags_at(text, 0)
}

fn convert_section_tags_at(text: &str, depth: usize) -> String {
    let code = code_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    let mut search = 0;
    while let Some(captures) = SECTION_OPEN.captures_at(text, search) {
        let Some(open) = captures.get(0) else {
            break;
        };
        let name = &captures[1];
        if in_code(&code, open.start()) || is_reserved(name) {
            search = open.end();
            continue;
        }
        let Some(close) = find_close(text, name, open.end(), &code) else {
            search = open.end();
            continue;
        };
        let attrs = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let inner = &text[open.end()..close.start];
        output.push_str(&text[last..open.start()]);
        output.push_str(&render_section(name, attrs, inner, depth));
        last = close.end;
        search = close.end;
    }
    output.push_str(&text[last..]);
    output
}

fn render_section(name: &str, attrs: &str, inner: &str, depth: usize) -> String {
    let title = title_case(name);
    let values = ATTRIBUTE
        .captures_iter(attrs)
        .map(|captures| captures[2].to_owned())
        .join(", ");
    let label = match (depth, values.is_empty()) {
        (0, true) => format!("### {title}"),
        (0, false) => format!("### {title} ({values})"),
        (_, true) => format!("**{title}**"),
        (_, false) => format!("**{title}** *({values})*"),
    };
    let body = convert_section_tags_at(inner.trim(), depth + 1);
    format!("\n{label}\n\n{body}\n")
}

fn convert_details(text: &str) -> String {
    replace_outside_code(text, &DETAILS, |captures| {
        let summary = captures[1].trim();
        let content = captures[2].trim();
        if content.is_empty() {
            format!("> **{summary}**\n")
        } else {
            format!("> **{summary}**\n>\n{}\n", quote_lines(content))
        }
    })
}

fn is_supported_html(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HTML_TAGS
        .iter()
        .filter(|tag| !matches!(**tag, "details" | "summary"))
        .any(|tag| *tag == lower)
}

fn wrap_unsupported_html(text: &str) -> String {
    let code = code_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    let mut search = 0;
    while let Some(captures) = HTML_OPEN.captures_at(text, search) {
        let Some(open) = captures.get(0) else {
            break;
        };
        let name = &captures[1];
        if in_code(&code, open.start()) || is_supported_html(name) {
            search = open.end();
            continue;
        }
        let Some(close) = find_close(text, name, open.end(), &code) else {
            search = open.end();
            continue;
        };
        output.push_str(&text[last..open.start()]);
        output.push_str("\n```html\n");
        output.push_str(&text[open.start()..close.end]);
        output.push_str("\n```\n");
        last = close.end;
        search = close.end;
    }
    output.push_str(&text[last..]);
    output
}
