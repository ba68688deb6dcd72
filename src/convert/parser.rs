//! pulldown-cmark event stream to store blocks.
//!
//! Parsing happens in two steps. Events are first folded into a small element
//! tree, then the tree is lowered into [`Block`]s. Nothing is truncated here;
//! content exceeding a store limit is kept whole and reported as a warning so
//! later passes can split it.

use std::sync::LazyLock;

use pulldown_cmark::{BlockQuoteKind, CodeBlockKind, Event, Options, Tag};
use regex::Regex;

use crate::{
    block::{
        Annotations, Block, Color, HeadingLevel, ImageSource, MAX_SPAN_CHARS, MAX_SPANS_PER_BLOCK,
        RichSpan, TableRow,
    },
    convert::segment::text_len,
    warn_entry,
    warning::WarningKind,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of document inside {0}")]
    UnexpectedEof(&'static str),
}

const LANGUAGES: &[&str] = &[
    "abap", "arduino", "bash", "basic", "c", "clojure", "coffeescript", "c++", "c#", "css",
    "dart", "diff", "docker", "elixir", "elm", "erlang", "flow", "fortran", "f#", "gherkin",
    "glsl", "go", "graphql", "groovy", "haskell", "html", "java", "javascript", "json", "julia",
    "kotlin", "latex", "less", "lisp", "livescript", "lua", "makefile", "markdown", "markup",
    "matlab", "mermaid", "nix", "objective-c", "ocaml", "pascal", "perl", "php", "plain text",
    "powershell", "prolog", "protobuf", "python", "r", "reason", "ruby", "rust", "sass", "scala",
    "scheme", "scss", "shell", "sql", "swift", "typescript", "vb.net", "verilog", "vhdl",
    "visual basic", "webassembly", "xml", "yaml",
];

static BREAK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^<br\s*/?>$").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]+>").unwrap());

/// Map a fence info string onto the store's language names.
pub fn code_language(info: Option<&str>) -> String {
    let Some(lang) = info.and_then(|info| info.split_whitespace().next()) else {
        return "plain text".into();
    };
    let lang = lang.to_ascii_lowercase();
    let lang = match lang.as_str() {
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rb" => "ruby",
        "rs" => "rust",
        "sh" | "zsh" | "console" => "shell",
        "yml" => "yaml",
        "md" => "markdown",
        "cpp" | "cc" | "hpp" => "c++",
        "cs" | "csharp" => "c#",
        "fs" | "fsharp" => "f#",
        "golang" => "go",
        "dockerfile" => "docker",
        "objc" => "objective-c",
        "jsonc" | "json5" => "json",
        "tex" => "latex",
        "proto" => "protobuf",
        "ps1" | "pwsh" => "powershell",
        "make" => "makefile",
        "text" | "txt" | "plaintext" => "plain text",
        other => other,
    };
    if LANGUAGES.contains(&lang) {
        lang.to_owned()
    } else {
        "plain text".into()
    }
}

#[derive(Debug)]
enum Kind {
    Paragraph,
    Heading(usize),
    BlockQuote(Option<BlockQuoteKind>),
    CodeBlock(Option<String>),
    List(Option<u64>),
    Item,
    Table,
    TableHead,
    TableRow,
    TableCell,
    Emphasis,
    Strong,
    Strikethrough,
    Link(String),
    Image(String),
    HtmlBlock,
    Other,
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Kind::Paragraph => "paragraph",
            Kind::Heading(_) => "heading",
            Kind::BlockQuote(_) => "blockquote",
            Kind::CodeBlock(_) => "code block",
            Kind::List(_) => "list",
            Kind::Item => "list item",
            Kind::Table | Kind::TableHead | Kind::TableRow | Kind::TableCell => "table",
            Kind::Emphasis | Kind::Strong | Kind::Strikethrough => "emphasis",
            Kind::Link(_) => "link",
            Kind::Image(_) => "image",
            Kind::HtmlBlock => "html block",
            Kind::Other => "element",
        }
    }

    fn is_inline(&self) -> bool {
        matches!(
            self,
            Kind::Emphasis | Kind::Strong | Kind::Strikethrough | Kind::Link(_) | Kind::Image(_)
        )
    }
}

#[derive(Debug)]
enum Node {
    Text(String),
    Code(String),
    SoftBreak,
    HardBreak,
    Html(String),
    TaskMarker(bool),
    Rule,
    Element { kind: Kind, children: Vec<Node> },
}

impl Node {
    fn is_inline(&self) -> bool {
        match self {
            Node::Text(_)
            | Node::Code(_)
            | Node::SoftBreak
            | Node::HardBreak
            | Node::Html(_)
            | Node::TaskMarker(_) => true,
            Node::Rule => false,
            Node::Element { kind, .. } => kind.is_inline(),
        }
    }
}

struct ParserImpl<'src> {
    parser: pulldown_cmark::Parser<'src>,
}

impl<'src> ParserImpl<'src> {
    fn next_event(&mut self) -> Option<Event<'src>> {
        self.parser.next()
    }
}

fn kind_of(tag: &Tag<'_>) -> Kind {
    match tag {
        Tag::Paragraph => Kind::Paragraph,
        Tag::Heading { level, .. } => Kind::Heading(*level as usize),
        Tag::BlockQuote(kind) => Kind::BlockQuote(*kind),
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => Kind::CodeBlock(Some(info.to_string())),
        Tag::CodeBlock(CodeBlockKind::Indented) => Kind::CodeBlock(None),
        Tag::List(start) => Kind::List(*start),
        Tag::Item => Kind::Item,
        Tag::Table(_) => Kind::Table,
        Tag::TableHead => Kind::TableHead,
        Tag::TableRow => Kind::TableRow,
        Tag::TableCell => Kind::TableCell,
        Tag::Emphasis => Kind::Emphasis,
        Tag::Strong => Kind::Strong,
        Tag::Strikethrough => Kind::Strikethrough,
        Tag::Link { dest_url, .. } => Kind::Link(dest_url.to_string()),
        Tag::Image { dest_url, .. } => Kind::Image(dest_url.to_string()),
        Tag::HtmlBlock => Kind::HtmlBlock,
        _ => Kind::Other,
    }
}

fn parse_spanned<'src>(parser: &mut ParserImpl<'src>, tag: Tag<'src>) -> Result<Node, Error> {
    let end = tag.to_end();
    let kind = kind_of(&tag);
    let mut children = Vec::new();
    loop {
        match parser.next_event() {
            None => return Err(Error::UnexpectedEof(kind.name())),
            Some(Event::End(found)) if found == end => break,
            Some(event) => children.extend(parse_element(parser, event)?),
        }
    }
    Ok(Node::Element { kind, children })
}

fn parse_element<'src>(
    parser: &mut ParserImpl<'src>,
    event: Event<'src>,
) -> Result<Option<Node>, Error> {
    let node = match event {
        Event::Start(tag) => parse_spanned(parser, tag)?,
        Event::End(_) => return Ok(None),
        Event::Text(text) => Node::Text(text.into_string()),
        Event::Code(code) => Node::Code(code.into_string()),
        Event::InlineMath(math) | Event::DisplayMath(math) => Node::Text(math.into_string()),
        Event::Html(html) | Event::InlineHtml(html) => Node::Html(html.into_string()),
        Event::FootnoteReference(name) => Node::Text(format!("[^{name}]")),
        Event::SoftBreak => Node::SoftBreak,
        Event::HardBreak => Node::HardBreak,
        Event::Rule => Node::Rule,
        Event::TaskListMarker(checked) => Node::TaskMarker(checked),
    };
    Ok(Some(node))
}

/// Parse markdown into a block tree.
pub fn parse(markdown: &str) -> Result<Vec<Block>, Error> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_GFM;
    let mut parser = ParserImpl {
        parser: pulldown_cmark::Parser::new_ext(markdown, options),
    };
    let mut nodes = Vec::new();
    while let Some(event) = parser.next_event() {
        nodes.extend(parse_element(&mut parser, event)?);
    }
    let blocks = lower_blocks(nodes);
    report_limits(&blocks);
    Ok(blocks)
}

fn report_limits(blocks: &[Block]) {
    for block in blocks {
        if let Some(spans) = block.rich_text() {
            for span in spans {
                let len = text_len(&span.content);
                if len > MAX_SPAN_CHARS {
                    warn_entry!(
                        WarningKind::ParserLimit,
                        "{} text run of {len} characters exceeds {MAX_SPAN_CHARS}; it will be split",
                        block.type_name()
                    );
                }
            }
            if spans.len() > MAX_SPANS_PER_BLOCK {
                warn_entry!(
                    WarningKind::ParserLimit,
                    "{} has {} text runs, more than {MAX_SPANS_PER_BLOCK}",
                    block.type_name(),
                    spans.len()
                );
            }
        }
        report_limits(block.children());
    }
}

#[derive(Clone, Default)]
struct Style {
    annotations: Annotations,
    link: Option<String>,
}

impl Style {
    fn span(&self, content: impl Into<String>) -> RichSpan {
        RichSpan {
            content: content.into(),
            link: self.link.clone(),
            annotations: self.annotations,
        }
    }
}

enum Inline {
    Span(RichSpan),
    Image { url: String, alt: String },
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Links the store would reject (relative paths, anchors) are dropped,
/// keeping the text.
fn link_target(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https" | "mailto"))
        .map(|url| url.to_string())
}

fn plain_text(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|node| match node {
            Node::Text(text) | Node::Code(text) => text.clone(),
            Node::SoftBreak | Node::HardBreak => " ".into(),
            Node::Element { children, .. } => plain_text(children),
            _ => String::new(),
        })
        .collect()
}

fn lower_inline(nodes: Vec<Node>, style: &Style, out: &mut Vec<Inline>) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push(Inline::Span(style.span(text))),
            Node::Code(code) => {
                let mut span = style.span(code);
                span.annotations.code = true;
                out.push(Inline::Span(span));
            }
            Node::SoftBreak | Node::HardBreak => out.push(Inline::Span(style.span("\n"))),
            Node::Html(html) => {
                if BREAK_TAG.is_match(html.trim()) {
                    out.push(Inline::Span(style.span("\n")));
                }
            }
            Node::TaskMarker(_) | Node::Rule => {}
            Node::Element { kind, children } => {
                let mut inner = style.clone();
                match kind {
                    Kind::Emphasis => inner.annotations.italic = true,
                    Kind::Strong => inner.annotations.bold = true,
                    Kind::Strikethrough => inner.annotations.strikethrough = true,
                    Kind::Link(url) => {
                        if let Some(url) = link_target(&url) {
                            inner.link = Some(url);
                        }
                    }
                    Kind::Image(url) => {
                        let alt = plain_text(&children);
                        if is_remote(&url) {
                            out.push(Inline::Image { url, alt });
                        } else {
                            out.push(Inline::Span(style.span(format!("![{alt}]({url})"))));
                        }
                        continue;
                    }
                    _ => {}
                }
                lower_inline(children, &inner, out);
            }
        }
    }
}

/// Concatenate neighbouring spans that share a style.
fn merge_spans(spans: impl IntoIterator<Item = RichSpan>) -> Vec<RichSpan> {
    let mut merged: Vec<RichSpan> = Vec::new();
    for span in spans {
        if span.content.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.same_style(&span) => last.content.push_str(&span.content),
            _ => merged.push(span),
        }
    }
    merged
}

fn inline_spans(nodes: Vec<Node>) -> Vec<RichSpan> {
    let mut inlines = Vec::new();
    lower_inline(nodes, &Style::default(), &mut inlines);
    merge_spans(inlines.into_iter().map(|inline| match inline {
        Inline::Span(span) => span,
        Inline::Image { url, alt } => RichSpan {
            content: if alt.is_empty() { url.clone() } else { alt },
            link: Some(url),
            annotations: Annotations::default(),
        },
    }))
}

fn is_blank(spans: &[RichSpan]) -> bool {
    spans.iter().all(|span| span.content.trim().is_empty())
}

/// A paragraph, split around any remote images it embeds.
fn lower_paragraph(nodes: Vec<Node>, out: &mut Vec<Block>) {
    let mut inlines = Vec::new();
    lower_inline(nodes, &Style::default(), &mut inlines);
    let mut pending = Vec::new();
    for inline in inlines {
        match inline {
            Inline::Span(span) => pending.push(span),
            Inline::Image { url, .. } => {
                let spans = merge_spans(std::mem::take(&mut pending));
                if !is_blank(&spans) {
                    out.push(Block::paragraph(spans));
                }
                out.push(Block::Image(ImageSource::External { url }));
            }
        }
    }
    let spans = merge_spans(pending);
    if !is_blank(&spans) {
        out.push(Block::paragraph(spans));
    }
}

/// Use a leading paragraph as the block's own text, the rest as children.
fn split_lead(mut blocks: Vec<Block>) -> (Vec<RichSpan>, Vec<Block>) {
    if matches!(blocks.first(), Some(Block::Paragraph { .. })) {
        if let Block::Paragraph { rich_text } = blocks.remove(0) {
            return (rich_text, blocks);
        }
    }
    (Vec::new(), blocks)
}

fn alert_style(kind: BlockQuoteKind) -> (&'static str, Color) {
    match kind {
        BlockQuoteKind::Note => ("ℹ️", Color::BlueBackground),
        BlockQuoteKind::Tip => ("💡", Color::GreenBackground),
        BlockQuoteKind::Important => ("☝️", Color::PurpleBackground),
        BlockQuoteKind::Warning => ("⚠️", Color::YellowBackground),
        BlockQuoteKind::Caution => ("❗", Color::RedBackground),
    }
}

fn lower_item(mut children: Vec<Node>, numbered: bool) -> Block {
    let split = children
        .iter()
        .position(|node| !node.is_inline())
        .unwrap_or(children.len());
    let rest = children.split_off(split);
    let mut lead = children;
    let mut rest = rest.into_iter().peekable();

    // Loose items wrap their text in a paragraph.
    if lead.is_empty() {
        if let Some(Node::Element {
            kind: Kind::Paragraph,
            ..
        }) = rest.peek()
        {
            if let Some(Node::Element { children, .. }) = rest.next() {
                lead = children;
            }
        }
    }

    let checked = match lead.first() {
        Some(Node::TaskMarker(checked)) => Some(*checked),
        _ => None,
    };
    let mut rich_text = inline_spans(lead);
    if checked.is_some() {
        if let Some(first) = rich_text.first_mut() {
            first.content = first.content.trim_start().to_owned();
        }
    }
    let children = lower_blocks(rest.collect());
    match (checked, numbered) {
        (Some(checked), _) => Block::ToDo {
            rich_text,
            checked,
            children,
        },
        (None, true) => Block::NumberedListItem {
            rich_text,
            children,
        },
        (None, false) => Block::BulletedListItem {
            rich_text,
            children,
        },
    }
}

fn table_cells(row: Vec<Node>) -> Vec<Vec<RichSpan>> {
    row.into_iter()
        .filter_map(|cell| match cell {
            Node::Element {
                kind: Kind::TableCell,
                children,
            } => Some(inline_spans(children)),
            _ => None,
        })
        .collect()
}

fn lower_table(children: Vec<Node>) -> Block {
    let mut rows = Vec::new();
    let mut has_column_header = false;
    for child in children {
        match child {
            Node::Element {
                kind: Kind::TableHead,
                children,
            } => {
                has_column_header = true;
                rows.push(table_cells(children));
            }
            Node::Element {
                kind: Kind::TableRow,
                children,
            } => rows.push(table_cells(children)),
            _ => {}
        }
    }
    let width = rows.iter().map(Vec::len).max().unwrap_or(1).max(1);
    let rows = rows
        .into_iter()
        .map(|mut cells| {
            cells.resize_with(width, Vec::new);
            TableRow { cells }
        })
        .collect();
    Block::Table {
        width,
        has_column_header,
        rows,
    }
}

fn lower_blocks(nodes: Vec<Node>) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut stray = Vec::new();
    for node in nodes {
        if node.is_inline() {
            stray.push(node);
            continue;
        }
        if !stray.is_empty() {
            lower_paragraph(std::mem::take(&mut stray), &mut blocks);
        }
        let Node::Element { kind, children } = node else {
            blocks.push(Block::Divider);
            continue;
        };
        match kind {
            Kind::Paragraph => lower_paragraph(children, &mut blocks),
            Kind::Heading(level) => blocks.push(Block::Heading {
                level: HeadingLevel::from_depth(level),
                rich_text: inline_spans(children),
            }),
            Kind::BlockQuote(alert) => {
                let (rich_text, children) = split_lead(lower_blocks(children));
                blocks.push(match alert {
                    None => Block::Quote {
                        rich_text,
                        children,
                    },
                    Some(alert) => {
                        let (icon, color) = alert_style(alert);
                        Block::Callout {
                            rich_text,
                            icon: icon.into(),
                            color,
                            children,
                        }
                    }
                });
            }
            Kind::CodeBlock(info) => {
                let code = plain_text(&children);
                let code = code.strip_suffix('\n').unwrap_or(&code);
                blocks.push(Block::Code {
                    rich_text: if code.is_empty() {
                        Vec::new()
                    } else {
                        vec![RichSpan::plain(code)]
                    },
                    language: code_language(info.as_deref()),
                });
            }
            Kind::List(start) => {
                for item in children {
                    if let Node::Element { children, .. } = item {
                        blocks.push(lower_item(children, start.is_some()));
                    }
                }
            }
            Kind::Item => blocks.push(lower_item(children, false)),
            Kind::Table => blocks.push(lower_table(children)),
            Kind::HtmlBlock => {
                let html = children
                    .iter()
                    .filter_map(|node| match node {
                        Node::Html(html) | Node::Text(html) => Some(html.as_str()),
                        _ => None,
                    })
                    .collect::<String>();
                let text = HTML_TAG.replace_all(&html, "");
                let text = text.trim();
                if !text.is_empty() {
                    blocks.push(Block::paragraph(vec![RichSpan::plain(text)]));
                }
            }
            _ => blocks.extend(lower_blocks(children)),
        }
    }
    if !stray.is_empty() {
        lower_paragraph(stray, &mut blocks);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(block: &Block) -> String {
        block.plain_text()
    }

    #[test]
    fn test_paragraph_annotations() {
        let blocks = parse("Hello **bold** and *it* with `code` [link](https://x.dev).").unwrap();
        assert_eq!(blocks.len(), 1);
        let spans = blocks[0].rich_text().unwrap();
        assert_eq!(spans[0], RichSpan::plain("Hello "));
        assert_eq!(spans[1], RichSpan::bold("bold"));
        assert!(spans[3].annotations.italic);
        assert!(spans[5].annotations.code);
        assert_eq!(spans[7].link.as_deref(), Some("https://x.dev/"));
        assert_eq!(spans[7].content, "link");
    }

    #[test]
    fn test_headings_cap_at_three() {
        let blocks = parse("# One\n\n## Two\n\n#### Four\n").unwrap();
        let types: Vec<_> = blocks.iter().map(Block::type_name).collect();
        assert_eq!(types, vec!["heading_1", "heading_2", "heading_3"]);
        assert_eq!(text_of(&blocks[2]), "Four");
    }

    #[test]
    fn test_nested_lists_and_tasks() {
        let blocks = parse("- top\n  - child\n    - grandchild\n- [x] done\n1. first\n").unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].type_name(), "bulleted_list_item");
        assert_eq!(text_of(&blocks[0]), "top");
        let child = &blocks[0].children()[0];
        assert_eq!(text_of(child), "child");
        assert_eq!(text_of(&child.children()[0]), "grandchild");
        assert!(matches!(blocks[1], Block::ToDo { checked: true, .. }));
        assert_eq!(text_of(&blocks[1]), "done");
        assert_eq!(blocks[2].type_name(), "numbered_list_item");
    }

    #[test]
    fn test_loose_list_items() {
        let blocks = parse("- first\n\n  more text\n\n- second\n").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(text_of(&blocks[0]), "first");
        assert_eq!(text_of(&blocks[0].children()[0]), "more text");
    }

    #[test]
    fn test_quote_lead_and_children() {
        let blocks = parse("> **Summary**\n>\n> Details here.\n").unwrap();
        let Block::Quote {
            rich_text,
            children,
        } = &blocks[0]
        else {
            panic!("expected quote, got {:?}", blocks[0]);
        };
        assert_eq!(rich_text, &vec![RichSpan::bold("Summary")]);
        assert_eq!(text_of(&children[0]), "Details here.");
    }

    #[test]
    fn test_alert_becomes_callout() {
        let blocks = parse("> [!NOTE]\n> **Domain**\n>\n> Body\n").unwrap();
        let Block::Callout {
            rich_text,
            color,
            children,
            ..
        } = &blocks[0]
        else {
            panic!("expected callout, got {:?}", blocks[0]);
        };
        assert_eq!(rich_text, &vec![RichSpan::bold("Domain")]);
        assert_eq!(*color, Color::BlueBackground);
        assert_eq!(text_of(&children[0]), "Body");
    }

    #[test]
    fn test_code_block_language() {
        let blocks = parse("```ts\nlet a = 1;\n```\n\n```weird\nx\n```\n").unwrap();
        assert_eq!(
            blocks[0],
            Block::Code {
                rich_text: vec![RichSpan::plain("let a = 1;")],
                language: "typescript".into()
            }
        );
        assert!(matches!(&blocks[1], Block::Code { language, .. } if language == "plain text"));
    }

    #[test]
    fn test_table_rows_padded() {
        let blocks = parse("| a | b |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |\n").unwrap();
        let Block::Table {
            width,
            has_column_header,
            rows,
        } = &blocks[0]
        else {
            panic!("expected table");
        };
        assert_eq!(*width, 2);
        assert!(has_column_header);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].cells[1], vec![RichSpan::plain("4")]);
    }

    #[test]
    fn test_images() {
        let blocks = parse("Look ![chart](https://x.dev/c.png) here\n\n![local](img/a.png)\n").unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(text_of(&blocks[0]), "Look ");
        assert_eq!(
            blocks[1],
            Block::Image(ImageSource::External {
                url: "https://x.dev/c.png".into()
            })
        );
        assert_eq!(text_of(&blocks[2]), " here");
        assert_eq!(text_of(&blocks[3]), "![local](img/a.png)");
    }

    #[test]
    fn test_relative_links_keep_text() {
        let blocks = parse("See [the plan](./PLAN.md).").unwrap();
        let spans = blocks[0].rich_text().unwrap();
        assert!(spans.iter().all(|span| span.link.is_none()));
        assert_eq!(text_of(&blocks[0]), "See the plan.");
    }

    #[test]
    fn test_rule_and_html() {
        let blocks = parse("before\n\n---\n\n<div>kept text</div>\n").unwrap();
        assert_eq!(blocks[1], Block::Divider);
        assert_eq!(text_of(&blocks[2]), "kept text");
    }

    #[test]
    fn test_oversized_text_is_kept_and_reported() {
        let long = "word ".repeat(600);
        let (blocks, warnings) = crate::warning::collect_warnings_sync(|| parse(&long).unwrap());
        assert_eq!(text_of(&blocks[0]), long.trim());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::ParserLimit);
    }
}
