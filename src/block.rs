//! Block model of the remote store.
//!
//! [`Block`] is a closed sum type over the block kinds this crate writes. Only
//! list items, to-dos, quotes, toggles and callouts carry children; every other
//! variant is a leaf. Encoding follows the store's wire format, where a block
//! is `{"object": "block", "type": <tag>, <tag>: <payload>}`.

use serde::{Serialize, Serializer, ser::SerializeMap};

/// Maximum characters in one rich text span.
pub const MAX_SPAN_CHARS: usize = 2000;
/// Maximum spans in one block's rich text.
pub const MAX_SPANS_PER_BLOCK: usize = 100;
/// Maximum blocks in one write call.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    #[default]
    Default,
    Gray,
    Brown,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Red,
    GrayBackground,
    BrownBackground,
    OrangeBackground,
    YellowBackground,
    GreenBackground,
    BlueBackground,
    PurpleBackground,
    PinkBackground,
    RedBackground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
    pub color: Color,
}

/// A styled run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichSpan {
    pub content: String,
    pub link: Option<String>,
    pub annotations: Annotations,
}

impl RichSpan {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            link: None,
            annotations: Annotations::default(),
        }
    }

    pub fn bold(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            link: None,
            annotations: Annotations {
                bold: true,
                ..Default::default()
            },
        }
    }

    /// Same style and link, different text.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            link: self.link.clone(),
            annotations: self.annotations,
        }
    }

    pub fn same_style(&self, other: &RichSpan) -> bool {
        self.link == other.link && self.annotations == other.annotations
    }
}

impl Serialize for RichSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Link<'a> {
            url: &'a str,
        }
        #[derive(Serialize)]
        struct Text<'a> {
            content: &'a str,
            link: Option<Link<'a>>,
        }
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", "text")?;
        map.serialize_entry(
            "text",
            &Text {
                content: &self.content,
                link: self.link.as_deref().map(|url| Link { url }),
            },
        )?;
        map.serialize_entry("annotations", &self.annotations)?;
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingLevel {
    One,
    Two,
    Three,
}

impl HeadingLevel {
    /// Levels deeper than three collapse into three.
    pub fn from_depth(depth: usize) -> Self {
        match depth {
            0 | 1 => Self::One,
            2 => Self::Two,
            _ => Self::Three,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    FileUpload { id: String },
    External { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub cells: Vec<Vec<RichSpan>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph {
        rich_text: Vec<RichSpan>,
    },
    Heading {
        level: HeadingLevel,
        rich_text: Vec<RichSpan>,
    },
    BulletedListItem {
        rich_text: Vec<RichSpan>,
        children: Vec<Block>,
    },
    NumberedListItem {
        rich_text: Vec<RichSpan>,
        children: Vec<Block>,
    },
    ToDo {
        rich_text: Vec<RichSpan>,
        checked: bool,
        children: Vec<Block>,
    },
    Quote {
        rich_text: Vec<RichSpan>,
        children: Vec<Block>,
    },
    Toggle {
        rich_text: Vec<RichSpan>,
        children: Vec<Block>,
    },
    Callout {
        rich_text: Vec<RichSpan>,
        icon: String,
        color: Color,
        children: Vec<Block>,
    },
    Code {
        rich_text: Vec<RichSpan>,
        language: String,
    },
    Table {
        width: usize,
        has_column_header: bool,
        rows: Vec<TableRow>,
    },
    Image(ImageSource),
    Divider,
}

impl Block {
    pub fn paragraph(rich_text: Vec<RichSpan>) -> Self {
        Self::Paragraph { rich_text }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Block::Paragraph { .. } => "paragraph",
            Block::Heading {
                level: HeadingLevel::One,
                ..
            } => "heading_1",
            Block::Heading {
                level: HeadingLevel::Two,
                ..
            } => "heading_2",
            Block::Heading {
                level: HeadingLevel::Three,
                ..
            } => "heading_3",
            Block::BulletedListItem { .. } => "bulleted_list_item",
            Block::NumberedListItem { .. } => "numbered_list_item",
            Block::ToDo { .. } => "to_do",
            Block::Quote { .. } => "quote",
            Block::Toggle { .. } => "toggle",
            Block::Callout { .. } => "callout",
            Block::Code { .. } => "code",
            Block::Table { .. } => "table",
            Block::Image(_) => "image",
            Block::Divider => "divider",
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, Block::Heading { .. })
    }

    pub fn rich_text(&self) -> Option<&[RichSpan]> {
        match self {
            Block::Paragraph { rich_text }
            | Block::Heading { rich_text, .. }
            | Block::BulletedListItem { rich_text, .. }
            | Block::NumberedListItem { rich_text, .. }
            | Block::ToDo { rich_text, .. }
            | Block::Quote { rich_text, .. }
            | Block::Toggle { rich_text, .. }
            | Block::Callout { rich_text, .. }
            | Block::Code { rich_text, .. } => Some(rich_text),
            Block::Table { .. } | Block::Image(_) | Block::Divider => None,
        }
    }

    pub fn rich_text_mut(&mut self) -> Option<&mut Vec<RichSpan>> {
        match self {
            Block::Paragraph { rich_text }
            | Block::Heading { rich_text, .. }
            | Block::BulletedListItem { rich_text, .. }
            | Block::NumberedListItem { rich_text, .. }
            | Block::ToDo { rich_text, .. }
            | Block::Quote { rich_text, .. }
            | Block::Toggle { rich_text, .. }
            | Block::Callout { rich_text, .. }
            | Block::Code { rich_text, .. } => Some(rich_text),
            Block::Table { .. } | Block::Image(_) | Block::Divider => None,
        }
    }

    pub fn children(&self) -> &[Block] {
        match self {
            Block::BulletedListItem { children, .. }
            | Block::NumberedListItem { children, .. }
            | Block::ToDo { children, .. }
            | Block::Quote { children, .. }
            | Block::Toggle { children, .. }
            | Block::Callout { children, .. } => children,
            _ => &[],
        }
    }

    /// `None` for leaf kinds.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Block>> {
        match self {
            Block::BulletedListItem { children, .. }
            | Block::NumberedListItem { children, .. }
            | Block::ToDo { children, .. }
            | Block::Quote { children, .. }
            | Block::Toggle { children, .. }
            | Block::Callout { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn take_children(&mut self) -> Vec<Block> {
        self.children_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Concatenated span content.
    pub fn plain_text(&self) -> String {
        self.rich_text()
            .map(|spans| spans.iter().map(|span| span.content.as_str()).collect())
            .unwrap_or_default()
    }
}

fn is_empty<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[derive(Serialize)]
struct TextPayload<'a> {
    rich_text: &'a [RichSpan],
    #[serde(skip_serializing_if = "is_empty")]
    children: &'a [Block],
}

#[derive(Serialize)]
struct ToDoPayload<'a> {
    rich_text: &'a [RichSpan],
    checked: bool,
    #[serde(skip_serializing_if = "is_empty")]
    children: &'a [Block],
}

#[derive(Serialize)]
struct Emoji<'a> {
    r#type: &'static str,
    emoji: &'a str,
}

#[derive(Serialize)]
struct CalloutPayload<'a> {
    rich_text: &'a [RichSpan],
    icon: Emoji<'a>,
    color: Color,
    #[serde(skip_serializing_if = "is_empty")]
    children: &'a [Block],
}

#[derive(Serialize)]
struct CodePayload<'a> {
    rich_text: &'a [RichSpan],
    language: &'a str,
}

#[derive(Serialize)]
struct TablePayload<'a> {
    table_width: usize,
    has_column_header: bool,
    has_row_header: bool,
    children: &'a [TableRow],
}

#[derive(Serialize)]
struct Empty {}

impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Cells<'a> {
            cells: &'a [Vec<RichSpan>],
        }
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("object", "block")?;
        map.serialize_entry("type", "table_row")?;
        map.serialize_entry("table_row", &Cells { cells: &self.cells })?;
        map.end()
    }
}

impl Serialize for ImageSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Id<'a> {
            id: &'a str,
        }
        #[derive(Serialize)]
        struct Url<'a> {
            url: &'a str,
        }
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            ImageSource::FileUpload { id } => {
                map.serialize_entry("type", "file_upload")?;
                map.serialize_entry("file_upload", &Id { id })?;
            }
            ImageSource::External { url } => {
                map.serialize_entry("type", "external")?;
                map.serialize_entry("external", &Url { url })?;
            }
        }
        map.end()
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tag = self.type_name();
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("object", "block")?;
        map.serialize_entry("type", tag)?;
        match self {
            Block::Paragraph { rich_text } | Block::Heading { rich_text, .. } => {
                map.serialize_entry(
                    tag,
                    &TextPayload {
                        rich_text,
                        children: &[],
                    },
                )?;
            }
            Block::BulletedListItem {
                rich_text,
                children,
            }
            | Block::NumberedListItem {
                rich_text,
                children,
            }
            | Block::Quote {
                rich_text,
                children,
            }
            | Block::Toggle {
                rich_text,
                children,
            } => {
                map.serialize_entry(
                    tag,
                    &TextPayload {
                        rich_text,
                        children,
                    },
                )?;
            }
            Block::ToDo {
                rich_text,
                checked,
                children,
            } => {
                map.serialize_entry(
                    tag,
                    &ToDoPayload {
                        rich_text,
                        checked: *checked,
                        children,
                    },
                )?;
            }
            Block::Callout {
                rich_text,
                icon,
                color,
                children,
            } => {
                map.serialize_entry(
                    tag,
                    &CalloutPayload {
                        rich_text,
                        icon: Emoji {
                            r#type: "emoji",
                            emoji: icon,
                        },
                        color: *color,
                        children,
                    },
                )?;
            }
            Block::Code {
                rich_text,
                language,
            } => {
                map.serialize_entry(
                    tag,
                    &CodePayload {
                        rich_text,
                        language,
                    },
                )?;
            }
            Block::Table {
                width,
                has_column_header,
                rows,
            } => {
                map.serialize_entry(
                    tag,
                    &TablePayload {
                        table_width: *width,
                        has_column_header: *has_column_header,
                        has_row_header: false,
                        children: rows,
                    },
                )?;
            }
            Block::Image(source) => map.serialize_entry(tag, source)?,
            Block::Divider => map.serialize_entry(tag, &Empty {})?,
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_paragraph_encoding() {
        let block = Block::paragraph(vec![RichSpan::bold("hello")]);
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({
                "object": "block",
                "type": "paragraph",
                "paragraph": {
                    "rich_text": [{
                        "type": "text",
                        "text": {"content": "hello", "link": null},
                        "annotations": {
                            "bold": true,
                            "italic": false,
                            "strikethrough": false,
                            "underline": false,
                            "code": false,
                            "color": "default"
                        }
                    }]
                }
            })
        );
    }

    #[test]
    fn test_container_children_encoding() {
        let block = Block::Toggle {
            rich_text: vec![RichSpan::plain("summary")],
            children: vec![Block::Divider],
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "toggle");
        assert_eq!(value["toggle"]["children"][0]["type"], "divider");

        let leafish = Block::Quote {
            rich_text: vec![],
            children: vec![],
        };
        let value = serde_json::to_value(&leafish).unwrap();
        assert!(value["quote"].get("children").is_none());
    }

    #[test]
    fn test_table_and_image_encoding() {
        let table = Block::Table {
            width: 2,
            has_column_header: true,
            rows: vec![TableRow {
                cells: vec![vec![RichSpan::plain("a")], vec![]],
            }],
        };
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["table"]["table_width"], 2);
        assert_eq!(value["table"]["children"][0]["type"], "table_row");
        assert_eq!(
            value["table"]["children"][0]["table_row"]["cells"][1],
            json!([])
        );

        let image = Block::Image(ImageSource::FileUpload { id: "up-1".into() });
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["image"]["file_upload"]["id"], "up-1");
    }

    #[test]
    fn test_heading_levels_collapse() {
        assert_eq!(HeadingLevel::from_depth(1), HeadingLevel::One);
        assert_eq!(HeadingLevel::from_depth(5), HeadingLevel::Three);
        let heading = Block::Heading {
            level: HeadingLevel::from_depth(6),
            rich_text: vec![],
        };
        assert_eq!(heading.type_name(), "heading_3");
        assert!(heading.children().is_empty());
    }
}
