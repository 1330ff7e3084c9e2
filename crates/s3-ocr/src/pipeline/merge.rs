//! Merging Textract output parts into combined blocks and page text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, EnumString};

/// Textract block kinds. Only [`BlockType::Line`] carries consumable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    KeyValueSet,
    Table,
    Cell,
    SelectionElement,
}

/// One output part as written by Textract.
///
/// Blocks stay as raw JSON so every field (`Confidence`, `Geometry`, ...)
/// passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputPart {
    #[serde(rename = "Blocks", default)]
    pub blocks: Vec<Value>,
}

impl OutputPart {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// All parts of a job concatenated in listing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedOutput {
    #[serde(rename = "Blocks")]
    pub blocks: Vec<Value>,
}

impl CombinedOutput {
    pub fn combine(parts: impl IntoIterator<Item = OutputPart>) -> Self {
        let blocks = parts.into_iter().flat_map(|part| part.blocks).collect();
        Self { blocks }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// LINE blocks in combined order.
    pub fn lines(&self) -> impl Iterator<Item = LineBlock<'_>> {
        self.blocks.iter().filter_map(LineBlock::from_value)
    }
}

/// Borrowed view of a LINE block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBlock<'a> {
    pub page: u32,
    pub text: &'a str,
}

impl<'a> LineBlock<'a> {
    fn from_value(block: &'a Value) -> Option<Self> {
        let kind = block.get("BlockType")?.as_str()?;
        if BlockType::from_str(kind).ok()? != BlockType::Line {
            return None;
        }
        // Single-page synchronous output omits `Page`.
        let page = match block.get("Page") {
            Some(page) => u32::try_from(page.as_u64()?).ok()?,
            None => 1,
        };
        let text = block.get("Text").and_then(Value::as_str).unwrap_or_default();
        Some(Self { page, text })
    }
}

/// Group LINE text by page, newline-joined in block order.
pub fn page_texts(combined: &CombinedOutput) -> BTreeMap<u32, String> {
    let mut pages: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for line in combined.lines() {
        pages.entry(line.page).or_default().push(line.text);
    }
    pages
        .into_iter()
        .map(|(page, lines)| (page, lines.join("\n")))
        .collect()
}

/// Plain-text rendering used by the `text` command.
///
/// Lines are emitted in block order; each change of page inserts a blank
/// separator, or a `----` divider when requested.
pub fn render_text(combined: &CombinedOutput, divider: bool) -> String {
    let separator = if divider { "\n----\n\n" } else { "\n\n" };
    let mut out = String::new();
    let mut current_page = None;
    for line in combined.lines() {
        if let Some(page) = current_page {
            if page != line.page {
                out.push_str(separator);
            }
        }
        current_page = Some(line.page);
        out.push_str(line.text);
        out.push('\n');
    }
    out
}

/// One row of the `pages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRow {
    pub path: String,
    pub page: u32,
    pub folder: String,
    pub text: String,
}

/// Key without its last path segment.
pub fn folder_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(folder, _)| folder).unwrap_or("")
}

pub fn page_rows(path: &str, combined: &CombinedOutput) -> Vec<PageRow> {
    let folder = folder_of(path);
    page_texts(combined)
        .into_iter()
        .map(|(page, text)| PageRow {
            path: path.to_string(),
            page,
            folder: folder.to_string(),
            text,
        })
        .collect()
}
