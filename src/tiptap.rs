//! Rich-text (Tiptap / ProseMirror JSON) and HTML to Markdown conversion.
//!
//! Granola stores both user notes and AI panels as Tiptap documents:
//! `{"type": "doc", "content": [{"type": "paragraph", "content": [...]}]}`.
//! Unknown node types render their children, so new editor nodes degrade to
//! plain text instead of disappearing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Convert a Tiptap document (or any node) to Markdown.
pub fn to_markdown(node: &Value) -> String {
    render(node, 0, None)
}

fn children(node: &Value) -> &[Value] {
    node.get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn concat(nodes: &[Value], indent: usize) -> String {
    nodes.iter().map(|c| render(c, indent, None)).collect()
}

fn render(node: &Value, indent: usize, ordered: Option<usize>) -> String {
    let kind = node.get("type").and_then(Value::as_str).unwrap_or("");
    let attrs = node.get("attrs");
    let content = children(node);

    match kind {
        "doc" => content
            .iter()
            .map(|c| render(c, 0, None))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),

        "heading" => {
            let level = attrs
                .and_then(|a| a.get("level"))
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            format!("\n{} {}\n", "#".repeat(level), concat(content, 0))
        }

        "paragraph" => {
            let text = concat(content, 0);
            if indent > 0 { text } else { format!("\n{text}\n") }
        }

        "bulletList" => content
            .iter()
            .map(|item| render(item, indent, None))
            .collect::<Vec<_>>()
            .join("\n"),

        "orderedList" => content
            .iter()
            .enumerate()
            .map(|(i, item)| render(item, indent, Some(i + 1)))
            .collect::<Vec<_>>()
            .join("\n"),

        "listItem" => {
            let (nested, inline): (Vec<&Value>, Vec<&Value>) = content.iter().partition(|c| {
                matches!(
                    c.get("type").and_then(Value::as_str),
                    Some("bulletList" | "orderedList")
                )
            });
            let marker = match ordered {
                Some(n) => format!("{n}."),
                None => "-".to_string(),
            };
            let text: String = inline.iter().map(|c| render(c, indent, None)).collect();
            let mut out = format!("{}{} {}", "  ".repeat(indent), marker, text.trim());
            for list in nested {
                out.push('\n');
                out.push_str(&render(list, indent + 1, None));
            }
            out
        }

        "text" => {
            let mut text = node
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let marks = node.get("marks").and_then(Value::as_array);
            for mark in marks.into_iter().flatten() {
                text = match mark.get("type").and_then(Value::as_str) {
                    Some("bold") => format!("**{text}**"),
                    Some("italic") => format!("*{text}*"),
                    Some("code") => format!("`{text}`"),
                    Some("link") => {
                        let href = mark
                            .get("attrs")
                            .and_then(|a| a.get("href"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        format!("[{text}]({href})")
                    }
                    _ => text,
                };
            }
            text
        }

        "horizontalRule" => "\n---\n".to_string(),
        "hardBreak" => "\n".to_string(),

        "codeBlock" => {
            let lang = attrs
                .and_then(|a| a.get("language"))
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("\n```{lang}\n{}\n```\n", concat(content, 0))
        }

        "blockquote" => {
            let text = concat(content, 0);
            let quoted: Vec<String> = text.trim().lines().map(|l| format!("> {l}")).collect();
            format!("\n{}\n", quoted.join("\n"))
        }

        _ => concat(content, indent),
    }
}

static HEADING_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<h[1-6][^>]*>").unwrap());
static HEADING_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</h[1-6]>").unwrap());
static LI_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<li[^>]*>").unwrap());
static P_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<p[^>]*>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Minimal HTML to Markdown, used when a panel only carries rendered HTML.
/// Handles headings, list items, paragraphs and emphasis; drops other tags.
pub fn html_to_markdown(html: &str) -> String {
    let text = HEADING_OPEN.replace_all(html, "\n### ");
    let text = HEADING_CLOSE.replace_all(&text, "\n");
    let text = LI_OPEN.replace_all(&text, "- ");
    let text = text.replace("</li>", "\n");
    let text = P_OPEN.replace_all(&text, "\n");
    let text = text
        .replace("</p>", "\n")
        .replace("<strong>", "**")
        .replace("</strong>", "**")
        .replace("<em>", "*")
        .replace("</em>", "*");
    let text = ANY_TAG.replace_all(&text, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}
