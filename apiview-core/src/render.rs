//! Token-stream renderers.
//!
//! A code file is a flat token stream; both renderers split it into lines at
//! `Newline` tokens and tag each line with its element id. The text renderer
//! produces the strings the diff engine compares, the HTML renderer produces
//! what the page displays.

use std::fmt::Write as _;

use crate::types::{CodeFile, CodeLine, CodeToken, TokenKind};

/// Controls whether rendered HTML carries anchors and navigation links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Definition ids become `id` attributes and navigate-to ids become links.
    #[default]
    Normal,
    /// No ids and no links. Used for the previous revision in a diff so the
    /// page never holds two elements with the same anchor.
    ReadOnly,
}

/// Renders a code file to plain text lines.
pub fn render_text(file: &CodeFile) -> Vec<CodeLine> {
    split_lines(&file.tokens, |out, token, _| out.push_str(&token.value))
}

/// Renders a code file to HTML lines in the given mode.
pub fn render_html(file: &CodeFile, mode: RenderMode) -> Vec<CodeLine> {
    split_lines(&file.tokens, |out, token, in_docs| {
        write_html_token(out, token, in_docs, mode)
    })
}

/// Walks `tokens`, feeding each visible token to `write` and cutting a line at
/// every `Newline`. A trailing line without a final newline is still emitted.
fn split_lines<F>(tokens: &[CodeToken], mut write: F) -> Vec<CodeLine>
where
    F: FnMut(&mut String, &CodeToken, bool),
{
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut marker_id: Option<String> = None;
    let mut first_definition: Option<String> = None;
    let mut in_docs = false;
    let mut dirty = false;

    for token in tokens {
        match token.kind {
            TokenKind::Newline => {
                let element_id = marker_id.take().or(first_definition.take());
                lines.push(CodeLine::new(std::mem::take(&mut current), element_id));
                dirty = false;
                continue;
            }
            TokenKind::LineIdMarker => {
                if marker_id.is_none() {
                    marker_id = token.definition_id.clone();
                }
            }
            TokenKind::DocumentRangeStart => in_docs = true,
            TokenKind::DocumentRangeEnd => in_docs = false,
            _ => {
                if first_definition.is_none() {
                    first_definition = token.definition_id.clone();
                }
                write(&mut current, token, in_docs);
            }
        }
        dirty = true;
    }

    if dirty {
        let element_id = marker_id.or(first_definition);
        lines.push(CodeLine::new(current, element_id));
    }
    lines
}

fn css_class(kind: TokenKind) -> Option<&'static str> {
    match kind {
        TokenKind::Text => Some("text"),
        TokenKind::Punctuation => Some("punctuation"),
        TokenKind::Keyword => Some("keyword"),
        TokenKind::TypeName => Some("class"),
        TokenKind::MemberName => Some("name"),
        TokenKind::StringLiteral => Some("string"),
        TokenKind::Literal => Some("literal"),
        TokenKind::Comment => Some("comment"),
        _ => None,
    }
}

fn write_html_token(out: &mut String, token: &CodeToken, in_docs: bool, mode: RenderMode) {
    let value = escape_html(&token.value);
    let Some(class) = css_class(token.kind) else {
        out.push_str(&value);
        return;
    };

    let _ = write!(out, "<span class=\"{class}");
    if in_docs {
        out.push_str(" documentation");
    }
    out.push('"');
    if mode == RenderMode::Normal {
        if let Some(id) = &token.definition_id {
            let _ = write!(out, " id=\"{}\"", escape_html(id));
        }
    }
    out.push('>');
    match (&token.navigate_to_id, mode) {
        (Some(target), RenderMode::Normal) => {
            let _ = write!(out, "<a href=\"#{}\">{value}</a>", escape_html(target));
        }
        _ => out.push_str(&value),
    }
    out.push_str("</span>");
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CodeToken as T;
    use crate::types::TokenKind as K;

    fn file(tokens: Vec<CodeToken>) -> CodeFile {
        CodeFile {
            name: "Azure.Core".to_owned(),
            language: "C#".to_owned(),
            version: 2,
            tokens,
            diagnostics: Vec::new(),
        }
    }

    fn class_file() -> CodeFile {
        file(vec![
            T::new(K::Keyword, "public"),
            T::new(K::Whitespace, " "),
            T::new(K::Keyword, "class"),
            T::new(K::Whitespace, " "),
            T::new(K::TypeName, "Client").with_definition("Azure.Client"),
            T::new(K::Newline, ""),
            T::new(K::LineIdMarker, "").with_definition("Azure.Client.Send"),
            T::new(K::Whitespace, "    "),
            T::new(K::TypeName, "Response").with_navigation("Azure.Response"),
            T::new(K::Whitespace, " "),
            T::new(K::MemberName, "Send").with_definition("Azure.Client.Send()"),
            T::new(K::Punctuation, "();"),
            T::new(K::Newline, ""),
            T::new(K::Punctuation, "}"),
        ])
    }

    #[test]
    fn text_lines_split_on_newline() {
        let lines = render_text(&class_file());
        let text: Vec<&str> = lines.iter().map(|l| l.display_string.as_str()).collect();
        assert_eq!(text, vec!["public class Client", "    Response Send();", "}"]);
    }

    #[test]
    fn line_marker_wins_over_definitions() {
        let lines = render_text(&class_file());
        assert_eq!(lines[0].element_id.as_deref(), Some("Azure.Client"));
        assert_eq!(lines[1].element_id.as_deref(), Some("Azure.Client.Send"));
        assert_eq!(lines[2].element_id, None);
    }

    #[test]
    fn normal_html_has_anchors_and_links() {
        let lines = render_html(&class_file(), RenderMode::Normal);
        assert!(lines[0]
            .display_string
            .contains("<span class=\"class\" id=\"Azure.Client\">Client</span>"));
        assert!(lines[1]
            .display_string
            .contains("<a href=\"#Azure.Response\">Response</a>"));
    }

    #[test]
    fn read_only_html_has_no_anchors_or_links() {
        let lines = render_html(&class_file(), RenderMode::ReadOnly);
        assert!(lines.iter().all(|l| !l.display_string.contains(" id=")));
        assert!(lines.iter().all(|l| !l.display_string.contains("<a ")));
        assert_eq!(lines[1].element_id.as_deref(), Some("Azure.Client.Send"));
    }

    #[test]
    fn html_escapes_values() {
        let lines = render_html(
            &file(vec![T::new(K::TypeName, "List<T>"), T::new(K::Text, "a & b")]),
            RenderMode::Normal,
        );
        assert_eq!(
            lines[0].display_string,
            "<span class=\"class\">List&lt;T&gt;</span><span class=\"text\">a &amp; b</span>"
        );
    }

    #[test]
    fn documentation_range_marks_tokens() {
        let lines = render_html(
            &file(vec![
                T::new(K::DocumentRangeStart, ""),
                T::new(K::Comment, "/// docs"),
                T::new(K::DocumentRangeEnd, ""),
                T::new(K::Newline, ""),
                T::new(K::Comment, "// plain"),
            ]),
            RenderMode::Normal,
        );
        assert!(lines[0].display_string.contains("class=\"comment documentation\""));
        assert!(lines[1].display_string.contains("class=\"comment\""));
    }

    #[test]
    fn empty_file_renders_no_lines() {
        assert!(render_text(&file(Vec::new())).is_empty());
    }

    #[test]
    fn consecutive_newlines_yield_blank_lines() {
        let lines = render_text(&file(vec![
            T::new(K::Text, "a"),
            T::new(K::Newline, ""),
            T::new(K::Newline, ""),
            T::new(K::Text, "b"),
        ]));
        let text: Vec<&str> = lines.iter().map(|l| l.display_string.as_str()).collect();
        assert_eq!(text, vec!["a", "", "b"]);
    }
}
