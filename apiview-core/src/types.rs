use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A review of one API surface, with its revisions in creation order.
///
/// `revisions` is ordered by `Revision::number` ascending; the last entry is
/// the most recent upload.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: String,           // UUID v4 text
    pub name: String,
    pub author: String,
    pub is_closed: bool,
    pub created_at: i64,      // Unix timestamp seconds
    pub updated_at: i64,      // Unix timestamp seconds
    pub revisions: Vec<Revision>,
}

impl Review {
    /// Looks up a revision by exact id.
    pub fn find_revision(&self, revision_id: &str) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.id == revision_id)
    }

    /// Returns the most recently created revision, if any.
    pub fn latest_revision(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Returns every revision created strictly before `revision`, in order.
    ///
    /// If `revision` does not belong to this review the whole sequence is
    /// returned, mirroring a take-while that never hits its stop condition.
    pub fn revisions_before(&self, revision: &Revision) -> &[Revision] {
        let end = self
            .revisions
            .iter()
            .position(|r| r.id == revision.id)
            .unwrap_or(self.revisions.len());
        &self.revisions[..end]
    }
}

/// One immutable snapshot of a reviewed API surface.
///
/// `code_file_id` points at the parsed code file currently cached for this
/// revision. Refreshing a review replaces the pointer, never the row it
/// pointed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub id: String,           // UUID v4 text
    pub review_id: String,
    pub number: i64,          // 1-based ordinal within the review
    pub label: Option<String>,
    pub author: String,
    pub created_at: i64,
    pub code_file_id: String,
}

impl Revision {
    /// Human-readable name used in revision pickers.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => format!("rev {} - {}", self.number, label),
            _ => format!("rev {}", self.number),
        }
    }
}

/// The kind of a single token in a code file's token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    Newline,
    Whitespace,
    Punctuation,
    Keyword,
    LineIdMarker,
    TypeName,
    MemberName,
    StringLiteral,
    Literal,
    Comment,
    DocumentRangeStart,
    DocumentRangeEnd,
}

/// One token of a parsed API surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeToken {
    pub kind: TokenKind,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigate_to_id: Option<String>,
}

impl CodeToken {
    pub fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            definition_id: None,
            navigate_to_id: None,
        }
    }

    pub fn with_definition(mut self, id: impl Into<String>) -> Self {
        self.definition_id = Some(id.into());
        self
    }

    pub fn with_navigation(mut self, id: impl Into<String>) -> Self {
        self.navigate_to_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// A language-analyser finding bound to one element of the API surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeDiagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_id: Option<String>,
    pub target_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_link_uri: Option<String>,
    #[serde(default)]
    pub level: DiagnosticLevel,
}

/// Parsed representation of a reviewed API surface.
///
/// Serialized as JSON both for uploads (the revision's source document) and for
/// the cached copy in the `code_files` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeFile {
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tokens: Vec<CodeToken>,
    #[serde(default)]
    pub diagnostics: Vec<CodeDiagnostic>,
}

/// Parser version stamped onto every code file produced by this crate.
pub const CODE_FILE_VERSION: u32 = 2;

impl CodeFile {
    /// Parses an uploaded source document into a code file.
    ///
    /// The document is the JSON token listing produced by a language
    /// processor. Whatever version it declares, the result carries
    /// [`CODE_FILE_VERSION`].
    ///
    /// # Errors
    ///
    /// Diagnostic help links that are not plain `http`/`https` URLs are
    /// dropped, since they end up in an `href`.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the document is not a valid listing.
    pub fn parse(source: &[u8]) -> Result<Self, serde_json::Error> {
        let mut file: CodeFile = serde_json::from_slice(source)?;
        file.version = CODE_FILE_VERSION;
        for diagnostic in &mut file.diagnostics {
            if !diagnostic.help_link_uri.as_deref().is_some_and(is_web_link) {
                diagnostic.help_link_uri = None;
            }
        }
        Ok(file)
    }
}

fn is_web_link(uri: &str) -> bool {
    let uri = uri.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        uri.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// A rendered line: either plain text or an HTML fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeLine {
    pub display_string: String,
    pub element_id: Option<String>,
}

impl CodeLine {
    pub fn new(display_string: impl Into<String>, element_id: Option<String>) -> Self {
        Self {
            display_string: display_string.into(),
            element_id,
        }
    }

    /// The element id if present and non-empty.
    pub fn anchor(&self) -> Option<&str> {
        self.element_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// The type of change for a diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Added,
    Removed,
    Unchanged,
}

/// A single rendered line tagged with its change relative to a prior revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub line: CodeLine,
}

impl DiffLine {
    pub fn unchanged(line: CodeLine) -> Self {
        Self { kind: DiffLineKind::Unchanged, line }
    }
}

/// A single review comment anchored to an element id.
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,           // UUID v4 text
    pub review_id: String,
    pub revision_id: Option<String>,
    pub element_id: String,
    pub author: String,
    pub body: String,
    pub created_at: i64,
}

/// All comments on one element id, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    pub element_id: String,
    pub comments: Vec<Comment>,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
}

/// A review's comment threads indexed by element id.
///
/// Built by the comment store. Thread order follows the first comment of each
/// thread.
#[derive(Debug, Clone, Default)]
pub struct ReviewComments {
    review_id: String,
    threads: Vec<CommentThread>,
    by_element: HashMap<String, usize>,
}

impl ReviewComments {
    pub fn new(review_id: impl Into<String>, threads: Vec<CommentThread>) -> Self {
        let by_element = threads
            .iter()
            .enumerate()
            .map(|(i, t)| (t.element_id.clone(), i))
            .collect();
        Self {
            review_id: review_id.into(),
            threads,
            by_element,
        }
    }

    pub fn review_id(&self) -> &str {
        &self.review_id
    }

    pub fn threads(&self) -> &[CommentThread] {
        &self.threads
    }

    /// Looks up the thread anchored to `element_id`.
    pub fn thread_for_line(&self, element_id: &str) -> Option<&CommentThread> {
        self.by_element.get(element_id).map(|&i| &self.threads[i])
    }

    /// Number of threads not yet resolved, across the whole review.
    pub fn unresolved_count(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_resolved).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(id: &str, number: i64) -> Revision {
        Revision {
            id: id.to_owned(),
            review_id: "r".to_owned(),
            number,
            label: None,
            author: "alice".to_owned(),
            created_at: number,
            code_file_id: format!("cf-{id}"),
        }
    }

    fn review(ids: &[&str]) -> Review {
        Review {
            id: "r".to_owned(),
            name: "Azure.Core".to_owned(),
            author: "alice".to_owned(),
            is_closed: false,
            created_at: 0,
            updated_at: 0,
            revisions: ids
                .iter()
                .enumerate()
                .map(|(i, id)| revision(id, i as i64 + 1))
                .collect(),
        }
    }

    fn thread(element_id: &str, resolved: bool) -> CommentThread {
        CommentThread {
            element_id: element_id.to_owned(),
            comments: Vec::new(),
            is_resolved: resolved,
            resolved_by: None,
        }
    }

    #[test]
    fn revisions_before_is_strict_prefix() {
        let r = review(&["v1", "v2", "v3"]);
        let v2 = r.find_revision("v2").unwrap().clone();
        let before: Vec<&str> = r.revisions_before(&v2).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(before, vec!["v1"]);

        let v1 = r.find_revision("v1").unwrap().clone();
        assert!(r.revisions_before(&v1).is_empty());
    }

    #[test]
    fn latest_revision_is_last_created() {
        assert_eq!(review(&["v1", "v2", "v3"]).latest_revision().unwrap().id, "v3");
        assert!(review(&[]).latest_revision().is_none());
    }

    #[test]
    fn find_revision_misses_unknown_id() {
        assert!(review(&["v1"]).find_revision("nope").is_none());
    }

    #[test]
    fn display_name_includes_label() {
        let mut rev = revision("v1", 3);
        assert_eq!(rev.display_name(), "rev 3");
        rev.label = Some("preview.2".to_owned());
        assert_eq!(rev.display_name(), "rev 3 - preview.2");
    }

    #[test]
    fn comments_index_by_element() {
        let comments = ReviewComments::new(
            "r",
            vec![thread("a", false), thread("b", true), thread("c", false)],
        );
        assert!(comments.thread_for_line("b").unwrap().is_resolved);
        assert!(comments.thread_for_line("zzz").is_none());
        assert_eq!(comments.unresolved_count(), 2);
    }

    #[test]
    fn parse_stamps_current_version() {
        let src = br#"{"Name":"Azure.Core","Version":1,"Tokens":[{"Kind":"Keyword","Value":"class"}]}"#;
        let file = CodeFile::parse(src).unwrap();
        assert_eq!(file.version, CODE_FILE_VERSION);
        assert_eq!(file.tokens[0].kind, TokenKind::Keyword);
        assert!(file.diagnostics.is_empty());
    }

    #[test]
    fn parse_keeps_only_web_help_links() {
        let src = br#"{"Name":"Azure.Core","Diagnostics":[
            {"TargetId":"a","Text":"x","HelpLinkUri":"https://aka.ms/azsdk/guide"},
            {"TargetId":"b","Text":"y","HelpLinkUri":"javascript:alert(1)"},
            {"TargetId":"c","Text":"z","HelpLinkUri":" JavaScript:alert(1)"},
            {"TargetId":"d","Text":"w","HelpLinkUri":"HTTP://example.com"}
        ]}"#;
        let file = CodeFile::parse(src).unwrap();
        let links: Vec<Option<&str>> =
            file.diagnostics.iter().map(|d| d.help_link_uri.as_deref()).collect();
        assert_eq!(
            links,
            vec![Some("https://aka.ms/azsdk/guide"), None, None, Some("HTTP://example.com")]
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(CodeFile::parse(b"not json").is_err());
    }

    #[test]
    fn anchor_ignores_empty_ids() {
        assert_eq!(CodeLine::new("x", Some(String::new())).anchor(), None);
        assert_eq!(CodeLine::new("x", Some("id".to_owned())).anchor(), Some("id"));
        assert_eq!(CodeLine::new("x", None).anchor(), None);
    }
}
