//! The review page controller.
//!
//! Resolves which revision to show, optionally diffs it against an earlier
//! one, and overlays comment threads and diagnostics on every rendered line.
//! The result is an immutable [`ReviewPage`] handed to the view layer.

use serde::Serialize;

use apiview_core::render::{self, RenderMode};
use apiview_core::types::{
    CodeDiagnostic, CodeLine, CommentThread, DiffLine, DiffLineKind, Review,
    ReviewComments, Revision,
};
use apiview_core::{diff, Error};

use crate::app::Stores;

/// Query parameters of a page view.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRequest<'a> {
    pub review_id: &'a str,
    pub revision_id: Option<&'a str>,
    pub diff_revision_id: Option<&'a str>,
}

/// What the view handler should do.
#[derive(Debug)]
pub enum PageOutcome {
    /// The review predates revisions; show the legacy page instead.
    Legacy,
    Page(Box<ReviewPage>),
}

/// One displayed line with its annotations.
///
/// Removed lines never carry a thread or diagnostics: they are not part of the
/// current revision and cannot anchor a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct CodeLineModel {
    pub kind: DiffLineKind,
    pub line: CodeLine,
    pub thread: Option<CommentThread>,
    pub diagnostics: Vec<CodeDiagnostic>,
}

/// An entry of the revision pickers.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionOption {
    pub id: String,
    pub name: String,
    pub is_selected: bool,
}

/// Everything the review template needs, built once per request.
#[derive(Debug, Serialize)]
pub struct ReviewPage {
    pub user: String,
    pub review: Review,
    pub revision: Revision,
    pub diff_revision: Option<Revision>,
    pub previous_revisions: Vec<Revision>,
    pub language: String,
    pub lines: Vec<CodeLineModel>,
    pub revision_options: Vec<RevisionOption>,
    pub diff_options: Vec<RevisionOption>,
    /// Unresolved threads anchored to lines of the selected revision.
    pub active_conversations: usize,
    /// Unresolved threads across the whole review.
    pub total_active_conversations: usize,
    pub is_subscribed: bool,
}

/// Builds the review page for `request` on behalf of `user`.
///
/// Store calls run sequentially: review, comments, current code file, then the
/// diff target's code file when one was requested.
///
/// # Errors
///
/// `Error::RevisionNotFound` if `revision_id` is not a revision of the review
/// or `diff_revision_id` is not one of the revisions before the selected one.
/// Store failures propagate unchanged.
pub async fn load(
    stores: &Stores,
    user: &str,
    request: PageRequest<'_>,
) -> Result<PageOutcome, Error> {
    let review = stores.reviews.get_review(user, request.review_id).await?;

    if review.revisions.is_empty() {
        tracing::debug!(review_id = request.review_id, "review has no revisions");
        return Ok(PageOutcome::Legacy);
    }

    let comments = stores.comments.get_review_comments(request.review_id).await?;
    let (revision, previous_revisions) = select_revision(&review, request.revision_id)?;

    let code_file = stores.code_files.get_code_file(&revision).await?;
    let file_html_lines = render::render_html(&code_file, RenderMode::Normal);

    let (diff_revision, lines) = match request.diff_revision_id {
        Some(diff_id) => {
            let diff_revision = previous_revisions
                .iter()
                .find(|r| r.id == diff_id)
                .cloned()
                .ok_or_else(|| Error::RevisionNotFound(diff_id.to_owned()))?;

            let previous_file = stores.code_files.get_code_file(&diff_revision).await?;
            let previous_html_lines = render::render_html(&previous_file, RenderMode::ReadOnly);
            let previous_text_lines = render::render_text(&previous_file);
            let file_text_lines = render::render_text(&code_file);

            let diff_lines = diff::compute(
                &previous_text_lines,
                &file_text_lines,
                &previous_html_lines,
                &file_html_lines,
            );
            let lines = create_lines(&code_file.diagnostics, diff_lines, &comments);
            (Some(diff_revision), lines)
        }
        None => {
            let plain = file_html_lines.iter().cloned().map(DiffLine::unchanged);
            (None, create_lines(&code_file.diagnostics, plain, &comments))
        }
    };

    let active_conversations = count_active_conversations(&file_html_lines, &comments);
    let total_active_conversations = comments.unresolved_count();
    let is_subscribed = stores
        .subscriptions
        .is_subscribed(user, request.review_id)
        .await?;

    tracing::debug!(
        review_id = request.review_id,
        revision_id = %revision.id,
        diff = diff_revision.is_some(),
        lines = lines.len(),
        "review page assembled"
    );

    let revision_options = review
        .revisions
        .iter()
        .map(|r| RevisionOption {
            id: r.id.clone(),
            name: r.display_name(),
            is_selected: r.id == revision.id,
        })
        .collect();
    let diff_options = previous_revisions
        .iter()
        .map(|r| RevisionOption {
            id: r.id.clone(),
            name: r.display_name(),
            is_selected: diff_revision.as_ref().is_some_and(|d| d.id == r.id),
        })
        .collect();

    Ok(PageOutcome::Page(Box::new(ReviewPage {
        user: user.to_owned(),
        language: code_file.language.clone(),
        review,
        revision,
        diff_revision,
        previous_revisions,
        lines,
        revision_options,
        diff_options,
        active_conversations,
        total_active_conversations,
        is_subscribed,
    })))
}

/// Picks the requested revision (or the latest) and the revisions before it.
fn select_revision(
    review: &Review,
    revision_id: Option<&str>,
) -> Result<(Revision, Vec<Revision>), Error> {
    let revision = match revision_id {
        Some(id) => review
            .find_revision(id)
            .ok_or_else(|| Error::RevisionNotFound(id.to_owned()))?,
        None => review
            .latest_revision()
            .ok_or_else(|| Error::RevisionNotFound(review.id.clone()))?,
    };
    let previous = review.revisions_before(revision).to_vec();
    Ok((revision.clone(), previous))
}

/// Annotates a normalized sequence of diff lines with threads and diagnostics.
fn create_lines<I>(
    diagnostics: &[CodeDiagnostic],
    lines: I,
    comments: &ReviewComments,
) -> Vec<CodeLineModel>
where
    I: IntoIterator<Item = DiffLine>,
{
    lines
        .into_iter()
        .map(|DiffLine { kind, line }| {
            if kind == DiffLineKind::Removed {
                return CodeLineModel { kind, line, thread: None, diagnostics: Vec::new() };
            }
            let element_id = line.element_id.as_deref();
            let thread = element_id
                .and_then(|id| comments.thread_for_line(id))
                .cloned();
            let diagnostics = diagnostics
                .iter()
                .filter(|d| element_id == Some(d.target_id.as_str()))
                .cloned()
                .collect();
            CodeLineModel { kind, line, thread, diagnostics }
        })
        .collect()
}

/// Counts lines with a non-empty element id whose thread is unresolved.
fn count_active_conversations(lines: &[CodeLine], comments: &ReviewComments) -> usize {
    lines
        .iter()
        .filter_map(CodeLine::anchor)
        .filter_map(|id| comments.thread_for_line(id))
        .filter(|thread| !thread.is_resolved)
        .count()
}
