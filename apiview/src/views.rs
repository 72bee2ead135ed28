//! Handlebars views for the review pages.
//!
//! Templates are compiled into the binary and registered once at startup.

use handlebars::Handlebars;
use serde::Serialize;

use apiview_core::types::{CommentThread, Review};

use crate::error::Result;
use crate::page::ReviewPage;

const REVIEW_TEMPLATE: &str = "review";
const LEGACY_TEMPLATE: &str = "legacy_review";

pub struct Views {
    registry: Handlebars<'static>,
}

/// Data for the page shown when a review has no revisions.
#[derive(Debug, Serialize)]
pub struct LegacyPage<'a> {
    pub user: &'a str,
    pub review: &'a Review,
    pub threads: &'a [CommentThread],
}

impl Views {
    /// Compiles the bundled templates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Template` if a template does not parse.
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_template_string(REVIEW_TEMPLATE, include_str!("../templates/review.hbs"))?;
        registry.register_template_string(
            LEGACY_TEMPLATE,
            include_str!("../templates/legacy_review.hbs"),
        )?;
        Ok(Self { registry })
    }

    pub fn review_page(&self, page: &ReviewPage) -> Result<String> {
        Ok(self.registry.render(REVIEW_TEMPLATE, page)?)
    }

    pub fn legacy_page(&self, page: &LegacyPage<'_>) -> Result<String> {
        Ok(self.registry.render(LEGACY_TEMPLATE, page)?)
    }
}
