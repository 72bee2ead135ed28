//! HTTP routes for the review pages.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::error::Result;
use crate::page::{self, PageOutcome, PageRequest};
use crate::views::LegacyPage;

const ANONYMOUS: &str = "anonymous";

/// Build the router with the review page, its actions, and `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/assemblies/review/{id}", get(review_handler))
        .route("/assemblies/review/{id}/refresh-model", post(refresh_model_handler))
        .route("/assemblies/review/{id}/toggle-closed", post(toggle_closed_handler))
        .route("/assemblies/review/{id}/toggle-subscribed", post(toggle_subscribed_handler))
        .route("/assemblies/legacy-review/{id}", get(legacy_review_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query string of the review page.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery {
    pub revision_id: Option<String>,
    pub diff_revision_id: Option<String>,
}

/// The requesting user, read from the configured header.
///
/// Requests without the header act as `anonymous`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(state.user_header.as_ref())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(CurrentUser(user.to_owned()))
    }
}

fn review_path(id: &str) -> String {
    format!("/assemblies/review/{id}")
}

fn legacy_review_path(id: &str) -> String {
    format!("/assemblies/legacy-review/{id}")
}

/// `GET /assemblies/review/{id}`
async fn review_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ReviewQuery>,
) -> Result<Response> {
    let request = PageRequest {
        review_id: &id,
        revision_id: query.revision_id.as_deref().filter(|s| !s.is_empty()),
        diff_revision_id: query.diff_revision_id.as_deref().filter(|s| !s.is_empty()),
    };
    match page::load(&state.stores, &user, request).await? {
        PageOutcome::Legacy => Ok(Redirect::to(&legacy_review_path(&id)).into_response()),
        PageOutcome::Page(page) => Ok(Html(state.views.review_page(&page)?).into_response()),
    }
}

/// `GET /assemblies/legacy-review/{id}`
async fn legacy_review_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let review = state.stores.reviews.get_review(&user, &id).await?;
    let comments = state.stores.comments.get_review_comments(&id).await?;
    let html = state.views.legacy_page(&LegacyPage {
        user: &user,
        review: &review,
        threads: comments.threads(),
    })?;
    Ok(Html(html))
}

/// `POST /assemblies/review/{id}/refresh-model`
async fn refresh_model_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Redirect> {
    state.stores.reviews.update_review(&user, &id).await?;
    Ok(Redirect::to(&review_path(&id)))
}

/// `POST /assemblies/review/{id}/toggle-closed`
async fn toggle_closed_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Redirect> {
    state.stores.reviews.toggle_is_closed(&user, &id).await?;
    Ok(Redirect::to(&review_path(&id)))
}

/// `POST /assemblies/review/{id}/toggle-subscribed`
async fn toggle_subscribed_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Redirect> {
    state.stores.subscriptions.toggle_subscribed(&user, &id).await?;
    Ok(Redirect::to(&review_path(&id)))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use apiview_core::db;

    use super::*;
    use crate::app::Stores;
    use crate::views::Views;

    const USER_HEADER: &str = "x-apiview-user";

    struct Fixture {
        state: AppState,
        conn: tokio_rusqlite::Connection,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let conn = db::open_db(&path.to_string_lossy()).await.unwrap();
        let state = AppState::new(
            Stores::sqlite(conn.clone(), Some(16)),
            Views::new().unwrap(),
            USER_HEADER,
        );
        Fixture { state, conn, _dir: dir }
    }

    fn listing(member: &str) -> Vec<u8> {
        format!(
            r#"{{
                "Name": "Azure.Core",
                "Language": "C#",
                "Tokens": [
                    {{"Kind": "Keyword", "Value": "class"}},
                    {{"Kind": "Whitespace", "Value": " "}},
                    {{"Kind": "TypeName", "Value": "Client", "DefinitionId": "Azure.Client"}},
                    {{"Kind": "Newline", "Value": ""}},
                    {{"Kind": "MemberName", "Value": "{member}", "DefinitionId": "Azure.Client.{member}"}}
                ]
            }}"#
        )
        .into_bytes()
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_as(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(USER_HEADER, user)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let fx = fixture().await;
        let response = send(&fx.state, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn review_without_revisions_redirects_to_legacy() {
        let fx = fixture().await;
        let review = db::create_review(&fx.conn, "Azure.Core", "alice").await.unwrap();

        for query in ["", "?revisionId=whatever"] {
            let uri = format!("/assemblies/review/{}{query}", review.id);
            let response = send(&fx.state, get(&uri)).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&response), format!("/assemblies/legacy-review/{}", review.id));
        }

        let legacy = send(&fx.state, get(&format!("/assemblies/legacy-review/{}", review.id))).await;
        assert_eq!(legacy.status(), StatusCode::OK);
        assert!(body_text(legacy).await.contains("before revisions existed"));
    }

    #[tokio::test]
    async fn review_page_renders_selected_revision_and_diff() {
        let fx = fixture().await;
        let review = db::create_review(&fx.conn, "Azure.Core", "alice").await.unwrap();
        let v1 = db::add_revision(&fx.conn, &review.id, "alice", None, &listing("Send"))
            .await
            .unwrap();
        let v2 = db::add_revision(&fx.conn, &review.id, "alice", None, &listing("SendAsync"))
            .await
            .unwrap();

        let response = send(&fx.state, get(&format!("/assemblies/review/{}", review.id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("id=\"Azure.Client.SendAsync\""));
        assert!(html.contains("Signed in as anonymous"));

        let uri = format!(
            "/assemblies/review/{}?revisionId={}&diffRevisionId={}",
            review.id, v2.id, v1.id
        );
        let html = body_text(send(&fx.state, get(&uri)).await).await;
        assert!(html.contains("code-line removed"));
        assert!(html.contains("code-line added"));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = fixture().await;
        let response = send(&fx.state, get("/assemblies/review/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let review = db::create_review(&fx.conn, "Azure.Core", "alice").await.unwrap();
        let v1 = db::add_revision(&fx.conn, &review.id, "alice", None, &listing("Send"))
            .await
            .unwrap();
        let uri = format!("/assemblies/review/{}?revisionId=nope", review.id);
        assert_eq!(send(&fx.state, get(&uri)).await.status(), StatusCode::NOT_FOUND);

        // A diff target must come before the selected revision.
        let uri = format!(
            "/assemblies/review/{}?revisionId={}&diffRevisionId={}",
            review.id, v1.id, v1.id
        );
        assert_eq!(send(&fx.state, get(&uri)).await.status(), StatusCode::NOT_FOUND);

        for action in ["toggle-closed", "refresh-model", "toggle-subscribed"] {
            let uri = format!("/assemblies/review/missing/{action}");
            let response = send(&fx.state, post_as(&uri, "bob")).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{action}");
        }
    }

    #[tokio::test]
    async fn actions_mutate_and_redirect_back() {
        let fx = fixture().await;
        let review = db::create_review(&fx.conn, "Azure.Core", "alice").await.unwrap();
        db::add_revision(&fx.conn, &review.id, "alice", None, &listing("Send"))
            .await
            .unwrap();
        let view = format!("/assemblies/review/{}", review.id);

        let response = send(&fx.state, post_as(&format!("{view}/toggle-closed"), "bob")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), view);
        let loaded = db::load_review(&fx.conn, &review.id).await.unwrap().unwrap();
        assert!(loaded.is_closed);

        let response = send(&fx.state, post_as(&format!("{view}/toggle-subscribed"), "bob")).await;
        assert_eq!(location(&response), view);
        assert!(db::is_subscribed(&fx.conn, &review.id, "bob").await.unwrap());
        assert!(!db::is_subscribed(&fx.conn, &review.id, ANONYMOUS).await.unwrap());

        let before = loaded.revisions[0].code_file_id.clone();
        let response = send(&fx.state, post_as(&format!("{view}/refresh-model"), "bob")).await;
        assert_eq!(location(&response), view);
        let after = db::load_review(&fx.conn, &review.id).await.unwrap().unwrap();
        assert_ne!(after.revisions[0].code_file_id, before);

        // The refreshed page still renders through the cache.
        let request = Request::builder()
            .uri(&view)
            .header(USER_HEADER, "bob")
            .body(Body::empty())
            .unwrap();
        let html = body_text(send(&fx.state, request).await).await;
        assert!(html.contains("Signed in as bob"));
        assert!(html.contains(">Unsubscribe<"));
        assert!(html.contains(">Reopen review<"));
    }
}
