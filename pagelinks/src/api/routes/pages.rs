//! Page routes. All of them require an access token.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthUser;
use crate::api::server::AppState;
use crate::database::models::{LinkView, PageView, Pagination};
use crate::scraper::{JobStatusView, Paginated};

/// Page submission request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePageRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// Pagination query parameters. Unparseable values fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl PaginationQuery {
    fn to_pagination(&self) -> Pagination {
        let parse = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse::<i64>().ok());
        Pagination::from_query(parse(&self.limit), parse(&self.offset))
    }
}

/// Create the pages router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pages).post(create_page))
        .route("/{id}", get(get_page).delete(delete_page))
        .route("/{id}/links", get(list_links))
        .route("/{id}/scrape-status", get(scrape_status))
}

fn parse_page_id(raw: &str) -> ApiResult<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request("Invalid page ID")),
    }
}

/// POST /pages
///
/// Create the page and queue its scrape; the response does not wait for it.
async fn create_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<CreatePageRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PageView>)> {
    let Json(request) = body?;
    let page = state
        .pages
        .create_page_with_async_scrape(user.user_id, request.url.as_deref().unwrap_or_default())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(page)))
}

/// GET /pages
async fn list_pages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<Paginated<PageView>>> {
    let result = state
        .pages
        .list_pages(user.user_id, query.to_pagination())
        .await?;
    Ok(Json(result))
}

/// GET /pages/{id}
async fn get_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<PageView>> {
    let id = parse_page_id(&id)?;
    Ok(Json(state.pages.get_page(id, user.user_id).await?))
}

/// DELETE /pages/{id}
async fn delete_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_page_id(&id)?;
    state.pages.delete_page(id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /pages/{id}/links
async fn list_links(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<Paginated<LinkView>>> {
    let id = parse_page_id(&id)?;
    let result = state
        .pages
        .list_links(id, user.user_id, query.to_pagination())
        .await?;
    Ok(Json(result))
}

/// GET /pages/{id}/scrape-status
async fn scrape_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let id = parse_page_id(&id)?;
    Ok(Json(state.pages.get_scrape_status(id, user.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_id() {
        assert_eq!(parse_page_id("12").unwrap(), 12);
        assert!(parse_page_id("0").is_err());
        assert!(parse_page_id("-3").is_err());
        assert!(parse_page_id("abc").is_err());
    }

    #[test]
    fn test_pagination_query_lenient() {
        let query = PaginationQuery {
            limit: Some("500".into()),
            offset: Some("nope".into()),
        };
        let pagination = query.to_pagination();
        assert_eq!(pagination.limit, Pagination::DEFAULT_LIMIT);
        assert_eq!(pagination.offset, 0);
    }
}
