use axum::Json;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::HeaderMap;
use axum::http::header;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::search_dtos::{SearchRequest, SearchResponse, SearchResultDto};
use crate::errors::{AppError, AppResult};
use crate::services::search_service::ScoredImage;

pub async fn search_get(
    State(context): State<Arc<AppContext>>,
    Query(request): Query<SearchRequest>,
) -> AppResult<Json<ApiResponse<SearchResponse>>> {
    run_search(context, request, None).await
}

/// POST accepts plain JSON, or multipart when a query image is supplied
/// (`request` JSON part + `file` image part).
pub async fn search_post(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    request: Request,
) -> AppResult<Json<ApiResponse<SearchResponse>>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|error| AppError::bad_request(error.to_string()))?;
        let (search_request, query_image) = parse_multipart(multipart).await?;
        run_search(context, search_request, query_image).await
    } else {
        let Json(search_request): Json<SearchRequest> = Json::from_request(request, &())
            .await
            .map_err(|error| AppError::bad_request(error.to_string()))?;
        run_search(context, search_request, None).await
    }
}

async fn parse_multipart(
    mut multipart: Multipart,
) -> AppResult<(SearchRequest, Option<Vec<u8>>)> {
    let mut request = SearchRequest::default();
    let mut query_image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::bad_request(error.to_string()))?
    {
        match field.name() {
            Some("request") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|error| AppError::bad_request(error.to_string()))?;
                request = serde_json::from_str(&raw)
                    .map_err(|error| AppError::bad_request(format!("invalid request JSON: {error}")))?;
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|error| AppError::bad_request(error.to_string()))?;
                query_image = Some(bytes.to_vec());
            }
            _ => {}
        }
    }
    Ok((request, query_image))
}

async fn run_search(
    context: Arc<AppContext>,
    request: SearchRequest,
    query_image: Option<Vec<u8>>,
) -> AppResult<Json<ApiResponse<SearchResponse>>> {
    let scored = context.search.search(&request, query_image).await?;
    let mut items = Vec::with_capacity(scored.len());
    for ScoredImage { image, distance } in scored {
        items.push(SearchResultDto {
            image: context.ingest.to_dto(image).await,
            distance,
        });
    }
    let total = items.len();
    Ok(ok(SearchResponse { items, total }))
}
