use pgvector::Vector;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

use crate::dtos::search_dtos::SearchRequest;
use crate::entities::Image;
use crate::errors::{AppError, AppResult};
use crate::repositories::EmbeddingRepository;
use crate::services::ai::load_balancer::ModelLoadBalancer;
use crate::services::ai::model_client::{EmbeddingContent, ModelClient};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;
/// Grid cells per 360° of longitude at zoom 0; each zoom level doubles the
/// resolution.
const GRID_BASE_CELLS: f64 = 8.0;
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, FromRow)]
pub struct ScoredImage {
    #[sqlx(flatten)]
    pub image: Image,
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MapCluster {
    pub cell_x: f64,
    pub cell_y: f64,
    pub count: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub cover_image_id: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

impl BoundingBox {
    /// Parses `minLng,minLat,maxLng,maxLat`.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if parts.len() != 4 {
            return None;
        }
        Some(Self {
            min_longitude: parts[0],
            min_latitude: parts[1],
            max_longitude: parts[2],
            max_latitude: parts[3],
        })
    }
}

/// Composite search: every present filter AND-combines in SQL; when a
/// semantic query is present the filtered candidates are ordered by cosine
/// distance within the named model.
pub struct SearchService {
    pool: PgPool,
    embeddings: EmbeddingRepository,
    balancer: Arc<ModelLoadBalancer>,
    client: Arc<ModelClient>,
}

impl SearchService {
    pub fn new(
        pool: PgPool,
        embeddings: EmbeddingRepository,
        balancer: Arc<ModelLoadBalancer>,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            pool,
            embeddings,
            balancer,
            client,
        }
    }

    pub async fn search(
        &self,
        request: &SearchRequest,
        query_image: Option<Vec<u8>>,
    ) -> AppResult<Vec<ScoredImage>> {
        let query_vector = self.resolve_query_vector(request, query_image).await?;
        let limit = request
            .limit
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT i.*, ");
        match (&query_vector, &request.model_name) {
            (Some(vector), Some(model)) => {
                builder.push("(e.vector <=> ");
                builder.push_bind(vector.clone());
                builder.push(")::float8 AS distance FROM images i JOIN embeddings e ON e.image_id = i.id AND e.model_name = ");
                builder.push_bind(model.clone());
            }
            _ => {
                builder.push("NULL::float8 AS distance FROM images i");
            }
        }
        builder.push(" WHERE i.deleted_at IS NULL");
        self.push_filters(&mut builder, request);

        if query_vector.is_some() {
            builder.push(" ORDER BY distance ASC");
        } else {
            builder.push(" ORDER BY COALESCE(i.taken_at, i.created_at) DESC, i.id DESC");
        }
        builder.push(" LIMIT ").push_bind(limit);

        Ok(builder
            .build_query_as::<ScoredImage>()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)?)
    }

    fn push_filters(&self, builder: &mut QueryBuilder<'_, Postgres>, request: &SearchRequest) {
        if let Some(keyword) = request
            .keyword
            .as_ref()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
        {
            let pattern = format!("%{keyword}%");
            builder.push(" AND (i.original_name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR i.location_name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(
                " OR EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON t.id = it.tag_id WHERE it.image_id = i.id AND t.name ILIKE ",
            );
            builder.push_bind(pattern);
            builder.push("))");
        }

        if let Some(date_from) = request.date_from {
            builder.push(" AND COALESCE(i.taken_at, i.created_at) >= ");
            builder.push_bind(date_from);
        }
        if let Some(date_to) = request.date_to {
            builder.push(" AND COALESCE(i.taken_at, i.created_at) <= ");
            builder.push_bind(date_to);
        }

        // AND semantics per tag; an empty list constrains nothing.
        for tag in request.tags.iter().filter(|t| !t.trim().is_empty()) {
            builder.push(
                " AND EXISTS (SELECT 1 FROM image_tags it JOIN tags t ON t.id = it.tag_id WHERE it.image_id = i.id AND t.name = ",
            );
            builder.push_bind(tag.trim().to_string());
            builder.push(")");
        }

        if let (Some(latitude), Some(longitude), Some(radius)) = (
            request.latitude,
            request.longitude,
            request.radius_meters,
        ) {
            builder.push(" AND i.latitude IS NOT NULL AND i.longitude IS NOT NULL AND ");
            builder.push("(2 * ");
            builder.push(EARTH_RADIUS_METERS.to_string());
            builder.push(" * asin(sqrt(power(sin(radians((");
            builder.push_bind(latitude);
            builder.push(" - i.latitude) / 2)), 2) + cos(radians(");
            builder.push_bind(latitude);
            builder.push(")) * cos(radians(i.latitude)) * power(sin(radians((");
            builder.push_bind(longitude);
            builder.push(" - i.longitude) / 2)), 2)))) <= ");
            builder.push_bind(radius.max(0.0));
        }

        if let Some(bbox) = request.bbox.as_deref().and_then(BoundingBox::parse) {
            builder.push(" AND i.longitude BETWEEN ");
            builder.push_bind(bbox.min_longitude);
            builder.push(" AND ");
            builder.push_bind(bbox.max_longitude);
            builder.push(" AND i.latitude BETWEEN ");
            builder.push_bind(bbox.min_latitude);
            builder.push(" AND ");
            builder.push_bind(bbox.max_latitude);
        }
    }

    /// The semantic side of the query, when present: a reference image's
    /// stored vector, or an embedding of the supplied text/file computed by
    /// the model peer.
    async fn resolve_query_vector(
        &self,
        request: &SearchRequest,
        query_image: Option<Vec<u8>>,
    ) -> AppResult<Option<Vector>> {
        let Some(model) = request.model_name.as_deref() else {
            if request.text.is_some() || request.image_id.is_some() || query_image.is_some() {
                return Err(AppError::bad_request(
                    "semantic queries require a modelName",
                ));
            }
            return Ok(None);
        };

        if let Some(image_id) = request.image_id {
            let vector = self
                .embeddings
                .image_vector(image_id, model)
                .await?
                .ok_or_else(|| {
                    AppError::not_found(format!(
                        "image {image_id} has no embedding for model {model}"
                    ))
                })?;
            return Ok(Some(vector));
        }

        let content = if let Some(bytes) = query_image {
            use base64::Engine;
            Some(EmbeddingContent::image_base64(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ))
        } else {
            request
                .text
                .as_ref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| EmbeddingContent::text(text.trim()))
        };
        let Some(content) = content else {
            return Ok(None);
        };

        let providers = self
            .balancer
            .provider_order(model)
            .map_err(AppError::Internal)?;
        if providers.is_empty() {
            return Err(AppError::bad_request(format!(
                "no providers configured for model {model}"
            )));
        }
        let mut last_error = None;
        for provider in &providers {
            match self
                .client
                .create_multimodal_embedding(provider, model, std::slice::from_ref(&content))
                .await
            {
                Ok(mut vectors) => {
                    if let Some(vector) = vectors.pop() {
                        return Ok(Some(Vector::from(vector)));
                    }
                }
                Err(error) => {
                    log::warn!("query embedding via {} failed: {error}", provider.name);
                    last_error = Some(error);
                }
            }
        }
        Err(AppError::Transient(format!(
            "all providers failed to embed the query: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Server-side grid clustering for the map viewport. Cell resolution
    /// derives from the zoom level.
    pub async fn map_clusters(
        &self,
        bbox: BoundingBox,
        zoom: u32,
    ) -> AppResult<Vec<MapCluster>> {
        let cell = Self::grid_cell_size(zoom);
        let rows = sqlx::query_as::<_, MapCluster>(
            r#"
            SELECT floor(i.longitude / $1) AS cell_x,
                   floor(i.latitude / $1) AS cell_y,
                   count(*) AS count,
                   avg(i.latitude) AS latitude,
                   avg(i.longitude) AS longitude,
                   min(i.id) AS cover_image_id
            FROM images i
            WHERE i.deleted_at IS NULL
              AND i.latitude IS NOT NULL AND i.longitude IS NOT NULL
              AND i.longitude BETWEEN $2 AND $3
              AND i.latitude BETWEEN $4 AND $5
            GROUP BY cell_x, cell_y
            ORDER BY count DESC
            "#,
        )
        .bind(cell)
        .bind(bbox.min_longitude)
        .bind(bbox.max_longitude)
        .bind(bbox.min_latitude)
        .bind(bbox.max_latitude)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub fn grid_cell_size(zoom: u32) -> f64 {
        let cells = GRID_BASE_CELLS * 2f64.powi(zoom.min(22) as i32);
        360.0 / cells
    }
}
