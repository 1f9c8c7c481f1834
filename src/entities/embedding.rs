use pgvector::Vector;
use serde::Serialize;
use sqlx::FromRow;

/// One embedding row per `(image_id, model_name)`. The vector column is
/// dimension-less; vectors are only ever compared within one model name.
#[derive(Debug, Clone, FromRow)]
pub struct Embedding {
    pub image_id: i64,
    pub model_name: String,
    pub vector: Vector,
}

#[derive(Debug, Clone, FromRow)]
pub struct TagEmbedding {
    pub tag_id: i64,
    pub model_name: String,
    pub vector: Vector,
}

/// Embedding projected for clustering: the id plus raw components.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingPoint {
    pub image_id: i64,
    pub vector: Vec<f32>,
}
