pub mod ai_queue_repo;
pub mod album_repo;
pub mod embedding_repo;
pub mod image_repo;
pub mod migration_repo;
pub mod schema;
pub mod setting_repo;
pub mod share_repo;
pub mod smart_album_repo;
pub mod tag_repo;

pub use ai_queue_repo::AiQueueRepository;
pub use album_repo::AlbumRepository;
pub use embedding_repo::EmbeddingRepository;
pub use image_repo::{GeoBounds, ImageRepository, ImageSort};
pub use migration_repo::{MigrationCandidate, MigrationLock, MigrationRepository};
pub use schema::ensure_schema;
pub use setting_repo::SettingRepository;
pub use share_repo::ShareRepository;
pub use smart_album_repo::SmartAlbumTaskRepository;
pub use tag_repo::TagRepository;
