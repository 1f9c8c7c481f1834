pub mod ai;
pub mod auth_service;
pub mod exif_service;
pub mod ingest_service;
pub mod migration_progress;
pub mod migration_service;
pub mod search_service;
pub mod settings_service;
pub mod share_service;
pub mod smart_album_service;
pub mod thumbnail_service;
pub mod trash_service;
pub mod upload_token;

pub use auth_service::AuthService;
pub use exif_service::ExifService;
pub use ingest_service::IngestService;
pub use migration_progress::{ThroughputMeter, percent_done};
pub use migration_service::MigrationService;
pub use search_service::{BoundingBox, SearchService};
pub use settings_service::{
    AiProviderConfig, AiSettings, AuthSettings, GeneralSettings, RetentionSettings,
    SettingsService, SettingsSnapshot,
};
pub use share_service::ShareService;
pub use smart_album_service::SmartAlbumService;
pub use thumbnail_service::ThumbnailService;
pub use trash_service::TrashService;
pub use upload_token::{UploadSlot, UploadTokenSigner};
