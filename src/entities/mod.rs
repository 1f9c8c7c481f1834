pub mod ai_queue;
pub mod album;
pub mod embedding;
pub mod image;
pub mod migration;
pub mod setting;
pub mod share;
pub mod smart_album;
pub mod tag;

pub use ai_queue::{AiItemStatus, AiQueue, AiQueueStatus, AiTaskItem, AiTaskType};
pub use album::{Album, AlbumWithCount};
pub use embedding::{Embedding, EmbeddingPoint, TagEmbedding};
pub use image::{Image, ImageExif, NewImage};
pub use migration::{
    MigrationFileRecord, MigrationFilter, MigrationRecordStatus, MigrationStatus, MigrationTask,
    MigrationType,
};
pub use setting::{SettingCategory, SettingRow};
pub use share::Share;
pub use smart_album::{SmartAlbumTask, SmartAlbumTaskStatus};
pub use tag::{Tag, TagWithCount};
