pub mod aliyun_driver;
pub mod blob_path;
pub mod config;
pub mod driver;
pub mod local_driver;
pub mod s3_driver;
pub mod storage_manager;

pub use blob_path::BlobPath;
pub use config::{
    LocalDriverConfig, StorageBackendConfig, StorageEntryConfig, StorageSettings,
    validate_storage_id,
};
pub use driver::{BlobStat, ByteStream, StorageCapacity, StorageDriver, StorageError};
pub use local_driver::LocalDriver;
pub use storage_manager::{StorageManager, StorageStats};
