pub mod assets;
pub mod cache;
pub mod database;
pub mod error;
pub mod lectures;
pub mod schema;

pub use assets::SqliteAssetStore;
pub use cache::CachedLectureStore;
pub use database::Database;
pub use error::StoreError;
pub use lectures::SqliteLectureStore;
