pub mod adapters;
pub mod errors;
pub mod ids;
pub mod lecture;
pub mod protocol;
pub mod store;

pub use errors::{AdapterError, PersistenceError, ShapeError};
pub use ids::{LectureId, SessionId};
