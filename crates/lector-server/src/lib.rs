pub mod client;
pub mod server;
pub mod session;

pub use server::{start, AppState, ServerConfig, ServerHandle, Services};
pub use session::{Flow, Phase, Session, SessionDeps};
