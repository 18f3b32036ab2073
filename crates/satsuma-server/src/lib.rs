mod server;

pub use crate::server::{AppState, router};
