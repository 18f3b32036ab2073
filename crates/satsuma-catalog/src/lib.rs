mod client;
mod error;
mod model;

pub use crate::client::{CatalogFetcher, HttpCatalogClient};
pub use crate::error::CatalogError;
pub use crate::model::{Selection, TrackNode, flatten_tree, valid_catalog_id};
