//! Shared application state

use std::sync::Arc;

use amber_core::BlobService;
use amber_store::BlobStore;
use ipnet::IpNet;

/// State threaded through every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<BlobStore>,
    pub service: Arc<BlobService>,
    /// Networks allowed to use PUT /upload and DELETE
    pub upload_nets: Arc<Vec<IpNet>>,
}

impl AppState {
    pub fn new(store: Arc<BlobStore>, service: Arc<BlobService>, upload_nets: Vec<IpNet>) -> Self {
        Self {
            store,
            service,
            upload_nets: Arc::new(upload_nets),
        }
    }
}
