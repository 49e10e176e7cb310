//! Shared application state injected into every handler.

use audiograb_core::{CancellationToken, Pipeline};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Parent of every per-request token; cancelled on shutdown
    pub shutdown: CancellationToken,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        shutdown: CancellationToken,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            pipeline,
            shutdown,
            max_upload_bytes,
        }
    }
}
