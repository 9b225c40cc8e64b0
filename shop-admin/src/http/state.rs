use std::fmt;
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::images::{ImageHost, StagingArea};
use crate::store::Store;

/// Everything a handler needs. Collaborators are injected at startup so tests
/// can swap in an in-memory store and a fake image host.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<Authenticator>,
    pub images: Arc<dyn ImageHost>,
    pub staging: StagingArea,
    pub max_upload_bytes: usize,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("auth", &self.auth)
            .field("staging", &self.staging)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}
