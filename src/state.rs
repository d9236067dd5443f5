use crate::admission::AdmissionController;
use crate::blob::BlobStore;
use crate::captcha::CaptchaStore;
use crate::config::Config;
use crate::services::UploadService;
use crate::store::ObjectStore;
use crate::sweeper::Sweeper;
use std::sync::Arc;

/// Shared handles passed to every handler and to the sweeper
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ObjectStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub captcha: Arc<CaptchaStore>,
    pub uploads: Arc<UploadService>,
}

impl AppState {
    pub fn new(config: Config, blobs: Arc<dyn BlobStore>) -> Self {
        let store = Arc::new(ObjectStore::new(config.max_storage));
        let captcha = Arc::new(CaptchaStore::new(config.captcha_enabled, config.captcha_ttl));
        let admission = AdmissionController::new(config.max_object_size, config.clean_interval);
        let uploads = Arc::new(UploadService::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            admission,
            config.ttl,
        ));

        Self {
            config: Arc::new(config),
            store,
            blobs,
            captcha,
            uploads,
        }
    }

    /// Sweeper over this state's store, backing bytes and captchas
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.blobs),
            self.config.ttl,
        )
        .with_captcha(Arc::clone(&self.captcha))
    }
}
