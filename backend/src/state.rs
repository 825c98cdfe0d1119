use crate::auth::service::AuthService;
use crate::inference::ClassifierHandle;
use crate::storage::uploads::UploadStore;

/// Everything a request handler needs, built once at startup.
#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: AuthService,
    pub uploads: UploadStore,
    pub classifier: ClassifierHandle,
}

impl AppState {
    pub fn new(auth: AuthService, uploads: UploadStore, classifier: ClassifierHandle) -> Self {
        Self {
            auth,
            uploads,
            classifier,
        }
    }
}
