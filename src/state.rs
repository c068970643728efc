use std::sync::Arc;

use crate::auth::{PasswordFile, Sessions};
use crate::config::Config;
use crate::err::Error;
use crate::store::RecordStore;

pub struct AppState {
    pub store: RecordStore,
    pub sessions: Sessions,
    pub passwords: PasswordFile,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, Error> {
        let store = RecordStore::open(config.data_dir.clone()).await?;
        let sessions = Sessions::new(config.session_max_age)?;
        let passwords = PasswordFile::new(config.password_file.clone());

        Ok(Arc::new(Self {
            store,
            sessions,
            passwords,
            config,
        }))
    }
}
