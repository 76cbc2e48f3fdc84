pub mod braindrive;

use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::TransportBox;

pub struct BackendManager {}

impl BackendManager {
    pub fn get() -> Result<TransportBox> {
        let url = Config::get(ConfigKey::ApiURL);
        if url.is_empty() {
            bail!("No BrainDrive API URL configured. Set `api-url` in the config file or pass --api-url.");
        }

        return Ok(Arc::new(braindrive::BrainDrive::default()));
    }
}
