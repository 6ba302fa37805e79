//! Groups Settings API client.

use ggbackup_core::JsonObject;

use crate::api::{BatchItem, BoxFuture, GroupsSettingsApi};

use super::access::AccessToken;
use super::batch::{self, BatchRequest};

/// HTTP client for the Groups Settings API.
#[derive(Debug, Clone)]
pub struct GroupsSettingsClient {
    http: reqwest::Client,
    api_base: String,
    token: AccessToken,
}

impl GroupsSettingsClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: AccessToken) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token,
        }
    }
}

fn settings_path(group_key: &str) -> String {
    format!(
        "/groups/v1/groups/{}?alt=json",
        urlencoding::encode(group_key)
    )
}

impl GroupsSettingsApi for GroupsSettingsClient {
    fn get_settings_batch<'a>(
        &'a self,
        group_keys: &'a [String],
    ) -> BoxFuture<'a, crate::ApiResult<Vec<BatchItem<JsonObject>>>> {
        Box::pin(async move {
            let mut batch = BatchRequest::new();
            for key in group_keys {
                batch.add(key.clone(), settings_path(key));
            }
            let endpoint = format!("{}/batch/groupssettings/v1", self.api_base);
            batch::execute(&self.http, &endpoint, &self.token, batch).await
        })
    }
}
