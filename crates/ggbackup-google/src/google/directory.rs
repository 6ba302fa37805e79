//! Admin SDK Directory API client (groups and members).

use tracing::debug;

use crate::api::{BatchItem, BoxFuture, DirectoryApi, GroupsPage, MembersPage, PageRequest};
use crate::error::{ApiError, ApiResult};

use super::access::AccessToken;
use super::batch::{self, BatchRequest};

/// HTTP client for the Directory API.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    api_base: String,
    token: AccessToken,
}

impl DirectoryClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: AccessToken) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token,
        }
    }

    fn batch_endpoint(&self) -> String {
        format!("{}/batch/admin/directory_v1", self.api_base)
    }

    async fn fetch_groups_page(
        &self,
        domain: &str,
        page_token: Option<&str>,
    ) -> ApiResult<GroupsPage> {
        let url = format!("{}/admin/directory/v1/groups", self.api_base);
        let mut query = vec![("domain", domain)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        debug!("listing groups for {} (page token: {:?})", domain, page_token);

        let response = self
            .token
            .send(|bearer| self.http.get(&url).bearer_auth(bearer).query(&query))
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::invalid_response(format!("failed to parse groups page: {}", e)))
    }
}

/// Path of a `members.list` call, relative to the API host.
fn members_path(request: &PageRequest) -> String {
    let mut path = format!(
        "/admin/directory/v1/groups/{}/members?alt=json",
        urlencoding::encode(&request.group_key)
    );
    if let Some(token) = &request.page_token {
        path.push_str("&pageToken=");
        path.push_str(&urlencoding::encode(token));
    }
    path
}

impl DirectoryApi for DirectoryClient {
    fn list_groups<'a>(
        &'a self,
        domain: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<GroupsPage>> {
        Box::pin(self.fetch_groups_page(domain, page_token))
    }

    fn list_members_batch<'a>(
        &'a self,
        requests: &'a [PageRequest],
    ) -> BoxFuture<'a, ApiResult<Vec<BatchItem<MembersPage>>>> {
        Box::pin(async move {
            let mut batch = BatchRequest::new();
            for request in requests {
                batch.add(request.group_key.clone(), members_path(request));
            }
            let endpoint = self.batch_endpoint();
            batch::execute(&self.http, &endpoint, &self.token, batch).await
        })
    }
}
