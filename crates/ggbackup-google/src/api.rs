//! Service seams for the Directory and Groups Settings APIs.
//!
//! The fetch routines only see these traits, so the HTTP clients in
//! [`crate::google`] can be swapped for in-memory fakes.

use std::future::Future;
use std::pin::Pin;

use ggbackup_core::JsonObject;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiResult;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One page of `groups.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsPage {
    #[serde(default)]
    pub groups: Vec<JsonObject>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One page of `members.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersPage {
    #[serde(default)]
    pub members: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A members page still to be fetched for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Group key, also used as the correlation id of the sub-request.
    pub group_key: String,
    /// Continuation token; `None` for the first page.
    pub page_token: Option<String>,
}

impl PageRequest {
    /// Request for the first page of a group's members.
    pub fn first(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            page_token: None,
        }
    }

    /// Request for a continuation page.
    pub fn next(group_key: impl Into<String>, page_token: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            page_token: Some(page_token.into()),
        }
    }
}

/// Outcome of one sub-request of a batch.
#[derive(Debug)]
pub struct BatchItem<T> {
    /// Correlation id the sub-request was issued with.
    pub request_id: String,
    pub result: ApiResult<T>,
}

impl<T> BatchItem<T> {
    pub fn new(request_id: impl Into<String>, result: ApiResult<T>) -> Self {
        Self {
            request_id: request_id.into(),
            result,
        }
    }
}

/// The Admin SDK Directory API.
pub trait DirectoryApi: Send + Sync {
    /// Lists one page of the domain's groups.
    fn list_groups<'a>(
        &'a self,
        domain: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<GroupsPage>>;

    /// Lists members for several groups in one batched exchange.
    ///
    /// The outer error covers the exchange as a whole; each item carries the
    /// outcome of its own sub-request. Items may come back in any order.
    fn list_members_batch<'a>(
        &'a self,
        requests: &'a [PageRequest],
    ) -> BoxFuture<'a, ApiResult<Vec<BatchItem<MembersPage>>>>;
}

/// The Groups Settings API.
pub trait GroupsSettingsApi: Send + Sync {
    /// Fetches the settings of several groups in one batched exchange.
    fn get_settings_batch<'a>(
        &'a self,
        group_keys: &'a [String],
    ) -> BoxFuture<'a, ApiResult<Vec<BatchItem<JsonObject>>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_page_without_members_is_empty() {
        let page: MembersPage = serde_json::from_str(r#"{"kind": "admin#directory#members"}"#).unwrap();
        assert!(page.members.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn groups_page_reads_continuation_token() {
        let page: GroupsPage = serde_json::from_str(
            r#"{"groups": [{"email": "a@x.com"}], "nextPageToken": "tok"}"#,
        )
        .unwrap();
        assert_eq!(page.groups.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn page_request_constructors() {
        assert_eq!(PageRequest::first("a@x.com").page_token, None);
        assert_eq!(
            PageRequest::next("a@x.com", "t").page_token.as_deref(),
            Some("t")
        );
    }
}
