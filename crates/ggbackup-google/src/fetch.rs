//! Group listing and the batched settings and members passes.
//!
//! Every routine runs strictly sequentially: one request or batch is awaited
//! before the next is sent, and each batch's sub-responses are merged into the
//! [`GroupStore`] before moving on. A failed sub-request is logged, recorded in
//! the [`FetchReport`], and skipped; a failed request as a whole aborts.

use ggbackup_core::{GroupStore, MAX_BATCH_SIZE, group_key, partition};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{DirectoryApi, GroupsSettingsApi, PageRequest};
use crate::error::{ApiError, ApiResult};

/// A sub-request that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub group: String,
    pub error: String,
}

/// Outcome of a settings or members pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Sub-requests issued, continuation pages included.
    pub requests: usize,
    /// Sub-responses merged into a group record.
    pub succeeded: usize,
    /// Sub-requests that failed.
    pub failed: Vec<FailedItem>,
    /// Successful sub-responses for a group that is not in the store.
    pub unknown: usize,
}

impl FetchReport {
    /// Returns true if every sub-request was merged.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unknown == 0
    }

    fn record_failure(&mut self, group: &str, error: &ApiError) {
        self.failed.push(FailedItem {
            group: group.to_string(),
            error: error.to_string(),
        });
    }
}

/// Lists every group of `domain` into `store`, following continuation tokens.
///
/// Groups already present are overwritten. Returns the number of groups in
/// the store afterwards.
pub async fn list_groups(
    api: &dyn DirectoryApi,
    domain: &str,
    store: &mut GroupStore,
) -> ApiResult<usize> {
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = api.list_groups(domain, page_token.as_deref()).await?;
        pages += 1;
        debug!("groups page {}: {} groups", pages, page.groups.len());

        for group in page.groups {
            if store.insert(group).is_none() {
                warn!("skipping group without an email address");
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    info!("listed {} groups for {} in {} pages", store.len(), domain, pages);
    Ok(store.len())
}

/// Fetches the settings of every group, one batch per cached group batch.
pub async fn fetch_settings(
    api: &dyn GroupsSettingsApi,
    store: &mut GroupStore,
) -> ApiResult<FetchReport> {
    let batches = store.group_batches().to_vec();
    let mut report = FetchReport::default();

    for (n, batch) in batches.iter().enumerate() {
        debug!("settings batch {}/{}: {} groups", n + 1, batches.len(), batch.len());
        let items = api.get_settings_batch(batch).await?;
        report.requests += batch.len();

        for item in items {
            let settings = match item.result {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(group = %item.request_id, error = %e, "failed to fetch group settings");
                    report.record_failure(&item.request_id, &e);
                    continue;
                }
            };

            let key = settings
                .get("email")
                .and_then(Value::as_str)
                .map(group_key)
                .unwrap_or_else(|| group_key(&item.request_id));

            if store.merge_settings(&key, settings) {
                report.succeeded += 1;
            } else {
                warn!(group = %key, "settings returned for unknown group");
                report.unknown += 1;
            }
        }
    }

    info!(
        "merged settings for {}/{} groups",
        report.succeeded, report.requests
    );
    Ok(report)
}

/// Fetches the members of every group, following continuation pages.
///
/// The first pass requests page one for each cached group batch. Pages that
/// report a continuation token are queued and fetched in further passes,
/// re-batched by [`MAX_BATCH_SIZE`], until no group has pages left.
pub async fn fetch_members(
    api: &dyn DirectoryApi,
    store: &mut GroupStore,
) -> ApiResult<FetchReport> {
    let batches = store.group_batches().to_vec();
    let mut report = FetchReport::default();
    let mut pending: Vec<PageRequest> = Vec::new();

    for (n, batch) in batches.iter().enumerate() {
        debug!("members batch {}/{}: {} groups", n + 1, batches.len(), batch.len());
        let requests: Vec<PageRequest> = batch.iter().map(|k| PageRequest::first(group_key(k))).collect();
        run_members_batch(api, store, &requests, &mut pending, &mut report).await?;
    }

    let mut pass = 0usize;
    while !pending.is_empty() {
        pass += 1;
        let requests = std::mem::take(&mut pending);
        debug!("members continuation pass {}: {} pages", pass, requests.len());

        for chunk in partition(&requests, MAX_BATCH_SIZE) {
            run_members_batch(api, store, &chunk, &mut pending, &mut report).await?;
        }
    }

    info!(
        "fetched {} member pages ({} failed)",
        report.succeeded,
        report.failed.len()
    );
    Ok(report)
}

async fn run_members_batch(
    api: &dyn DirectoryApi,
    store: &mut GroupStore,
    requests: &[PageRequest],
    pending: &mut Vec<PageRequest>,
    report: &mut FetchReport,
) -> ApiResult<()> {
    let items = api.list_members_batch(requests).await?;
    report.requests += requests.len();

    for item in items {
        let page = match item.result {
            Ok(page) => page,
            Err(e) => {
                warn!(group = %item.request_id, error = %e, "failed to fetch group members");
                report.record_failure(&item.request_id, &e);
                continue;
            }
        };

        if !store.append_members(&item.request_id, page.members) {
            warn!(group = %item.request_id, "members returned for unknown group");
            report.unknown += 1;
            continue;
        }
        report.succeeded += 1;

        if let Some(token) = page.next_page_token.filter(|t| !t.is_empty()) {
            pending.push(PageRequest::next(item.request_id, token));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BatchItem, BoxFuture, GroupsPage, MembersPage};
    use ggbackup_core::JsonObject;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn group(email: &str) -> JsonObject {
        object(json!({ "email": email, "id": format!("id-{email}"), "name": email }))
    }

    fn member(email: &str) -> Value {
        json!({ "email": email, "role": "MEMBER", "type": "USER" })
    }

    fn store_with(emails: &[&str]) -> GroupStore {
        let mut store = GroupStore::new();
        for email in emails {
            store.insert(group(email));
        }
        store
    }

    /// Serves listing pages `g1..` and per-group member pages `m1..`.
    #[derive(Default)]
    struct FakeDirectory {
        group_pages: Vec<Vec<JsonObject>>,
        member_pages: HashMap<String, Vec<Vec<Value>>>,
        failing: HashSet<String>,
        /// Request key -> id the sub-response claims to answer.
        answer_as: HashMap<String, String>,
        fail_listing: bool,
        list_calls: Mutex<Vec<Option<String>>>,
        member_calls: Mutex<Vec<PageRequest>>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    fn page_index(token: Option<&str>, prefix: char) -> usize {
        token
            .and_then(|t| t.strip_prefix(prefix))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    impl FakeDirectory {
        fn calls_for(&self, key: &str) -> usize {
            self.member_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.group_key == key)
                .count()
        }

        fn members_page(&self, request: &PageRequest) -> ApiResult<MembersPage> {
            if self.failing.contains(&request.group_key) {
                return Err(ApiError::from_status(
                    404,
                    r#"{"error": {"message": "Resource Not Found: groupKey"}}"#,
                ));
            }
            let pages = self
                .member_pages
                .get(&request.group_key)
                .cloned()
                .unwrap_or_else(|| vec![Vec::new()]);
            let index = page_index(request.page_token.as_deref(), 'm');
            Ok(MembersPage {
                members: pages[index].clone(),
                next_page_token: (index + 1 < pages.len()).then(|| format!("m{}", index + 1)),
            })
        }
    }

    impl DirectoryApi for FakeDirectory {
        fn list_groups<'a>(
            &'a self,
            _domain: &'a str,
            page_token: Option<&'a str>,
        ) -> BoxFuture<'a, ApiResult<GroupsPage>> {
            self.list_calls
                .lock()
                .unwrap()
                .push(page_token.map(String::from));
            let result = if self.fail_listing {
                Err(ApiError::from_status(403, "forbidden"))
            } else {
                let index = page_index(page_token, 'g');
                Ok(GroupsPage {
                    groups: self.group_pages[index].clone(),
                    next_page_token: (index + 1 < self.group_pages.len())
                        .then(|| format!("g{}", index + 1)),
                })
            };
            Box::pin(async move { result })
        }

        fn list_members_batch<'a>(
            &'a self,
            requests: &'a [PageRequest],
        ) -> BoxFuture<'a, ApiResult<Vec<BatchItem<MembersPage>>>> {
            self.batch_sizes.lock().unwrap().push(requests.len());
            self.member_calls
                .lock()
                .unwrap()
                .extend(requests.iter().cloned());
            // Sub-responses come back in reverse to exercise unordered batches.
            let items: Vec<_> = requests
                .iter()
                .rev()
                .map(|r| {
                    let id = self.answer_as.get(&r.group_key).unwrap_or(&r.group_key);
                    BatchItem::new(id.clone(), self.members_page(r))
                })
                .collect();
            Box::pin(async move { Ok(items) })
        }
    }

    #[derive(Default)]
    struct FakeSettings {
        settings: HashMap<String, JsonObject>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl FakeSettings {
        fn for_groups(emails: &[&str]) -> Self {
            let settings = emails
                .iter()
                .map(|email| {
                    (
                        group_key(email),
                        object(json!({
                            "email": email,
                            "whoCanJoin": "CAN_REQUEST_TO_JOIN",
                            "archiveOnly": "false"
                        })),
                    )
                })
                .collect();
            Self {
                settings,
                ..Default::default()
            }
        }
    }

    impl GroupsSettingsApi for FakeSettings {
        fn get_settings_batch<'a>(
            &'a self,
            group_keys: &'a [String],
        ) -> BoxFuture<'a, ApiResult<Vec<BatchItem<JsonObject>>>> {
            self.batch_sizes.lock().unwrap().push(group_keys.len());
            let items: Vec<_> = group_keys
                .iter()
                .map(|key| {
                    let result = self
                        .settings
                        .get(key)
                        .cloned()
                        .ok_or_else(|| ApiError::from_status(404, ""));
                    BatchItem::new(key.clone(), result)
                })
                .collect();
            Box::pin(async move { Ok(items) })
        }
    }

    #[tokio::test]
    async fn listing_follows_every_page() {
        let api = FakeDirectory {
            group_pages: vec![
                vec![group("a@x.com"), group("B@x.com")],
                vec![group("c@x.com")],
                vec![group("d@x.com")],
            ],
            ..Default::default()
        };
        let mut store = GroupStore::new();

        let count = list_groups(&api, "x.com", &mut store).await.unwrap();

        assert_eq!(count, 4);
        assert!(store.contains("b@x.com"));
        assert_eq!(
            *api.list_calls.lock().unwrap(),
            vec![None, Some("g1".to_string()), Some("g2".to_string())]
        );
    }

    #[tokio::test]
    async fn listing_twice_overwrites() {
        let api = FakeDirectory {
            group_pages: vec![vec![group("a@x.com")], vec![group("b@x.com")]],
            ..Default::default()
        };
        let mut store = GroupStore::new();

        list_groups(&api, "x.com", &mut store).await.unwrap();
        let first = store.groups().clone();
        list_groups(&api, "x.com", &mut store).await.unwrap();

        assert_eq!(store.groups(), &first);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn listing_skips_groups_without_email() {
        let api = FakeDirectory {
            group_pages: vec![vec![group("a@x.com"), object(json!({ "id": "orphan" }))]],
            ..Default::default()
        };
        let mut store = GroupStore::new();

        assert_eq!(list_groups(&api, "x.com", &mut store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn listing_error_propagates() {
        let api = FakeDirectory {
            fail_listing: true,
            ..Default::default()
        };
        let mut store = GroupStore::new();

        let err = list_groups(&api, "x.com", &mut store).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn settings_merge_by_lowercased_email() {
        let mut store = store_with(&["a@x.com"]);
        let api = FakeSettings::for_groups(&["A@x.com"]);

        let report = fetch_settings(&api, &mut store).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert!(report.is_complete());
        let record = store.get("a@x.com").unwrap();
        assert_eq!(record.get("whoCanJoin"), Some(&json!("CAN_REQUEST_TO_JOIN")));
        assert_eq!(record.email(), Some("A@x.com"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn settings_failure_does_not_block_batch() {
        let emails = ["g1@x.com", "g2@x.com", "g3@x.com", "g4@x.com", "g5@x.com"];
        let mut store = store_with(&emails);
        let mut api = FakeSettings::for_groups(&emails);
        api.settings.remove("g3@x.com");

        let report = fetch_settings(&api, &mut store).await.unwrap();

        assert_eq!(*api.batch_sizes.lock().unwrap(), vec![5]);
        assert_eq!(report.requests, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].group, "g3@x.com");
        assert!(store.get("g3@x.com").unwrap().get("whoCanJoin").is_none());
        for email in ["g1@x.com", "g2@x.com", "g4@x.com", "g5@x.com"] {
            assert!(store.get(email).unwrap().get("whoCanJoin").is_some());
        }
    }

    #[tokio::test]
    async fn settings_for_unknown_group_are_counted() {
        let mut store = store_with(&["a@x.com"]);
        let mut api = FakeSettings::default();
        api.settings.insert(
            "a@x.com".to_string(),
            object(json!({ "email": "renamed@x.com", "whoCanJoin": "ALL_IN_DOMAIN_CAN_JOIN" })),
        );

        let report = fetch_settings(&api, &mut store).await.unwrap();

        assert_eq!(report.unknown, 1);
        assert_eq!(report.succeeded, 0);
        assert!(!report.is_complete());
        assert_eq!(store.len(), 1);
        assert!(!store.contains("renamed@x.com"));
    }

    #[tokio::test]
    async fn settings_without_email_use_request_key() {
        let mut store = store_with(&["a@x.com"]);
        let mut api = FakeSettings::default();
        api.settings.insert(
            "a@x.com".to_string(),
            object(json!({ "whoCanJoin": "INVITED_CAN_JOIN" })),
        );

        let report = fetch_settings(&api, &mut store).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(
            store.get("a@x.com").unwrap().get("whoCanJoin"),
            Some(&json!("INVITED_CAN_JOIN"))
        );
    }

    #[tokio::test]
    async fn settings_use_one_batch_per_thousand_groups() {
        let emails: Vec<String> = (0..1001).map(|i| format!("g{i:04}@x.com")).collect();
        let refs: Vec<&str> = emails.iter().map(String::as_str).collect();
        let mut store = store_with(&refs);
        let api = FakeSettings::for_groups(&refs);

        let report = fetch_settings(&api, &mut store).await.unwrap();

        assert_eq!(*api.batch_sizes.lock().unwrap(), vec![1000, 1]);
        assert_eq!(report.succeeded, 1001);
    }

    #[tokio::test]
    async fn members_accumulate_across_pages() {
        let mut store = store_with(&["a@x.com"]);
        let mut api = FakeDirectory::default();
        api.member_pages.insert(
            "a@x.com".to_string(),
            vec![
                vec![member("m1"), member("m2")],
                vec![member("m3"), member("m4"), member("m5")],
            ],
        );

        let report = fetch_members(&api, &mut store).await.unwrap();

        let members = store.get("a@x.com").unwrap().members().unwrap();
        let emails: Vec<&str> = members.iter().map(|m| m["email"].as_str().unwrap()).collect();
        assert_eq!(emails, vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(report.requests, 2);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn n_pages_take_exactly_n_calls() {
        let mut store = store_with(&["a@x.com", "b@x.com"]);
        let mut api = FakeDirectory::default();
        api.member_pages.insert(
            "a@x.com".to_string(),
            (1..=4).map(|i| vec![member(&format!("a{i}"))]).collect(),
        );

        fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(api.calls_for("a@x.com"), 4);
        assert_eq!(api.calls_for("b@x.com"), 1);
        let tokens: Vec<Option<String>> = api
            .member_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.group_key == "a@x.com")
            .map(|r| r.page_token.clone())
            .collect();
        assert_eq!(
            tokens,
            vec![
                None,
                Some("m1".to_string()),
                Some("m2".to_string()),
                Some("m3".to_string())
            ]
        );
        assert_eq!(store.get("a@x.com").unwrap().members().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn group_without_members_gets_empty_list() {
        let mut store = store_with(&["empty@x.com"]);
        let api = FakeDirectory::default();

        fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(store.get("empty@x.com").unwrap().members(), Some(&[][..]));
    }

    #[tokio::test]
    async fn members_failure_does_not_block_batch() {
        let emails = ["g1@x.com", "g2@x.com", "g3@x.com", "g4@x.com", "g5@x.com"];
        let mut store = store_with(&emails);
        let mut api = FakeDirectory::default();
        for email in emails {
            api.member_pages
                .insert(email.to_string(), vec![vec![member("someone")]]);
        }
        api.failing.insert("g2@x.com".to_string());

        let report = fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].group, "g2@x.com");
        assert!(report.failed[0].error.contains("Resource Not Found"));
        assert!(store.get("g2@x.com").unwrap().members().is_none());
        for email in ["g1@x.com", "g3@x.com", "g4@x.com", "g5@x.com"] {
            assert_eq!(store.get(email).unwrap().members().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn members_for_unknown_group_are_counted() {
        let mut store = store_with(&["a@x.com"]);
        let mut api = FakeDirectory::default();
        api.member_pages.insert(
            "a@x.com".to_string(),
            vec![vec![member("amy@x.com")], vec![member("bob@x.com")]],
        );
        api.answer_as
            .insert("a@x.com".to_string(), "ghost@x.com".to_string());

        let report = fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(report.requests, 1);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.succeeded, 0);
        assert!(report.failed.is_empty());
        assert!(!report.is_complete());

        // Nothing inserted, nothing appended, no continuation page queued.
        assert_eq!(store.len(), 1);
        assert!(!store.contains("ghost@x.com"));
        assert!(store.get("a@x.com").unwrap().members().is_none());
        assert_eq!(api.calls_for("a@x.com"), 1);
        assert_eq!(api.calls_for("ghost@x.com"), 0);
    }

    #[tokio::test]
    async fn continuation_pages_are_rebatched() {
        let emails: Vec<String> = (0..1001).map(|i| format!("g{i:04}@x.com")).collect();
        let refs: Vec<&str> = emails.iter().map(String::as_str).collect();
        let mut store = store_with(&refs);
        let mut api = FakeDirectory::default();
        for email in &emails {
            api.member_pages
                .insert(email.clone(), vec![vec![member("p1")], vec![member("p2")]]);
        }

        let report = fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(*api.batch_sizes.lock().unwrap(), vec![1000, 1, 1000, 1]);
        assert_eq!(report.requests, 2002);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn members_use_lowercased_keys() {
        let mut store = store_with(&["Mixed@X.com"]);
        let api = FakeDirectory::default();

        fetch_members(&api, &mut store).await.unwrap();

        assert_eq!(api.calls_for("mixed@x.com"), 1);
    }
}
