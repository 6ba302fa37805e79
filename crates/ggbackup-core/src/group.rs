//! Group records and the in-memory group map.
//!
//! A [`GroupRecord`] keeps every field the Directory API returned for a group,
//! verbatim, and is enriched in place as settings and member pages arrive.
//! The [`GroupStore`] owns all records of a backup run, keyed by lowercased
//! email address, together with the cached group batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::batch::{MAX_BATCH_SIZE, partition};

/// A JSON object as returned by the Google APIs.
pub type JsonObject = Map<String, Value>;

/// Field holding the accumulated member list of a group.
pub const MEMBERS_FIELD: &str = "members";

/// Normalizes a group email or key into the form used as map key.
pub fn group_key(email: &str) -> String {
    email.to_lowercase()
}

/// One group, as listed by the Directory API and enriched afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupRecord(JsonObject);

impl GroupRecord {
    /// Wraps the fields of a group resource.
    pub fn new(fields: JsonObject) -> Self {
        Self(fields)
    }

    /// Returns the group email as sent by the API (original case).
    pub fn email(&self) -> Option<&str> {
        self.0.get("email").and_then(Value::as_str)
    }

    /// Returns the map key for this record (lowercased email).
    pub fn key(&self) -> Option<String> {
        self.email().map(group_key)
    }

    /// Returns a single field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns all fields.
    pub fn fields(&self) -> &JsonObject {
        &self.0
    }

    /// Overwrites this record's fields with those of `fields`.
    ///
    /// Fields not present in `fields` are left untouched.
    pub fn merge(&mut self, fields: JsonObject) {
        for (name, value) in fields {
            self.0.insert(name, value);
        }
    }

    /// Appends a page of members, creating the member list if needed.
    ///
    /// An empty page still creates the list, so a group whose pages were
    /// all empty ends up with `members == []`.
    pub fn append_members(&mut self, members: Vec<Value>) {
        let entry = self
            .0
            .entry(MEMBERS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(existing) => existing.extend(members),
            other => *other = Value::Array(members),
        }
    }

    /// Returns the accumulated members, if any page was merged.
    pub fn members(&self) -> Option<&[Value]> {
        self.0
            .get(MEMBERS_FIELD)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    /// Consumes the record, returning its fields.
    pub fn into_inner(self) -> JsonObject {
        self.0
    }
}

/// All group records of one backup run.
#[derive(Debug, Default)]
pub struct GroupStore {
    groups: BTreeMap<String, GroupRecord>,
    batches: Option<Vec<Vec<String>>>,
}

impl GroupStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a group listed by the Directory API.
    ///
    /// Returns the key it was stored under, or `None` when the resource has
    /// no email and cannot be keyed.
    pub fn insert(&mut self, fields: JsonObject) -> Option<String> {
        let record = GroupRecord::new(fields);
        let key = record.key()?;
        self.groups.insert(key.clone(), record);
        Some(key)
    }

    /// Looks up a record; `key` is matched case-insensitively.
    pub fn get(&self, key: &str) -> Option<&GroupRecord> {
        self.groups.get(&group_key(key))
    }

    /// Returns true if a record exists for `key` (case-insensitive).
    pub fn contains(&self, key: &str) -> bool {
        self.groups.contains_key(&group_key(key))
    }

    /// Merges settings fields into the record for `key`.
    ///
    /// Returns false when no such record exists; nothing is inserted then.
    pub fn merge_settings(&mut self, key: &str, settings: JsonObject) -> bool {
        match self.groups.get_mut(&group_key(key)) {
            Some(record) => {
                record.merge(settings);
                true
            }
            None => false,
        }
    }

    /// Appends a page of members to the record for `key`.
    ///
    /// Returns false when no such record exists; nothing is inserted then.
    pub fn append_members(&mut self, key: &str, members: Vec<Value>) -> bool {
        match self.groups.get_mut(&group_key(key)) {
            Some(record) => {
                record.append_members(members);
                true
            }
            None => false,
        }
    }

    /// Returns the group keys split into batches of [`MAX_BATCH_SIZE`].
    ///
    /// Computed on first call and cached for the lifetime of the store:
    /// groups inserted afterwards are not part of any batch.
    pub fn group_batches(&mut self) -> &[Vec<String>] {
        let groups = &self.groups;
        self.batches.get_or_insert_with(|| {
            let keys: Vec<String> = groups.keys().cloned().collect();
            partition(&keys, MAX_BATCH_SIZE)
        })
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if no group was listed.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterates over `(key, record)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupRecord)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Borrows the underlying map.
    pub fn groups(&self) -> &BTreeMap<String, GroupRecord> {
        &self.groups
    }

    /// Consumes the store, returning the group map.
    pub fn into_groups(self) -> BTreeMap<String, GroupRecord> {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn group(email: &str, id: &str) -> JsonObject {
        object(json!({ "email": email, "id": id, "name": "Group" }))
    }

    #[test]
    fn insert_keys_by_lowercased_email() {
        let mut store = GroupStore::new();
        let key = store.insert(group("Sales@Example.com", "1"));

        assert_eq!(key.as_deref(), Some("sales@example.com"));
        assert!(store.contains("sales@example.com"));
        assert!(store.contains("SALES@example.com"));
        assert_eq!(
            store.get("sales@example.com").unwrap().email(),
            Some("Sales@Example.com")
        );
    }

    #[test]
    fn insert_without_email_is_rejected() {
        let mut store = GroupStore::new();
        assert!(store.insert(object(json!({ "id": "1" }))).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn reinsert_overwrites_instead_of_duplicating() {
        let mut store = GroupStore::new();
        store.insert(group("a@x.com", "1"));
        store.insert(group("A@x.com", "1"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a@x.com").unwrap().get("id"), Some(&json!("1")));
    }

    #[test]
    fn settings_merge_into_existing_record() {
        let mut store = GroupStore::new();
        store.insert(group("a@x.com", "1"));

        let merged = store.merge_settings(
            "A@x.com",
            object(json!({ "email": "A@x.com", "whoCanJoin": "INVITED_CAN_JOIN" })),
        );

        assert!(merged);
        assert_eq!(store.len(), 1);
        let record = store.get("a@x.com").unwrap();
        assert_eq!(record.get("whoCanJoin"), Some(&json!("INVITED_CAN_JOIN")));
        assert_eq!(record.get("id"), Some(&json!("1")));
        assert_eq!(record.email(), Some("A@x.com"));
    }

    #[test]
    fn settings_for_unknown_group_are_dropped() {
        let mut store = GroupStore::new();
        store.insert(group("a@x.com", "1"));

        assert!(!store.merge_settings("b@x.com", object(json!({ "email": "b@x.com" }))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn members_accumulate_in_page_order() {
        let mut store = GroupStore::new();
        store.insert(group("a@x.com", "1"));

        store.append_members("a@x.com", vec![json!({"email": "m1"}), json!({"email": "m2"})]);
        store.append_members(
            "a@x.com",
            vec![json!({"email": "m3"}), json!({"email": "m4"}), json!({"email": "m5"})],
        );

        let members = store.get("a@x.com").unwrap().members().unwrap();
        let emails: Vec<&str> = members.iter().map(|m| m["email"].as_str().unwrap()).collect();
        assert_eq!(emails, vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn empty_member_page_creates_empty_list() {
        let mut store = GroupStore::new();
        store.insert(group("a@x.com", "1"));
        assert!(store.get("a@x.com").unwrap().members().is_none());

        store.append_members("a@x.com", Vec::new());

        assert_eq!(store.get("a@x.com").unwrap().members(), Some(&[][..]));
    }

    #[test]
    fn group_batches_are_cached() {
        let mut store = GroupStore::new();
        for i in 0..1001 {
            store.insert(group(&format!("g{i:04}@x.com"), &i.to_string()));
        }

        let first: Vec<Vec<String>> = store.group_batches().to_vec();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 1000);
        assert_eq!(first[1], vec!["g1000@x.com".to_string()]);

        store.insert(group("late@x.com", "late"));
        assert_eq!(store.group_batches(), first.as_slice());
        assert_eq!(store.len(), 1002);
    }

    #[test]
    fn record_serializes_as_plain_object() {
        let mut record = GroupRecord::new(group("a@x.com", "1"));
        record.append_members(vec![json!({"email": "m1"})]);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["email"], "a@x.com");
        assert_eq!(value["members"][0]["email"], "m1");
    }
}
