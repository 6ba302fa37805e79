//! Google Groups backup over the Admin SDK Directory and Groups Settings APIs.
//!
//! - [`GroupBackup`] - orchestrates credentials, the session, and the fetch passes
//! - [`DirectoryApi`] / [`GroupsSettingsApi`] - the service seams
//! - [`fetch`] - group listing and the batched settings and members passes
//! - [`ApiError`] - error types for API operations

pub mod api;
pub mod error;
pub mod fetch;
pub mod google;
pub mod session;

pub use api::{
    BatchItem, BoxFuture, DirectoryApi, GroupsPage, GroupsSettingsApi, MembersPage, PageRequest,
};
pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use fetch::{FailedItem, FetchReport};
pub use session::{GroupBackup, Services, Session};
