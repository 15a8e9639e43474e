//! Contract with the resource backend.
//!
//! The controller only ever talks to a [`ResourceApi`]. Transports that return
//! loosely shaped JSON go through [`decode_list_response`] once, at this
//! boundary, so everything above sees a single [`ListPayload`] shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::pagination::PageMeta;
use crate::timestamp::RawTimestamp;

mod decode;
#[cfg(test)]
pub(crate) mod fake;

pub use decode::decode_list_response;

pub type RecordId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Category,
    Subcategory,
    Company,
    Job,
}

impl ResourceKind {
    /// Kind whose records hang off this one, if any.
    pub fn child_kind(self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Category => Some(ResourceKind::Subcategory),
            ResourceKind::Company => Some(ResourceKind::Job),
            ResourceKind::Subcategory | ResourceKind::Job => None,
        }
    }

    pub fn parent_kind(self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Subcategory => Some(ResourceKind::Category),
            ResourceKind::Job => Some(ResourceKind::Company),
            ResourceKind::Category | ResourceKind::Company => None,
        }
    }

    /// Draft field naming the owning record when a nested kind is created
    /// from a flat screen, e.g. `companyId` for a job.
    pub fn owner_field(self) -> Option<String> {
        self.parent_kind()
            .map(|parent| format!("{}Id", parent.label()))
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Category => "category",
            ResourceKind::Subcategory => "subcategory",
            ResourceKind::Company => "company",
            ResourceKind::Job => "job",
        }
    }

    pub fn plural_label(self) -> &'static str {
        match self {
            ResourceKind::Category => "categories",
            ResourceKind::Subcategory => "subcategories",
            ResourceKind::Company => "companies",
            ResourceKind::Job => "jobs",
        }
    }
}

/// One administration screen: a parent table and, optionally, the child
/// table shown when a row is expanded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Screen {
    #[default]
    Categories,
    Companies,
    Jobs,
}

impl Screen {
    pub fn parent_kind(self) -> ResourceKind {
        match self {
            Screen::Categories => ResourceKind::Category,
            Screen::Companies => ResourceKind::Company,
            Screen::Jobs => ResourceKind::Job,
        }
    }

    /// The jobs screen is a flat listing even though jobs belong to companies.
    pub fn child_kind(self) -> Option<ResourceKind> {
        match self {
            Screen::Categories | Screen::Companies => self.parent_kind().child_kind(),
            Screen::Jobs => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Screen::Categories => "Categories",
            Screen::Companies => "Companies",
            Screen::Jobs => "Jobs",
        }
    }
}

/// Which collection a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub kind: ResourceKind,
    pub parent_id: Option<RecordId>,
}

impl Scope {
    pub fn top(kind: ResourceKind) -> Self {
        Self {
            kind,
            parent_id: None,
        }
    }

    pub fn children(kind: ResourceKind, parent_id: RecordId) -> Self {
        Self {
            kind,
            parent_id: Some(parent_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_by: Option<String>,
    pub order: Option<SortDirection>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            sort_by: None,
            order: None,
            search: None,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// A record exactly as the backend reports it; display fields are derived later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: RecordId,
    #[serde(alias = "name", alias = "title", alias = "display_name")]
    pub display_name: String,
    #[serde(default, alias = "parent_id")]
    pub parent_id: Option<RecordId>,
    #[serde(
        default,
        alias = "child_count",
        alias = "subcategoryCount",
        alias = "jobCount"
    )]
    pub child_count: Option<u64>,
    #[serde(default, alias = "created_at")]
    pub created_at: RawTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListPayload {
    pub items: Vec<RawRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl ListPayload {
    pub fn meta(&self) -> PageMeta {
        PageMeta {
            page: self.page,
            limit: self.limit,
            total: self.total,
        }
    }
}

/// Form payload for create and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

const NETWORK_MESSAGE: &str = "Unable to reach the server. Showing the last loaded data.";
const SERVER_MESSAGE: &str = "The server could not complete the request. Please try again.";
const VALIDATION_FALLBACK: &str = "The request was rejected. Please check the form and try again.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request rejected with status {status}")]
    Validation {
        status: u16,
        message: Option<String>,
    },
    #[error("server failure with status {status}")]
    Server {
        status: u16,
        message: Option<String>,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Classifies a transport status code. Anything outside 4xx is treated as
    /// a server failure.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let message = message.filter(|text| !text.trim().is_empty());
        match status {
            400..=499 => ApiError::Validation { status, message },
            _ => ApiError::Server { status, message },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            status: 422,
            message: Some(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Validation {
            status: 404,
            message: Some(message.into()),
        }
    }

    /// Text shown to the user. Only validation failures carry server text.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => NETWORK_MESSAGE.to_string(),
            ApiError::Server { .. } | ApiError::Malformed(_) => SERVER_MESSAGE.to_string(),
            ApiError::Validation { message, .. } => message
                .clone()
                .unwrap_or_else(|| VALIDATION_FALLBACK.to_string()),
        }
    }
}

/// Resource backend consumed by the controller. Implementations are free to
/// suspend at every call; none of them are cancelled once issued.
#[allow(async_fn_in_trait)]
pub trait ResourceApi {
    async fn list(&self, scope: &Scope, query: &ListQuery) -> Result<ListPayload, ApiError>;

    async fn create(&self, scope: &Scope, draft: &RecordDraft) -> Result<RawRecord, ApiError>;

    async fn update(
        &self,
        scope: &Scope,
        id: RecordId,
        draft: &RecordDraft,
    ) -> Result<RawRecord, ApiError>;

    async fn delete(&self, scope: &Scope, id: RecordId) -> Result<(), ApiError>;
}
