use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::api::SortDirection;

/// Action reported by the table component alongside a change event.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TableAction {
    Paginate,
    Sort,
    Filter,
    Expand,
    Collapse,
    #[strum(default)]
    Unknown(String),
}

impl TableAction {
    /// Blank or missing strings mean "no action reported".
    pub fn from_raw(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.parse()
                .unwrap_or_else(|_| TableAction::Unknown(raw.to_string())),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fetch,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEvent {
    pub action: Option<TableAction>,
    pub pagination_changed: bool,
    pub sort_changed: bool,
}

/// Decides whether a table change warrants a network fetch. Defaults to
/// `Ignore`: expanding or collapsing a row must never refetch the parent list,
/// and the table component does not reliably report those actions.
pub fn classify(event: &TableEvent) -> Decision {
    if matches!(
        event.action,
        Some(TableAction::Expand | TableAction::Collapse)
    ) {
        return Decision::Ignore;
    }
    if !event.pagination_changed && !event.sort_changed {
        return Decision::Ignore;
    }
    match &event.action {
        None => Decision::Ignore,
        Some(TableAction::Paginate | TableAction::Sort) => Decision::Fetch,
        Some(
            TableAction::Filter
            | TableAction::Expand
            | TableAction::Collapse
            | TableAction::Unknown(_),
        ) => Decision::Ignore,
    }
}

/// Sort order as the table component names it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Ascend,
    Descend,
}

impl SortOrder {
    pub fn direction(self) -> SortDirection {
        match self {
            SortOrder::Ascend => SortDirection::Asc,
            SortOrder::Descend => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    pub field: Option<String>,
    pub order: Option<SortOrder>,
}

impl Sorter {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: Some(field.into()),
            order: Some(order),
        }
    }

    /// A sorter without an order is the table's "unsorted" state.
    pub fn is_active(&self) -> bool {
        self.field.is_some() && self.order.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub current: u32,
    pub page_size: u32,
}

/// Raw change notification from the table component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChange {
    pub pagination: PageRequest,
    #[serde(default)]
    pub sorter: Sorter,
    #[serde(default)]
    pub action: Option<String>,
}

impl TableChange {
    pub fn paginate(current: u32, page_size: u32) -> Self {
        Self {
            pagination: PageRequest { current, page_size },
            sorter: Sorter::default(),
            action: Some("paginate".into()),
        }
    }
}
