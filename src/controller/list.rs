use crate::api::{ApiError, ListPayload, RawRecord, RecordId};
use crate::config::StalePolicy;
use crate::fetch_gate::{FetchCacheKey, FetchGuardState, ScopeId};
use crate::pagination::PaginationState;
use crate::timestamp::{self, RawTimestamp};

use super::FetchTicket;

/// One row of the top-level table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRecord {
    pub id: RecordId,
    pub display_name: String,
    /// Server-side count; valid even when the children were never fetched.
    pub child_count: u64,
    pub created_at_raw: RawTimestamp,
    pub created_at_display: String,
}

/// One row of an expanded parent's nested table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRecord {
    pub id: RecordId,
    pub parent_id: RecordId,
    pub display_name: String,
    pub created_at_raw: RawTimestamp,
    pub created_at_display: String,
}

pub trait ListRow: Sized {
    fn from_raw(raw: RawRecord, scope: ScopeId) -> Self;
    fn id(&self) -> RecordId;
    fn display_name(&self) -> &str;
}

impl ListRow for ParentRecord {
    fn from_raw(raw: RawRecord, _scope: ScopeId) -> Self {
        let created_at_display = timestamp::normalize(&raw.created_at);
        Self {
            id: raw.id,
            display_name: raw.display_name,
            child_count: raw.child_count.unwrap_or_default(),
            created_at_raw: raw.created_at,
            created_at_display,
        }
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl ListRow for ChildRecord {
    fn from_raw(raw: RawRecord, scope: ScopeId) -> Self {
        let created_at_display = timestamp::normalize(&raw.created_at);
        // The list's scope is authoritative; some backends omit the parent id.
        let parent_id = match scope {
            ScopeId::Parent(parent_id) => parent_id,
            ScopeId::Top => raw.parent_id.unwrap_or_default(),
        };
        Self {
            id: raw.id,
            parent_id,
            display_name: raw.display_name,
            created_at_raw: raw.created_at,
            created_at_display,
        }
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    Idle,
    Fetching,
    Error,
    Mutating,
}

#[derive(Debug)]
pub(crate) enum Settled {
    Applied,
    Failed(ApiError),
    Stale,
}

/// Rows, pagination and fetch bookkeeping for one list instance.
#[derive(Debug, Clone)]
pub struct ResourceList<R> {
    rows: Vec<R>,
    pagination: PaginationState,
    guard: FetchGuardState,
    phase: ListPhase,
    newest_sequence: Option<u64>,
    awaiting: Option<u64>,
    last_error: Option<String>,
}

impl<R: ListRow> ResourceList<R> {
    pub fn new(page_size: u32) -> Self {
        Self {
            rows: Vec::new(),
            pagination: PaginationState::new(page_size),
            guard: FetchGuardState::default(),
            phase: ListPhase::Idle,
            newest_sequence: None,
            awaiting: None,
            last_error: None,
        }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn row(&self, id: RecordId) -> Option<&R> {
        self.rows.iter().find(|row| row.id() == id)
    }

    pub fn pagination(&self) -> PaginationState {
        self.pagination
    }

    pub fn guard(&self) -> &FetchGuardState {
        &self.guard
    }

    pub fn phase(&self) -> ListPhase {
        self.phase
    }

    /// True while the newest request for this list has not settled.
    pub fn is_loading(&self) -> bool {
        self.awaiting.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn invalidate(&mut self) {
        self.guard.invalidate();
    }

    pub(crate) fn begin_mutation(&mut self) {
        self.phase = ListPhase::Mutating;
    }

    pub(crate) fn finish_mutation(&mut self) {
        if self.phase == ListPhase::Mutating {
            self.phase = ListPhase::Idle;
        }
    }

    /// Registers a new request if the guard allows it.
    pub(crate) fn try_begin(&mut self, key: &FetchCacheKey, sequence: u64) -> bool {
        if self.phase == ListPhase::Mutating {
            return false;
        }
        if !self.guard.should_fetch(key) {
            return false;
        }
        self.guard.begin();
        self.phase = ListPhase::Fetching;
        self.newest_sequence = Some(sequence);
        self.awaiting = Some(sequence);
        true
    }

    pub(crate) fn settle(
        &mut self,
        ticket: &FetchTicket,
        result: Result<ListPayload, ApiError>,
        policy: StalePolicy,
    ) -> Settled {
        let newest = self.newest_sequence == Some(ticket.sequence);
        if !newest && policy == StalePolicy::Discard {
            match &result {
                Ok(_) => tracing::debug!(
                    scope = %ticket.key.scope,
                    sequence = ticket.sequence,
                    "discarding stale response"
                ),
                Err(err) => tracing::warn!(
                    ?err,
                    scope = %ticket.key.scope,
                    sequence = ticket.sequence,
                    "stale request failed"
                ),
            }
            return Settled::Stale;
        }
        if self.awaiting == Some(ticket.sequence) {
            self.awaiting = None;
        }
        match result {
            Ok(payload) => {
                self.guard.end(ticket.key, true);
                self.pagination = PaginationState::reconcile_after_fetch(&payload.meta());
                let scope = ticket.key.scope;
                self.rows = payload
                    .items
                    .into_iter()
                    .map(|raw| R::from_raw(raw, scope))
                    .collect();
                self.phase = ListPhase::Idle;
                self.last_error = None;
                Settled::Applied
            }
            Err(err) => {
                self.guard.end(ticket.key, false);
                self.phase = ListPhase::Error;
                self.last_error = Some(err.user_message());
                Settled::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ListQuery, ResourceKind, Scope};
    use assert_matches::assert_matches;

    fn ticket(page: u32, sequence: u64) -> FetchTicket {
        FetchTicket {
            scope: Scope::top(ResourceKind::Category),
            key: FetchCacheKey::new(ScopeId::Top, page, 2),
            query: ListQuery::page(page, 2),
            sequence,
        }
    }

    fn payload(page: u32, names: &[&str]) -> ListPayload {
        ListPayload {
            items: names
                .iter()
                .enumerate()
                .map(|(index, name)| RawRecord {
                    id: index as RecordId + 1,
                    display_name: name.to_string(),
                    parent_id: None,
                    child_count: Some(3),
                    created_at: RawTimestamp::from("1733275564"),
                })
                .collect(),
            total: 5,
            page,
            limit: 2,
        }
    }

    #[test]
    fn applied_payload_normalizes_rows_and_pagination() {
        let mut list = ResourceList::<ParentRecord>::new(2);
        let ticket = ticket(2, 1);
        assert!(list.try_begin(&ticket.key, 1));
        assert!(list.is_loading());
        assert_eq!(list.phase(), ListPhase::Fetching);

        let settled = list.settle(&ticket, Ok(payload(2, &["a", "b"])), StalePolicy::Discard);
        assert_matches!(settled, Settled::Applied);
        assert!(!list.is_loading());
        assert_eq!(list.phase(), ListPhase::Idle);
        assert_eq!(list.rows().len(), 2);
        assert_eq!(list.rows()[0].created_at_display, "04/12/2024");
        assert_eq!(list.rows()[0].child_count, 3);
        assert_eq!(list.pagination().current_page, 2);
        assert_eq!(list.pagination().total_items, 5);
        assert_eq!(list.guard().last_fetched_key(), Some(&ticket.key));
    }

    #[test]
    fn failure_keeps_previous_rows_and_clears_key() {
        let mut list = ResourceList::<ParentRecord>::new(2);
        let first = ticket(1, 1);
        list.try_begin(&first.key, 1);
        list.settle(&first, Ok(payload(1, &["a"])), StalePolicy::Discard);

        let second = ticket(2, 2);
        assert!(list.try_begin(&second.key, 2));
        let settled = list.settle(
            &second,
            Err(ApiError::Network("down".into())),
            StalePolicy::Discard,
        );
        assert_matches!(settled, Settled::Failed(ApiError::Network(_)));
        assert_eq!(list.phase(), ListPhase::Error);
        assert_eq!(list.rows().len(), 1);
        assert_eq!(list.pagination().current_page, 1);
        assert!(!list.is_loading());
        assert_eq!(list.guard().last_fetched_key(), None);
        assert!(list.last_error().is_some());
    }

    #[test]
    fn stale_responses_are_discarded_by_default() {
        let mut list = ResourceList::<ParentRecord>::new(2);
        let older = ticket(2, 1);
        list.try_begin(&older.key, 1);
        list.invalidate();
        let newer = ticket(3, 2);
        assert!(list.try_begin(&newer.key, 2));

        list.settle(&newer, Ok(payload(3, &["c"])), StalePolicy::Discard);
        let settled = list.settle(&older, Ok(payload(2, &["a", "b"])), StalePolicy::Discard);
        assert_matches!(settled, Settled::Stale);
        assert_eq!(list.pagination().current_page, 3);
        assert_eq!(list.rows()[0].display_name, "c");
        assert_eq!(list.guard().last_fetched_key(), Some(&newer.key));
    }

    #[test]
    fn last_arrival_wins_when_configured() {
        let mut list = ResourceList::<ParentRecord>::new(2);
        let older = ticket(2, 1);
        list.try_begin(&older.key, 1);
        list.invalidate();
        let newer = ticket(3, 2);
        list.try_begin(&newer.key, 2);

        list.settle(&newer, Ok(payload(3, &["c"])), StalePolicy::LastArrivalWins);
        let settled = list.settle(&older, Ok(payload(2, &["a", "b"])), StalePolicy::LastArrivalWins);
        assert_matches!(settled, Settled::Applied);
        assert_eq!(list.pagination().current_page, 2);
    }

    #[test]
    fn mutating_list_refuses_fetches() {
        let mut list = ResourceList::<ChildRecord>::new(2);
        list.begin_mutation();
        assert!(!list.try_begin(&FetchCacheKey::new(ScopeId::Parent(1), 1, 2), 1));
        list.finish_mutation();
        assert_eq!(list.phase(), ListPhase::Idle);
        assert!(list.try_begin(&FetchCacheKey::new(ScopeId::Parent(1), 1, 2), 1));
    }

    #[test]
    fn child_rows_take_parent_from_scope() {
        let raw = RawRecord {
            id: 9,
            display_name: "Pipes".into(),
            parent_id: None,
            child_count: None,
            created_at: RawTimestamp::Missing,
        };
        let child = ChildRecord::from_raw(raw, ScopeId::Parent(4));
        assert_eq!(child.parent_id, 4);
        assert_eq!(child.created_at_display, "N/A");
    }
}
