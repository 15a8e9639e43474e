//! Per-screen list controller.
//!
//! A [`ListController`] owns the parent list of one screen, the child lists of
//! every row that has ever been expanded, the search and sort state and the
//! edit overlay. Fetches are split in two halves: a `request_*` call asks the
//! fetch guard for permission and hands out a [`FetchTicket`], and [`apply`]
//! takes the ticket back together with the backend's answer. The async
//! [`fetch`] helper glues both halves around a [`ResourceApi`] call.
//!
//! [`apply`]: ListController::apply
//! [`fetch`]: ListController::fetch

use std::sync::Arc;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};

use crate::api::{ApiError, ListPayload, ListQuery, RecordDraft, RecordId, ResourceApi, Scope, Screen};
use crate::config::{AdminConfig, StalePolicy};
use crate::fetch_gate::{FetchCacheKey, ScopeId};
use crate::notify::{ErrorAnnouncer, Notice, NoticeSink, DEFAULT_SUPPRESS_WINDOW};
use crate::pagination::PaginationState;
use crate::table_event::{classify, Decision, Sorter, TableAction, TableChange, TableEvent};

mod list;
mod mutation;

pub use list::{ChildRecord, ListPhase, ListRow, ParentRecord, ResourceList};
pub use mutation::{MutationOrchestrator, RefreshTargets};

use list::Settled;

/// Permission to run one list request. Must be handed back to
/// [`ListController::apply`] with whatever the backend answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub scope: Scope,
    pub key: FetchCacheKey,
    pub query: ListQuery,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    Create,
    Edit(RecordId),
}

/// The open create/edit form.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOverlay {
    pub scope: ScopeId,
    pub mode: OverlayMode,
    pub draft: RecordDraft,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub page_size: u32,
    pub child_page_size: u32,
    pub max_page_size: u32,
    pub stale_policy: StalePolicy,
    pub refresh_parent_on_child_mutation: bool,
    pub suppress_window: Duration,
    pub default_sort: Sorter,
}

impl ControllerSettings {
    pub fn from_config(config: &AdminConfig) -> Self {
        let lists = &config.lists;
        Self {
            page_size: lists.page_size,
            child_page_size: lists.child_page_size,
            max_page_size: lists.max_page_size,
            stale_policy: lists.stale_responses,
            refresh_parent_on_child_mutation: lists.refresh_parent_on_child_mutation,
            suppress_window: config.notices.suppress_window,
            default_sort: lists.default_sort.clone(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            child_page_size: 5,
            max_page_size: 100,
            stale_policy: StalePolicy::Discard,
            refresh_parent_on_child_mutation: true,
            suppress_window: DEFAULT_SUPPRESS_WINDOW,
            default_sort: Sorter::default(),
        }
    }
}

pub struct ListController {
    screen: Screen,
    settings: ControllerSettings,
    parents: ResourceList<ParentRecord>,
    children: IndexMap<RecordId, ResourceList<ChildRecord>>,
    expanded: IndexSet<RecordId>,
    search: String,
    sorter: Sorter,
    overlay: Option<EditOverlay>,
    announcer: Arc<ErrorAnnouncer>,
    notices: NoticeSink,
    next_sequence: u64,
}

impl ListController {
    pub fn new(screen: Screen, settings: ControllerSettings) -> Self {
        let page_size = settings.page_size.clamp(1, settings.max_page_size.max(1));
        Self {
            screen,
            parents: ResourceList::new(page_size),
            children: IndexMap::new(),
            expanded: IndexSet::new(),
            search: String::new(),
            sorter: settings.default_sort.clone(),
            overlay: None,
            announcer: ErrorAnnouncer::shared(),
            notices: NoticeSink::disconnected(),
            next_sequence: 0,
            settings,
        }
    }

    /// Replaces the process-wide announcer, mostly for tests.
    pub fn with_announcer(mut self, announcer: Arc<ErrorAnnouncer>) -> Self {
        self.announcer = announcer;
        self
    }

    pub fn with_notices(mut self, notices: NoticeSink) -> Self {
        self.notices = notices;
        self
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn parent_list(&self) -> &ResourceList<ParentRecord> {
        &self.parents
    }

    pub fn parents(&self) -> &[ParentRecord] {
        self.parents.rows()
    }

    pub fn parent_pagination(&self) -> PaginationState {
        self.parents.pagination()
    }

    pub fn child_list(&self, parent_id: RecordId) -> Option<&ResourceList<ChildRecord>> {
        self.children.get(&parent_id)
    }

    pub fn children(&self, parent_id: RecordId) -> Option<&[ChildRecord]> {
        self.children.get(&parent_id).map(ResourceList::rows)
    }

    /// Phase of the list behind `scope`; unknown child lists report `None`.
    pub fn phase(&self, scope: ScopeId) -> Option<ListPhase> {
        match scope {
            ScopeId::Top => Some(self.parents.phase()),
            ScopeId::Parent(id) => self.children.get(&id).map(ResourceList::phase),
        }
    }

    pub fn is_loading(&self, scope: ScopeId) -> bool {
        match scope {
            ScopeId::Top => self.parents.is_loading(),
            ScopeId::Parent(id) => self.children.get(&id).is_some_and(ResourceList::is_loading),
        }
    }

    pub fn pagination(&self, scope: ScopeId) -> Option<PaginationState> {
        match scope {
            ScopeId::Top => Some(self.parents.pagination()),
            ScopeId::Parent(id) => self.children.get(&id).map(ResourceList::pagination),
        }
    }

    pub fn is_expanded(&self, parent_id: RecordId) -> bool {
        self.expanded.contains(&parent_id)
    }

    /// Expanded parent ids in the order they were expanded.
    pub fn expanded_rows(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.expanded.iter().copied()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn sorter(&self) -> &Sorter {
        &self.sorter
    }

    pub fn overlay(&self) -> Option<&EditOverlay> {
        self.overlay.as_ref()
    }

    /// Backend scope for a list, or `None` when the screen has no child tier.
    pub fn api_scope(&self, scope: ScopeId) -> Option<Scope> {
        match scope {
            ScopeId::Top => Some(Scope::top(self.screen.parent_kind())),
            ScopeId::Parent(id) => self.screen.child_kind().map(|kind| Scope::children(kind, id)),
        }
    }

    pub fn request_parents(&mut self, page: u32, page_size: u32) -> Option<FetchTicket> {
        let key = FetchCacheKey::new(ScopeId::Top, page.max(1), self.clamp_page_size(page_size));
        self.request(key)
    }

    pub fn request_children(
        &mut self,
        parent_id: RecordId,
        page: u32,
        page_size: u32,
    ) -> Option<FetchTicket> {
        let key = FetchCacheKey::new(
            ScopeId::Parent(parent_id),
            page.max(1),
            self.clamp_page_size(page_size),
        );
        self.request(key)
    }

    /// Requests `page` of whichever list `scope` names.
    pub fn request_page(&mut self, scope: ScopeId, page: u32, page_size: u32) -> Option<FetchTicket> {
        match scope {
            ScopeId::Top => self.request_parents(page, page_size),
            ScopeId::Parent(id) => self.request_children(id, page, page_size),
        }
    }

    fn request(&mut self, key: FetchCacheKey) -> Option<FetchTicket> {
        let Some(scope) = self.api_scope(key.scope) else {
            tracing::debug!(screen = %self.screen, scope = %key.scope, "screen has no child lists");
            return None;
        };
        let query = self.query_for(&key);
        let sequence = self.next_sequence + 1;
        let started = match key.scope {
            ScopeId::Top => self.parents.try_begin(&key, sequence),
            ScopeId::Parent(id) => {
                let child_page_size = self.settings.child_page_size;
                self.children
                    .entry(id)
                    .or_insert_with(|| ResourceList::new(child_page_size))
                    .try_begin(&key, sequence)
            }
        };
        if !started {
            tracing::debug!(?key, "fetch skipped: in flight, loaded or mutating");
            return None;
        }
        self.next_sequence = sequence;
        tracing::debug!(?key, sequence, "fetch started");
        Some(FetchTicket {
            scope,
            key,
            query,
            sequence,
        })
    }

    fn query_for(&self, key: &FetchCacheKey) -> ListQuery {
        let mut query = ListQuery::page(key.page, key.page_size);
        if key.scope == ScopeId::Top {
            if self.sorter.is_active() {
                query.sort_by = self.sorter.field.clone();
                query.order = self.sorter.order.map(|order| order.direction());
            }
            if !self.search.is_empty() {
                query.search = Some(self.search.clone());
            }
        }
        query
    }

    fn clamp_page_size(&self, page_size: u32) -> u32 {
        page_size.clamp(1, self.settings.max_page_size.max(1))
    }

    /// Settles a ticket. Loading is cleared and the guard released whatever
    /// the outcome; failures keep the previous rows.
    pub fn apply(&mut self, ticket: FetchTicket, result: Result<ListPayload, ApiError>) {
        let policy = self.settings.stale_policy;
        let settled = match ticket.key.scope {
            ScopeId::Top => self.parents.settle(&ticket, result, policy),
            ScopeId::Parent(id) => match self.children.get_mut(&id) {
                Some(list) => list.settle(&ticket, result, policy),
                None => {
                    tracing::debug!(parent = id, "response for a dropped child list");
                    return;
                }
            },
        };
        match settled {
            Settled::Applied => {
                tracing::debug!(key = ?ticket.key, sequence = ticket.sequence, "fetch applied");
            }
            Settled::Failed(err) => self.report(&err, "fetch"),
            Settled::Stale => {}
        }
    }

    /// Runs `ticket` against `api`, if there is one. Returns whether a
    /// request was issued.
    pub async fn fetch<A: ResourceApi>(&mut self, api: &A, ticket: Option<FetchTicket>) -> bool {
        let Some(ticket) = ticket else {
            return false;
        };
        let result = api.list(&ticket.scope, &ticket.query).await;
        self.apply(ticket, result);
        true
    }

    /// Loads the parent list's current page unless it is already loaded.
    pub async fn load<A: ResourceApi>(&mut self, api: &A) -> bool {
        let pagination = self.parents.pagination();
        let ticket = self.request_parents(pagination.current_page, pagination.page_size);
        self.fetch(api, ticket).await
    }

    /// Refetches the parent list's current page and every expanded child list.
    pub async fn refresh<A: ResourceApi>(&mut self, api: &A) {
        self.parents.invalidate();
        self.load(api).await;
        let expanded: Vec<RecordId> = self.expanded.iter().copied().collect();
        for parent_id in expanded {
            self.invalidate(ScopeId::Parent(parent_id));
            let Some(pagination) = self.pagination(ScopeId::Parent(parent_id)) else {
                continue;
            };
            let ticket =
                self.request_children(parent_id, pagination.current_page, pagination.page_size);
            self.fetch(api, ticket).await;
        }
    }

    pub fn on_table_change(&mut self, change: TableChange) -> Option<FetchTicket> {
        let current = self.parents.pagination();
        let page = change.pagination.current.max(1);
        let page_size = self.clamp_page_size(change.pagination.page_size);
        let sorter = if change.sorter.is_active() {
            change.sorter
        } else {
            Sorter::default()
        };
        let event = TableEvent {
            action: TableAction::from_raw(change.action.as_deref()),
            pagination_changed: page != current.current_page || page_size != current.page_size,
            sort_changed: sorter != self.sorter,
        };
        if classify(&event) == Decision::Ignore {
            tracing::debug!(?event, "table change ignored");
            return None;
        }
        if event.sort_changed {
            tracing::debug!(?sorter, "sort changed");
            self.sorter = sorter;
            self.parents.invalidate();
        }
        self.request_parents(page, page_size)
    }

    pub fn set_search(&mut self, text: &str) -> Option<FetchTicket> {
        let text = text.trim();
        if text == self.search {
            return None;
        }
        self.search = text.to_string();
        self.parents.invalidate();
        let page_size = self.parents.pagination().page_size;
        self.request_parents(1, page_size)
    }

    /// Marks the row expanded and requests its children's current page. A row
    /// already loaded or still loading yields no ticket.
    pub fn expand(&mut self, parent_id: RecordId) -> Option<FetchTicket> {
        if self.screen.child_kind().is_none() {
            return None;
        }
        let child_page_size = self.settings.child_page_size;
        let pagination = self
            .children
            .entry(parent_id)
            .or_insert_with(|| ResourceList::new(child_page_size))
            .pagination();
        self.expand_at(parent_id, pagination.current_page, pagination.page_size)
    }

    /// Expands the row straight onto `page` of its children.
    pub fn expand_at(
        &mut self,
        parent_id: RecordId,
        page: u32,
        page_size: u32,
    ) -> Option<FetchTicket> {
        if self.screen.child_kind().is_none() {
            return None;
        }
        self.expanded.insert(parent_id);
        self.request_children(parent_id, page, page_size)
    }

    /// Hides the child table. Its rows stay cached for the next expand.
    pub fn collapse(&mut self, parent_id: RecordId) -> bool {
        self.expanded.shift_remove(&parent_id)
    }

    pub fn change_child_page(
        &mut self,
        parent_id: RecordId,
        page: u32,
        page_size: u32,
    ) -> Option<FetchTicket> {
        self.request_children(parent_id, page, page_size)
    }

    pub fn open_create(&mut self, scope: ScopeId) -> bool {
        if self.api_scope(scope).is_none() {
            return false;
        }
        self.overlay = Some(EditOverlay {
            scope,
            mode: OverlayMode::Create,
            draft: RecordDraft::default(),
            error: None,
        });
        true
    }

    /// Opens the edit form prefilled from the loaded row. Returns `false`
    /// when the row is not on screen.
    pub fn open_edit(&mut self, scope: ScopeId, id: RecordId) -> bool {
        let name = match scope {
            ScopeId::Top => self.parents.row(id).map(|row| row.display_name.clone()),
            ScopeId::Parent(parent_id) => self
                .children
                .get(&parent_id)
                .and_then(|list| list.row(id))
                .map(|row| row.display_name.clone()),
        };
        let Some(name) = name else {
            return false;
        };
        self.overlay = Some(EditOverlay {
            scope,
            mode: OverlayMode::Edit(id),
            draft: RecordDraft::named(name),
            error: None,
        });
        true
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    /// Submits the open form. The overlay closes only on success; a rejected
    /// draft stays in the form with the error next to it.
    pub async fn submit<A: ResourceApi>(&mut self, api: &A, draft: RecordDraft) -> bool {
        let Some(overlay) = self.overlay.clone() else {
            tracing::debug!("submit without an open form");
            return false;
        };
        let orchestrator = MutationOrchestrator::new(api);
        let result = match overlay.mode {
            OverlayMode::Create => orchestrator.create(self, overlay.scope, &draft).await,
            OverlayMode::Edit(id) => orchestrator.update(self, overlay.scope, id, &draft).await,
        };
        match result {
            Ok(record) => {
                self.overlay = None;
                let kind = self.kind_label(overlay.scope);
                self.notices
                    .send(Notice::info(format!("Saved {kind} \"{}\"", record.display_name)));
                true
            }
            Err(err) => {
                self.report(&err, "save");
                if let Some(open) = self.overlay.as_mut() {
                    open.draft = draft;
                    open.error = Some(err.user_message());
                }
                false
            }
        }
    }

    pub async fn delete<A: ResourceApi>(&mut self, api: &A, scope: ScopeId, id: RecordId) -> bool {
        match MutationOrchestrator::new(api).delete(self, scope, id).await {
            Ok(()) => {
                let kind = self.kind_label(scope);
                self.notices.send(Notice::info(format!("Deleted {kind} #{id}")));
                true
            }
            Err(err) => {
                self.report(&err, "delete");
                false
            }
        }
    }

    fn kind_label(&self, scope: ScopeId) -> &'static str {
        self.api_scope(scope)
            .map(|scope| scope.kind.label())
            .unwrap_or("record")
    }

    fn report(&self, error: &ApiError, operation: &str) {
        tracing::warn!(?error, operation, screen = %self.screen, "request failed");
        let message = error.user_message();
        if self.announcer.announce(&message, self.settings.suppress_window) {
            self.notices.send(Notice::error(message));
        }
    }

    pub(crate) fn invalidate(&mut self, scope: ScopeId) {
        match scope {
            ScopeId::Top => self.parents.invalidate(),
            ScopeId::Parent(id) => {
                if let Some(list) = self.children.get_mut(&id) {
                    list.invalidate();
                }
            }
        }
    }

    pub(crate) fn rows_on_page(&self, scope: ScopeId) -> usize {
        match scope {
            ScopeId::Top => self.parents.rows().len(),
            ScopeId::Parent(id) => self.children.get(&id).map_or(0, |list| list.rows().len()),
        }
    }

    pub(crate) fn begin_mutation(&mut self, scope: ScopeId) {
        match scope {
            ScopeId::Top => self.parents.begin_mutation(),
            ScopeId::Parent(id) => {
                let child_page_size = self.settings.child_page_size;
                self.children
                    .entry(id)
                    .or_insert_with(|| ResourceList::new(child_page_size))
                    .begin_mutation();
            }
        }
    }

    pub(crate) fn finish_mutation(&mut self, scope: ScopeId) {
        match scope {
            ScopeId::Top => self.parents.finish_mutation(),
            ScopeId::Parent(id) => {
                if let Some(list) = self.children.get_mut(&id) {
                    list.finish_mutation();
                }
            }
        }
    }

    /// Drops everything retained for a deleted parent row.
    pub(crate) fn forget_children(&mut self, parent_id: RecordId) {
        self.expanded.shift_remove(&parent_id);
        if self.children.shift_remove(&parent_id).is_some() {
            tracing::debug!(parent = parent_id, "dropped child list of deleted row");
        }
    }
}
