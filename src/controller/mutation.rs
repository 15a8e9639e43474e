use bitflags::bitflags;

use crate::api::{ApiError, RawRecord, RecordDraft, RecordId, ResourceApi, Scope};
use crate::fetch_gate::ScopeId;

use super::ListController;

bitflags! {
    /// Lists touched by a successful mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RefreshTargets: u8 {
        /// The list the mutated row lives in.
        const OWN = 0b01;
        /// The parent list, whose child counts depend on the mutated row.
        const PARENT = 0b10;
    }
}

impl RefreshTargets {
    /// Lists whose guards must be invalidated after a mutation in `scope`.
    pub fn invalidated(scope: ScopeId) -> Self {
        match scope {
            ScopeId::Top => RefreshTargets::OWN,
            ScopeId::Parent(_) => RefreshTargets::OWN | RefreshTargets::PARENT,
        }
    }

    /// Lists to refetch right away.
    pub fn refetched(scope: ScopeId, refresh_parent: bool) -> Self {
        let mut targets = Self::invalidated(scope);
        if !refresh_parent {
            targets.remove(RefreshTargets::PARENT);
        }
        targets
    }
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Upsert,
    Delete { rows_on_page: usize },
}

/// Runs create/update/delete against the backend and brings the affected
/// lists back in line afterwards. Failures are returned untouched; reporting
/// them is the caller's business.
pub struct MutationOrchestrator<'a, A> {
    api: &'a A,
}

impl<'a, A: ResourceApi> MutationOrchestrator<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        ctl: &mut ListController,
        scope: ScopeId,
        draft: &RecordDraft,
    ) -> Result<RawRecord, ApiError> {
        let target = resolve(ctl, scope)?;
        ctl.begin_mutation(scope);
        let result = self.api.create(&target, draft).await;
        ctl.finish_mutation(scope);
        let record = result?;
        tracing::info!(kind = %target.kind, id = record.id, "created record");
        self.resync(ctl, scope, Change::Upsert).await;
        Ok(record)
    }

    pub async fn update(
        &self,
        ctl: &mut ListController,
        scope: ScopeId,
        id: RecordId,
        draft: &RecordDraft,
    ) -> Result<RawRecord, ApiError> {
        let target = resolve(ctl, scope)?;
        ctl.begin_mutation(scope);
        let result = self.api.update(&target, id, draft).await;
        ctl.finish_mutation(scope);
        let record = result?;
        tracing::info!(kind = %target.kind, id, "updated record");
        self.resync(ctl, scope, Change::Upsert).await;
        Ok(record)
    }

    pub async fn delete(
        &self,
        ctl: &mut ListController,
        scope: ScopeId,
        id: RecordId,
    ) -> Result<(), ApiError> {
        let target = resolve(ctl, scope)?;
        // Counted before the call: the rollback decision is about the page
        // as the user saw it.
        let rows_on_page = ctl.rows_on_page(scope);
        ctl.begin_mutation(scope);
        let result = self.api.delete(&target, id).await;
        ctl.finish_mutation(scope);
        result?;
        tracing::info!(kind = %target.kind, id, "deleted record");
        if scope == ScopeId::Top {
            ctl.forget_children(id);
        }
        self.resync(ctl, scope, Change::Delete { rows_on_page }).await;
        Ok(())
    }

    async fn resync(&self, ctl: &mut ListController, scope: ScopeId, change: Change) {
        let invalidated = RefreshTargets::invalidated(scope);
        let refetched =
            RefreshTargets::refetched(scope, ctl.settings().refresh_parent_on_child_mutation);

        if invalidated.contains(RefreshTargets::OWN) {
            ctl.invalidate(scope);
        }
        if invalidated.contains(RefreshTargets::PARENT) {
            ctl.invalidate(ScopeId::Top);
        }

        if refetched.contains(RefreshTargets::OWN) {
            if let Some(pagination) = ctl.pagination(scope) {
                let page = match change {
                    Change::Upsert => pagination.current_page,
                    Change::Delete { rows_on_page } => {
                        pagination.rollback_target_after_delete(rows_on_page)
                    }
                };
                if page != pagination.current_page {
                    tracing::debug!(%scope, from = pagination.current_page, to = page, "page emptied by delete, stepping back");
                }
                let ticket = ctl.request_page(scope, page, pagination.page_size);
                ctl.fetch(self.api, ticket).await;
            }
        }
        if refetched.contains(RefreshTargets::PARENT) {
            let pagination = ctl.parent_pagination();
            let ticket = ctl.request_parents(pagination.current_page, pagination.page_size);
            ctl.fetch(self.api, ticket).await;
        }
    }
}

fn resolve(ctl: &ListController, scope: ScopeId) -> Result<Scope, ApiError> {
    ctl.api_scope(scope).ok_or_else(|| {
        ApiError::validation(format!("{} has no nested records", ctl.screen().title()))
    })
}
