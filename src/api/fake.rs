use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{
    decode_list_response, ApiError, ListPayload, ListQuery, RawRecord, RecordDraft, RecordId,
    ResourceApi, ResourceKind, Scope,
};
use crate::timestamp::RawTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    List { scope: Scope, query: ListQuery },
    Create { scope: Scope, name: String },
    Update { scope: Scope, id: RecordId },
    Delete { scope: Scope, id: RecordId },
}

#[derive(Debug, Clone)]
struct Stored {
    kind: ResourceKind,
    record: RawRecord,
}

/// In-memory backend with a call log and scripted failures.
#[derive(Debug, Default)]
pub(crate) struct FakeApi {
    records: Mutex<Vec<Stored>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<(Op, ApiError)>>,
    next_id: Mutex<RecordId>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: ResourceKind, parent_id: Option<RecordId>, name: &str) -> RecordId {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.records.lock().push(Stored {
            kind,
            record: RawRecord {
                id,
                display_name: name.to_string(),
                parent_id,
                child_count: None,
                created_at: RawTimestamp::Text((1_733_275_564 + id).to_string()),
            },
        });
        id
    }

    pub fn seed(&self, kind: ResourceKind, count: usize) -> Vec<RecordId> {
        (1..=count)
            .map(|index| self.add(kind, None, &format!("{} {index}", kind.label())))
            .collect()
    }

    pub fn seed_children(&self, parent_id: RecordId, kind: ResourceKind, count: usize) {
        for index in 1..=count {
            self.add(kind, Some(parent_id), &format!("{} {parent_id}.{index}", kind.label()));
        }
    }

    pub fn fail_next(&self, op: Op, error: ApiError) {
        self.failures.lock().push_back((op, error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn list_calls(&self) -> Vec<(Scope, u32)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::List { scope, query } => Some((*scope, query.page)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn take_failure(&self, op: Op) -> Option<ApiError> {
        let mut failures = self.failures.lock();
        let index = failures.iter().position(|(pending, _)| *pending == op)?;
        failures.remove(index).map(|(_, error)| error)
    }

    /// Answers in the `{ data, meta }` JSON shape a remote directory service uses.
    fn list_now(&self, scope: &Scope, query: &ListQuery) -> Result<Value, ApiError> {
        let records = self.records.lock();
        let needle = query.search.as_deref().map(str::to_lowercase);
        let matching: Vec<&Stored> = records
            .iter()
            .filter(|stored| stored.kind == scope.kind)
            .filter(|stored| scope.parent_id.is_none() || stored.record.parent_id == scope.parent_id)
            .filter(|stored| match &needle {
                Some(needle) => stored.record.display_name.to_lowercase().contains(needle),
                None => true,
            })
            .collect();
        let child_kind = scope.kind.child_kind();
        let items = matching
            .iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .map(|stored| {
                let mut record = stored.record.clone();
                record.child_count = child_kind.map(|kind| {
                    records
                        .iter()
                        .filter(|child| child.kind == kind && child.record.parent_id == Some(record.id))
                        .count() as u64
                });
                record
            })
            .map(|record: RawRecord| serde_json::to_value(record))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ApiError::Malformed(err.to_string()))?;
        Ok(json!({
            "data": items,
            "meta": {
                "total": matching.len(),
                "page": query.page,
                "limit": query.limit,
            },
        }))
    }
}

impl ResourceApi for FakeApi {
    async fn list(&self, scope: &Scope, query: &ListQuery) -> Result<ListPayload, ApiError> {
        self.calls.lock().push(Call::List {
            scope: *scope,
            query: query.clone(),
        });
        if let Some(error) = self.take_failure(Op::List) {
            return Err(error);
        }
        let body = self.list_now(scope, query)?;
        decode_list_response(body, query)
    }

    async fn create(&self, scope: &Scope, draft: &RecordDraft) -> Result<RawRecord, ApiError> {
        self.calls.lock().push(Call::Create {
            scope: *scope,
            name: draft.name.clone(),
        });
        if let Some(error) = self.take_failure(Op::Create) {
            return Err(error);
        }
        if draft.name.trim().is_empty() {
            return Err(ApiError::validation("name is required"));
        }
        let id = self.add(scope.kind, scope.parent_id, draft.name.trim());
        let records = self.records.lock();
        records
            .iter()
            .find(|stored| stored.record.id == id)
            .map(|stored| stored.record.clone())
            .ok_or_else(|| ApiError::Server {
                status: 500,
                message: None,
            })
    }

    async fn update(
        &self,
        scope: &Scope,
        id: RecordId,
        draft: &RecordDraft,
    ) -> Result<RawRecord, ApiError> {
        self.calls.lock().push(Call::Update { scope: *scope, id });
        if let Some(error) = self.take_failure(Op::Update) {
            return Err(error);
        }
        let mut records = self.records.lock();
        let stored = records
            .iter_mut()
            .find(|stored| stored.kind == scope.kind && stored.record.id == id)
            .ok_or_else(|| ApiError::not_found(format!("{} {id} not found", scope.kind)))?;
        stored.record.display_name = draft.name.clone();
        Ok(stored.record.clone())
    }

    async fn delete(&self, scope: &Scope, id: RecordId) -> Result<(), ApiError> {
        self.calls.lock().push(Call::Delete { scope: *scope, id });
        if let Some(error) = self.take_failure(Op::Delete) {
            return Err(error);
        }
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|stored| stored.record.id != id && stored.record.parent_id != Some(id));
        if records.len() == before {
            return Err(ApiError::not_found(format!("{} {id} not found", scope.kind)));
        }
        Ok(())
    }
}
