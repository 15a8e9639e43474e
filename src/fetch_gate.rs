use std::fmt;

use crate::api::RecordId;

/// Which list a fetch belongs to: the top-level table or one expanded row's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Top,
    Parent(RecordId),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Top => f.write_str("top"),
            ScopeId::Parent(id) => write!(f, "parent:{id}"),
        }
    }
}

/// Identifies one logical fetch. Sort and search are deliberately absent;
/// callers that change them must invalidate the guard themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchCacheKey {
    pub scope: ScopeId,
    pub page: u32,
    pub page_size: u32,
}

impl FetchCacheKey {
    pub fn new(scope: ScopeId, page: u32, page_size: u32) -> Self {
        Self {
            scope,
            page,
            page_size,
        }
    }
}

/// Single-flight guard for one list instance.
///
/// This is a marker, not a value cache: a request is refused while another is
/// in flight or when its key equals the last successfully fetched key. Refused
/// requests are dropped, never queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchGuardState {
    last_fetched_key: Option<FetchCacheKey>,
    in_flight: bool,
}

impl FetchGuardState {
    pub fn should_fetch(&self, key: &FetchCacheKey) -> bool {
        !self.in_flight && self.last_fetched_key.as_ref() != Some(key)
    }

    /// Call immediately before issuing the request.
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Call once the request settles, whatever the outcome. A failure clears
    /// the last key so an identical retry is not suppressed.
    pub fn end(&mut self, key: FetchCacheKey, success: bool) {
        self.in_flight = false;
        self.last_fetched_key = if success { Some(key) } else { None };
    }

    pub fn invalidate(&mut self) {
        self.in_flight = false;
        self.last_fetched_key = None;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_fetched_key(&self) -> Option<&FetchCacheKey> {
        self.last_fetched_key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page: u32) -> FetchCacheKey {
        FetchCacheKey::new(ScopeId::Top, page, 10)
    }

    #[test]
    fn second_request_is_refused_while_in_flight() {
        let mut guard = FetchGuardState::default();
        assert!(guard.should_fetch(&key(1)));
        guard.begin();
        assert!(!guard.should_fetch(&key(1)));
        // Any key is refused while a request is outstanding.
        assert!(!guard.should_fetch(&key(2)));
    }

    #[test]
    fn successful_fetch_suppresses_same_key_only() {
        let mut guard = FetchGuardState::default();
        guard.begin();
        guard.end(key(1), true);
        assert!(!guard.is_in_flight());
        assert!(!guard.should_fetch(&key(1)));
        assert!(guard.should_fetch(&key(2)));
        assert!(guard.should_fetch(&FetchCacheKey::new(ScopeId::Parent(7), 1, 10)));
    }

    #[test]
    fn failed_fetch_allows_identical_retry() {
        let mut guard = FetchGuardState::default();
        guard.begin();
        guard.end(key(1), true);
        guard.begin();
        guard.end(key(1), false);
        assert_eq!(guard.last_fetched_key(), None);
        assert!(guard.should_fetch(&key(1)));
    }

    #[test]
    fn invalidate_resets_both_markers() {
        let mut guard = FetchGuardState::default();
        guard.begin();
        guard.end(key(3), true);
        guard.begin();
        guard.invalidate();
        assert_eq!(guard, FetchGuardState::default());
        assert!(guard.should_fetch(&key(3)));
    }

    #[test]
    fn scope_ids_render_for_logs() {
        assert_eq!(ScopeId::Top.to_string(), "top");
        assert_eq!(ScopeId::Parent(42).to_string(), "parent:42");
    }
}
