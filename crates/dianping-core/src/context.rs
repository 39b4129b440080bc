//! Explicit per-request caller context.

use uuid::Uuid;

/// Identity of the caller on whose behalf an operation runs.
///
/// Passed into every coordinator call instead of being looked up from
/// ambient per-thread state, so it survives task hops and background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: i64,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(user_id: i64, request_id: Uuid) -> Self {
        Self {
            user_id,
            request_id,
        }
    }

    /// Context for `user_id` with a freshly generated request id.
    pub fn for_user(user_id: i64) -> Self {
        Self::new(user_id, Uuid::new_v4())
    }
}
