//! Global reporting of failed mutations.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::api::ApiError;

/// Called once for every failed mutation, before the error is returned to
/// the caller. Mutations are never retried.
pub type MutationErrorHook = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// Hook installed when none is given: log and carry on.
pub(crate) fn log_mutation_error() -> MutationErrorHook {
  Arc::new(|err: &ApiError| {
    error!(error = %err, status = ?err.status(), "mutation error");
  })
}

/// Run the hook, containing any panic so reporting can never take down the
/// mutation's caller.
pub(crate) fn report(hook: &MutationErrorHook, err: &ApiError) {
  if catch_unwind(AssertUnwindSafe(|| hook(err))).is_err() {
    error!(error = %err, "mutation error hook panicked");
  }
}
