pub mod slug;
pub mod subscribers;

pub use subscribers::{Handler, Subscribers, Subscription, SubscriptionSet};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
