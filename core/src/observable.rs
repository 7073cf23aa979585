//! The reactive handle contract (spec §3.1 "Subscription handle", Design
//! Notes §9): "a handle whose current value may be read and whose changes
//! may be observed." Built on `tokio::sync::watch`, which already gives a
//! cached latest value plus a subscribable change notification — the
//! simplest of the two shapes Design Notes §9 allows.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub enum QueryState<T> {
    Loading,
    Success(T),
    Error(String),
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool { matches!(self, QueryState::Loading) }

    pub fn as_success(&self) -> Option<&T> {
        match self {
            QueryState::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Write side, held by whoever produces values (the Query Engine).
pub struct ObservableWriter<T>(watch::Sender<QueryState<T>>);

impl<T: Clone> ObservableWriter<T> {
    pub fn set(&self, value: QueryState<T>) {
        // No receivers left just means every subscriber dropped their handle.
        let _ = self.0.send(value);
    }
}

/// Read side, held by the application. Cloning shares the same underlying
/// channel; cheap, `Arc`-backed.
#[derive(Clone)]
pub struct Observable<T>(Arc<watch::Receiver<QueryState<T>>>);

impl<T: Clone> Observable<T> {
    pub fn new(initial: QueryState<T>) -> (ObservableWriter<T>, Self) {
        let (tx, rx) = watch::channel(initial);
        (ObservableWriter(tx), Observable(Arc::new(rx)))
    }

    /// Current value without waiting.
    pub fn get(&self) -> QueryState<T> { self.0.borrow().clone() }

    /// Resolve when the value changes, returning the new value. Used by
    /// tests and any caller that wants to await the next published result
    /// rather than poll.
    pub async fn changed(&self) -> QueryState<T> {
        let mut rx = (*self.0).clone();
        let _ = rx.changed().await;
        rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_new_values_to_existing_subscribers() {
        let (writer, handle) = Observable::new(QueryState::<i32>::Loading);
        assert!(handle.get().is_loading());

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.changed().await }
        });
        writer.set(QueryState::Success(42));
        let seen = waiter.await.unwrap();
        assert_eq!(seen.as_success().copied(), Some(42));
    }
}
