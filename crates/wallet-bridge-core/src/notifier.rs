//! Notification kit: a versioned, lossy stream of state.
//!
//! An [`Updater`] is the single writer; any number of [`Notifier`] handles
//! read from it, each at its own pace. A reader that falls behind skips
//! straight to the latest snapshot: nothing is queued. Notifiers hold no
//! strong reference to the updater, so dropping the updater without
//! finishing abandons them.

use crate::NotifierError;
use std::future::Future;
use tokio::sync::watch;

/// One observation of a notifier.
///
/// `update_count` is `None` once the stream has finished; `value` is then the
/// final snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord<T> {
    pub value: T,
    pub update_count: Option<u64>,
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Empty,
    Live { value: T, count: u64 },
    Finished(T),
    Failed(NotifierError),
}

impl<T: Clone> Slot<T> {
    /// The record a reader that last saw `since` should get, if any.
    fn settled(&self, since: Option<u64>) -> Option<Result<UpdateRecord<T>, NotifierError>> {
        match self {
            Slot::Empty => None,
            Slot::Live { value, count } => since.is_none_or(|seen| *count > seen).then(|| {
                Ok(UpdateRecord {
                    value: value.clone(),
                    update_count: Some(*count),
                })
            }),
            Slot::Finished(value) => Some(Ok(UpdateRecord {
                value: value.clone(),
                update_count: None,
            })),
            Slot::Failed(e) => Some(Err(e.clone())),
        }
    }
}

/// Create a paired updater and notifier.
///
/// With an initial value the first read of any notifier resolves
/// immediately; without one it waits for the first `update_state`.
pub fn notifier_kit<T>(initial: Option<T>) -> (Updater<T>, Notifier<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let slot = match initial {
        Some(value) => Slot::Live { value, count: 1 },
        None => Slot::Empty,
    };
    kit_from_slot(slot)
}

fn kit_from_slot<T>(slot: Slot<T>) -> (Updater<T>, Notifier<T>) {
    let (tx, rx) = watch::channel(slot);
    (Updater { tx }, Notifier { rx })
}

/// Receives the stream of a notifier, the way [`observe_iteration`] drives it.
pub trait IterationObserver<T> {
    fn update_state(&self, value: T);
    fn finish(&self, value: T);
    fn fail(&self, reason: NotifierError);
}

/// The writing half of a notifier kit.
#[derive(Debug)]
pub struct Updater<T> {
    tx: watch::Sender<Slot<T>>,
}

impl<T> Updater<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Publish a new snapshot, waking every waiting reader.
    pub fn update_state(&self, value: T) {
        let accepted = self.tx.send_if_modified(|slot| match slot {
            Slot::Empty => {
                *slot = Slot::Live { value, count: 1 };
                true
            }
            Slot::Live { count, .. } => {
                let count = *count + 1;
                *slot = Slot::Live { value, count };
                true
            }
            Slot::Finished(_) | Slot::Failed(_) => false,
        });
        if !accepted {
            tracing::warn!("update after notifier termination ignored");
        }
    }

    /// Publish the final snapshot. No further updates are possible.
    pub fn finish(&self, value: T) {
        self.terminate(Slot::Finished(value));
    }

    /// Fail the stream for every current and future reader.
    pub fn fail(&self, reason: NotifierError) {
        self.terminate(Slot::Failed(reason));
    }

    fn terminate(&self, terminal: Slot<T>) {
        let accepted = self.tx.send_if_modified(|slot| match slot {
            Slot::Finished(_) | Slot::Failed(_) => false,
            _ => {
                *slot = terminal;
                true
            }
        });
        if !accepted {
            tracing::warn!("notifier already terminated");
        }
    }

    /// Resolves once every reader handle has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl<T> IterationObserver<T> for Updater<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn update_state(&self, value: T) {
        Updater::update_state(self, value)
    }

    fn finish(&self, value: T) {
        Updater::finish(self, value)
    }

    fn fail(&self, reason: NotifierError) {
        Updater::fail(self, reason)
    }
}

/// A reading handle. Cheap to clone; clones read independently.
#[derive(Debug, Clone)]
pub struct Notifier<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T> Notifier<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wait for a version newer than `since`.
    ///
    /// `None` means "nothing seen yet": it resolves immediately with the
    /// current snapshot if there is one. A finished notifier always resolves
    /// with its final snapshot; a failed one always fails.
    pub async fn get_update_since(
        &self,
        since: Option<u64>,
    ) -> Result<UpdateRecord<T>, NotifierError> {
        let mut rx = self.rx.clone();
        loop {
            let settled = {
                let slot = rx.borrow_and_update();
                slot.settled(since)
            };
            if let Some(result) = settled {
                return result;
            }
            if rx.changed().await.is_err() {
                let slot = rx.borrow();
                return slot.settled(since).unwrap_or(Err(NotifierError::Abandoned));
            }
        }
    }

    /// The latest snapshot, live or final, without waiting.
    pub fn current(&self) -> Option<T> {
        match &*self.rx.borrow() {
            Slot::Live { value, .. } | Slot::Finished(value) => Some(value.clone()),
            Slot::Empty | Slot::Failed(_) => None,
        }
    }

    /// A fresh cursor that has seen nothing yet.
    pub fn cursor(&self) -> NotifierCursor<T> {
        NotifierCursor {
            notifier: self.clone(),
            since: None,
            done: false,
        }
    }

    /// A notifier whose snapshots are `transform` applied to this one's.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn derive<U, F>(&self, transform: F) -> Notifier<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.derive_gated(transform, || async { Ok(()) })
    }

    /// Like [`Notifier::derive`], but `gate` must succeed before each update
    /// after the first is forwarded. A failing gate fails the derived
    /// notifier.
    ///
    /// The derived notifier starts from the transform of the snapshot current
    /// right now, so its first read never waits if this one has a value.
    /// Afterwards each update is the transform of whatever is latest when the
    /// forwarding task gets to run. The task stops once the source terminates
    /// or every derived reader is dropped.
    pub fn derive_gated<U, F, G, Fut>(&self, transform: F, gate: G) -> Notifier<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
        G: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), NotifierError>> + Send,
    {
        let (initial, since, terminal) = match &*self.rx.borrow() {
            Slot::Empty => (Slot::Empty, None, false),
            Slot::Live { value, count } => (
                Slot::Live {
                    value: transform(value),
                    count: 1,
                },
                Some(*count),
                false,
            ),
            Slot::Finished(value) => (Slot::Finished(transform(value)), None, true),
            Slot::Failed(e) => (Slot::Failed(e.clone()), None, true),
        };

        let (updater, notifier) = kit_from_slot(initial);
        if terminal {
            return notifier;
        }

        let source = self.clone();
        tokio::spawn(async move {
            let mut since = since;
            loop {
                let next = tokio::select! {
                    _ = updater.closed() => return,
                    next = source.get_update_since(since) => next,
                };
                if let Err(e) = gate().await {
                    updater.fail(e);
                    return;
                }
                match next {
                    Ok(UpdateRecord {
                        value,
                        update_count: Some(count),
                    }) => {
                        since = Some(count);
                        updater.update_state(transform(&value));
                    }
                    Ok(UpdateRecord {
                        value,
                        update_count: None,
                    }) => {
                        updater.finish(transform(&value));
                        return;
                    }
                    Err(e) => {
                        updater.fail(e);
                        return;
                    }
                }
            }
        });
        notifier
    }
}

/// Pull-based reader over a notifier, remembering the last version it saw.
#[derive(Debug)]
pub struct NotifierCursor<T> {
    notifier: Notifier<T>,
    since: Option<u64>,
    done: bool,
}

impl<T> NotifierCursor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The next snapshot newer than the last one returned.
    ///
    /// A finished stream yields its final snapshot once and then `None`; a
    /// failed one yields the error once and then `None`.
    pub async fn next(&mut self) -> Option<Result<T, NotifierError>> {
        if self.done {
            return None;
        }
        match self.notifier.get_update_since(self.since).await {
            Ok(record) => {
                match record.update_count {
                    Some(count) => self.since = Some(count),
                    None => self.done = true,
                }
                Some(Ok(record.value))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Drive `observer` with every update of `notifier` until it terminates.
pub async fn observe_iteration<T, O>(notifier: &Notifier<T>, observer: &O)
where
    T: Clone + Send + Sync + 'static,
    O: IterationObserver<T> + ?Sized,
{
    let mut since = None;
    loop {
        match notifier.get_update_since(since).await {
            Ok(UpdateRecord {
                value,
                update_count: Some(count),
            }) => {
                since = Some(count);
                observer.update_state(value);
            }
            Ok(UpdateRecord {
                value,
                update_count: None,
            }) => {
                observer.finish(value);
                return;
            }
            Err(e) => {
                observer.fail(e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn first_read_is_immediate() {
        let (_updater, notifier) = notifier_kit(Some(vec![1]));
        let record = notifier.get_update_since(None).await.unwrap();
        assert_eq!(record.value, vec![1]);
        assert_eq!(record.update_count, Some(1));
    }

    #[tokio::test]
    async fn empty_kit_waits_for_first_update() {
        let (updater, notifier) = notifier_kit::<u32>(None);
        assert!(timeout(SHORT, notifier.get_update_since(None)).await.is_err());

        let reader = tokio::spawn(async move { notifier.get_update_since(None).await });
        tokio::task::yield_now().await;
        updater.update_state(7);
        assert_eq!(reader.await.unwrap().unwrap().value, 7);
    }

    #[tokio::test]
    async fn slow_reader_skips_to_latest() {
        let (updater, notifier) = notifier_kit(Some("a"));
        let first = notifier.get_update_since(None).await.unwrap();
        updater.update_state("b");
        updater.update_state("c");
        updater.update_state("d");

        let next = notifier.get_update_since(first.update_count).await.unwrap();
        assert_eq!(next.value, "d");
        assert_eq!(next.update_count, Some(4));
    }

    #[tokio::test]
    async fn reader_at_latest_waits() {
        let (updater, notifier) = notifier_kit(Some(1));
        let seen = notifier.get_update_since(None).await.unwrap().update_count;
        assert!(timeout(SHORT, notifier.get_update_since(seen)).await.is_err());

        let waiting = notifier.clone();
        let reader = tokio::spawn(async move { waiting.get_update_since(seen).await });
        tokio::task::yield_now().await;
        updater.update_state(2);
        assert_eq!(reader.await.unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn finish_is_terminal() {
        let (updater, notifier) = notifier_kit(Some(1));
        updater.finish(2);
        updater.update_state(3);

        let record = notifier.get_update_since(Some(100)).await.unwrap();
        assert_eq!(record, UpdateRecord { value: 2, update_count: None });
        assert_eq!(notifier.current(), Some(2));
    }

    #[tokio::test]
    async fn failure_reaches_waiting_and_future_readers() {
        let (updater, notifier) = notifier_kit(Some(1));
        let waiting = notifier.clone();
        let reader = tokio::spawn(async move { waiting.get_update_since(Some(1)).await });
        tokio::task::yield_now().await;

        updater.fail(NotifierError::Failed("boom".into()));
        let expected = Err(NotifierError::Failed("boom".into()));
        assert_eq!(reader.await.unwrap(), expected);
        assert_eq!(notifier.get_update_since(None).await, expected);
    }

    #[tokio::test]
    async fn dropped_updater_abandons_waiters() {
        let (updater, notifier) = notifier_kit(Some(1));
        drop(updater);
        assert_eq!(notifier.get_update_since(None).await.unwrap().value, 1);
        assert_eq!(
            notifier.get_update_since(Some(1)).await,
            Err(NotifierError::Abandoned)
        );
    }

    #[tokio::test]
    async fn derived_first_read_is_current_transform() {
        let (updater, source) = notifier_kit(Some(vec![1, 2, 3, 4]));
        let evens = source.derive(|v: &Vec<i32>| v.iter().copied().filter(|n| n % 2 == 0).collect::<Vec<_>>());

        let first = evens.get_update_since(None).await.unwrap();
        assert_eq!(first.value, vec![2, 4]);

        updater.update_state(vec![6, 7]);
        let next = timeout(Duration::from_secs(1), evens.get_update_since(first.update_count))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.value, vec![6]);
    }

    #[tokio::test]
    async fn derived_gate_failure_fails_reader() {
        let (updater, source) = notifier_kit(Some(1));
        let derived = source.derive_gated(
            |n: &i32| n * 10,
            || async { Err(NotifierError::Failed("revoked".into())) },
        );
        assert_eq!(derived.get_update_since(None).await.unwrap().value, 10);

        updater.update_state(2);
        let result = timeout(Duration::from_secs(1), derived.get_update_since(Some(1)))
            .await
            .unwrap();
        assert_eq!(result, Err(NotifierError::Failed("revoked".into())));
    }

    #[tokio::test]
    async fn cursor_yields_final_snapshot_once() {
        let (updater, notifier) = notifier_kit(Some(1));
        let mut cursor = notifier.cursor();
        assert_eq!(cursor.next().await, Some(Ok(1)));
        updater.finish(9);
        assert_eq!(cursor.next().await, Some(Ok(9)));
        assert_eq!(cursor.next().await, None);
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl IterationObserver<i32> for Log {
        fn update_state(&self, value: i32) {
            self.0.lock().unwrap().push(format!("update {value}"));
        }
        fn finish(&self, value: i32) {
            self.0.lock().unwrap().push(format!("finish {value}"));
        }
        fn fail(&self, reason: NotifierError) {
            self.0.lock().unwrap().push(format!("fail {reason}"));
        }
    }

    #[tokio::test]
    async fn observe_iteration_until_finish() {
        let (updater, notifier) = notifier_kit(Some(1));
        updater.finish(2);
        let log = Log::default();
        observe_iteration(&notifier, &log).await;
        assert_eq!(*log.0.lock().unwrap(), vec!["finish 2"]);
    }
}
