//! Approval gate: the asynchronous checkpoint in front of every capability a
//! dapp can reach.
//!
//! There is one [`ApprovalGate`] per (suggested petname, origin) pair. The
//! first `approve` on an unresolved gate starts a single check against the
//! [`ApprovalAuthority`]; every caller, concurrent or later, shares its
//! outcome. Approval is permanent for the life of the gate, and so is an
//! identity failure.

use crate::{AdminError, ApprovalError, DappOrigin};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Invoked by the authority when the dapp turns out to need user approval.
pub type PendingHook = Box<dyn FnOnce() + Send>;

/// Decides whether a dapp may use the wallet.
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    /// Resolve once `origin` is approved. Call `on_pending` (at most once)
    /// if the user still has to approve it.
    async fn wait_for_dapp_approval(
        &self,
        suggested_petname: &str,
        origin: &DappOrigin,
        on_pending: PendingHook,
    ) -> Result<(), AdminError>;
}

/// Told about approval transitions of the gates it is registered with.
///
/// Each observer hears `needs_approval` at most once per gate, and `approved`
/// at most once, and only after it heard `needs_approval`. Callbacks run
/// while the gate is locked: they must not call back into the gate.
pub trait ApprovalObserver: Send + Sync {
    fn needs_approval(&self, origin: &DappOrigin, suggested_petname: &str);
    fn approved(&self, origin: &DappOrigin);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Unresolved,
    Pending,
    Approved,
    Failed(ApprovalError),
}

struct ObserverSlot {
    observer: Arc<dyn ApprovalObserver>,
    told_pending: bool,
}

struct GateState {
    status: ApprovalStatus,
    checking: bool,
    observers: Vec<ObserverSlot>,
}

struct GateInner {
    suggested_petname: String,
    origin: DappOrigin,
    authority: Arc<dyn ApprovalAuthority>,
    state: Mutex<GateState>,
    outcome: watch::Sender<Option<Result<(), ApprovalError>>>,
}

/// Approval state of one (petname, origin) pair. Clones share the state.
#[derive(Clone)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

impl ApprovalGate {
    pub fn new(
        authority: Arc<dyn ApprovalAuthority>,
        suggested_petname: impl Into<String>,
        origin: DappOrigin,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(GateInner {
                suggested_petname: suggested_petname.into(),
                origin,
                authority,
                state: Mutex::new(GateState {
                    status: ApprovalStatus::Unresolved,
                    checking: false,
                    observers: Vec::new(),
                }),
                outcome,
            }),
        }
    }

    pub fn origin(&self) -> &DappOrigin {
        &self.inner.origin
    }

    pub fn suggested_petname(&self) -> &str {
        &self.inner.suggested_petname
    }

    pub fn status(&self) -> ApprovalStatus {
        self.lock().status.clone()
    }

    /// Wait until the dapp is approved.
    pub async fn approve(&self) -> Result<(), ApprovalError> {
        self.approve_observed(None).await
    }

    /// Wait until the dapp is approved, registering `observer` first.
    ///
    /// If the gate is already pending the observer hears `needs_approval`
    /// before this returns control to the scheduler.
    pub async fn approve_observed(
        &self,
        observer: Option<&Arc<dyn ApprovalObserver>>,
    ) -> Result<(), ApprovalError> {
        let mut outcome = {
            let mut state = self.lock();
            match &state.status {
                ApprovalStatus::Approved => return Ok(()),
                ApprovalStatus::Failed(e) => return Err(e.clone()),
                ApprovalStatus::Unresolved | ApprovalStatus::Pending => {}
            }
            if let Some(observer) = observer {
                self.register(&mut state, observer);
            }
            let outcome = self.inner.outcome.subscribe();
            if !state.checking {
                state.checking = true;
                self.start_check();
            }
            outcome
        };

        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|settled| (*settled).clone());
        match settled {
            Ok(Some(result)) => result,
            // The sender lives as long as the gate, so this cannot happen
            // while we hold `self`.
            Ok(None) | Err(_) => Err(self.identity_error("approval check vanished")),
        }
    }

    /// Stop telling `observer` about transitions.
    pub fn forget(&self, observer: &Arc<dyn ApprovalObserver>) {
        self.lock()
            .observers
            .retain(|slot| !Arc::ptr_eq(&slot.observer, observer));
    }

    fn register(&self, state: &mut GateState, observer: &Arc<dyn ApprovalObserver>) {
        if state
            .observers
            .iter()
            .any(|slot| Arc::ptr_eq(&slot.observer, observer))
        {
            return;
        }
        let told_pending = state.status == ApprovalStatus::Pending;
        if told_pending {
            observer.needs_approval(&self.inner.origin, &self.inner.suggested_petname);
        }
        state.observers.push(ObserverSlot {
            observer: observer.clone(),
            told_pending,
        });
    }

    fn start_check(&self) {
        let gate = self.clone();
        tokio::spawn(async move {
            let hook_gate = gate.clone();
            let on_pending: PendingHook = Box::new(move || hook_gate.mark_pending());
            let result = gate
                .inner
                .authority
                .wait_for_dapp_approval(&gate.inner.suggested_petname, &gate.inner.origin, on_pending)
                .await;
            gate.settle(result);
        });
    }

    fn mark_pending(&self) {
        let mut state = self.lock();
        if state.status != ApprovalStatus::Unresolved {
            return;
        }
        state.status = ApprovalStatus::Pending;
        tracing::info!(
            origin = %self.inner.origin,
            petname = %self.inner.suggested_petname,
            "dapp needs approval"
        );
        for slot in state.observers.iter_mut().filter(|slot| !slot.told_pending) {
            slot.told_pending = true;
            slot.observer
                .needs_approval(&self.inner.origin, &self.inner.suggested_petname);
        }
    }

    fn settle(&self, result: Result<(), AdminError>) {
        let mut state = self.lock();
        let outcome = match result {
            Ok(()) => {
                if state.status == ApprovalStatus::Pending {
                    tracing::info!(origin = %self.inner.origin, "dapp approved");
                    for slot in state.observers.iter().filter(|slot| slot.told_pending) {
                        slot.observer.approved(&self.inner.origin);
                    }
                }
                state.status = ApprovalStatus::Approved;
                Ok(())
            }
            Err(e) => {
                let err = self.identity_error(e.to_string());
                tracing::warn!(origin = %self.inner.origin, error = %err, "dapp approval failed");
                state.status = ApprovalStatus::Failed(err.clone());
                Err(err)
            }
        };
        state.observers.clear();
        self.inner.outcome.send_replace(Some(outcome));
    }

    fn identity_error(&self, reason: impl Into<String>) -> ApprovalError {
        ApprovalError::Identity {
            origin: self.inner.origin.to_string(),
            reason: reason.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Every gate of one wallet, keyed by (suggested petname, origin).
pub struct ApprovalRegistry {
    authority: Arc<dyn ApprovalAuthority>,
    gates: Mutex<HashMap<(String, DappOrigin), ApprovalGate>>,
}

impl ApprovalRegistry {
    pub fn new(authority: Arc<dyn ApprovalAuthority>) -> Self {
        Self {
            authority,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// The gate for this pair, created unresolved on first use.
    pub fn gate(&self, suggested_petname: &str, origin: &DappOrigin) -> ApprovalGate {
        self.lock_gates()
            .entry((suggested_petname.to_string(), origin.clone()))
            .or_insert_with(|| {
                ApprovalGate::new(self.authority.clone(), suggested_petname, origin.clone())
            })
            .clone()
    }

    /// Unregister `observer` from every gate.
    pub fn forget(&self, observer: &Arc<dyn ApprovalObserver>) {
        let gates: Vec<ApprovalGate> = self.lock_gates().values().cloned().collect();
        for gate in gates {
            gate.forget(observer);
        }
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<(String, DappOrigin), ApprovalGate>> {
        self.gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
