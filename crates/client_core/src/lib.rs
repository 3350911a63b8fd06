use std::{sync::Arc, time::Duration};

use serde_json::Value;
use shared::{
    domain::{AttemptId, SessionState},
    error::{FeedError, InvocationError},
    protocol::{InvocationReceipt, InvocationRequest, VerdictEvent},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod feed;
pub mod invoker;
pub mod timer;

pub use feed::{
    DeliveryHandler, EventFeed, FeedDelivery, MissingEventFeed, SubscriptionHandle, WsEventFeed,
};
pub use invoker::{ContractInvoker, HttpContractInvoker, MissingContractInvoker};
pub use timer::DelayedTransition;

const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// One item of the session's drain queue. Feed deliveries and attempt markers
/// share a single ordered queue: a verdict that was enqueued before the
/// current attempt's `AttemptArmed` marker belongs to a superseded attempt.
enum DrainItem {
    Feed(FeedDelivery),
    AttemptArmed(u64),
}

/// Fixed parameters of the verification program: where it lives, which
/// function to call, which event carries the verdict, and how long to sit
/// quiet after a verdict before the follow-up transition.
///
/// `value`/`gas_limit`/`gas_price` of zero are forwarded as-is; the executor
/// treats them as "estimate for me".
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub contract_address: String,
    pub abi: Value,
    pub function_name: String,
    pub event_name: String,
    pub quiet_period: Duration,
    pub value: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
}

/// Outbound-only signals for any observer (UI, logger, test harness).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    InvocationFailed(String),
    VerdictReceived(bool),
    ReadyForNextAttempt,
    AdvanceRequested,
    SubscriptionLost,
}

struct SessionInner {
    state: SessionState,
    last_input: String,
    attempt_id: Option<AttemptId>,
    /// Bumped on reset and on every consumed verdict. Deliveries and timer
    /// fires belonging to a superseded attempt compare against it and drop out.
    generation: u64,
    invocation_in_flight: bool,
    subscription: Option<SubscriptionHandle>,
    drain_tx: Option<mpsc::UnboundedSender<DrainItem>>,
    drain_task: Option<JoinHandle<()>>,
    follow_up: timer::DelayedTransition,
}

/// The verification state machine: `Idle → Listening → {Correct, Incorrect} → Idle`.
///
/// Two asynchronous producers feed it (invocation completion and feed
/// deliveries); all transitions funnel through one mutex-guarded state, and
/// the generation counter is checked at the moment of delivery so stale or
/// duplicate verdicts are dropped deterministically.
pub struct VerificationSession {
    invoker: Arc<dyn ContractInvoker>,
    feed: Arc<dyn EventFeed>,
    config: VerifierConfig,
    inner: Mutex<SessionInner>,
    signals: broadcast::Sender<SessionSignal>,
}

impl VerificationSession {
    pub fn new(
        config: VerifierConfig,
        invoker: Arc<dyn ContractInvoker>,
        feed: Arc<dyn EventFeed>,
    ) -> Arc<Self> {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Arc::new(Self {
            invoker,
            feed,
            config,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                last_input: String::new(),
                attempt_id: None,
                generation: 0,
                invocation_in_flight: false,
                subscription: None,
                drain_tx: None,
                drain_task: None,
                follow_up: timer::DelayedTransition::new(),
            }),
            signals,
        })
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_input(&self) -> String {
        self.inner.lock().await.last_input.clone()
    }

    /// Arms the feed subscription for the configured verdict event and spawns
    /// the drain task. The session stays `Idle` until an invocation succeeds.
    /// Calling it again replaces any prior subscription (idempotent re-arm).
    pub async fn start(self: &Arc<Self>) -> Result<(), FeedError> {
        let (drain_tx, mut drain_rx) = mpsc::unbounded_channel::<DrainItem>();
        let handler_tx = drain_tx.clone();
        let handler: DeliveryHandler = Box::new(move |delivery| {
            let _ = handler_tx.send(DrainItem::Feed(delivery));
        });
        let handle = self.feed.subscribe(&self.config.event_name, handler).await?;
        info!(event = %self.config.event_name, "session: subscription armed");

        let session = Arc::clone(self);
        let drain_task = tokio::spawn(async move {
            let mut armed_generation = None;
            while let Some(item) = drain_rx.recv().await {
                match item {
                    DrainItem::AttemptArmed(generation) => armed_generation = Some(generation),
                    DrainItem::Feed(FeedDelivery::Verdict(verdict)) => {
                        session.consume_verdict(verdict, armed_generation).await;
                    }
                    DrainItem::Feed(FeedDelivery::Lost) => session.handle_feed_lost().await,
                }
            }
        });

        let (previous_handle, previous_task) = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Listening {
                // Re-armed mid-attempt: carry the attempt over to the new
                // drain queue so its verdict is still consumable.
                let _ = drain_tx.send(DrainItem::AttemptArmed(inner.generation));
            }
            inner.drain_tx = Some(drain_tx);
            (
                inner.subscription.replace(handle),
                inner.drain_task.replace(drain_task),
            )
        };
        if let Some(handle) = previous_handle {
            self.feed.unsubscribe(&handle).await;
        }
        if let Some(task) = previous_task {
            task.abort();
        }
        Ok(())
    }

    /// Submits one verification attempt. On failure the session is left
    /// exactly where it was (`Idle`, no timer, no subscription change) and the
    /// failure is both returned and signalled. On success the session enters
    /// `Listening` and waits for the verdict event.
    ///
    /// At most one invocation may be in flight; a `submit` while one is
    /// pending or while a verdict is being handled is rejected up front.
    pub async fn submit(&self, input: &str) -> Result<InvocationReceipt, InvocationError> {
        let (generation, attempt_id) = {
            let mut inner = self.inner.lock().await;
            if inner.subscription.is_none() {
                return Err(InvocationError::Validation(
                    "session not started: no verdict subscription armed".into(),
                ));
            }
            if inner.state != SessionState::Idle || inner.invocation_in_flight {
                return Err(InvocationError::Validation(format!(
                    "session is busy (state {:?})",
                    inner.state
                )));
            }
            inner.invocation_in_flight = true;
            (inner.generation, AttemptId::new())
        };

        let result = self.invoke_attempt(input, attempt_id).await;

        let mut inner = self.inner.lock().await;
        inner.invocation_in_flight = false;
        match result {
            Ok(receipt) => {
                if inner.generation == generation && inner.state == SessionState::Idle {
                    // The marker enters the drain queue before the state
                    // flips; anything already queued ahead of it belongs to
                    // a superseded attempt and will be discarded.
                    if let Some(drain_tx) = &inner.drain_tx {
                        let _ = drain_tx.send(DrainItem::AttemptArmed(generation));
                    }
                    inner.state = SessionState::Listening;
                    inner.last_input = input.to_string();
                    inner.attempt_id = Some(attempt_id);
                    info!(attempt = %attempt_id, tx_hash = %receipt.tx_hash, "session: listening for verdict");
                } else {
                    // A reset raced the call. The transaction is on the ledger
                    // regardless; only the local bookkeeping is superseded.
                    debug!(attempt = %attempt_id, "session: invocation completed after reset, staying idle");
                }
                Ok(receipt)
            }
            Err(err) => {
                warn!(attempt = %attempt_id, error = %err, "session: invocation failed");
                let _ = self
                    .signals
                    .send(SessionSignal::InvocationFailed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn invoke_attempt(
        &self,
        input: &str,
        attempt_id: AttemptId,
    ) -> Result<InvocationReceipt, InvocationError> {
        let request = InvocationRequest::new(
            self.config.contract_address.clone(),
            self.config.abi.clone(),
            self.config.function_name.clone(),
            vec![Value::String(input.to_string())],
            self.config.value,
            self.config.gas_limit,
            self.config.gas_price,
        )?;
        debug!(attempt = %attempt_id, function = %request.function_name, "session: invoking verifier");
        self.invoker.invoke(&request).await
    }

    /// Forces `Idle` from any state: cancels an armed follow-up, invalidates
    /// any pending invocation completion and any late verdict delivery. A call
    /// already submitted to the ledger cannot be cancelled, only disowned.
    /// The subscription stays armed so a fresh `submit` is immediately valid.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.state = SessionState::Idle;
        inner.invocation_in_flight = false;
        inner.last_input.clear();
        inner.attempt_id = None;
        inner.follow_up.cancel();
        info!(generation = inner.generation, "session: reset to idle");
    }

    /// Tears the session down: drops the subscription and drain task, then
    /// resets. After `stop`, `submit` is rejected until `start` is called again.
    pub async fn stop(&self) {
        let (handle, task) = {
            let mut inner = self.inner.lock().await;
            inner.drain_tx = None;
            (inner.subscription.take(), inner.drain_task.take())
        };
        if let Some(handle) = handle {
            self.feed.unsubscribe(&handle).await;
        }
        if let Some(task) = task {
            task.abort();
        }
        self.reset().await;
    }

    async fn consume_verdict(self: &Arc<Self>, verdict: VerdictEvent, armed_generation: Option<u64>) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Listening || armed_generation != Some(inner.generation) {
            // Stale or duplicate delivery from a superseded attempt. The feed
            // knows nothing about session resets, so this is the one place the
            // guard can live: the delivery was enqueued behind an older
            // attempt marker (or none at all) and does not belong to the
            // attempt currently listening.
            debug!(
                sequence_id = verdict.sequence_id.0,
                state = ?inner.state,
                armed_generation = ?armed_generation,
                generation = inner.generation,
                "session: discarding stale verdict"
            );
            return;
        }

        inner.generation += 1;
        inner.state = if verdict.result {
            SessionState::Correct
        } else {
            SessionState::Incorrect
        };
        info!(
            attempt = ?inner.attempt_id,
            sequence_id = verdict.sequence_id.0,
            result = verdict.result,
            "session: verdict consumed"
        );
        let _ = self
            .signals
            .send(SessionSignal::VerdictReceived(verdict.result));

        let session = Arc::clone(self);
        let generation = inner.generation;
        let quiet_period = self.config.quiet_period;
        inner.follow_up.arm(quiet_period, move || async move {
            session.finish_quiet_period(generation).await;
        });
    }

    async fn finish_quiet_period(self: Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || !inner.state.is_terminal_verdict() {
            return;
        }
        let signal = if inner.state == SessionState::Correct {
            SessionSignal::AdvanceRequested
        } else {
            SessionSignal::ReadyForNextAttempt
        };
        inner.state = SessionState::Idle;
        inner.last_input.clear();
        inner.attempt_id = None;
        debug!(signal = ?signal, "session: quiet period elapsed");
        let _ = self.signals.send(signal);
    }

    async fn handle_feed_lost(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.subscription = None;
        }
        warn!("session: verdict subscription lost");
        let _ = self.signals.send(SessionSignal::SubscriptionLost);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
