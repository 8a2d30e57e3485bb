//! Callback correlator
//!
//! Captures the browser redirect carrying `{code, state}` from either of
//! two delivery channels (the host's same-origin message bridge and its
//! dedicated typed channel), validates it against the active flow, and
//! forwards exactly one authorization code.
//!
//! Both channels feed a single consumer through one queue; a seen-code set
//! makes double delivery idempotent, and the exchange itself runs through a
//! debounced slot so near-simultaneous duplicates collapse onto one call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use authprobe_core::FlowStep;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::machine::DebugFlowMachine;

/// Fixed debounce window before the scheduled exchange runs. Overridable
/// per-correlator for tests.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(50);

/// Payload type discriminator expected on every callback delivery.
pub const CALLBACK_KIND: &str = "OAUTH_CALLBACK";

/// Redirect payload as delivered by the host's browser layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub state: String,
}

impl CallbackPayload {
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            kind: CALLBACK_KIND.to_string(),
            code: code.into(),
            state: state.into(),
        }
    }
}

/// One delivery: the payload plus, on the message-channel path, the origin
/// it came from.
#[derive(Debug, Clone)]
pub struct CallbackEnvelope {
    pub origin: Option<String>,
    pub payload: CallbackPayload,
}

/// The two producer channels the host's browser layer posts into.
pub struct CallbackChannels {
    message_tx: broadcast::Sender<CallbackEnvelope>,
    broadcast_tx: broadcast::Sender<CallbackEnvelope>,
}

impl Default for CallbackChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackChannels {
    pub fn new() -> Self {
        let (message_tx, _) = broadcast::channel(32);
        let (broadcast_tx, _) = broadcast::channel(32);
        Self {
            message_tx,
            broadcast_tx,
        }
    }

    /// Deliver via the same-origin message path. The origin is checked by
    /// the correlator; cross-origin messages are never trusted.
    pub fn deliver_message(&self, origin: impl Into<String>, payload: CallbackPayload) {
        let _ = self.message_tx.send(CallbackEnvelope {
            origin: Some(origin.into()),
            payload,
        });
    }

    /// Deliver via the dedicated typed channel (same-origin by
    /// construction, so no origin tag).
    pub fn deliver_broadcast(&self, payload: CallbackPayload) {
        let _ = self.broadcast_tx.send(CallbackEnvelope {
            origin: None,
            payload,
        });
    }

    fn subscribe_message(&self) -> broadcast::Receiver<CallbackEnvelope> {
        self.message_tx.subscribe()
    }

    fn subscribe_broadcast(&self) -> broadcast::Receiver<CallbackEnvelope> {
        self.broadcast_tx.subscribe()
    }
}

/// Subscribes to both channels for the lifetime of one flow session.
pub struct CallbackCorrelator {
    machine: Arc<DebugFlowMachine>,
    tasks: Vec<JoinHandle<()>>,
}

impl CallbackCorrelator {
    /// Subscribe to both channels with the default debounce window.
    pub fn new(
        channels: &CallbackChannels,
        machine: Arc<DebugFlowMachine>,
        own_origin: impl Into<String>,
    ) -> Self {
        Self::with_debounce(channels, machine, own_origin, DEBOUNCE_DELAY)
    }

    /// Subscribe with an explicit debounce window (test override).
    pub fn with_debounce(
        channels: &CallbackChannels,
        machine: Arc<DebugFlowMachine>,
        own_origin: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<CallbackEnvelope>(32);

        let mut tasks = Vec::new();
        tasks.push(Self::forward(channels.subscribe_message(), tx.clone()));
        tasks.push(Self::forward(channels.subscribe_broadcast(), tx));
        tasks.push(tokio::spawn(Self::consume(
            rx,
            machine.clone(),
            own_origin.into(),
            debounce,
        )));

        Self { machine, tasks }
    }

    /// Forward one producer channel into the shared consumer queue.
    fn forward(
        mut rx: broadcast::Receiver<CallbackEnvelope>,
        tx: mpsc::Sender<CallbackEnvelope>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[Callback] Channel lagged, dropped {} deliveries", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Validate deliveries and schedule the exchange. Ordering of the
    /// checks mirrors the trust boundary: origin, shape, dedup, flow step,
    /// nonce presence, nonce match.
    async fn consume(
        mut rx: mpsc::Receiver<CallbackEnvelope>,
        machine: Arc<DebugFlowMachine>,
        own_origin: String,
        debounce: Duration,
    ) {
        let mut seen_codes: HashSet<String> = HashSet::new();

        while let Some(envelope) = rx.recv().await {
            if let Some(origin) = &envelope.origin {
                if *origin != own_origin {
                    debug!("[Callback] Discarding cross-origin message from {}", origin);
                    continue;
                }
            }

            let payload = envelope.payload;
            if payload.kind != CALLBACK_KIND || payload.code.is_empty() {
                debug!("[Callback] Discarding malformed payload");
                continue;
            }

            if seen_codes.contains(&payload.code) {
                debug!("[Callback] Duplicate code delivery ignored");
                continue;
            }

            let snapshot = machine.snapshot().await;
            if !snapshot.current_step.accepts_callback() {
                debug!(
                    "[Callback] Ignoring delivery at step {}",
                    snapshot.current_step.label()
                );
                continue;
            }

            let Some(nonce) = snapshot.state else {
                warn!("[Callback] No state nonce on flow - it was reset mid-authorization");
                machine
                    .state_handle()
                    .update(|s| {
                        s.error = Some(
                            "Authorization flow was reset - start the flow again".to_string(),
                        );
                    })
                    .await;
                continue;
            };

            if nonce != payload.state {
                warn!("[Callback] State mismatch - rejecting callback");
                machine
                    .state_handle()
                    .update(|s| {
                        s.error = Some(
                            "State parameter mismatch - stale or forged callback rejected"
                                .to_string(),
                        );
                    })
                    .await;
                continue;
            }

            info!("[Callback] Authorization code accepted");
            seen_codes.insert(payload.code.clone());

            machine
                .state_handle()
                .update(|s| {
                    s.authorization_code = Some(payload.code.clone());
                    s.current_step = FlowStep::ReceivedAuthorizationCode;
                    s.log("Authorization code received - exchange scheduled");
                    s.error = None;
                })
                .await;

            // A newer valid code lands in the same slot, cancelling and
            // rescheduling the pending exchange.
            let machine = machine.clone();
            let slot = machine.pending_exchange();
            slot.schedule(debounce, async move {
                machine.proceed_to_next_step().await;
            });
        }
    }

    /// Unsubscribe from both channels and cancel any pending deferred
    /// exchange.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.machine.pending_exchange().cancel();
    }
}

impl Drop for CallbackCorrelator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
