//! Per-connection state machine.
//!
//! Admission (counting, parsing, the advisory ordering check) happens
//! inline on the reader task. Execution is deferred by an independent
//! random delay per frame, so commands may complete out of arrival
//! order; each deferred execution takes the session lock and runs the
//! handler as one indivisible unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use confab_protocol::{ClientFrame, CommandError, ServerMessage};
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientId, ClientSender};
use crate::handlers::{self, SharedState};
use crate::registry::Conversation;

/// Mutable session state touched by deferred command executions.
#[derive(Default)]
pub struct SessionState {
    /// Set by the first successful join.
    pub display_name: Option<String>,
    /// The joined conversation, if any. Not owned: the registry keeps
    /// conversations alive for the process lifetime.
    pub conversation: Option<Arc<Conversation>>,
    /// Set only by a successful `authenticate`.
    pub is_admin: bool,
    /// Set on close, under the state lock. A deferred dispatch whose
    /// timer already fired checks this before running its handler, so
    /// no command executes against a torn-down session.
    pub(crate) closed: bool,
}

/// One session per connection, owned by the connection pump.
pub struct Session {
    channel: ClientSender,
    shared: Arc<SharedState>,
    state: Mutex<SessionState>,
    /// Counts inbound frames, parsed or not. The next frame's reqId is
    /// expected to equal the post-increment value.
    expected_req_id: AtomicU64,
    cancel: CancellationToken,
    jitter_ms: u64,
}

impl Session {
    pub fn new(channel: ClientSender, shared: Arc<SharedState>, jitter_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            channel,
            shared,
            state: Mutex::new(SessionState::default()),
            expected_req_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            jitter_ms,
        })
    }

    pub fn id(&self) -> &ClientId {
        self.channel.id()
    }

    /// Admit one raw inbound frame and schedule its execution.
    pub fn handle_frame(self: &Arc<Self>, raw: &str) {
        let expected = self.expected_req_id.fetch_add(1, Ordering::Relaxed) + 1;

        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(_) => {
                tracing::info!(client_id = %self.id(), "Received malformed frame");
                self.channel
                    .send(&ServerMessage::error(None, &CommandError::InvalidFormat));
                return;
            }
        };

        if frame.req_id != expected {
            // Advisory only: the mismatch is reported but the command
            // still executes.
            self.channel.send(&ServerMessage::error(
                Some(frame.req_id),
                &CommandError::ReqIdMismatch { expected },
            ));
        }

        let delay = self.dispatch_delay();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = session.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => session.dispatch(&frame),
            }
        });
    }

    fn dispatch(&self, frame: &ClientFrame) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        handlers::execute(&self.shared, &mut state, &self.channel, frame);
    }

    fn dispatch_delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..self.jitter_ms))
    }

    /// Tear down on channel close: cancel pending deferred executions
    /// and leave the current conversation, if any.
    pub fn close(&self) {
        self.cancel.cancel();
        let (conversation, name) = {
            // The cancel token only covers dispatches still sleeping;
            // one whose select already chose the timer branch races
            // it. The closed flag makes teardown and dispatch mutually
            // exclusive under the state lock.
            let mut state = self.state.lock();
            state.closed = true;
            (state.conversation.take(), state.display_name.take())
        };
        if let (Some(conversation), Some(name)) = (conversation, name) {
            tracing::info!(
                client_id = %self.id(),
                conversation = conversation.id(),
                display_name = %name,
                "Member left on close"
            );
            handlers::leave_conversation(&conversation, &name);
        }
    }
}
