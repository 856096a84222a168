//! Turns protocol callbacks into envelopes and runs the protocol on its own thread.

use crate::envelope::{Envelope, PrivateMessage, UserUpdate};
use crate::error::{SessionError, SessionResult};
use crate::host::ConnectionId;
use crate::protocol::{
    NativePrivateMessage, NativeUser, ProtocolBackend, ProtocolClient, ProtocolError,
    ProtocolHandler,
};
use crate::queue::EventSender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use wabee_core::AccountConfig;

/// Handler registered with the protocol client.
///
/// Runs on the protocol thread and does nothing but build envelopes and push
/// them; it never touches host state.
pub struct EnvelopeProducer {
    connection: ConnectionId,
    events: EventSender,
}

impl EnvelopeProducer {
    pub fn new(connection: ConnectionId, events: EventSender) -> Self {
        Self { connection, events }
    }
}

impl ProtocolHandler for EnvelopeProducer {
    fn on_private_message(&self, message: NativePrivateMessage) {
        let Some(from) = message.from else {
            contract_violation(self.connection, "private message without sender");
        };
        let Some(sender) = from.jid else {
            contract_violation(self.connection, "private message sender without jid");
        };
        let Some(text) = message.text else {
            contract_violation(self.connection, "private message without text");
        };

        self.events.push(Envelope::PrivateMessage(PrivateMessage {
            sender,
            sender_display_name: from.name,
            text,
        }));
    }

    fn on_user_update(&self, user: NativeUser) {
        let Some(user_id) = user.jid else {
            contract_violation(self.connection, "user update without jid");
        };
        tracing::debug!(
            connection = %self.connection,
            user = %user_id,
            name = user.name.as_deref().unwrap_or(""),
            "updating user"
        );

        self.events.push(Envelope::UserUpdate(UserUpdate {
            user_id,
            display_name: user.name,
            nickname_hint: user.notify,
        }));
    }
}

/// The protocol library guarantees these fields; a missing one means the
/// library itself is broken and the session cannot continue.
fn contract_violation(connection: ConnectionId, what: &str) -> ! {
    tracing::error!(connection = %connection, "protocol contract violated: {what}");
    panic!("protocol contract violated on {connection}: {what}");
}

/// Protocol-side half of a running session.
pub struct SessionWorker {
    client: Arc<dyn ProtocolClient>,
    stop_flag: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("stop_requested", &self.stop_requested())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl SessionWorker {
    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// True once the protocol thread has returned (or panicked).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Signals the thread to stop after its current blocking call and asks the
    /// client to interrupt that call. Only the first request reaches the client.
    pub fn request_stop(&self) {
        if !self.stop_flag.swap(true, Ordering::SeqCst) {
            self.client.disconnect();
        }
    }

    /// Joins a finished thread. Returns false if it ended by panicking.
    ///
    /// Must only be called once [`is_finished`](Self::is_finished) is true,
    /// otherwise it blocks the caller.
    pub fn join(&mut self) -> bool {
        match self.join.take() {
            Some(join) => join.join().is_ok(),
            None => true,
        }
    }

    /// Gives up on the thread without joining it.
    pub fn detach(&mut self) {
        self.join.take();
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.request_stop();
        }
    }
}

/// Owns the protocol backend and starts sessions on dedicated threads.
#[derive(Clone)]
pub struct ProtocolAdapter {
    backend: Arc<dyn ProtocolBackend>,
}

impl ProtocolAdapter {
    pub fn new(backend: Arc<dyn ProtocolBackend>) -> Self {
        Self { backend }
    }

    /// Registers callbacks, spawns the protocol thread and returns without
    /// waiting for login.
    pub fn start_session(
        &self,
        connection: ConnectionId,
        account: &AccountConfig,
        events: EventSender,
    ) -> SessionResult<SessionWorker> {
        let handler = Arc::new(EnvelopeProducer::new(connection, events.clone()));
        let client = self
            .backend
            .init(account, handler)
            .map_err(SessionError::Init)?;
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread_client = client.clone();
        let thread_stop = stop_flag.clone();
        let join = thread::Builder::new()
            .name(format!("wabee-{}", account.username))
            .spawn(move || run_protocol(connection, thread_client, thread_stop, events))
            .map_err(|err| {
                tracing::error!(connection = %connection, error = %err, "error creating protocol thread");
                SessionError::Spawn(err)
            })?;

        tracing::info!(connection = %connection, account = %account.username, "protocol thread started");
        Ok(SessionWorker {
            client,
            stop_flag,
            join: Some(join),
        })
    }
}

fn run_protocol(
    connection: ConnectionId,
    client: Arc<dyn ProtocolClient>,
    stop_flag: Arc<AtomicBool>,
    events: EventSender,
) {
    if let Err(err) = client.login() {
        tracing::warn!(connection = %connection, error = %err, "login failed");
        let reason = match err {
            ProtocolError::Login(reason) => reason,
            other => other.to_string(),
        };
        events.push(Envelope::LoginFailed { reason });
        return;
    }
    tracing::info!(connection = %connection, "logged in");
    events.push(Envelope::Connected);

    if stop_flag.load(Ordering::SeqCst) {
        events.push(Envelope::Disconnected { reason: None });
        return;
    }

    let reason = match client.run_loop() {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(connection = %connection, error = %err, "protocol loop ended with error");
            Some(err.to_string())
        }
    };
    tracing::info!(connection = %connection, "protocol loop finished");
    events.push(Envelope::Disconnected { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::event_queue;

    fn producer() -> (EnvelopeProducer, crate::queue::EventReceiver) {
        let (tx, rx) = event_queue();
        (EnvelopeProducer::new(ConnectionId(1), tx), rx)
    }

    fn user(jid: &str) -> NativeUser {
        NativeUser {
            jid: Some(jid.into()),
            name: None,
            notify: None,
        }
    }

    #[test]
    fn private_message_becomes_envelope() {
        let (producer, rx) = producer();
        producer.on_private_message(NativePrivateMessage {
            from: Some(NativeUser {
                name: Some("Uno".into()),
                ..user("u1")
            }),
            text: Some("hello".into()),
        });

        assert_eq!(
            rx.drain(),
            vec![Envelope::PrivateMessage(PrivateMessage {
                sender: "u1".into(),
                sender_display_name: Some("Uno".into()),
                text: "hello".into(),
            })]
        );
    }

    #[test]
    fn user_update_keeps_optional_fields() {
        let (producer, rx) = producer();
        producer.on_user_update(NativeUser {
            jid: Some("u2".into()),
            name: None,
            notify: Some("deux".into()),
        });

        assert_eq!(
            rx.drain(),
            vec![Envelope::UserUpdate(UserUpdate {
                user_id: "u2".into(),
                display_name: None,
                nickname_hint: Some("deux".into()),
            })]
        );
    }

    #[test]
    fn stop_request_reaches_client_once() {
        let backend = Arc::new(crate::testing::ScriptedBackend::new().hold_open());
        let adapter = ProtocolAdapter::new(backend.clone());
        let (tx, _rx) = event_queue();
        let mut worker = adapter
            .start_session(ConnectionId(1), &AccountConfig::new("alice"), tx)
            .unwrap();

        worker.request_stop();
        worker.request_stop();
        while !worker.is_finished() {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(worker.join());
        assert_eq!(backend.clients()[0].disconnect_count(), 1);
    }

    #[test]
    #[should_panic(expected = "without text")]
    fn message_without_text_is_fatal() {
        let (producer, _rx) = producer();
        producer.on_private_message(NativePrivateMessage {
            from: Some(user("u1")),
            text: None,
        });
    }

    #[test]
    #[should_panic(expected = "without sender")]
    fn message_without_sender_is_fatal() {
        let (producer, _rx) = producer();
        producer.on_private_message(NativePrivateMessage {
            from: None,
            text: Some("hi".into()),
        });
    }

    #[test]
    #[should_panic(expected = "user update without jid")]
    fn user_without_jid_is_fatal() {
        let (producer, _rx) = producer();
        producer.on_user_update(NativeUser::default());
    }
}
