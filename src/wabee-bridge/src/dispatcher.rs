//! Applies queued envelopes to the host on the main context.

use crate::envelope::{Envelope, PrivateMessage, UserUpdate};
use crate::host::{BuddyStatus, ConnectionId, HostApplication, MessageFlags};
use crate::queue::EventReceiver;

/// Link state as observed by the main context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Login is still in progress on the protocol thread.
    #[default]
    Connecting,
    Connected,
    Failed { reason: String },
    Disconnected { reason: Option<String> },
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Failed { .. } | LinkState::Disconnected { .. })
    }
}

/// What the periodic caller should do after a dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    Continue,
    Stop,
}

#[derive(Debug)]
pub struct Dispatcher {
    connection: ConnectionId,
    events: EventReceiver,
    state: LinkState,
}

impl Dispatcher {
    pub fn new(connection: ConnectionId, events: EventReceiver) -> Self {
        Self {
            connection,
            events,
            state: LinkState::default(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Drains whatever is queued right now and applies it in order. Never blocks.
    pub fn dispatch<H: HostApplication + ?Sized>(&mut self, host: &mut H) -> Rearm {
        for envelope in self.events.drain() {
            if self.state.is_terminal() {
                tracing::warn!(
                    connection = %self.connection,
                    kind = %envelope.kind(),
                    "envelope after session end, dropping"
                );
                continue;
            }
            self.apply(host, envelope);
        }

        if self.state.is_terminal() {
            Rearm::Stop
        } else {
            Rearm::Continue
        }
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Drops anything still queued; used when the session is torn down.
    pub fn discard_pending(&self) -> usize {
        self.events.discard_pending()
    }

    pub(crate) fn mark_disconnected(&mut self, reason: Option<String>) {
        if !self.state.is_terminal() {
            self.state = LinkState::Disconnected { reason };
        }
    }

    fn apply<H: HostApplication + ?Sized>(&mut self, host: &mut H, envelope: Envelope) {
        tracing::trace!(connection = %self.connection, kind = %envelope.kind(), "dispatching");
        match envelope {
            Envelope::Connected => {
                if self.state == LinkState::Connected {
                    tracing::warn!(connection = %self.connection, "duplicate connected event");
                    return;
                }
                self.state = LinkState::Connected;
                host.notify_connected(self.connection);
            }
            Envelope::LoginFailed { reason } => {
                host.log_message(self.connection, &format!("Login failed: {reason}"));
                self.state = LinkState::Failed { reason };
            }
            Envelope::Disconnected { reason } => {
                host.notify_disconnected(self.connection, reason.as_deref());
                self.state = LinkState::Disconnected { reason };
            }
            Envelope::PrivateMessage(message) => self.deliver(host, message),
            Envelope::UserUpdate(update) => self.update_user(host, update),
        }
    }

    fn deliver<H: HostApplication + ?Sized>(&self, host: &mut H, message: PrivateMessage) {
        host.deliver_message(
            self.connection,
            &message.sender,
            &message.text,
            MessageFlags::NONE,
            None,
        );
    }

    fn update_user<H: HostApplication + ?Sized>(&self, host: &mut H, update: UserUpdate) {
        let handle = update.user_id.as_str();
        if !host.lookup_buddy(self.connection, handle) {
            tracing::debug!(connection = %self.connection, user = %handle, "adding buddy");
            host.add_buddy(self.connection, handle, None);
        }
        if let Some(name) = update.display_name() {
            host.rename_buddy(self.connection, handle, name);
        }
        if let Some(hint) = update.nickname_hint() {
            host.set_nickname_hint(self.connection, handle, hint);
        }
        host.set_buddy_status(
            self.connection,
            handle,
            BuddyStatus::LOGGED_IN_AWAY,
            None,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{event_queue, EventSender};
    use crate::testing::{HostCall, RecordingHost};

    const CONN: ConnectionId = ConnectionId(7);

    fn dispatcher() -> (EventSender, Dispatcher) {
        let (tx, rx) = event_queue();
        (tx, Dispatcher::new(CONN, rx))
    }

    fn update(id: &str, name: Option<&str>, hint: Option<&str>) -> Envelope {
        Envelope::UserUpdate(UserUpdate {
            user_id: id.into(),
            display_name: name.map(Into::into),
            nickname_hint: hint.map(Into::into),
        })
    }

    #[test]
    fn private_message_is_delivered_once_without_flags() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(Envelope::PrivateMessage(PrivateMessage {
            sender: "u1".into(),
            sender_display_name: None,
            text: "hello".into(),
        }));

        assert_eq!(dispatcher.dispatch(&mut host), Rearm::Continue);
        assert_eq!(
            host.calls(),
            &[HostCall::DeliverMessage {
                connection: CONN,
                sender: "u1".into(),
                text: "hello".into(),
                flags: MessageFlags::NONE,
            }]
        );
    }

    #[test]
    fn unseen_user_is_added_before_any_update() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(update("u1", Some("Uno"), Some("uno")));
        dispatcher.dispatch(&mut host);

        assert_eq!(
            host.calls(),
            &[
                HostCall::AddBuddy {
                    connection: CONN,
                    handle: "u1".into(),
                },
                HostCall::RenameBuddy {
                    connection: CONN,
                    handle: "u1".into(),
                    name: "Uno".into(),
                },
                HostCall::SetNicknameHint {
                    connection: CONN,
                    handle: "u1".into(),
                    hint: "uno".into(),
                },
                HostCall::SetBuddyStatus {
                    connection: CONN,
                    handle: "u1".into(),
                    status: BuddyStatus::LOGGED_IN_AWAY,
                },
            ]
        );
    }

    #[test]
    fn known_user_is_not_added_again() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(update("u1", None, None));
        tx.push(update("U1", Some("Uno"), None));
        dispatcher.dispatch(&mut host);

        assert_eq!(host.count(|c| matches!(c, HostCall::AddBuddy { .. })), 1);
        assert_eq!(
            host.count(|c| matches!(c, HostCall::SetBuddyStatus { .. })),
            2
        );
    }

    #[test]
    fn empty_fields_skip_rename_and_hint() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        host.seed_buddy(CONN, "u1");
        tx.push(update("u1", Some(""), None));
        dispatcher.dispatch(&mut host);

        assert_eq!(
            host.calls(),
            &[HostCall::SetBuddyStatus {
                connection: CONN,
                handle: "u1".into(),
                status: BuddyStatus::LOGGED_IN_AWAY,
            }]
        );
    }

    #[test]
    fn empty_nickname_hint_is_skipped() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        host.seed_buddy(CONN, "u1");
        tx.push(update("u1", Some("Uno"), Some("")));
        dispatcher.dispatch(&mut host);

        assert_eq!(
            host.calls(),
            &[
                HostCall::RenameBuddy {
                    connection: CONN,
                    handle: "u1".into(),
                    name: "Uno".into(),
                },
                HostCall::SetBuddyStatus {
                    connection: CONN,
                    handle: "u1".into(),
                    status: BuddyStatus::LOGGED_IN_AWAY,
                },
            ]
        );
    }

    #[test]
    fn connected_is_reported_once() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(Envelope::Connected);
        tx.push(update("u1", None, None));
        tx.push(Envelope::Connected);
        dispatcher.dispatch(&mut host);

        assert_eq!(host.count(|c| matches!(c, HostCall::Connected { .. })), 1);
        assert_eq!(host.calls()[0], HostCall::Connected { connection: CONN });
        assert_eq!(dispatcher.state(), &LinkState::Connected);
    }

    #[test]
    fn login_failure_is_logged_and_stops() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(Envelope::LoginFailed {
            reason: "pairing timed out".into(),
        });

        assert_eq!(dispatcher.dispatch(&mut host), Rearm::Stop);
        assert_eq!(
            host.calls(),
            &[HostCall::Log {
                connection: CONN,
                text: "Login failed: pairing timed out".into(),
            }]
        );
    }

    #[test]
    fn nothing_is_applied_after_disconnect() {
        let (tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        tx.push(Envelope::Connected);
        tx.push(Envelope::Disconnected { reason: None });
        tx.push(update("u1", None, None));

        assert_eq!(dispatcher.dispatch(&mut host), Rearm::Stop);
        assert_eq!(
            host.calls(),
            &[
                HostCall::Connected { connection: CONN },
                HostCall::Disconnected {
                    connection: CONN,
                    reason: None,
                },
            ]
        );
    }

    #[test]
    fn empty_queue_rearms_without_host_calls() {
        let (_tx, mut dispatcher) = dispatcher();
        let mut host = RecordingHost::new();
        assert_eq!(dispatcher.dispatch(&mut host), Rearm::Continue);
        assert!(host.calls().is_empty());
    }
}
