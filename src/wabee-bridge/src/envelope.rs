//! Cross-thread notifications produced by the protocol thread.

use std::fmt;

/// One notification handed from the protocol thread to the dispatcher.
///
/// Envelopes are moved through the queue; the dispatcher consumes each one by
/// value, so a payload is released exactly once after it has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Login finished and the read loop is about to start.
    Connected,
    /// Login failed; no read loop will follow.
    LoginFailed { reason: String },
    /// The read loop returned. `reason` carries the protocol error, if any.
    Disconnected { reason: Option<String> },
    PrivateMessage(PrivateMessage),
    UserUpdate(UserUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub sender: String,
    pub sender_display_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUpdate {
    pub user_id: String,
    pub display_name: Option<String>,
    pub nickname_hint: Option<String>,
}

/// Discriminant of an [`Envelope`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Connected,
    LoginFailed,
    Disconnected,
    PrivateMessage,
    UserUpdate,
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Connected => EnvelopeKind::Connected,
            Envelope::LoginFailed { .. } => EnvelopeKind::LoginFailed,
            Envelope::Disconnected { .. } => EnvelopeKind::Disconnected,
            Envelope::PrivateMessage(_) => EnvelopeKind::PrivateMessage,
            Envelope::UserUpdate(_) => EnvelopeKind::UserUpdate,
        }
    }

    /// Whether the protocol thread produces nothing after this envelope.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Envelope::LoginFailed { .. } | Envelope::Disconnected { .. })
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeKind::Connected => "connected",
            EnvelopeKind::LoginFailed => "login_failed",
            EnvelopeKind::Disconnected => "disconnected",
            EnvelopeKind::PrivateMessage => "private_message",
            EnvelopeKind::UserUpdate => "user_update",
        };
        f.write_str(name)
    }
}

impl UserUpdate {
    /// Display name to apply, treating an empty string as absent.
    pub fn display_name(&self) -> Option<&str> {
        non_empty(self.display_name.as_deref())
    }

    /// Nickname hint to apply, treating an empty string as absent.
    pub fn nickname_hint(&self) -> Option<&str> {
        non_empty(self.nickname_hint.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failures_and_disconnects_are_terminal() {
        assert!(!Envelope::Connected.is_terminal());
        assert!(Envelope::LoginFailed {
            reason: "qr timeout".into()
        }
        .is_terminal());
        assert!(Envelope::Disconnected { reason: None }.is_terminal());
    }

    #[test]
    fn empty_optional_fields_read_as_absent() {
        let update = UserUpdate {
            user_id: "u1".into(),
            display_name: Some(String::new()),
            nickname_hint: Some("bob".into()),
        };
        assert_eq!(update.display_name(), None);
        assert_eq!(update.nickname_hint(), Some("bob"));
    }

    #[test]
    fn kind_names_are_snake_case() {
        let env = Envelope::UserUpdate(UserUpdate {
            user_id: "u1".into(),
            display_name: None,
            nickname_hint: None,
        });
        assert_eq!(env.kind().to_string(), "user_update");
    }
}
