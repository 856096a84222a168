//! Interface of the host chat application.
//!
//! Every method is called on the host's main context only. The host owns the
//! buddy list and conversation windows; the bridge never stores buddy state.

use std::fmt;
use std::time::SystemTime;
use wabee_core::AccountConfig;

/// Host-side handle for one account connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Formatting flags passed along with a delivered message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags(u32);

impl MessageFlags {
    pub const NONE: Self = Self(0);

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Presence bits for a buddy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuddyStatus {
    pub logged_in: bool,
    pub away: bool,
}

impl BuddyStatus {
    /// The protocol carries no presence yet, so every known contact shows as
    /// online but away.
    pub const LOGGED_IN_AWAY: Self = Self {
        logged_in: true,
        away: true,
    };
}

pub trait HostApplication {
    fn create_connection(&mut self, account: &AccountConfig) -> ConnectionId;

    /// Shows a line in the connection's status window.
    fn log_message(&mut self, connection: ConnectionId, text: &str);

    fn notify_connected(&mut self, connection: ConnectionId);

    /// Marks the connection as gone. `reason` is shown to the user when present.
    fn notify_disconnected(&mut self, connection: ConnectionId, reason: Option<&str>);

    /// `timestamp` of `None` means "now".
    fn deliver_message(
        &mut self,
        connection: ConnectionId,
        sender: &str,
        text: &str,
        flags: MessageFlags,
        timestamp: Option<SystemTime>,
    );

    fn lookup_buddy(&self, connection: ConnectionId, handle: &str) -> bool;

    fn add_buddy(&mut self, connection: ConnectionId, handle: &str, group: Option<&str>);

    fn rename_buddy(&mut self, connection: ConnectionId, handle: &str, display_name: &str);

    fn set_nickname_hint(&mut self, connection: ConnectionId, handle: &str, hint: &str);

    fn set_buddy_status(
        &mut self,
        connection: ConnectionId,
        handle: &str,
        status: BuddyStatus,
        state: Option<&str>,
        message: Option<&str>,
    );
}

/// Handle comparison the protocol registers with the host: ASCII case-insensitive.
pub fn handles_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
