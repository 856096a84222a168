//! Session lifecycle: login, periodic dispatch, outbound messages and teardown.

use crate::adapter::{ProtocolAdapter, SessionWorker};
use crate::dispatcher::{Dispatcher, LinkState, Rearm};
use crate::error::{SessionError, SessionResult};
use crate::host::{ConnectionId, HostApplication};
use crate::protocol::ProtocolBackend;
use crate::queue::event_queue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wabee_core::{validate_account, AccountConfig, BridgeConfig};

const LOGIN_PROMPT: &str = "Login started, check for QR in the console";
const MIN_DISPATCH_INTERVAL_MS: u64 = 1;

/// Everything belonging to one logged-in (or logging-in) account.
#[derive(Debug)]
pub struct Session {
    account: AccountConfig,
    dispatcher: Dispatcher,
    worker: SessionWorker,
    next_due: Instant,
}

impl Session {
    pub fn connection(&self) -> ConnectionId {
        self.dispatcher.connection()
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn state(&self) -> &LinkState {
        self.dispatcher.state()
    }

    fn pump<H: HostApplication + ?Sized>(&mut self, host: &mut H) -> Rearm {
        let rearm = self.dispatcher.dispatch(host);
        if rearm == Rearm::Stop {
            return rearm;
        }

        // A thread that ends without a terminal envelope has panicked. Checking
        // the queue after `is_finished` ensures its last pushes were drained.
        if self.worker.is_finished() && self.dispatcher.pending() == 0 {
            let connection = self.connection();
            let clean = self.worker.join();
            tracing::error!(connection = %connection, clean, "protocol thread died unexpectedly");
            host.log_message(connection, "Protocol thread terminated unexpectedly");
            let reason = "protocol thread terminated".to_string();
            host.notify_disconnected(connection, Some(reason.as_str()));
            self.dispatcher.mark_disconnected(Some(reason));
            return Rearm::Stop;
        }
        Rearm::Continue
    }

    /// Asks the protocol thread to stop and releases the queue without
    /// waiting. A thread that has not returned yet is handed back so the
    /// controller can join it from a later `poll`.
    fn stop(self, deadline: Instant) -> Option<Stopping> {
        let connection = self.connection();
        let dropped = self.dispatcher.discard_pending();
        if dropped > 0 {
            tracing::debug!(connection = %connection, dropped, "discarded pending envelopes");
        }

        let mut worker = self.worker;
        worker.request_stop();
        if worker.is_finished() {
            if !worker.join() {
                tracing::warn!(connection = %connection, "protocol thread panicked");
            }
            return None;
        }
        Some(Stopping {
            connection,
            worker,
            deadline,
        })
    }
}

/// A protocol thread that was told to stop but has not returned yet.
#[derive(Debug)]
struct Stopping {
    connection: ConnectionId,
    worker: SessionWorker,
    deadline: Instant,
}

impl Stopping {
    /// Joins the thread once it has finished, or detaches it after the
    /// deadline. Returns true when the entry can be forgotten.
    fn reap(&mut self, now: Instant) -> bool {
        if self.worker.is_finished() {
            if !self.worker.join() {
                tracing::warn!(connection = %self.connection, "protocol thread panicked");
            }
            tracing::debug!(connection = %self.connection, "protocol thread joined");
            return true;
        }
        if now >= self.deadline {
            tracing::warn!(
                connection = %self.connection,
                "protocol thread did not stop in time, detaching"
            );
            self.worker.detach();
            return true;
        }
        false
    }
}

/// Next dispatch deadline after one that just ran. Missed ticks are skipped
/// rather than replayed back to back.
fn next_deadline(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = due + interval;
    if next > now {
        next
    } else {
        now + interval
    }
}

/// Entry point used by the host: starts sessions and drives their dispatchers.
pub struct SessionController {
    adapter: ProtocolAdapter,
    config: BridgeConfig,
    sessions: BTreeMap<ConnectionId, Session>,
    stopping: Vec<Stopping>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("stopping", &self.stopping.len())
            .finish()
    }
}

impl SessionController {
    pub fn new(backend: Arc<dyn ProtocolBackend>, mut config: BridgeConfig) -> Self {
        if config.dispatch_interval_ms < MIN_DISPATCH_INTERVAL_MS {
            tracing::warn!(
                configured = config.dispatch_interval_ms,
                used = MIN_DISPATCH_INTERVAL_MS,
                "dispatch interval too small, clamping"
            );
            config.dispatch_interval_ms = MIN_DISPATCH_INTERVAL_MS;
        }
        Self {
            adapter: ProtocolAdapter::new(backend),
            config,
            sessions: BTreeMap::new(),
            stopping: Vec::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Begins logging into `account` and returns as soon as the protocol
    /// thread is running. Pairing and login happen on that thread.
    pub fn login<H: HostApplication + ?Sized>(
        &mut self,
        host: &mut H,
        account: AccountConfig,
    ) -> SessionResult<ConnectionId> {
        validate_account(&account)?;

        let connection = host.create_connection(&account);
        let (events, receiver) = event_queue();
        let dispatcher = Dispatcher::new(connection, receiver);
        let next_due = Instant::now() + self.config.dispatch_interval();

        host.log_message(connection, LOGIN_PROMPT);
        tracing::info!(connection = %connection, account = %account.username, "login started");

        let worker = match self.adapter.start_session(connection, &account, events) {
            Ok(worker) => worker,
            Err(err) => {
                let reason = err.to_string();
                host.log_message(connection, &format!("Login failed: {reason}"));
                host.notify_disconnected(connection, Some(reason.as_str()));
                return Err(err);
            }
        };

        let previous = self.sessions.insert(
            connection,
            Session {
                account,
                dispatcher,
                worker,
                next_due,
            },
        );
        if let Some(stale) = previous {
            tracing::warn!(connection = %connection, "host reused a live connection, replacing session");
            self.retire(stale);
        }
        Ok(connection)
    }

    /// Runs every dispatcher whose interval has elapsed, reaps finished
    /// sessions and joins protocol threads that have stopped. Returns how long
    /// the caller may sleep before the next call, or `None` when nothing is
    /// left to drive.
    pub fn poll<H: HostApplication + ?Sized>(
        &mut self,
        host: &mut H,
        now: Instant,
    ) -> Option<Duration> {
        let interval = self.config.dispatch_interval();
        self.stopping.retain_mut(|stopping| !stopping.reap(now));

        let mut ended = Vec::new();
        for (connection, session) in self.sessions.iter_mut() {
            if session.next_due > now {
                continue;
            }
            match session.pump(host) {
                Rearm::Continue => {
                    session.next_due = next_deadline(session.next_due, interval, now);
                }
                Rearm::Stop => ended.push(*connection),
            }
        }

        for connection in ended {
            if let Some(session) = self.sessions.remove(&connection) {
                tracing::info!(connection = %connection, state = ?session.state(), "session ended");
                self.retire(session);
            }
        }

        let next_dispatch = self
            .sessions
            .values()
            .map(|s| s.next_due.saturating_duration_since(now))
            .min();
        if self.stopping.is_empty() {
            next_dispatch
        } else {
            Some(next_dispatch.map_or(interval, |wait| wait.min(interval)))
        }
    }

    /// Forwards a message to the protocol. Fails fast unless the link is up.
    pub fn send_message(
        &self,
        connection: ConnectionId,
        recipient: &str,
        text: &str,
    ) -> SessionResult<()> {
        let session = self
            .sessions
            .get(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        if session.state() != &LinkState::Connected {
            return Err(SessionError::NotConnected(connection));
        }
        session
            .worker
            .client()
            .send_message(recipient, text)
            .map_err(SessionError::Send)
    }

    /// Ends a session without waiting for its protocol thread: asks the
    /// protocol to disconnect and drops any envelopes it had not yet delivered.
    /// The thread is joined by a later `poll`, or detached once
    /// `shutdown_timeout` has passed.
    pub fn logout<H: HostApplication + ?Sized>(
        &mut self,
        host: &mut H,
        connection: ConnectionId,
    ) -> SessionResult<()> {
        let session = self
            .sessions
            .remove(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        tracing::info!(connection = %connection, "logging out");
        let already_told = session.state().is_terminal();
        self.retire(session);
        if !already_told {
            host.notify_disconnected(connection, None);
        }
        Ok(())
    }

    /// Logs out every session.
    pub fn shutdown<H: HostApplication + ?Sized>(&mut self, host: &mut H) {
        let connections: Vec<_> = self.sessions.keys().copied().collect();
        for connection in connections {
            if let Err(err) = self.logout(host, connection) {
                tracing::warn!(connection = %connection, error = %err, "logout failed");
            }
        }
    }

    fn retire(&mut self, session: Session) {
        let deadline = Instant::now() + self.config.shutdown_timeout();
        if let Some(stopping) = session.stop(deadline) {
            self.stopping.push(stopping);
        }
    }

    pub fn session(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection)
    }

    pub fn session_state(&self, connection: ConnectionId) -> Option<&LinkState> {
        self.sessions.get(&connection).map(Session::state)
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sessions.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Protocol threads told to stop that have not been joined or detached yet.
    pub fn stopping(&self) -> usize {
        self.stopping.len()
    }

    /// True when there are no sessions and no protocol threads left to reap.
    pub fn is_idle(&self) -> bool {
        self.sessions.is_empty() && self.stopping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn deadline_advances_by_interval() {
        let due = Instant::now();
        let interval = Duration::from_millis(50);
        let now = due + Duration::from_millis(10);
        assert_eq!(next_deadline(due, interval, now), due + interval);
    }

    #[test]
    fn missed_ticks_are_skipped() {
        let due = Instant::now();
        let interval = Duration::from_millis(50);
        let now = due + Duration::from_millis(180);
        assert_eq!(next_deadline(due, interval, now), now + interval);
    }

    #[test]
    fn zero_dispatch_interval_is_clamped() {
        let controller = SessionController::new(
            Arc::new(ScriptedBackend::new()),
            BridgeConfig {
                dispatch_interval_ms: 0,
                shutdown_timeout_ms: 100,
            },
        );
        assert_eq!(controller.config().dispatch_interval(), Duration::from_millis(1));
    }
}
