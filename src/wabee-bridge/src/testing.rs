//! In-memory collaborators for exercising the bridge without a network or a
//! real chat host.
//!
//! [`ScriptedBackend`] plays back a fixed sequence of protocol events on the
//! session thread; [`RecordingHost`] records every host call in order so tests
//! can assert on exact sequences.

use crate::host::{handles_match, BuddyStatus, ConnectionId, HostApplication, MessageFlags};
use crate::protocol::{
    NativePrivateMessage, NativeUser, ProtocolBackend, ProtocolClient, ProtocolError,
    ProtocolHandler, ProtocolResult,
};
use crate::session::SessionController;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use wabee_core::AccountConfig;

/// One event the scripted protocol emits from its read loop.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Message(NativePrivateMessage),
    User(NativeUser),
}

#[derive(Debug, Clone)]
struct Script {
    login: ProtocolResult<()>,
    hold_login: bool,
    steps: Vec<ScriptStep>,
    hold_open: bool,
    ignore_disconnect: bool,
    loop_result: ProtocolResult<()>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            login: Ok(()),
            hold_login: false,
            steps: Vec::new(),
            hold_open: false,
            ignore_disconnect: false,
            loop_result: Ok(()),
        }
    }
}

/// Protocol backend whose clients replay a script.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Script,
    init_error: Option<ProtocolError>,
    clients: Mutex<Vec<Arc<ScriptedClient>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `init` fails before any client or thread exists.
    pub fn failing_init(mut self, reason: &str) -> Self {
        self.init_error = Some(ProtocolError::Other(reason.to_string()));
        self
    }

    pub fn failing_login(mut self, reason: &str) -> Self {
        self.script.login = Err(ProtocolError::Login(reason.to_string()));
        self
    }

    /// Login blocks until the client is told to disconnect.
    pub fn hold_login(mut self) -> Self {
        self.script.hold_login = true;
        self
    }

    pub fn message(mut self, from: &str, text: &str) -> Self {
        self.script.steps.push(ScriptStep::Message(NativePrivateMessage {
            from: Some(NativeUser {
                jid: Some(from.to_string()),
                ..NativeUser::default()
            }),
            text: Some(text.to_string()),
        }));
        self
    }

    pub fn user(mut self, jid: &str, name: Option<&str>, notify: Option<&str>) -> Self {
        self.script.steps.push(ScriptStep::User(NativeUser {
            jid: Some(jid.to_string()),
            name: name.map(Into::into),
            notify: notify.map(Into::into),
        }));
        self
    }

    pub fn step(mut self, step: ScriptStep) -> Self {
        self.script.steps.push(step);
        self
    }

    /// After the script, the read loop blocks until the client is disconnected.
    pub fn hold_open(mut self) -> Self {
        self.script.hold_open = true;
        self
    }

    /// `disconnect` is counted but does not interrupt a blocked login or
    /// read loop. Only [`ScriptedClient::release`] lets the thread return.
    pub fn ignore_disconnect(mut self) -> Self {
        self.script.ignore_disconnect = true;
        self
    }

    pub fn loop_error(mut self, message: &str) -> Self {
        self.script.loop_result = Err(ProtocolError::Connection(message.to_string()));
        self
    }

    /// Clients created so far, in creation order.
    pub fn clients(&self) -> Vec<Arc<ScriptedClient>> {
        self.clients.lock().unwrap().clone()
    }
}

impl ProtocolBackend for ScriptedBackend {
    fn init(
        &self,
        account: &AccountConfig,
        handler: Arc<dyn ProtocolHandler>,
    ) -> ProtocolResult<Arc<dyn ProtocolClient>> {
        if let Some(err) = &self.init_error {
            return Err(err.clone());
        }
        let client = Arc::new(ScriptedClient::new(
            account.username.clone(),
            handler,
            self.script.clone(),
        ));
        let shared: Arc<dyn ProtocolClient> = client.clone();
        self.clients.lock().unwrap().push(client);
        Ok(shared)
    }
}

/// Client produced by [`ScriptedBackend`].
pub struct ScriptedClient {
    username: String,
    handler: Arc<dyn ProtocolHandler>,
    script: Script,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    fn new(username: String, handler: Arc<dyn ProtocolHandler>, script: Script) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        Self {
            username,
            handler,
            script,
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `(recipient, text)` pairs accepted by `send_message`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Unblocks the thread even when disconnects are ignored.
    pub fn release(&self) {
        self.stop_tx.lock().unwrap().take();
    }

    /// Blocks until `disconnect` closes the stop channel.
    fn wait_for_disconnect(&self) {
        let _ = self.stop_rx.recv();
    }
}

impl ProtocolClient for ScriptedClient {
    fn login(&self) -> ProtocolResult<()> {
        if self.script.hold_login {
            self.wait_for_disconnect();
            return Err(ProtocolError::Login("cancelled".into()));
        }
        self.script.login.clone()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run_loop(&self) -> ProtocolResult<()> {
        for step in &self.script.steps {
            match step.clone() {
                ScriptStep::Message(message) => self.handler.on_private_message(message),
                ScriptStep::User(user) => self.handler.on_user_update(user),
            }
        }
        if self.script.hold_open {
            self.wait_for_disconnect();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.script.loop_result.clone()
    }

    fn send_message(&self, recipient: &str, text: &str) -> ProtocolResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ProtocolError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.script.ignore_disconnect {
            self.release();
        }
    }
}

/// A host call as seen by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CreateConnection {
        connection: ConnectionId,
        username: String,
    },
    Log {
        connection: ConnectionId,
        text: String,
    },
    Connected {
        connection: ConnectionId,
    },
    Disconnected {
        connection: ConnectionId,
        reason: Option<String>,
    },
    DeliverMessage {
        connection: ConnectionId,
        sender: String,
        text: String,
        flags: MessageFlags,
    },
    AddBuddy {
        connection: ConnectionId,
        handle: String,
    },
    RenameBuddy {
        connection: ConnectionId,
        handle: String,
        name: String,
    },
    SetNicknameHint {
        connection: ConnectionId,
        handle: String,
        hint: String,
    },
    SetBuddyStatus {
        connection: ConnectionId,
        handle: String,
        status: BuddyStatus,
    },
}

/// Host that keeps a buddy list and an ordered log of every mutating call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    next_connection: u64,
    buddies: Vec<(ConnectionId, String)>,
    calls: Vec<HostCall>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a buddy without recording a call, as if it existed before login.
    pub fn seed_buddy(&mut self, connection: ConnectionId, handle: &str) {
        self.buddies.push((connection, handle.to_string()));
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn count(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(*c)).count()
    }

    pub fn has_buddy(&self, connection: ConnectionId, handle: &str) -> bool {
        self.lookup_buddy(connection, handle)
    }
}

impl HostApplication for RecordingHost {
    fn create_connection(&mut self, account: &AccountConfig) -> ConnectionId {
        self.next_connection += 1;
        let connection = ConnectionId(self.next_connection);
        self.calls.push(HostCall::CreateConnection {
            connection,
            username: account.username.clone(),
        });
        connection
    }

    fn log_message(&mut self, connection: ConnectionId, text: &str) {
        self.calls.push(HostCall::Log {
            connection,
            text: text.to_string(),
        });
    }

    fn notify_connected(&mut self, connection: ConnectionId) {
        self.calls.push(HostCall::Connected { connection });
    }

    fn notify_disconnected(&mut self, connection: ConnectionId, reason: Option<&str>) {
        self.calls.push(HostCall::Disconnected {
            connection,
            reason: reason.map(Into::into),
        });
    }

    fn deliver_message(
        &mut self,
        connection: ConnectionId,
        sender: &str,
        text: &str,
        flags: MessageFlags,
        _timestamp: Option<SystemTime>,
    ) {
        self.calls.push(HostCall::DeliverMessage {
            connection,
            sender: sender.to_string(),
            text: text.to_string(),
            flags,
        });
    }

    fn lookup_buddy(&self, connection: ConnectionId, handle: &str) -> bool {
        self.buddies
            .iter()
            .any(|(c, h)| *c == connection && handles_match(h, handle))
    }

    fn add_buddy(&mut self, connection: ConnectionId, handle: &str, _group: Option<&str>) {
        self.buddies.push((connection, handle.to_string()));
        self.calls.push(HostCall::AddBuddy {
            connection,
            handle: handle.to_string(),
        });
    }

    fn rename_buddy(&mut self, connection: ConnectionId, handle: &str, display_name: &str) {
        self.calls.push(HostCall::RenameBuddy {
            connection,
            handle: handle.to_string(),
            name: display_name.to_string(),
        });
    }

    fn set_nickname_hint(&mut self, connection: ConnectionId, handle: &str, hint: &str) {
        self.calls.push(HostCall::SetNicknameHint {
            connection,
            handle: handle.to_string(),
            hint: hint.to_string(),
        });
    }

    fn set_buddy_status(
        &mut self,
        connection: ConnectionId,
        handle: &str,
        status: BuddyStatus,
        _state: Option<&str>,
        _message: Option<&str>,
    ) {
        self.calls.push(HostCall::SetBuddyStatus {
            connection,
            handle: handle.to_string(),
            status,
        });
    }
}

/// Drives `controller.poll` the way a host's main loop would until `done`
/// holds or `timeout` passes. Returns whether `done` was reached.
pub fn poll_until<H, F>(
    controller: &mut SessionController,
    host: &mut H,
    timeout: Duration,
    mut done: F,
) -> bool
where
    H: HostApplication,
    F: FnMut(&SessionController, &H) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let wait = controller.poll(host, Instant::now());
        if done(&*controller, &*host) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let wait = wait.unwrap_or(Duration::from_millis(5)).max(Duration::from_millis(1));
        thread::sleep(wait.min(deadline - now));
    }
}
