//! Chat protocol engine.
//!
//! Owns the presence table and, while online, one session: a transport,
//! its receive task and the heartbeat. Inbound datagrams are dispatched on
//! the receive task; outbound operations run on the caller's task and fan
//! out unicasts to a snapshot of the online peers.

use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::events::{in_callback, Event, EventBus, SubscriptionId};
use super::heartbeat::Heartbeat;
use crate::chat_log::{ChatLogSink, LogEntry};
use crate::error::{ConnectionError, CoreError, Result, SettingsError};
use crate::presence::PresenceTable;
use crate::protocol::WireMessage;
use crate::storage::Settings;
use crate::transport::{DatagramHandler, Transport};
use crate::types::{Peer, PeerId};

/// Connection state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Offline,
    Starting,
    Online,
    Error,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EngineState::Offline => "offline",
            EngineState::Starting => "starting",
            EngineState::Online => "online",
            EngineState::Error => "error",
        };
        f.write_str(label)
    }
}

struct Session {
    id: u64,
    transport: Arc<Transport>,
    heartbeat: Heartbeat,
    receive_task: JoinHandle<()>,
}

struct EngineInner {
    port: u16,
    heartbeat_interval: Duration,
    my_name: RwLock<String>,
    presence: PresenceTable,
    events: EventBus,
    log: Arc<dyn ChatLogSink>,
    state: Mutex<EngineState>,
    session: tokio::sync::Mutex<Option<Session>>,
    next_session_id: AtomicU64,
}

/// Handle to a chat engine. Clones share the same engine.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

fn reject_reentry() -> Result<()> {
    if in_callback() {
        return Err(CoreError::ReentrantCall);
    }
    Ok(())
}

impl ChatEngine {
    /// Fails with [`CoreError::Settings`] when the settings do not validate.
    pub fn new(settings: &Settings, log: Arc<dyn ChatLogSink>) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                port: settings.port,
                heartbeat_interval: settings.heartbeat_interval(),
                my_name: RwLock::new(settings.display_name.clone()),
                presence: PresenceTable::new(settings.stale_threshold()),
                events: EventBus::new(),
                log,
                state: Mutex::new(EngineState::Offline),
                session: tokio::sync::Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn state(&self) -> EngineState {
        self.inner.state()
    }

    pub fn is_online(&self) -> bool {
        self.state() == EngineState::Online
    }

    pub fn my_name(&self) -> String {
        self.inner.my_name()
    }

    /// Participants online right now, in join order.
    pub fn online_peers(&self) -> Vec<Peer> {
        self.inner.presence.online_peers()
    }

    /// Every participant ever seen, online or not.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.inner.presence.all_peers()
    }

    pub fn peer(&self, id: &PeerId) -> Option<Peer> {
        self.inner.presence.get(id)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Start a session: bind the transport, start receiving, then begin
    /// broadcasting discovery. Does nothing if already online.
    pub async fn go_online(&self) -> Result<()> {
        reject_reentry()?;

        let mut slot = self.inner.session.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        self.inner.set_state(EngineState::Starting);

        let transport = match Transport::open(self.inner.port).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                self.inner.report_failure(&e);
                return Err(e.into());
            }
        };

        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (ready_tx, ready_rx) = oneshot::channel();
        let receive_task = spawn_receive_task(&self.inner, session_id, transport.clone(), ready_tx);

        if ready_rx.await.is_err() {
            let e = ConnectionError::Receive(std::io::Error::other(
                "receive loop exited before starting",
            ));
            transport.close();
            self.inner.report_failure(&e);
            return Err(e.into());
        }

        self.inner.set_state(EngineState::Online);
        log::info!(
            "Online as '{}' on port {}",
            self.inner.my_name(),
            self.inner.port
        );
        self.inner.events.emit(&Event::ConnectionEstablished);

        let heartbeat = start_heartbeat(&self.inner, transport.clone());

        *slot = Some(Session {
            id: session_id,
            transport,
            heartbeat,
            receive_task,
        });

        Ok(())
    }

    /// Same as [`go_online`](Self::go_online).
    pub async fn start_server(&self) -> Result<()> {
        self.go_online().await
    }

    /// End the session: stop the heartbeat, tell online peers we left,
    /// close the transport and mark everyone offline. Does nothing if
    /// already offline.
    ///
    /// Returns once the receive task has finished, so the port can be
    /// bound again straight away.
    pub async fn go_offline(&self) -> Result<()> {
        reject_reentry()?;

        let session = self.inner.session.lock().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        let receive_task = self.inner.teardown(session).await;
        let _ = receive_task.await;

        self.inner.presence.mark_all_offline();
        self.inner.events.emit(&Event::ParticipantsChanged);
        self.inner.set_state(EngineState::Offline);
        log::info!("Offline");

        Ok(())
    }

    /// Same as [`go_offline`](Self::go_offline).
    pub async fn stop_server(&self) -> Result<()> {
        self.go_offline().await
    }

    /// Same as [`go_offline`](Self::go_offline).
    pub async fn leave_chat(&self) -> Result<()> {
        self.go_offline().await
    }

    /// Send chat text to every online participant. Returns how many were
    /// addressed.
    pub async fn send_chat_message(&self, text: &str) -> Result<usize> {
        reject_reentry()?;

        let transport = self
            .inner
            .current_transport()
            .await
            .ok_or(CoreError::NotOnline)?;

        let message = WireMessage::Chat {
            name: self.inner.my_name(),
            text: text.to_string(),
        };
        Ok(self.inner.send_to_online(&transport, &message).await)
    }

    /// Change the local display name and, when online, announce it.
    /// Returns how many participants were told.
    pub async fn change_my_name(&self, name: &str) -> Result<usize> {
        reject_reentry()?;

        let name = name.trim();
        if name.is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "displayName".to_string(),
                message: "name cannot be empty".to_string(),
            }
            .into());
        }

        let old = std::mem::replace(
            &mut *self.inner.my_name.write().unwrap_or_else(|e| e.into_inner()),
            name.to_string(),
        );
        log::info!("Local name changed from '{}' to '{}'", old, name);

        let Some(transport) = self.inner.current_transport().await else {
            return Ok(0);
        };

        let message = WireMessage::Rename {
            name: name.to_string(),
        };
        Ok(self.inner.send_to_online(&transport, &message).await)
    }
}

fn spawn_receive_task(
    inner: &Arc<EngineInner>,
    session_id: u64,
    transport: Arc<Transport>,
    ready: oneshot::Sender<()>,
) -> JoinHandle<()> {
    let handler = InboundDispatch {
        engine: Arc::downgrade(inner),
        transport: transport.clone(),
    };
    let engine = Arc::downgrade(inner);

    tokio::spawn(async move {
        if let Err(e) = transport.receive_loop(&handler, ready).await {
            if let Some(inner) = engine.upgrade() {
                inner.fail_session(session_id, e).await;
            }
        }
    })
}

fn start_heartbeat(inner: &Arc<EngineInner>, transport: Arc<Transport>) -> Heartbeat {
    let engine = Arc::downgrade(inner);

    Heartbeat::start(inner.heartbeat_interval, move || {
        let engine = engine.clone();
        let transport = transport.clone();
        async move {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let query = WireMessage::WhoIsOnline {
                name: inner.my_name(),
            };
            transport.send_broadcast(&query.encode()).await;
        }
    })
}

impl EngineInner {
    fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn my_name(&self) -> String {
        self.my_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn current_transport(&self) -> Option<Arc<Transport>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.transport.clone())
    }

    async fn send_to_online(&self, transport: &Transport, message: &WireMessage) -> usize {
        let bytes = message.encode();
        let peers = self.presence.online_peers();

        for peer in &peers {
            transport.send_unicast(peer.address, &bytes).await;
        }

        log::debug!("Sent {} to {} participant(s)", message.kind(), peers.len());
        peers.len()
    }

    /// Error, notify, back to offline.
    fn report_failure(&self, error: &ConnectionError) {
        log::error!("Connection error: {}", error);
        self.set_state(EngineState::Error);
        self.events.emit(&Event::ConnectionError(error.to_string()));
        self.set_state(EngineState::Offline);
    }

    /// Stop the heartbeat, say goodbye and close the transport.
    ///
    /// Hands back the receive task so the caller decides whether to wait for it.
    async fn teardown(&self, session: Session) -> JoinHandle<()> {
        session.heartbeat.stop().await;

        let goodbye = WireMessage::Left {
            name: self.my_name(),
        };
        self.send_to_online(&session.transport, &goodbye).await;

        session.transport.close();
        session.receive_task
    }

    /// Tear down after a fatal receive error, unless that session already ended.
    async fn fail_session(&self, session_id: u64, error: ConnectionError) {
        let session = {
            let mut slot = self.session.lock().await;
            if slot.as_ref().map(|session| session.id) == Some(session_id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            return;
        };

        log::error!("Connection error: {}", error);
        self.set_state(EngineState::Error);
        self.events.emit(&Event::ConnectionError(error.to_string()));

        // Running on the receive task itself, so its handle is not awaited.
        drop(self.teardown(session).await);

        self.presence.mark_all_offline();
        self.events.emit(&Event::ParticipantsChanged);
        self.set_state(EngineState::Offline);
    }

    fn append(&self, entry: LogEntry) {
        self.log.append_entry(entry.clone());
        self.events.emit(&Event::MessageReceived(entry));
    }

    fn note_online(&self, id: &PeerId, name: &str, address: IpAddr) {
        let outcome = self.presence.upsert_online(id, name, address);
        if !outcome.is_new_or_reappeared {
            return;
        }

        let name = self.presence.name_of(id).unwrap_or_else(|| name.to_string());
        log::info!("{} ({}) joined", name, id);

        self.events.emit(&Event::ParticipantsChanged);
        self.append(LogEntry::Joined {
            name,
            at: chrono::Utc::now(),
        });
    }

    /// The reply owed to the sender of `message`, if any.
    fn reply_to(&self, message: &WireMessage) -> Option<WireMessage> {
        match message {
            WireMessage::WhoIsOnline { .. } => Some(WireMessage::IAmOnline {
                name: self.my_name(),
            }),
            _ => None,
        }
    }

    /// Apply one inbound message to presence and the log.
    fn apply(&self, message: WireMessage, from: IpAddr) {
        let id = PeerId::from(from);
        let at = chrono::Utc::now();

        match message {
            WireMessage::WhoIsOnline { name } | WireMessage::IAmOnline { name } => {
                self.note_online(&id, &name, from);
            }
            WireMessage::Chat { name, text } => {
                let author_name = self.presence.name_of(&id).unwrap_or(name);
                self.append(LogEntry::Chat {
                    author_id: id,
                    author_name,
                    text,
                    at,
                });
            }
            WireMessage::Rename { name } => {
                let Some(old_name) = self.presence.rename(&id, &name) else {
                    log::debug!("Ignoring rename to '{}' from unknown sender {}", name, id);
                    return;
                };
                log::info!("{} renamed '{}' to '{}'", id, old_name, name);

                self.append(LogEntry::Renamed {
                    old_name,
                    new_name: name,
                    at,
                });
                self.events.emit(&Event::ParticipantsChanged);
                self.events.emit(&Event::NameChanged);
            }
            WireMessage::Left { name } => {
                self.presence.mark_offline(&id);
                let name = self.presence.name_of(&id).unwrap_or(name);
                log::info!("{} ({}) left", name, id);

                self.append(LogEntry::Left { name, at });
                self.events.emit(&Event::ParticipantsChanged);
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.heartbeat.abort();
            session.transport.close();
        }
    }
}

/// Receive-side handler bound to one session's transport.
struct InboundDispatch {
    engine: Weak<EngineInner>,
    transport: Arc<Transport>,
}

impl DatagramHandler for InboundDispatch {
    async fn on_datagram(&self, payload: &[u8], from: SocketAddr) {
        let message = match WireMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        let Some(engine) = self.engine.upgrade() else {
            return;
        };

        log::trace!("Received {} from {}", message.kind(), from);
        if let Some(reply) = engine.reply_to(&message) {
            self.transport.send_unicast(from.ip(), &reply.encode()).await;
        }
        engine.apply(message, from.ip());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_log::ChatHistory;
    use crate::transport::free_port;
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;

    const BOB: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
    const CAROL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 30));

    // Dispatch-level tests never bind it.
    const DEFAULT_TEST_PORT: u16 = crate::protocol::DEFAULT_PORT;

    fn settings(port: u16) -> Settings {
        Settings {
            display_name: "Alice".to_string(),
            port,
            ..Settings::default()
        }
    }

    fn engine_with(port: u16) -> (ChatEngine, Arc<ChatHistory>) {
        let history = Arc::new(ChatHistory::new());
        let engine = ChatEngine::new(&settings(port), history.clone()).unwrap();
        (engine, history)
    }

    fn record_events(engine: &ChatEngine) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    fn stream_events(engine: &ChatEngine) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    fn who_is_online(name: &str) -> WireMessage {
        WireMessage::WhoIsOnline {
            name: name.to_string(),
        }
    }

    /// Reply first, then apply, in the same order as the receive task.
    fn dispatch(engine: &ChatEngine, message: WireMessage, from: IpAddr) -> Option<WireMessage> {
        let reply = engine.inner.reply_to(&message);
        engine.inner.apply(message, from);
        reply
    }

    struct Collect(mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>);

    impl DatagramHandler for Collect {
        async fn on_datagram(&self, payload: &[u8], from: SocketAddr) {
            let _ = self.0.send((payload.to_vec(), from));
        }
    }

    /// A transport on a free port whose receive loop forwards every datagram.
    async fn listening_transport() -> (
        Arc<Transport>,
        mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
        JoinHandle<std::result::Result<(), ConnectionError>>,
    ) {
        let transport = Arc::new(Transport::open(free_port()).await.unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let loop_transport = transport.clone();
        let handle = tokio::spawn(async move {
            loop_transport.receive_loop(&Collect(tx), ready_tx).await
        });
        ready_rx.await.unwrap();

        (transport, rx, handle)
    }

    async fn next_entry<F>(events: &mut mpsc::UnboundedReceiver<Event>, wanted: F) -> LogEntry
    where
        F: Fn(&LogEntry) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Event::MessageReceived(entry) = events.recv().await.unwrap() {
                    if wanted(&entry) {
                        return entry;
                    }
                }
            }
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_who_is_online_from_new_peer() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        let events = record_events(&engine);

        let reply = dispatch(&engine, who_is_online("Bob"), BOB);

        assert_eq!(
            reply,
            Some(WireMessage::IAmOnline {
                name: "Alice".to_string()
            })
        );
        let online = engine.online_peers();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].display_name, "Bob");
        assert_eq!(online[0].address, BOB);

        let events = events.lock().unwrap();
        assert_eq!(events[0], Event::ParticipantsChanged);
        assert!(matches!(&events[1], Event::MessageReceived(LogEntry::Joined { name, .. }) if name == "Bob"));
        assert_eq!(history.chat_text(), "Bob joined the chat");
    }

    #[test]
    fn test_repeat_who_is_online_only_replies() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        dispatch(&engine, who_is_online("Bob"), BOB);
        let events = record_events(&engine);

        let reply = dispatch(&engine, who_is_online("Bob"), BOB);

        assert!(matches!(reply, Some(WireMessage::IAmOnline { .. })));
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(engine.all_peers().len(), 1);
    }

    #[test]
    fn test_i_am_online_has_no_reply() {
        let (engine, _history) = engine_with(DEFAULT_TEST_PORT);

        let reply = dispatch(
            &engine,
            WireMessage::IAmOnline {
                name: "Carol".to_string(),
            },
            CAROL,
        );

        assert!(reply.is_none());
        assert!(engine.peer(&PeerId::from(CAROL)).is_some());
    }

    #[test]
    fn test_chat_is_logged_without_touching_presence() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        dispatch(&engine, who_is_online("Bob"), BOB);
        let before = engine.peer(&PeerId::from(BOB)).unwrap();
        let events = record_events(&engine);

        let reply = dispatch(
            &engine,
            WireMessage::Chat {
                name: "Bob".to_string(),
                text: "hi\nthere".to_string(),
            },
            BOB,
        );

        assert!(reply.is_none());
        assert_eq!(engine.peer(&PeerId::from(BOB)).unwrap(), before);
        match history.latest() {
            Some(LogEntry::Chat {
                author_id,
                author_name,
                text,
                ..
            }) => {
                assert_eq!(author_id, PeerId::from(BOB));
                assert_eq!(author_name, "Bob");
                assert_eq!(text, "hi\nthere");
            }
            other => panic!("unexpected entry {:?}", other),
        }
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_chat_from_unknown_sender_uses_message_name() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);

        dispatch(
            &engine,
            WireMessage::Chat {
                name: "Stranger".to_string(),
                text: "hello".to_string(),
            },
            CAROL,
        );

        assert!(engine.all_peers().is_empty());
        assert!(matches!(history.latest(), Some(LogEntry::Chat { author_name, .. }) if author_name == "Stranger"));
    }

    #[test]
    fn test_rename_updates_table_and_notifies() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        dispatch(&engine, who_is_online("Bob"), BOB);
        let events = record_events(&engine);

        dispatch(
            &engine,
            WireMessage::Rename {
                name: "Robert".to_string(),
            },
            BOB,
        );

        assert_eq!(engine.online_peers()[0].display_name, "Robert");
        assert_eq!(
            history.latest().unwrap().to_string(),
            "Bob is now known as Robert"
        );
        let events = events.lock().unwrap();
        assert!(events.contains(&Event::ParticipantsChanged));
        assert!(events.contains(&Event::NameChanged));
    }

    #[test]
    fn test_rename_from_unknown_sender_is_ignored() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        let events = record_events(&engine);

        let reply = dispatch(
            &engine,
            WireMessage::Rename {
                name: "Mallory".to_string(),
            },
            CAROL,
        );

        assert!(reply.is_none());
        assert!(engine.all_peers().is_empty());
        assert!(history.is_empty());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let zero_heartbeat = Settings {
            heartbeat_interval_secs: 0,
            ..settings(DEFAULT_TEST_PORT)
        };
        let result = ChatEngine::new(&zero_heartbeat, Arc::new(ChatHistory::new()));
        assert!(matches!(result, Err(CoreError::Settings(_))));

        let no_port = settings(0);
        let result = ChatEngine::new(&no_port, Arc::new(ChatHistory::new()));
        assert!(matches!(result, Err(CoreError::Settings(_))));
    }

    #[test]
    fn test_left_marks_offline() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        dispatch(&engine, who_is_online("Bob"), BOB);
        let events = record_events(&engine);

        dispatch(
            &engine,
            WireMessage::Left {
                name: "Bob".to_string(),
            },
            BOB,
        );

        assert!(engine.online_peers().is_empty());
        assert_eq!(engine.all_peers().len(), 1);
        assert_eq!(history.latest().unwrap().to_string(), "Bob left the chat");
        assert_eq!(events.lock().unwrap().last(), Some(&Event::ParticipantsChanged));

        dispatch(&engine, who_is_online("Bob"), BOB);
        assert_eq!(history.latest().unwrap().to_string(), "Bob joined the chat");
    }

    #[test]
    fn test_callbacks_cannot_reenter_engine() {
        let (engine, _history) = engine_with(DEFAULT_TEST_PORT);
        let outcome = Arc::new(Mutex::new(None));

        let reentrant = engine.clone();
        let slot = outcome.clone();
        engine.subscribe(move |event| {
            if *event == Event::ParticipantsChanged {
                let result = futures::executor::block_on(reentrant.send_chat_message("echo"));
                *slot.lock().unwrap() = Some(result);
            }
        });

        dispatch(&engine, who_is_online("Bob"), BOB);

        let outcome = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(outcome, Err(CoreError::ReentrantCall)));
    }

    #[tokio::test]
    async fn test_offline_operations() {
        let (engine, _history) = engine_with(DEFAULT_TEST_PORT);

        assert_eq!(engine.state(), EngineState::Offline);
        assert!(matches!(
            engine.send_chat_message("hi").await,
            Err(CoreError::NotOnline)
        ));

        assert_eq!(engine.change_my_name("  Alicia ").await.unwrap(), 0);
        assert_eq!(engine.my_name(), "Alicia");
        assert!(engine.change_my_name("").await.is_err());

        engine.go_offline().await.unwrap();
        assert_eq!(engine.state(), EngineState::Offline);
    }

    #[tokio::test]
    async fn test_go_online_reports_bind_failure() {
        let holder = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let (engine, _history) = engine_with(port);
        let events = record_events(&engine);

        let result = engine.go_online().await;

        assert!(matches!(
            result,
            Err(CoreError::Connection(ConnectionError::Bind { .. }))
        ));
        assert_eq!(engine.state(), EngineState::Offline);
        assert!(matches!(
            events.lock().unwrap().as_slice(),
            [Event::ConnectionError(_)]
        ));

        drop(holder);
        engine.go_online().await.unwrap();
        assert!(engine.is_online());
        engine.go_offline().await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_then_online_rebinds_port() {
        let port = free_port();
        let (engine, _history) = engine_with(port);
        let events = record_events(&engine);

        engine.go_online().await.unwrap();
        engine.go_online().await.unwrap();
        assert_eq!(engine.state(), EngineState::Online);

        // The receive loop is parked in recv_from here.
        engine.go_offline().await.unwrap();
        engine.go_offline().await.unwrap();
        assert_eq!(engine.state(), EngineState::Offline);

        engine.go_online().await.unwrap();
        assert_eq!(engine.state(), EngineState::Online);
        engine.go_offline().await.unwrap();

        let events = events.lock().unwrap();
        let established = events
            .iter()
            .filter(|e| **e == Event::ConnectionEstablished)
            .count();
        assert_eq!(established, 2);
        assert!(!events.iter().any(|e| matches!(e, Event::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_inbound_datagram_reaches_presence() {
        let port = free_port();
        let (engine, history) = engine_with(port);
        let mut events = stream_events(&engine);
        engine.go_online().await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&who_is_online("Bob").encode(), ("127.0.0.1", port))
            .await
            .unwrap();
        sender
            .send_to(b"not a message", ("127.0.0.1", port))
            .await
            .unwrap();

        let localhost = PeerId::from(IpAddr::V4(Ipv4Addr::LOCALHOST));
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.peer(&localhost).is_none() {
                events.recv().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert!(engine.inner.presence.is_online(&localhost));
        // Our own heartbeat may loop back from 127.0.0.1 first and claim the name.
        assert!(history
            .entries()
            .iter()
            .any(|entry| matches!(entry, LogEntry::Joined { .. })));

        engine.go_offline().await.unwrap();
        assert!(engine.online_peers().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_engine_closes_session() {
        let port = free_port();
        let (engine, _history) = engine_with(port);
        engine.go_online().await.unwrap();

        drop(engine);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (engine, _history) = engine_with(port);
        engine.go_online().await.unwrap();
        engine.go_offline().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reply_is_sent_before_join_is_announced() {
        let (engine, history) = engine_with(DEFAULT_TEST_PORT);
        let (transport, mut collected, handle) = listening_transport().await;

        // Forward to a blocking channel the callback can wait on.
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        let forward = tokio::spawn(async move {
            while let Some(datagram) = collected.recv().await {
                if reply_tx.send(datagram).is_err() {
                    break;
                }
            }
        });

        let reply_rx = Mutex::new(reply_rx);
        let seen_at_join = Arc::new(Mutex::new(None));
        let slot = seen_at_join.clone();
        engine.subscribe(move |event| {
            if *event == Event::ParticipantsChanged {
                let datagram = reply_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(2))
                    .ok();
                *slot.lock().unwrap() = Some(datagram);
            }
        });

        let handler = InboundDispatch {
            engine: Arc::downgrade(&engine.inner),
            transport: transport.clone(),
        };
        let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9);
        handler
            .on_datagram(&who_is_online("Bob").encode(), from)
            .await;

        let (payload, _) = seen_at_join
            .lock()
            .unwrap()
            .take()
            .expect("join was announced")
            .expect("reply arrived before the join");
        assert_eq!(
            WireMessage::decode(&payload).unwrap(),
            WireMessage::IAmOnline {
                name: "Alice".to_string()
            }
        );
        assert_eq!(history.chat_text(), "Bob joined the chat");

        transport.close();
        handle.await.unwrap().unwrap();
        forward.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_to_online_unicasts_each_peer() {
        let (engine, _history) = engine_with(DEFAULT_TEST_PORT);
        let (transport, mut collected, handle) = listening_transport().await;
        dispatch(&engine, who_is_online("Me"), IpAddr::V4(Ipv4Addr::LOCALHOST));
        dispatch(&engine, who_is_online("Carol"), CAROL);
        dispatch(
            &engine,
            WireMessage::Left {
                name: "Carol".to_string(),
            },
            CAROL,
        );

        let goodbye = WireMessage::Left {
            name: engine.my_name(),
        };
        let sent = engine.inner.send_to_online(&transport, &goodbye).await;

        assert_eq!(sent, 1);
        let (payload, from) = tokio::time::timeout(Duration::from_secs(2), collected.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), goodbye);
        assert_eq!(from.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        transport.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chat_and_rename_fan_out_over_loopback() {
        let port = free_port();
        let (engine, _history) = engine_with(port);
        let mut events = stream_events(&engine);
        engine.go_online().await.unwrap();

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        dispatch(
            &engine,
            WireMessage::IAmOnline {
                name: "Alice".to_string(),
            },
            localhost,
        );

        let sent = engine.send_chat_message("hey").await.unwrap();
        assert!(sent >= 1);
        // Our own heartbeat can also register the host's LAN address, so
        // wait for the copy that came back over loopback.
        let entry = next_entry(&mut events, |entry| {
            matches!(entry, LogEntry::Chat { author_id, .. } if *author_id == PeerId::from(localhost))
        })
        .await;
        assert!(matches!(entry, LogEntry::Chat { text, .. } if text == "hey"));

        let told = engine.change_my_name("Alicia").await.unwrap();
        assert!(told >= 1);
        let entry = next_entry(&mut events, |entry| {
            matches!(entry, LogEntry::Renamed { new_name, .. } if new_name == "Alicia")
        })
        .await;
        assert_eq!(entry.to_string(), "Alice is now known as Alicia");

        engine.go_offline().await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_session_tears_down_once() {
        let port = free_port();
        let (engine, _history) = engine_with(port);
        engine.go_online().await.unwrap();
        let session_id = engine.inner.session.lock().await.as_ref().unwrap().id;
        dispatch(&engine, who_is_online("Bob"), BOB);

        let events = record_events(&engine);
        let state_at_error = Arc::new(Mutex::new(None));
        let slot = state_at_error.clone();
        let weak = Arc::downgrade(&engine.inner);
        engine.subscribe(move |event| {
            if matches!(event, Event::ConnectionError(_)) {
                *slot.lock().unwrap() = weak.upgrade().map(|inner| inner.state());
            }
        });

        engine
            .inner
            .fail_session(
                session_id + 1,
                ConnectionError::Receive(std::io::Error::other("stale")),
            )
            .await;
        assert_eq!(engine.state(), EngineState::Online);
        assert!(engine.inner.session.lock().await.is_some());
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::ConnectionError(_))));

        engine
            .inner
            .fail_session(
                session_id,
                ConnectionError::Receive(std::io::Error::other("boom")),
            )
            .await;

        {
            let events = events.lock().unwrap();
            let errors: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    Event::ConnectionError(message) => Some(message.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("boom"));
            assert_eq!(events.last(), Some(&Event::ParticipantsChanged));
        }
        assert_eq!(engine.state(), EngineState::Offline);
        assert_eq!(*state_at_error.lock().unwrap(), Some(EngineState::Error));
        assert!(engine.online_peers().is_empty());
        assert!(engine.inner.session.lock().await.is_none());

        // The detached receive task releases the port once it sees the close.
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.go_online().await.unwrap();
        engine.go_offline().await.unwrap();
    }
}
