//! Connection hub.
//!
//! Owns the username -> connection registry and routes frames between
//! connections. Lock order: identity store first, then the registry; the
//! nesting only happens inside the identity store's presence and
//! session-ending hooks. Routing snapshots its recipients under the
//! registry read lock and delivers after releasing it.

pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use connection::{serve_socket, ConnectionHandle};

use crate::constants::{BROADCAST_RECIPIENT, WELCOME_MESSAGE};
use crate::identity::IdentityStore;
use crate::message_log::MessageLog;
use crate::models::{MessageKind, MessageRecord};
use crate::protocol::{Envelope, Frame};

pub struct Hub {
    identity: Arc<IdentityStore>,
    log: Arc<MessageLog>,
    registry: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    queue_capacity: usize,
    send_timeout: Duration,
}

impl Hub {
    pub fn new(
        identity: Arc<IdentityStore>,
        log: Arc<MessageLog>,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            log,
            registry: RwLock::new(HashMap::new()),
            queue_capacity,
            send_timeout,
        }
    }

    /// Check the handshake frame of a new connection
    ///
    /// Only an `auth` frame with a live session token passes. A non-empty
    /// `public_key` on the frame is stored for the user.
    pub fn authenticate(&self, frame: &Frame) -> Option<String> {
        let Frame::Auth {
            session_token,
            public_key,
        } = frame
        else {
            tracing::debug!(kind = frame.kind(), "First frame was not auth");
            return None;
        };

        let username = self.identity.validate_session(session_token)?;
        if !public_key.is_empty() {
            self.identity.update_public_key(&username, public_key);
        }
        Some(username)
    }

    /// Create a handle for an authenticated user, sized from the hub config
    pub fn open_connection(&self, username: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<String>) {
        ConnectionHandle::new(username, self.queue_capacity)
    }

    /// Make `conn` the user's live connection
    ///
    /// Any previous connection for the same user is closed. The new
    /// connection then receives, in order: welcome, `user_joined` (sent to
    /// everyone), `users_list` (sent to everyone), and its history replay.
    /// Frames routed to the user meanwhile queue behind the replay.
    pub async fn register(&self, conn: Arc<ConnectionHandle>) {
        let username = conn.username().to_string();

        self.identity.transition_presence(&username, || {
            let mut registry = self.registry.write();
            if let Some(previous) = registry.insert(username.clone(), conn.clone()) {
                tracing::info!(user = %username, old = %previous.id(), new = %conn.id(), "Evicting previous connection");
                previous.close();
            }
            Some(true)
        });

        tracing::info!(user = %username, conn = %conn.id(), "User connected");

        conn.deliver_frame(&Frame::success(WELCOME_MESSAGE), self.send_timeout)
            .await;
        self.broadcast_to_all(&Frame::user_joined(&username)).await;
        self.broadcast_users_list().await;

        for record in self.log.history_for(&username) {
            if !conn
                .deliver_frame(&record.to_history_frame(), self.send_timeout)
                .await
            {
                tracing::debug!(user = %username, conn = %conn.id(), "History replay cut short");
                break;
            }
        }
    }

    /// Tear down `conn`'s registration
    ///
    /// Does nothing if the registry no longer points at this connection,
    /// either because a newer one replaced it or because logout or the
    /// session sweep already removed it. Returns whether the entry was removed.
    pub async fn unregister(&self, conn: &ConnectionHandle) -> bool {
        let username = conn.username();
        let mut removed = false;

        self.identity.transition_presence(username, || {
            let mut registry = self.registry.write();
            match registry.get(username) {
                Some(current) if current.id() == conn.id() => {
                    registry.remove(username);
                    removed = true;
                    Some(false)
                }
                _ => None,
            }
        });

        if !removed {
            tracing::debug!(user = %username, conn = %conn.id(), "Stale connection, registry untouched");
            return false;
        }

        tracing::info!(user = %username, conn = %conn.id(), "User disconnected");
        self.announce_departure(username).await;
        true
    }

    async fn announce_departure(&self, username: &str) {
        self.broadcast_to_all(&Frame::user_left(username)).await;
        self.broadcast_users_list().await;
    }

    /// Route one inbound frame from an active connection
    ///
    /// The sender and timestamp are always set by the server. Returns once
    /// every recipient has the frame queued, so a sender's frames reach each
    /// recipient in the order they were read.
    pub async fn dispatch(&self, conn: &ConnectionHandle, frame: Frame) {
        let sender = conn.username();

        match frame {
            Frame::General(envelope) => self.handle_general(stamp(envelope, sender)).await,
            Frame::Private(envelope) => self.handle_private(stamp(envelope, sender)).await,
            Frame::Typing(envelope) => self.handle_typing(stamp(envelope, sender)).await,
            Frame::Ping { .. } => {
                conn.deliver_frame(&Frame::pong(), self.send_timeout).await;
            }
            other => {
                tracing::debug!(user = %sender, kind = other.kind(), "Ignoring frame");
                return;
            }
        }

        self.identity.update_session(sender);
    }

    async fn handle_general(&self, mut envelope: Envelope) {
        if envelope.recipient.is_empty() {
            envelope.recipient = BROADCAST_RECIPIENT.to_string();
        }
        assign_id(&mut envelope);

        self.log
            .append(MessageRecord::from_envelope(MessageKind::General, &envelope));

        let sender = envelope.sender.clone();
        self.broadcast_to_all_except(&Frame::General(envelope), &sender)
            .await;
    }

    async fn handle_private(&self, mut envelope: Envelope) {
        let recipient = envelope.recipient.clone();
        if recipient.is_empty() || recipient == BROADCAST_RECIPIENT || recipient == envelope.sender {
            tracing::debug!(user = %envelope.sender, recipient = %recipient, "Dropping misaddressed private message");
            return;
        }
        assign_id(&mut envelope);

        self.log
            .append(MessageRecord::from_envelope(MessageKind::Private, &envelope));

        if !self.send_to_user(&recipient, &Frame::Private(envelope)).await {
            tracing::debug!(recipient = %recipient, "Recipient offline, private message not delivered");
        }
    }

    async fn handle_typing(&self, envelope: Envelope) {
        let recipient = envelope.recipient.clone();
        if recipient.is_empty() || recipient == BROADCAST_RECIPIENT {
            return;
        }
        self.send_to_user(&recipient, &Frame::Typing(envelope)).await;
    }

    pub async fn broadcast_to_all(&self, frame: &Frame) -> usize {
        self.broadcast(frame, None).await
    }

    pub async fn broadcast_to_all_except(&self, frame: &Frame, except: &str) -> usize {
        self.broadcast(frame, Some(except)).await
    }

    /// Serialize once and queue on every registered connection
    ///
    /// Recipients are delivered to concurrently. One that can't take the
    /// frame within the send timeout is closed; the rest still get it.
    async fn broadcast(&self, frame: &Frame, except: Option<&str>) -> usize {
        let payload = match frame.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Frame serialization error: {}", e);
                return 0;
            }
        };

        let recipients: Vec<Arc<ConnectionHandle>> = self
            .registry
            .read()
            .iter()
            .filter(|(username, _)| Some(username.as_str()) != except)
            .map(|(_, conn)| conn.clone())
            .collect();

        let deliveries = recipients
            .iter()
            .map(|conn| conn.deliver(payload.clone(), self.send_timeout));

        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    /// Queue a frame for one user; false if they have no live connection
    pub async fn send_to_user(&self, username: &str, frame: &Frame) -> bool {
        let conn = self.registry.read().get(username).cloned();
        match conn {
            Some(conn) => conn.deliver_frame(frame, self.send_timeout).await,
            None => false,
        }
    }

    async fn broadcast_users_list(&self) {
        let users = self.identity.get_all_users();
        self.broadcast_to_all(&Frame::users_list(users)).await;
    }

    /// End the session behind `token` and disconnect its owner
    ///
    /// The session, the presence flag and the registry entry go in one
    /// step, so no roster ever shows a connected user as offline.
    pub async fn logout(&self, token: &str) -> Option<String> {
        let mut removed = None;
        let username = self.identity.logout_with(token, |username| {
            removed = self.registry.write().remove(username);
        })?;

        if let Some(conn) = removed {
            tracing::info!(user = %username, conn = %conn.id(), "Closing connection for logged out user");
            conn.close();
            self.announce_departure(&username).await;
        }
        Some(username)
    }

    /// Expire stale sessions and disconnect the users that held them
    pub async fn sweep_sessions(&self) -> Vec<String> {
        let mut removed = Vec::new();
        let expired = self.identity.cleanup_sessions_with(|username| {
            if let Some(conn) = self.registry.write().remove(username) {
                removed.push(conn);
            }
        });

        for conn in removed {
            tracing::info!(user = %conn.username(), conn = %conn.id(), "Closing connection for expired session");
            conn.close();
            self.announce_departure(conn.username()).await;
        }
        expired
    }

    pub fn is_connected(&self, username: &str) -> bool {
        self.registry.read().contains_key(username)
    }

    pub fn connected_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Usernames with a registered connection
    pub fn connected_users(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }
}

fn stamp(mut envelope: Envelope, sender: &str) -> Envelope {
    envelope.sender = sender.to_string();
    envelope.timestamp = Utc::now();
    envelope
}

fn assign_id(envelope: &mut Envelope) {
    if envelope.id.is_empty() {
        envelope.id = Uuid::new_v4().to_string();
    }
}

/// Run [`Hub::sweep_sessions`] every `period` until the runtime shuts down
pub fn spawn_session_sweep(hub: Arc<Hub>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let expired = hub.sweep_sessions().await;
            tracing::info!(expired = expired.len(), "Session sweep complete");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_OUTBOUND_QUEUE_CAPACITY};
    use crate::security::PasswordParams;
    use serde_json::Value;
    use tokio::sync::mpsc::Receiver;

    const TEST_PARAMS: PasswordParams = PasswordParams {
        memory_kib: 256,
        iterations: 1,
    };

    fn hub_with_users(users: &[&str]) -> Hub {
        hub_with(users, chrono::Duration::hours(24), 100)
    }

    fn hub_with(users: &[&str], ttl: chrono::Duration, history: usize) -> Hub {
        build_hub(users, ttl, history, 64, Duration::from_secs(1))
    }

    fn build_hub(
        users: &[&str],
        ttl: chrono::Duration,
        history: usize,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> Hub {
        let identity = Arc::new(IdentityStore::new(ttl, TEST_PARAMS));
        for user in users {
            identity.register_user(user, "password1").unwrap();
        }
        Hub::new(identity, Arc::new(MessageLog::new(history)), queue_capacity, send_timeout)
    }

    async fn connect(hub: &Hub, username: &str) -> (Arc<ConnectionHandle>, Receiver<String>) {
        let (conn, rx) = hub.open_connection(username);
        hub.register(conn.clone()).await;
        (conn, rx)
    }

    /// Everything currently queued for a connection, decoded
    fn drain(rx: &mut Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            frames.push(serde_json::from_str(&payload).unwrap());
        }
        frames
    }

    fn types(frames: &[Value]) -> Vec<&str> {
        frames.iter().map(|f| f["type"].as_str().unwrap()).collect()
    }

    fn general(content: &str) -> Frame {
        Frame::General(Envelope {
            content: content.to_string(),
            ..Envelope::default()
        })
    }

    fn private(recipient: &str, content: &str) -> Frame {
        Frame::Private(Envelope {
            recipient: recipient.to_string(),
            content: content.to_string(),
            ..Envelope::default()
        })
    }

    fn is_online(hub: &Hub, username: &str) -> bool {
        hub.identity.get_user(username).unwrap().is_online
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    #[test]
    fn test_authenticate_valid_token() {
        let hub = hub_with_users(&["alice"]);
        let token = hub.identity.create_session("alice").unwrap();

        let frame = Frame::Auth {
            session_token: token,
            public_key: "pk-alice".into(),
        };

        assert_eq!(hub.authenticate(&frame).as_deref(), Some("alice"));
        assert_eq!(hub.identity.get_user("alice").unwrap().public_key, "pk-alice");
    }

    #[test]
    fn test_authenticate_rejects_bad_token_and_wrong_type() {
        let hub = hub_with_users(&["alice"]);
        let token = hub.identity.create_session("alice").unwrap();

        let bad = Frame::Auth {
            session_token: "forged".into(),
            public_key: String::new(),
        };
        assert_eq!(hub.authenticate(&bad), None);

        let not_auth = Frame::General(Envelope {
            content: token,
            ..Envelope::default()
        });
        assert_eq!(hub.authenticate(&not_auth), None);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[tokio::test]
    async fn test_register_emits_frames_in_order() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        for i in 0..3 {
            hub.dispatch(&alice, general(&format!("m{}", i))).await;
        }

        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let frames = drain(&mut bob_rx);

        assert_eq!(
            types(&frames),
            vec!["success", "user_joined", "users_list", "history", "history", "history"]
        );
        assert_eq!(frames[1]["sender"], "bob");
        assert_eq!(frames[3]["content"], "m0");
        assert_eq!(frames[5]["content"], "m2");
        assert_eq!(frames[5]["sender"], "alice");
        assert_eq!(frames[5]["recipient"], "all");
    }

    #[tokio::test]
    async fn test_register_notifies_existing_connections() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (_alice, mut alice_rx) = connect(&hub, "alice").await;
        drain(&mut alice_rx);

        connect(&hub, "bob").await;

        let frames = drain(&mut alice_rx);
        assert_eq!(types(&frames), vec!["user_joined", "users_list"]);
        assert_eq!(frames[0]["sender"], "bob");
        assert!(is_online(&hub, "bob"));
    }

    #[tokio::test]
    async fn test_register_evicts_previous_connection() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let (first, _first_rx) = connect(&hub, "alice").await;
        drain(&mut bob_rx);

        let (second, _second_rx) = connect(&hub, "alice").await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.connected_count(), 2);

        // The evicted connection's cleanup must not unseat the new one
        assert!(!hub.unregister(&first).await);
        assert!(hub.is_connected("alice"));
        assert!(is_online(&hub, "alice"));

        let frames = drain(&mut bob_rx);
        assert_eq!(types(&frames), vec!["user_joined", "users_list"]);
        assert_eq!(frames[0]["sender"], "alice");
    }

    // =========================================================================
    // Unregistration
    // =========================================================================

    #[tokio::test]
    async fn test_unregister_broadcasts_user_left_once() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        assert!(hub.unregister(&alice).await);
        assert!(!hub.unregister(&alice).await);

        assert!(!hub.is_connected("alice"));
        assert!(!is_online(&hub, "alice"));

        let frames = drain(&mut bob_rx);
        assert_eq!(types(&frames), vec!["user_left", "users_list"]);
        assert_eq!(frames[0]["sender"], "alice");

        let roster = frames[1]["users"].as_array().unwrap();
        let alice_entry = roster.iter().find(|u| u["username"] == "alice").unwrap();
        assert_eq!(alice_entry["is_online"], false);
    }

    #[tokio::test]
    async fn test_registered_users_are_online() {
        let hub = hub_with_users(&["alice", "bob", "carol"]);
        let (_a, _ar) = connect(&hub, "alice").await;
        let (b, _br) = connect(&hub, "bob").await;
        let (_c, _cr) = connect(&hub, "carol").await;
        hub.unregister(&b).await;

        for username in hub.connected_users() {
            assert!(is_online(&hub, &username), "{} registered but offline", username);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    #[tokio::test]
    async fn test_general_fans_out_except_sender() {
        let hub = hub_with_users(&["alice", "bob", "carol"]);
        let (alice, mut alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let (_carol, mut carol_rx) = connect(&hub, "carol").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let spoofed = Frame::General(Envelope {
            sender: "mallory".into(),
            content: "hi".into(),
            ..Envelope::default()
        });
        hub.dispatch(&alice, spoofed).await;

        assert!(drain(&mut alice_rx).is_empty());
        for rx in [&mut bob_rx, &mut carol_rx] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["type"], "general");
            assert_eq!(frames[0]["sender"], "alice");
            assert_eq!(frames[0]["recipient"], "all");
            assert_eq!(frames[0]["content"], "hi");
            assert!(frames[0]["id"].as_str().is_some());
        }

        assert_eq!(hub.log.len(), 1);
    }

    #[tokio::test]
    async fn test_private_reaches_only_recipient() {
        let hub = hub_with_users(&["alice", "bob", "carol"]);
        let (alice, mut alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let (_carol, mut carol_rx) = connect(&hub, "carol").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let frame = Frame::Private(Envelope {
            id: "client-id".into(),
            recipient: "bob".into(),
            content: "x".into(),
            iv: "aXY=".into(),
            auth_tag: "dGFn".into(),
            key_id: "k1".into(),
            ..Envelope::default()
        });
        hub.dispatch(&alice, frame).await;

        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "private");
        assert_eq!(frames[0]["sender"], "alice");
        assert_eq!(frames[0]["id"], "client-id");
        assert_eq!(frames[0]["iv"], "aXY=");
        assert_eq!(frames[0]["auth_tag"], "dGFn");
        assert_eq!(frames[0]["key_id"], "k1");

        assert!(drain(&mut carol_rx).is_empty());
        assert!(drain(&mut alice_rx).is_empty());

        let logged = hub.log.history_for("bob");
        assert_eq!(logged.len(), 1);
        assert!(logged[0].encrypted);
    }

    #[tokio::test]
    async fn test_private_to_offline_user_is_logged_not_queued() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, _alice_rx) = connect(&hub, "alice").await;

        hub.dispatch(&alice, private("bob", "later")).await;

        assert_eq!(hub.log.conversation_between("alice", "bob").len(), 1);
    }

    #[tokio::test]
    async fn test_private_misaddressed_is_dropped() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, mut alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        for recipient in ["", "all", "alice"] {
            hub.dispatch(&alice, private(recipient, "x")).await;
        }

        assert!(hub.log.is_empty());
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_typing_is_delivered_not_logged() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        hub.dispatch(
            &alice,
            Frame::Typing(Envelope {
                recipient: "bob".into(),
                ..Envelope::default()
            }),
        )
        .await;
        hub.dispatch(
            &alice,
            Frame::Typing(Envelope {
                recipient: "all".into(),
                ..Envelope::default()
            }),
        )
        .await;

        let frames = drain(&mut bob_rx);
        assert_eq!(types(&frames), vec!["typing"]);
        assert_eq!(frames[0]["sender"], "alice");
        assert!(hub.log.is_empty());
    }

    #[tokio::test]
    async fn test_ping_and_unknown_frames() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, mut alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.dispatch(&alice, Frame::Ping { timestamp: Utc::now() }).await;
        hub.dispatch(&alice, Frame::Unknown).await;
        hub.dispatch(&alice, Frame::users_list(vec![])).await;

        assert_eq!(types(&drain(&mut alice_rx)), vec!["pong"]);
        assert!(drain(&mut bob_rx).is_empty());
        assert!(hub.log.is_empty());
    }

    #[tokio::test]
    async fn test_sender_order_is_preserved() {
        let hub = hub_with_users(&["alice", "bob"]);
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        for i in 0..10 {
            if i % 2 == 0 {
                hub.dispatch(&alice, general(&i.to_string())).await;
            } else {
                hub.dispatch(&alice, private("bob", &i.to_string())).await;
            }
        }

        let contents: Vec<String> = drain(&mut bob_rx)
            .iter()
            .map(|f| f["content"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }

    // =========================================================================
    // Broadcast primitives
    // =========================================================================

    #[tokio::test]
    async fn test_stalled_peer_is_closed_not_skipped() {
        let hub = build_hub(
            &["bob", "carol"],
            chrono::Duration::hours(1),
            10,
            64,
            Duration::from_millis(50),
        );
        let (_carol, mut carol_rx) = connect(&hub, "carol").await;
        drain(&mut carol_rx);

        // bob's queue holds a single frame and is never drained
        let (bob, _bob_rx) = ConnectionHandle::new("bob", 1);
        hub.register(bob.clone()).await;

        assert!(bob.is_closed());
        assert_eq!(types(&drain(&mut carol_rx)), vec!["user_joined", "users_list"]);

        let delivered = hub.broadcast_to_all(&Frame::success("x")).await;
        assert_eq!(delivered, 1);
        assert_eq!(types(&drain(&mut carol_rx)), vec!["success"]);
    }

    #[tokio::test]
    async fn test_live_message_during_full_history_replay() {
        let hub = Arc::new(build_hub(
            &["alice", "bob"],
            chrono::Duration::hours(1),
            DEFAULT_HISTORY_LIMIT,
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            Duration::from_secs(5),
        ));
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        for i in 0..DEFAULT_HISTORY_LIMIT {
            hub.dispatch(&alice, general(&i.to_string())).await;
        }

        // The replay is larger than bob's queue, so it blocks until bob reads
        let (bob, mut bob_rx) = hub.open_connection("bob");
        let replay = tokio::spawn({
            let hub = hub.clone();
            let bob = bob.clone();
            async move { hub.register(bob).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let live = tokio::spawn({
            let hub = hub.clone();
            let alice = alice.clone();
            async move { hub.dispatch(&alice, general("LIVE")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // welcome, user_joined, users_list, the replay, and the live message
        let expected = 3 + DEFAULT_HISTORY_LIMIT + 1;
        let frames = tokio::time::timeout(Duration::from_secs(10), async {
            let mut frames: Vec<Value> = Vec::new();
            while frames.len() < expected {
                let payload = bob_rx.recv().await.unwrap();
                frames.push(serde_json::from_str(&payload).unwrap());
            }
            frames
        })
        .await
        .unwrap();

        replay.await.unwrap();
        live.await.unwrap();

        let live_count = frames
            .iter()
            .filter(|f| f["type"] == "general" && f["content"] == "LIVE")
            .count();
        let history_count = frames.iter().filter(|f| f["type"] == "history").count();
        assert_eq!(live_count, 1);
        assert_eq!(history_count, DEFAULT_HISTORY_LIMIT);
        assert!(!bob.is_closed());
        assert!(hub.is_connected("bob"));
    }

    #[tokio::test]
    async fn test_close_cuts_replay_short() {
        let hub = Arc::new(build_hub(
            &["alice", "bob"],
            chrono::Duration::hours(1),
            100,
            4,
            Duration::from_secs(60),
        ));
        let (alice, mut alice_rx) = hub.open_connection("alice");
        let drainer = tokio::spawn(async move { while alice_rx.recv().await.is_some() {} });
        hub.register(alice.clone()).await;
        for i in 0..20 {
            hub.dispatch(&alice, general(&i.to_string())).await;
        }

        let (bob, _bob_rx) = hub.open_connection("bob");
        let replay = tokio::spawn({
            let hub = hub.clone();
            let bob = bob.clone();
            async move { hub.register(bob).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!replay.is_finished());

        bob.close();
        tokio::time::timeout(Duration::from_secs(5), replay)
            .await
            .unwrap()
            .unwrap();

        drainer.abort();
    }

    #[tokio::test]
    async fn test_send_to_user_without_connection() {
        let hub = hub_with_users(&["alice"]);
        assert!(!hub.send_to_user("alice", &Frame::success("x")).await);
    }

    // =========================================================================
    // Session ending
    // =========================================================================

    #[tokio::test]
    async fn test_logout_removes_connection_with_session() {
        let hub = hub_with_users(&["alice", "bob"]);
        let token = hub.identity.create_session("alice").unwrap();
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        assert_eq!(hub.logout(&token).await.as_deref(), Some("alice"));

        assert!(alice.is_closed());
        assert!(!hub.is_connected("alice"));
        assert!(!is_online(&hub, "alice"));
        for username in hub.connected_users() {
            assert!(is_online(&hub, &username));
        }

        let frames = drain(&mut bob_rx);
        assert_eq!(types(&frames), vec!["user_left", "users_list"]);
        assert_eq!(frames[0]["sender"], "alice");

        // The reader's own cleanup then finds nothing to do
        assert!(!hub.unregister(&alice).await);
        assert!(drain(&mut bob_rx).is_empty());

        assert_eq!(hub.logout(&token).await, None);
    }

    #[tokio::test]
    async fn test_logout_without_connection() {
        let hub = hub_with_users(&["alice", "bob"]);
        let token = hub.identity.create_session("alice").unwrap();
        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        assert_eq!(hub.logout(&token).await.as_deref(), Some("alice"));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_closes_expired_connections() {
        let hub = hub_with(&["alice", "bob"], chrono::Duration::zero(), 10);
        hub.identity.create_session("alice").unwrap();
        let (alice, _alice_rx) = connect(&hub, "alice").await;

        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        drain(&mut bob_rx);

        let expired = hub.sweep_sessions().await;

        assert_eq!(expired, vec!["alice".to_string()]);
        assert!(alice.is_closed());
        assert!(!hub.is_connected("alice"));
        assert!(!is_online(&hub, "alice"));

        let frames = drain(&mut bob_rx);
        assert_eq!(types(&frames), vec!["user_left", "users_list"]);
        assert!(!hub.unregister(&alice).await);
    }

    #[tokio::test]
    async fn test_history_replay_respects_log_bound() {
        let hub = hub_with(&["alice", "bob"], chrono::Duration::hours(1), 5);
        let (alice, _alice_rx) = connect(&hub, "alice").await;
        for i in 0..8 {
            hub.dispatch(&alice, general(&i.to_string())).await;
        }

        let (_bob, mut bob_rx) = connect(&hub, "bob").await;
        let history: Vec<String> = drain(&mut bob_rx)
            .iter()
            .filter(|f| f["type"] == "history")
            .map(|f| f["content"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(history, vec!["3", "4", "5", "6", "7"]);
    }
}
