use std::time::Duration;

use bytes::Bytes;
use proctor_core::{Envelope, Identity, RelayError};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::{ClientConn, ConnId, ServerConn, ServerConnPipes};
use crate::registry::ConnectionRegistry;

/// Tunables for the relay service.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// How long a trigger waits for the agent reply before giving up.
    pub reply_timeout: Duration,
    /// Capacity of each connection's channels.
    pub max_send_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(30),
            max_send_queue: 256,
        }
    }
}

/// Bridges HTTP-triggered test runs to grading-agent sockets and fans
/// results out to browser sockets, keyed by identity.
///
/// Owns the two role registries; request handlers never see the raw maps.
/// The relay implements the synchronous correlated mode: one forward, then
/// exactly one reply, with a `Busy` refusal for overlapping triggers on
/// the same identity.
pub struct Relay {
    servers: ConnectionRegistry<ServerConn>,
    clients: ConnectionRegistry<ClientConn>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            servers: ConnectionRegistry::new(),
            clients: ConnectionRegistry::new(),
            config,
        }
    }

    /// Register a grading-agent connection for `identity`, displacing any
    /// prior one, and tell the identity's browser it came up.
    ///
    /// The returned pipes belong to the task pumping the socket; dropping
    /// them signals closure to every held handle.
    pub fn attach_server(&self, identity: &Identity) -> (ConnId, ServerConnPipes) {
        let (conn, pipes) = ServerConn::channel(self.config.max_send_queue);
        let conn_id = conn.id().clone();

        if self.servers.register(identity.clone(), conn).is_some() {
            tracing::info!(identity = %identity, "replacing live agent connection");
        }
        tracing::info!(identity = %identity, conn_id = %conn_id, "agent connected");

        self.notify(identity, &Envelope::connected());
        (conn_id, pipes)
    }

    /// Register a browser connection for `identity`. If an agent is already
    /// up for the identity, greet the browser with `connected`.
    pub fn attach_client(&self, identity: &Identity) -> (ConnId, mpsc::Receiver<String>) {
        let (conn, rx) = ClientConn::channel(self.config.max_send_queue);
        let conn_id = conn.id().clone();

        self.clients.register(identity.clone(), conn);
        tracing::info!(identity = %identity, conn_id = %conn_id, "browser connected");

        if self.servers.contains(identity) {
            self.notify(identity, &Envelope::connected());
        }
        (conn_id, rx)
    }

    /// Registry half of agent teardown: runs once per socket, after its
    /// transport reported closure. Emits `disconnected` to the browser only
    /// when this socket was still the registered one.
    pub fn detach_server(&self, identity: &Identity, conn_id: &ConnId) {
        if self.servers.remove_if(identity, conn_id) {
            tracing::info!(identity = %identity, conn_id = %conn_id, "agent connection closed");
            self.notify(identity, &Envelope::disconnected());
        }
    }

    pub fn detach_client(&self, identity: &Identity, conn_id: &ConnId) {
        if self.clients.remove_if(identity, conn_id) {
            tracing::info!(identity = %identity, conn_id = %conn_id, "browser connection closed");
        }
    }

    /// Forward `payload` verbatim to the identity's agent, wait for exactly
    /// one reply, push it to the browser as `test_result`, and return it.
    ///
    /// Fails fast with `ServerOffline` when no agent is registered; never
    /// retries. Concurrent calls for other identities proceed
    /// independently.
    pub async fn run_test(&self, identity: &Identity, payload: Bytes) -> Result<Value, RelayError> {
        let Some(server) = self.servers.lookup(identity) else {
            return Err(RelayError::ServerOffline);
        };

        let mut replies = server.try_acquire_replies().ok_or(RelayError::Busy)?;

        server.forward(payload).await?;

        let reply = match tokio::time::timeout(self.config.reply_timeout, replies.recv()).await {
            Ok(Some(text)) => text,
            // Reply stream ended: the transport closed mid-wait.
            Ok(None) => return Err(RelayError::ServerOffline),
            Err(_) => {
                tracing::warn!(
                    identity = %identity,
                    timeout_secs = self.config.reply_timeout.as_secs(),
                    "agent did not reply in time"
                );
                return Err(RelayError::ReplyTimeout);
            }
        };

        let result: Value = serde_json::from_str(&reply)?;
        self.notify(identity, &Envelope::test_result(result.clone()));
        Ok(result)
    }

    /// Best-effort push to the identity's browser connection, if any.
    pub fn notify(&self, identity: &Identity, event: &Envelope) -> bool {
        match self.clients.lookup(identity) {
            Some(client) => client.send_event(event),
            None => false,
        }
    }

    pub fn server_online(&self, identity: &Identity) -> bool {
        self.servers.contains(identity)
    }

    pub fn server_count(&self) -> usize {
        self.servers.count()
    }

    pub fn client_count(&self) -> usize {
        self.clients.count()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relay() -> Relay {
        Relay::new(RelayConfig {
            reply_timeout: Duration::from_millis(200),
            max_send_queue: 32,
        })
    }

    fn identity() -> Identity {
        Identity::from("a@x.com")
    }

    #[tokio::test]
    async fn run_test_without_agent_fails_immediately() {
        let relay = relay();
        let err = relay
            .run_test(&identity(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ServerOffline));
    }

    #[tokio::test]
    async fn run_test_round_trip() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);

        // Stand-in for the socket task: assert the forwarded bytes, reply.
        let agent = tokio::spawn(async move {
            let payload = pipes.outbound_rx.recv().await.unwrap();
            assert_eq!(payload.as_ref(), b"{\"cmd\":\"run\"}");
            pipes.reply_tx.send(r#"{"passed":true}"#.into()).await.unwrap();
        });

        let result = relay
            .run_test(&id, Bytes::from_static(b"{\"cmd\":\"run\"}"))
            .await
            .unwrap();
        assert_eq!(result, json!({"passed": true}));
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn result_is_fanned_out_to_the_browser() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);
        let (_client_id, mut client_rx) = relay.attach_client(&id);

        // Agent already up, so the browser is greeted on attach.
        assert_eq!(
            client_rx.recv().await.unwrap(),
            r#"{"event":"connected","args":[]}"#
        );

        tokio::spawn(async move {
            let _ = pipes.outbound_rx.recv().await;
            pipes.reply_tx.send(r#"{"passed":false}"#.into()).await.unwrap();
        });

        let result = relay.run_test(&id, Bytes::from_static(b"{}")).await.unwrap();

        let pushed = client_rx.recv().await.unwrap();
        let envelope: Envelope = serde_json::from_str(&pushed).unwrap();
        assert_eq!(envelope.event, "test_result");
        assert_eq!(envelope.args[0], result);
    }

    #[tokio::test]
    async fn missing_browser_is_a_silent_no_op() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);

        tokio::spawn(async move {
            let _ = pipes.outbound_rx.recv().await;
            pipes.reply_tx.send("42".into()).await.unwrap();
        });

        let result = relay.run_test(&id, Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn agent_greeting_on_server_attach() {
        let relay = relay();
        let id = identity();

        let (_client_id, mut client_rx) = relay.attach_client(&id);
        // No agent yet: no greeting.
        assert!(client_rx.try_recv().is_err());

        let (_conn_id, _pipes) = relay.attach_server(&id);
        assert_eq!(
            client_rx.recv().await.unwrap(),
            r#"{"event":"connected","args":[]}"#
        );
    }

    #[tokio::test]
    async fn overlapping_trigger_is_refused() {
        let relay = relay();
        let id = identity();
        let (_conn_id, _pipes) = relay.attach_server(&id);

        // Claim the reply stream the way an in-flight run would.
        let server = relay.servers.lookup(&id).unwrap();
        let _guard = server.try_acquire_replies().unwrap();

        let err = relay
            .run_test(&id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Busy));
    }

    #[tokio::test]
    async fn silent_agent_times_out() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);

        let agent = tokio::spawn(async move {
            // Swallow the payload, never reply; keep the pipes alive.
            let _ = pipes.outbound_rx.recv().await;
            let _ = pipes.outbound_rx.recv().await;
        });

        let err = relay
            .run_test(&id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ReplyTimeout));
        agent.abort();
    }

    #[tokio::test]
    async fn late_reply_after_timeout_is_not_misattributed() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);

        // First run: the agent misses the reply window entirely.
        let err = relay
            .run_test(&id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ReplyTimeout));

        // The reply for the timed-out run lands after the fact.
        pipes.reply_tx.send(r#"{"for_run":1}"#.into()).await.unwrap();

        let agent = tokio::spawn(async move {
            let _ = pipes.outbound_rx.recv().await; // timed-out run's payload
            let _ = pipes.outbound_rx.recv().await;
            pipes.reply_tx.send(r#"{"for_run":2}"#.into()).await.unwrap();
        });

        // The second run gets its own reply, not the stale one.
        let result = relay.run_test(&id, Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(result, json!({"for_run": 2}));
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn agent_dropping_mid_wait_surfaces_offline() {
        let relay = relay();
        let id = identity();
        let (conn_id, mut pipes) = relay.attach_server(&id);

        tokio::spawn(async move {
            let _ = pipes.outbound_rx.recv().await;
            // Transport closes before any reply.
            drop(pipes);
        });

        let err = relay
            .run_test(&id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ServerOffline));

        // The owning socket task then runs teardown; afterwards the
        // registry no longer knows the identity.
        relay.detach_server(&id, &conn_id);
        assert!(!relay.server_online(&id));
    }

    #[tokio::test]
    async fn garbage_reply_is_surfaced_not_fatal() {
        let relay = relay();
        let id = identity();
        let (_conn_id, mut pipes) = relay.attach_server(&id);

        tokio::spawn(async move {
            let _ = pipes.outbound_rx.recv().await;
            pipes.reply_tx.send("not json".into()).await.unwrap();
        });

        let err = relay
            .run_test(&id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedReply(_)));
    }

    #[tokio::test]
    async fn reconnect_displaces_and_stale_teardown_is_ignored() {
        let relay = relay();
        let id = identity();

        let (first_id, _first_pipes) = relay.attach_server(&id);
        let (second_id, mut second_pipes) = relay.attach_server(&id);
        assert_ne!(first_id, second_id);

        // The replaced socket's teardown must not evict the live entry.
        relay.detach_server(&id, &first_id);
        assert!(relay.server_online(&id));

        // Forwards go to the replacement.
        tokio::spawn(async move {
            let _ = second_pipes.outbound_rx.recv().await;
            second_pipes.reply_tx.send("{}".into()).await.unwrap();
        });
        relay.run_test(&id, Bytes::from_static(b"{}")).await.unwrap();

        relay.detach_server(&id, &second_id);
        assert!(!relay.server_online(&id));
    }

    #[tokio::test]
    async fn disconnect_notification_exactly_once() {
        let relay = relay();
        let id = identity();

        let (conn_id, _pipes) = relay.attach_server(&id);
        let (_client_id, mut client_rx) = relay.attach_client(&id);
        assert_eq!(
            client_rx.recv().await.unwrap(),
            r#"{"event":"connected","args":[]}"#
        );

        relay.detach_server(&id, &conn_id);
        relay.detach_server(&id, &conn_id);

        assert_eq!(
            client_rx.recv().await.unwrap(),
            r#"{"event":"disconnected","args":[]}"#
        );
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let relay = relay();
        let a = Identity::from("a@x.com");
        let b = Identity::from("b@x.com");

        let (_a_conn, mut a_pipes) = relay.attach_server(&a);

        tokio::spawn(async move {
            let _ = a_pipes.outbound_rx.recv().await;
            a_pipes.reply_tx.send("1".into()).await.unwrap();
        });

        // A run for `a` is unaffected by `b` having no agent at all.
        let (res_a, res_b) = tokio::join!(
            relay.run_test(&a, Bytes::from_static(b"{}")),
            relay.run_test(&b, Bytes::from_static(b"{}")),
        );
        assert_eq!(res_a.unwrap(), json!(1));
        assert!(matches!(res_b.unwrap_err(), RelayError::ServerOffline));
    }

    #[tokio::test]
    async fn detach_client_removes_the_browser() {
        let relay = relay();
        let id = identity();
        let (client_id, _rx) = relay.attach_client(&id);
        assert_eq!(relay.client_count(), 1);

        relay.detach_client(&id, &client_id);
        assert_eq!(relay.client_count(), 0);
        assert!(!relay.notify(&id, &Envelope::connected()));
    }
}
