//! Foreground window clients as seen from the worker.
//!
//! The worker reaches pages only through this registry: broadcast to every
//! connected client, post to one, focus one, or open a new window. Each
//! connected page owns the receiving half of its mailbox.
//!
//! | Operation       | Worker-side API            |
//! |-----------------|----------------------------|
//! | `matchAll`      | [`ClientRegistry::windows`]  |
//! | `postMessage`   | [`ClientRegistry::post`]     |
//! | broadcast       | [`ClientRegistry::broadcast`]|
//! | `client.focus`  | [`ClientRegistry::focus`]    |
//! | `openWindow`    | [`ClientRegistry::open_window`] |

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::messages::ClientMessage;

/// Identifier of a connected window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Snapshot of a window client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
}

struct ClientEntry {
    url: String,
    focused: bool,
    mailbox: mpsc::UnboundedSender<ClientMessage>,
}

/// How long a worker-opened window may stay unclaimed before a broadcast
/// drops it.
pub const ATTACH_GRACE: Duration = Duration::from_secs(30);

struct PendingWindow {
    inbox: mpsc::UnboundedReceiver<ClientMessage>,
    opened_at: Instant,
}

/// Receiving side held by a page.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub inbox: mpsc::UnboundedReceiver<ClientMessage>,
}

/// Registry of connected window clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, ClientEntry>>,
    /// Windows opened by the worker that no page has attached to yet.
    pending: Mutex<BTreeMap<ClientId, PendingWindow>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .finish_non_exhaustive()
    }
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, url: &str, focused: bool) -> ClientConnection {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if focused {
            for entry in clients.values_mut() {
                entry.focused = false;
            }
        }
        clients.insert(
            id,
            ClientEntry {
                url: url.to_string(),
                focused,
                mailbox: tx,
            },
        );
        ClientConnection { id, inbox: rx }
    }

    /// A page at `url` connects.
    pub fn connect(&self, url: &str) -> ClientConnection {
        let connection = self.register(url, false);
        tracing::debug!(client_id = %connection.id, url, "window client connected");
        connection
    }

    /// A page goes away.
    pub fn disconnect(&self, id: ClientId) {
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Window clients, focused ones first.
    #[must_use]
    pub fn windows(&self) -> Vec<WindowInfo> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut windows: Vec<WindowInfo> = clients
            .iter()
            .map(|(id, entry)| WindowInfo {
                id: *id,
                url: entry.url.clone(),
                focused: entry.focused,
            })
            .collect();
        windows.sort_by_key(|w| (!w.focused, w.id));
        windows
    }

    /// Post to one client. Returns false if it is gone.
    pub fn post(&self, id: ClientId, message: ClientMessage) -> bool {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .get(&id)
            .is_some_and(|entry| entry.mailbox.send(message).is_ok())
    }

    /// Post to every client; returns how many accepted it. Clients whose
    /// inbox was dropped are pruned, and so are worker-opened windows left
    /// unclaimed for longer than [`ATTACH_GRACE`].
    pub fn broadcast(&self, message: &ClientMessage) -> usize {
        self.prune_unclaimed();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        clients.retain(|id, entry| {
            if entry.mailbox.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::debug!(client_id = %id, "pruning closed window client");
                false
            }
        });
        delivered
    }

    fn prune_unclaimed(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<ClientId> = pending
            .iter()
            .filter(|(_, window)| window.opened_at.elapsed() > ATTACH_GRACE)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        for id in expired {
            tracing::debug!(client_id = %id, "dropping unclaimed window");
            pending.remove(&id);
            clients.remove(&id);
        }
    }

    /// Give focus to a client. Returns false if it is gone.
    pub fn focus(&self, id: ClientId) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if !clients.contains_key(&id) {
            return false;
        }
        for (client_id, entry) in clients.iter_mut() {
            entry.focused = *client_id == id;
        }
        true
    }

    /// Open a new focused window at `url`. The page claims its inbox with
    /// [`ClientRegistry::attach`].
    pub fn open_window(&self, url: &str) -> ClientId {
        let connection = self.register(url, true);
        tracing::info!(client_id = %connection.id, url, "opened window");
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                connection.id,
                PendingWindow {
                    inbox: connection.inbox,
                    opened_at: Instant::now(),
                },
            );
        connection.id
    }

    /// Claim the inbox of a worker-opened window.
    pub fn attach(&self, id: ClientId) -> Option<ClientConnection> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .map(|window| ClientConnection {
                id,
                inbox: window.inbox,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_all_and_prunes_closed() {
        let registry = ClientRegistry::new();
        let mut a = registry.connect("/dashboard");
        let b = registry.connect("/budget");
        drop(b.inbox);

        let delivered = registry.broadcast(&ClientMessage::renewal_failed("x"));
        assert_eq!(delivered, 1);
        assert_eq!(registry.len(), 1);
        assert!(a.inbox.try_recv().is_ok());
    }

    #[test]
    fn focus_moves_between_windows() {
        let registry = ClientRegistry::new();
        let a = registry.connect("/a");
        let b = registry.connect("/b");
        assert!(registry.focus(b.id));
        assert_eq!(registry.windows()[0].id, b.id);
        assert!(registry.focus(a.id));
        let windows = registry.windows();
        assert_eq!(windows[0].id, a.id);
        assert!(!windows[1].focused);
        assert!(!registry.focus(ClientId(999)));
    }

    #[test]
    fn opened_window_is_focused_and_attachable() {
        let registry = ClientRegistry::new();
        let _existing = registry.connect("/a");
        let id = registry.open_window("/transactions");
        let windows = registry.windows();
        assert_eq!(windows[0].id, id);
        assert!(windows[0].focused);
        assert_eq!(windows[0].url, "/transactions");

        let mut conn = registry.attach(id).unwrap();
        assert!(registry.attach(id).is_none());
        assert!(registry.post(id, ClientMessage::NotificationClicked { url: "/t".into() }));
        assert!(conn.inbox.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_window_is_dropped_after_grace() {
        let registry = ClientRegistry::new();
        let mut page = registry.connect("/a");
        let opened = registry.open_window("/late");
        assert_eq!(registry.broadcast(&ClientMessage::renewal_failed("x")), 2);

        tokio::time::advance(ATTACH_GRACE + Duration::from_secs(1)).await;
        assert_eq!(registry.broadcast(&ClientMessage::renewal_failed("y")), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.attach(opened).is_none());
        assert!(page.inbox.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_window_outlives_grace() {
        let registry = ClientRegistry::new();
        let opened = registry.open_window("/t");
        let _conn = registry.attach(opened).unwrap();
        tokio::time::advance(ATTACH_GRACE * 2).await;
        assert_eq!(registry.broadcast(&ClientMessage::renewal_failed("x")), 1);
    }

    #[test]
    fn post_to_missing_client_fails() {
        let registry = ClientRegistry::new();
        let conn = registry.connect("/a");
        registry.disconnect(conn.id);
        assert!(!registry.post(conn.id, ClientMessage::renewal_failed("x")));
        assert!(registry.is_empty());
    }
}
