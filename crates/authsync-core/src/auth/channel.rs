//! Cross-tab sign-in/sign-out notifications.
//!
//! `BroadcastChannel` mirrors the same-origin broadcast primitive: a message
//! posted on a named channel reaches every other handle open on that name,
//! never the sender itself. `LocalBroadcastHub` implements it in-process;
//! `FileBroadcastChannel` reaches other processes through a shared file.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Buffered messages per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 64;

pub trait BroadcastChannel: Send + Sync {
    fn post_message(&self, message: &str);

    /// Messages posted by other handles, in per-sender order.
    fn subscribe(&self) -> BoxStream<'static, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub enum AuthEvent {
    SignIn,
    SignOut,
}

impl AuthEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEvent::SignIn => "signIn",
            AuthEvent::SignOut => "signOut",
        }
    }

    /// Unknown messages map to `None` and are ignored by listeners.
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            "signIn" => Some(AuthEvent::SignIn),
            "signOut" => Some(AuthEvent::SignOut),
            _ => None,
        }
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed publisher/subscriber over a `BroadcastChannel`.
#[derive(Clone)]
pub struct AuthNotifier {
    channel: Arc<dyn BroadcastChannel>,
}

impl AuthNotifier {
    pub fn new(channel: Arc<dyn BroadcastChannel>) -> Self {
        Self { channel }
    }

    pub fn publish(&self, event: AuthEvent) {
        debug!(%event, "Broadcasting auth event");
        self.channel.post_message(event.as_str());
    }

    pub fn events(&self) -> BoxStream<'static, AuthEvent> {
        self.channel
            .subscribe()
            .filter_map(|message| async move { AuthEvent::parse(&message) })
            .boxed()
    }
}

// ============================================================================
// In-process implementation
// ============================================================================

type Envelope = (u64, String);

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    next_id: AtomicU64,
}

/// Registry of named channels shared by the "tabs" of one process.
#[derive(Clone, Default)]
pub struct LocalBroadcastHub {
    inner: Arc<HubInner>,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new handle on `name`, as one tab would.
    pub fn open(&self, name: &str) -> LocalBroadcastChannel {
        let tx = {
            let mut channels = self
                .inner
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels
                .entry(name.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .clone()
        };
        LocalBroadcastChannel {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }
}

pub struct LocalBroadcastChannel {
    id: u64,
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastChannel for LocalBroadcastChannel {
    fn post_message(&self, message: &str) {
        // No other subscribers is not an error.
        let _ = self.tx.send((self.id, message.to_string()));
    }

    fn subscribe(&self) -> BoxStream<'static, String> {
        let own_id = self.id;
        stream::unfold(self.tx.subscribe(), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok((origin, message)) if origin != own_id => return Some((message, rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broadcast subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

// ============================================================================
// Cross-process implementation
// ============================================================================

/// How often file subscribers look for new messages
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Past this size the next post starts the file over
const MAX_CHANNEL_FILE_BYTES: u64 = 64 * 1024;

static NEXT_FILE_HANDLE: AtomicU64 = AtomicU64::new(0);

/// One JSON line in the channel file.
#[derive(Debug, Serialize, Deserialize)]
struct FileEnvelope {
    origin: String,
    message: String,
}

/// Channel shared by separate processes through an append-only JSON-lines file.
///
/// Subscribers poll the file and see only messages appended after they
/// subscribed. Each handle gets its own origin, so a handle never receives
/// its own posts.
pub struct FileBroadcastChannel {
    path: PathBuf,
    origin: String,
    poll_interval: Duration,
}

impl FileBroadcastChannel {
    pub fn open(path: PathBuf) -> Self {
        Self {
            path,
            origin: format!(
                "{}-{}",
                std::process::id(),
                NEXT_FILE_HANDLE.fetch_add(1, Ordering::Relaxed)
            ),
            poll_interval: FILE_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn append(&self, message: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let oversized = std::fs::metadata(&self.path)
            .map(|meta| meta.len() > MAX_CHANNEL_FILE_BYTES)
            .unwrap_or(false);
        if oversized {
            debug!(path = %self.path.display(), "Starting channel file over");
            File::create(&self.path)?;
        }

        let mut line = serde_json::to_string(&FileEnvelope {
            origin: self.origin.clone(),
            message: message.to_string(),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl BroadcastChannel for FileBroadcastChannel {
    fn post_message(&self, message: &str) {
        if let Err(e) = self.append(message) {
            warn!(error = %e, path = %self.path.display(), "Failed to post to channel file");
        }
    }

    fn subscribe(&self) -> BoxStream<'static, String> {
        let cursor = FileCursor {
            offset: std::fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0),
            path: self.path.clone(),
            origin: self.origin.clone(),
            pending: VecDeque::new(),
        };
        let poll_interval = self.poll_interval;

        stream::unfold(
            (cursor, None::<Interval>),
            move |(mut cursor, mut ticker)| async move {
                loop {
                    if let Some(message) = cursor.pending.pop_front() {
                        return Some((message, (cursor, ticker)));
                    }
                    ticker
                        .get_or_insert_with(|| {
                            let mut interval = tokio::time::interval(poll_interval);
                            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            interval
                        })
                        .tick()
                        .await;
                    if let Err(e) = cursor.read_new() {
                        warn!(error = %e, path = %cursor.path.display(), "Failed to read channel file");
                    }
                }
            },
        )
        .boxed()
    }
}

/// Read position of one subscriber in the channel file.
struct FileCursor {
    path: PathBuf,
    origin: String,
    offset: u64,
    pending: VecDeque<String>,
}

impl FileCursor {
    /// Queue the complete lines appended since the last read.
    fn read_new(&mut self) -> io::Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.offset = 0;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "Channel file started over");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.take(len - self.offset).read_to_end(&mut buf)?;

        // a line still being written is picked up on the next read
        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        self.offset += (end + 1) as u64;

        for line in buf[..end].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<FileEnvelope>(line) {
                Ok(envelope) if envelope.origin != self.origin => {
                    self.pending.push_back(envelope.message)
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping malformed channel line"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    /// Long enough for a handful of polls on a busy machine
    const WAIT: Duration = Duration::from_secs(5);

    fn temp_channel(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "authsync-channel-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("auth.channel")
    }

    fn fast(path: &PathBuf) -> FileBroadcastChannel {
        FileBroadcastChannel::open(path.clone()).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_event_strings() {
        assert_eq!(AuthEvent::SignIn.as_str(), "signIn");
        assert_eq!(AuthEvent::SignOut.as_str(), "signOut");
        assert_eq!(AuthEvent::parse("signOut"), Some(AuthEvent::SignOut));
        assert_eq!(AuthEvent::parse("signIn"), Some(AuthEvent::SignIn));
        assert_eq!(AuthEvent::parse("signout"), None);
        assert_eq!(AuthEvent::parse(""), None);
    }

    #[tokio::test]
    async fn test_other_tabs_receive_but_sender_does_not() {
        let hub = LocalBroadcastHub::new();
        let tab_a = hub.open("auth");
        let tab_b = hub.open("auth");

        let mut a_rx = tab_a.subscribe();
        let mut b_rx = tab_b.subscribe();

        tab_a.post_message("signOut");
        tab_b.post_message("signIn");

        assert_eq!(b_rx.next().await.as_deref(), Some("signOut"));
        // tab A skips its own "signOut" and sees B's message
        assert_eq!(a_rx.next().await.as_deref(), Some("signIn"));
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_name() {
        let hub = LocalBroadcastHub::new();
        let auth = hub.open("auth");
        let other = hub.open("other");
        let listener = hub.open("auth");

        let mut rx = listener.subscribe();
        other.post_message("signOut");
        auth.post_message("signIn");

        assert_eq!(rx.next().await.as_deref(), Some("signIn"));
    }

    #[tokio::test]
    async fn test_notifier_ignores_unknown_messages() {
        let hub = LocalBroadcastHub::new();
        let sender = hub.open("auth");
        let notifier = AuthNotifier::new(Arc::new(hub.open("auth")));

        let mut events = notifier.events();
        sender.post_message("hello");
        sender.post_message("signOut");

        assert_eq!(events.next().await, Some(AuthEvent::SignOut));
    }

    #[tokio::test]
    async fn test_file_channel_reaches_other_handles_only() {
        let path = temp_channel("deliver");
        let tab_a = fast(&path);
        let tab_b = fast(&path);

        // posted before anyone subscribed
        tab_a.post_message("signIn");

        let mut a_rx = tab_a.subscribe();
        let mut b_rx = tab_b.subscribe();
        tab_a.post_message("signOut");
        tab_b.post_message("signIn");

        assert_eq!(timeout(WAIT, b_rx.next()).await.unwrap().as_deref(), Some("signOut"));
        assert_eq!(timeout(WAIT, a_rx.next()).await.unwrap().as_deref(), Some("signIn"));
        assert!(timeout(Duration::from_millis(50), b_rx.next()).await.is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_channel_skips_garbage_and_follows_restart() {
        let path = temp_channel("restart");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x".repeat(100) + "\n").unwrap();
        let sender = fast(&path);
        let listener = fast(&path);
        let mut rx = listener.subscribe();

        // file starts over shorter than the subscriber's position
        std::fs::write(&path, "not json\n").unwrap();
        sender.post_message("signOut");

        assert_eq!(timeout(WAIT, rx.next()).await.unwrap().as_deref(), Some("signOut"));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_channel_starts_over_when_oversized() {
        let path = temp_channel("oversized");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![b'\n'; MAX_CHANNEL_FILE_BYTES as usize + 1]).unwrap();

        fast(&path).post_message("signIn");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"message\":\"signIn\""));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_sessions_in_separate_handles_see_sign_out() {
        let path = temp_channel("notifier");
        let publisher = AuthNotifier::new(Arc::new(fast(&path)));
        let listener = AuthNotifier::new(Arc::new(fast(&path)));
        let mut events = listener.events();

        publisher.publish(AuthEvent::SignOut);

        assert_eq!(timeout(WAIT, events.next()).await.unwrap(), Some(AuthEvent::SignOut));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
