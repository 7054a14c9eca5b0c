//! Live-update multiplexer: one streaming connection subscribed to every
//! currently known conversation topic at once. Owns the connection state
//! machine and the reconnection policy; it never mutates sessions itself,
//! only feeds events back through the store's merge path.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::types::{parse_line, FeedEvent};
use crate::remote::gateway::GatewayClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Disconnected,
    Connecting,
    Connected,
}

/// External environment signals fed into the state machine. Both indicate
/// the previous disconnect was environmental, so the retry counter resets
/// and reconnection happens immediately, bypassing backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    VisibilityRegained,
    NetworkOnline,
}

#[derive(Debug)]
pub enum MuxCommand {
    /// Replace the subscribed topic set, most recently active first.
    /// Triggers an immediate reconnect.
    SetTopics(Vec<String>),
    Signal(ConnectivitySignal),
    Shutdown,
}

#[derive(Debug)]
pub enum MuxEvent {
    /// A message event arrived on the given topic.
    Message(String, FeedEvent),
    State(MuxState),
}

/// Exponential backoff for unexpected closes: 1s doubling to a 30s cap,
/// reset to zero on any successful open or environmental signal.
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempt: u32,
}

impl ReconnectPolicy {
    pub const INITIAL_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 30_000;

    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        // Clamp the shift so the doubling cannot overflow.
        let exp = self.attempt.min(15);
        let ms = (Self::INITIAL_DELAY_MS << exp).min(Self::MAX_DELAY_MS);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Command side of the multiplexer task.
#[derive(Clone)]
pub struct MuxHandle {
    tx: UnboundedSender<MuxCommand>,
}

impl MuxHandle {
    /// Create a handle plus the receiving end, without spawning the network
    /// task. The run loop and tests both build on this.
    pub fn channel() -> (Self, UnboundedReceiver<MuxCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn set_topics(&self, topics: Vec<String>) {
        let _ = self.tx.send(MuxCommand::SetTopics(topics));
    }

    pub fn signal(&self, signal: ConnectivitySignal) {
        let _ = self.tx.send(MuxCommand::Signal(signal));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(MuxCommand::Shutdown);
    }
}

/// Spawn the multiplexer task against the real gateway.
pub fn spawn(
    gateway: Arc<GatewayClient>,
    events: UnboundedSender<MuxEvent>,
    max_topics: usize,
) -> MuxHandle {
    let (handle, rx) = MuxHandle::channel();
    tokio::spawn(run(gateway, rx, events, max_topics));
    handle
}

/// Bound the subscribed set to the most recently active topics. The caller
/// passes topics already ordered most-recent-first.
pub fn cap_topics(topics: &[String], max: usize) -> Vec<String> {
    topics.iter().take(max.max(1)).cloned().collect()
}

enum StreamOutcome {
    /// Topic set changed; reconnect immediately, bypassing backoff.
    Resubscribe,
    /// Error or server close; schedule a retry.
    Retry,
    Shutdown,
}

fn set_state(events: &UnboundedSender<MuxEvent>, state: &mut MuxState, next: MuxState) {
    if *state != next {
        *state = next;
        let _ = events.send(MuxEvent::State(next));
    }
}

async fn run(
    gateway: Arc<GatewayClient>,
    mut cmd_rx: UnboundedReceiver<MuxCommand>,
    events: UnboundedSender<MuxEvent>,
    max_topics: usize,
) {
    let mut topics: Vec<String> = Vec::new();
    let mut policy = ReconnectPolicy::new();
    let mut state = MuxState::Disconnected;

    loop {
        // Coalesce queued commands before (re)connecting.
        loop {
            match cmd_rx.try_recv() {
                Ok(MuxCommand::SetTopics(t)) => {
                    topics = t;
                    policy.reset();
                }
                Ok(MuxCommand::Signal(_)) => policy.reset(),
                Ok(MuxCommand::Shutdown) => {
                    set_state(&events, &mut state, MuxState::Disconnected);
                    return;
                }
                Err(_) => break,
            }
        }

        if topics.is_empty() {
            set_state(&events, &mut state, MuxState::Disconnected);
            match cmd_rx.recv().await {
                Some(MuxCommand::SetTopics(t)) => {
                    topics = t;
                    policy.reset();
                }
                Some(MuxCommand::Signal(_)) => {}
                Some(MuxCommand::Shutdown) | None => return,
            }
            continue;
        }

        let capped = cap_topics(&topics, max_topics);
        set_state(&events, &mut state, MuxState::Connecting);

        // A command during connect aborts the attempt; the dropped future
        // closes the half-open connection before the next one opens.
        let connect = tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(MuxCommand::SetTopics(t)) => {
                        topics = t;
                        policy.reset();
                    }
                    Some(MuxCommand::Signal(_)) => policy.reset(),
                    Some(MuxCommand::Shutdown) | None => {
                        set_state(&events, &mut state, MuxState::Disconnected);
                        return;
                    }
                }
                continue;
            }
            res = gateway.open_stream(&capped) => res,
        };

        match connect {
            Ok(response) => {
                policy.reset();
                set_state(&events, &mut state, MuxState::Connected);
                info!(topics = capped.len(), "feed connection open");

                match read_stream(response, &mut cmd_rx, &events, &mut topics, &mut policy).await {
                    StreamOutcome::Shutdown => {
                        set_state(&events, &mut state, MuxState::Disconnected);
                        return;
                    }
                    StreamOutcome::Resubscribe => {
                        set_state(&events, &mut state, MuxState::Disconnected);
                        continue;
                    }
                    StreamOutcome::Retry => {}
                }
            }
            Err(e) => warn!(error = %e, "feed connection failed"),
        }

        set_state(&events, &mut state, MuxState::Disconnected);

        let delay = policy.next_delay();
        debug!(
            attempt = policy.attempt(),
            delay_ms = delay.as_millis() as u64,
            "scheduling feed reconnect"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(MuxCommand::SetTopics(t)) => {
                        topics = t;
                        policy.reset();
                        break;
                    }
                    Some(MuxCommand::Signal(_)) => {
                        policy.reset();
                        break;
                    }
                    Some(MuxCommand::Shutdown) | None => return,
                },
            }
        }
    }
}

async fn read_stream(
    response: reqwest::Response,
    cmd_rx: &mut UnboundedReceiver<MuxCommand>,
    events: &UnboundedSender<MuxEvent>,
    topics: &mut Vec<String>,
    policy: &mut ReconnectPolicy,
) -> StreamOutcome {
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(MuxCommand::SetTopics(t)) => {
                    *topics = t;
                    policy.reset();
                    return StreamOutcome::Resubscribe;
                }
                // Already connected; nothing to force.
                Some(MuxCommand::Signal(_)) => {}
                Some(MuxCommand::Shutdown) | None => return StreamOutcome::Shutdown,
            },
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    for line in drain_lines(&mut buf) {
                        let Some(event) = parse_line(&line) else { continue };
                        if !event.is_message() {
                            continue;
                        }
                        let topic = event.topic.clone();
                        if events.send(MuxEvent::Message(topic, event)).is_err() {
                            return StreamOutcome::Shutdown;
                        }
                    }
                    if clamp_partial(&mut buf, MAX_LINE_BYTES) {
                        warn!(limit = MAX_LINE_BYTES, "feed line over limit, discarding buffered partial");
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "feed stream error");
                    return StreamOutcome::Retry;
                }
                None => {
                    debug!("feed stream closed by server");
                    return StreamOutcome::Retry;
                }
            },
        }
    }
}

/// Upper bound on one buffered feed line. A partial line past this limit is
/// discarded so a gateway that never sends a newline cannot grow the buffer
/// without bound; the truncated tail then fails to parse and is dropped like
/// any other malformed line.
const MAX_LINE_BYTES: usize = 512 * 1024;

fn clamp_partial(buf: &mut Vec<u8>, max: usize) -> bool {
    if buf.len() > max {
        buf.clear();
        true
    } else {
        false
    }
}

/// Pull complete newline-terminated lines out of the chunk buffer, leaving
/// any trailing partial line in place.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
            .trim()
            .to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_doubles_to_cap() {
        let mut policy = ReconnectPolicy::new();
        let delays: Vec<u64> = (0..6).map(|_| policy.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);

        // Stays capped afterwards.
        assert_eq!(policy.next_delay().as_millis(), 30000);
    }

    #[test]
    fn test_backoff_resets_on_open() {
        let mut policy = ReconnectPolicy::new();
        for _ in 0..4 {
            policy.next_delay();
        }
        policy.reset();
        assert_eq!(policy.next_delay().as_millis(), 1000);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let mut policy = ReconnectPolicy::new();
        for _ in 0..1000 {
            assert!(policy.next_delay().as_millis() as u64 <= ReconnectPolicy::MAX_DELAY_MS);
        }
    }

    #[test]
    fn test_cap_topics_keeps_most_recent() {
        let topics: Vec<String> = (0..5).map(|i| format!("R-{i}")).collect();
        assert_eq!(cap_topics(&topics, 3), vec!["R-0", "R-1", "R-2"]);
        assert_eq!(cap_topics(&topics, 10).len(), 5);
        assert_eq!(cap_topics(&topics, 0).len(), 1, "cap of zero still carries one topic");
    }

    #[test]
    fn test_drain_lines_handles_partial_chunks() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"{\"a\":1}\n{\"b\":");
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}"]);
        buf.extend_from_slice(b"2}\n");
        assert_eq!(drain_lines(&mut buf), vec!["{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clamp_partial_discards_oversized_buffer() {
        let mut buf = vec![b'x'; 100];
        assert!(!clamp_partial(&mut buf, 100), "at the limit is kept");
        assert_eq!(buf.len(), 100);

        buf.push(b'x');
        assert!(clamp_partial(&mut buf, 100));
        assert!(buf.is_empty());

        // The truncated tail that arrives afterwards is just a malformed
        // line once its newline shows up.
        buf.extend_from_slice(b"ine-tail\"}\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert!(crate::feed::types::parse_line(&lines[0]).is_none());
    }

    #[test]
    fn test_drain_lines_skips_blank_and_crlf() {
        let mut buf = b"\r\n{\"a\":1}\r\n\n".to_vec();
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}"]);
    }

    #[tokio::test]
    async fn test_handle_channel_delivers_commands() {
        let (handle, mut rx) = MuxHandle::channel();
        handle.set_topics(vec!["R-1".to_string()]);
        handle.signal(ConnectivitySignal::NetworkOnline);
        handle.shutdown();

        assert!(matches!(rx.recv().await, Some(MuxCommand::SetTopics(t)) if t == ["R-1"]));
        assert!(matches!(
            rx.recv().await,
            Some(MuxCommand::Signal(ConnectivitySignal::NetworkOnline))
        ));
        assert!(matches!(rx.recv().await, Some(MuxCommand::Shutdown)));
    }
}
