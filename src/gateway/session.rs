use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::events;
use super::resume::ResumeBuffer;

/// Protocol state of a connection.
///
/// `Connecting`/`HelloSent`/`Authenticating` cover the pre-session handshake
/// and live in the socket handler; once IDENTIFY or RESUME succeeds the
/// `Session` tracks `Ready`, `Closing` (detached, resumable inside the grace
/// window) and `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HelloSent,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

/// Frames handed to a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close { code: u16, reason: &'static str },
}

/// Why a RESUME attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeError {
    /// The acknowledged sequence fell out of the retained buffer, or claims
    /// frames that were never sent.
    OutOfWindow,
    /// The session is already closed.
    Closed,
}

struct SessionWindow {
    state: SessionState,
    last_seq: u64,
    resume: ResumeBuffer,
    tx: Option<mpsc::UnboundedSender<Outbound>>,
    grace_deadline: Option<Instant>,
}

/// One authenticated gateway session.
///
/// Sequence assignment, resume-buffer append, and writer enqueue happen under
/// one lock, so each connection observes a total order with no gaps even when
/// publishers race.
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    window: Mutex<SessionWindow>,
}

impl Session {
    pub fn new(
        session_id: String,
        user_id: String,
        buffer_capacity: usize,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            window: Mutex::new(SessionWindow {
                state: SessionState::Ready,
                last_seq: 0,
                resume: ResumeBuffer::new(buffer_capacity),
                tx: Some(tx),
                grace_deadline: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.window.lock().unwrap().state
    }

    pub fn last_seq(&self) -> u64 {
        self.window.lock().unwrap().last_seq
    }

    /// Sequence, buffer, and deliver one dispatch. Detached sessions still
    /// sequence and buffer so the frame can be replayed on RESUME.
    pub fn push_event(&self, event_type: &str, data: &Value) -> u64 {
        let mut window = self.window.lock().unwrap();
        if window.state == SessionState::Closed {
            return window.last_seq;
        }
        window.last_seq += 1;
        let seq = window.last_seq;
        let frame = events::dispatch(event_type, data, seq);
        window.resume.push(seq, frame.clone());
        if let Some(tx) = &window.tx {
            let _ = tx.send(Outbound::Frame(frame));
        }
        seq
    }

    /// Deliver a non-sequenced control frame (ack, reconnect, error). Dropped
    /// silently while detached.
    pub fn send_control(&self, frame: String) {
        let window = self.window.lock().unwrap();
        if let Some(tx) = &window.tx {
            let _ = tx.send(Outbound::Frame(frame));
        }
    }

    /// Ask the writer to close the socket with `code`, then detach.
    pub fn close_with(&self, code: u16, reason: &'static str, grace: Duration) {
        let mut window = self.window.lock().unwrap();
        if let Some(tx) = &window.tx {
            let _ = tx.send(Outbound::Close { code, reason });
        }
        window.tx = None;
        window.state = SessionState::Closing;
        window.grace_deadline = Some(Instant::now() + grace);
    }

    /// Transport gone: stop delivering, keep sequencing into the buffer, and
    /// start the resume grace window.
    pub fn detach(&self, grace: Duration) {
        let mut window = self.window.lock().unwrap();
        if window.state == SessionState::Closed {
            return;
        }
        window.tx = None;
        window.state = SessionState::Closing;
        window.grace_deadline = Some(Instant::now() + grace);
    }

    /// Like `detach`, but only when `tx` is still the bound transport. A
    /// handler whose session was already resumed over a newer socket must
    /// not tear that one down.
    pub fn detach_transport(&self, tx: &mpsc::UnboundedSender<Outbound>, grace: Duration) {
        let mut window = self.window.lock().unwrap();
        if window.state == SessionState::Closed {
            return;
        }
        if window.tx.as_ref().is_some_and(|bound| !bound.same_channel(tx)) {
            return;
        }
        window.tx = None;
        window.state = SessionState::Closing;
        window.grace_deadline = Some(Instant::now() + grace);
    }

    /// Rebind a new transport, replaying every frame after `ack` first.
    /// Replay goes through the new writer before the session is visible to
    /// live dispatch again, so ordering is preserved end to end.
    pub fn resume(
        &self,
        ack: u64,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Result<usize, ResumeError> {
        let mut window = self.window.lock().unwrap();
        if window.state == SessionState::Closed {
            return Err(ResumeError::Closed);
        }
        if ack > window.last_seq {
            return Err(ResumeError::OutOfWindow);
        }
        if ack < window.last_seq {
            // Something was missed; it must still be fully retained.
            match window.resume.first_seq() {
                Some(first) if ack + 1 >= first => {}
                _ => return Err(ResumeError::OutOfWindow),
            }
        }

        let frames = window.resume.frames_after(ack);
        let replayed = frames.len();
        for frame in frames {
            let _ = tx.send(Outbound::Frame(frame));
        }
        window.tx = Some(tx);
        window.state = SessionState::Ready;
        window.grace_deadline = None;
        Ok(replayed)
    }

    /// Grace window ran out (reaper) or the server is shutting down.
    pub fn mark_closed(&self) {
        let mut window = self.window.lock().unwrap();
        window.tx = None;
        window.state = SessionState::Closed;
        window.grace_deadline = None;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        let window = self.window.lock().unwrap();
        window.state == SessionState::Closing
            && window.grace_deadline.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn session(capacity: usize) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Session::new("s1".into(), "u1".into(), capacity, tx),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Outbound::Frame(frame)) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    fn seq_of(frame: &str) -> u64 {
        serde_json::from_str::<serde_json::Value>(frame).unwrap()["s"]
            .as_u64()
            .unwrap()
    }

    #[test]
    fn sequences_are_strictly_increasing_without_gaps() {
        let (session, mut rx) = session(16);
        for i in 0..8 {
            session.push_event("message.create", &json!({ "n": i }));
        }
        let seqs: Vec<u64> = drain(&mut rx).iter().map(|f| seq_of(f)).collect();
        assert_eq!(seqs, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn resume_replays_exactly_the_missed_frames() {
        let (session, mut rx) = session(16);
        for i in 0..5 {
            session.push_event("message.create", &json!({ "n": i }));
        }
        drain(&mut rx);

        session.detach(Duration::from_secs(60));
        session.push_event("message.create", &json!({ "n": 5 }));
        session.push_event("message.create", &json!({ "n": 6 }));

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let replayed = session.resume(5, tx2).unwrap();
        assert_eq!(replayed, 2);
        let seqs: Vec<u64> = drain(&mut rx2).iter().map(|f| seq_of(f)).collect();
        assert_eq!(seqs, vec![6, 7]);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn resume_from_current_seq_replays_nothing() {
        let (session, mut rx) = session(16);
        session.push_event("message.create", &json!({}));
        drain(&mut rx);
        session.detach(Duration::from_secs(60));

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        assert_eq!(session.resume(1, tx2), Ok(0));
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn resume_older_than_buffer_is_rejected() {
        let (session, _rx) = session(2);
        for i in 0..6 {
            session.push_event("message.create", &json!({ "n": i }));
        }
        session.detach(Duration::from_secs(60));

        // Buffer retains seqs 5 and 6 only; acking 3 would leave a gap.
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert_eq!(session.resume(3, tx2), Err(ResumeError::OutOfWindow));

        let (tx3, _rx3) = mpsc::unbounded_channel();
        assert_eq!(session.resume(4, tx3), Ok(2));
    }

    #[test]
    fn resume_ahead_of_last_seq_is_rejected() {
        let (session, _rx) = session(16);
        session.push_event("message.create", &json!({}));
        session.detach(Duration::from_secs(60));

        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert_eq!(session.resume(9, tx2), Err(ResumeError::OutOfWindow));
    }

    #[test]
    fn closed_sessions_reject_resume_and_drop_events() {
        let (session, _rx) = session(16);
        session.push_event("message.create", &json!({}));
        session.mark_closed();

        assert_eq!(session.push_event("message.create", &json!({})), 1);
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert_eq!(session.resume(1, tx2), Err(ResumeError::Closed));
    }

    #[test]
    fn detached_session_expires_after_grace() {
        let (detached, _rx) = session(16);
        detached.detach(Duration::from_millis(0));
        assert!(detached.is_expired(Instant::now() + Duration::from_millis(1)));

        let (live, _rx2) = session(16);
        assert!(!live.is_expired(Instant::now()));
    }
}
