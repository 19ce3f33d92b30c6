//! Session data model: one question/answer exchange, the conversation
//! history sent back to the backend, and the transcript shown to the user.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::dispatcher::{status_indicator, Effect, ProgressNote};
use crate::error::ClientError;
use crate::protocol::{ChatMessage, ReviewDetail, Role};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }

    /// Connecting or streaming: the session holds the stream handle.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }

    fn can_advance_to(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Idle, Connecting) => true,
            (Connecting, Streaming) => true,
            (Streaming, Completed) => true,
            (Connecting | Streaming, Cancelled) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One in-flight question/answer exchange.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub question: String,
    pub models: Vec<String>,
    pub ocr_text: Option<String>,
    pub state: SessionState,
    pub pending_text: String,
    pub final_answer: Option<String>,
    pub details: Vec<ReviewDetail>,
    pub progress: Vec<ProgressNote>,
    pub backend_error: Option<String>,
}

impl Session {
    pub fn new(question: impl Into<String>, models: Vec<String>, ocr_text: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            models,
            ocr_text,
            state: SessionState::Idle,
            pending_text: String::new(),
            final_answer: None,
            details: Vec::new(),
            progress: Vec::new(),
            backend_error: None,
        }
    }

    /// Move to `to` if the state machine allows it. Terminal states never change.
    pub fn advance(&mut self, to: SessionState) -> bool {
        if self.state.can_advance_to(to) {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Stop overrides everything, including a completion still draining.
    pub fn force_cancelled(&mut self) {
        if self.state != SessionState::Idle {
            self.state = SessionState::Cancelled;
        }
    }

    /// Apply one dispatcher effect in arrival order.
    pub fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Status(text) => self.pending_text = status_indicator(&text),
            Effect::Complete { answer, details } => {
                self.pending_text = answer.clone();
                self.final_answer = Some(answer);
                self.details = details;
                self.advance(SessionState::Completed);
            }
            Effect::Fail(message) => {
                self.backend_error = Some(message);
                self.advance(SessionState::Failed);
            }
            Effect::Progress(note) => self.progress.push(note),
            Effect::Ignore => {}
        }
    }
}

/// How the read loop ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        answer: String,
        details: Vec<ReviewDetail>,
    },
    Cancelled,
    Failed(ClientError),
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed { .. } => SessionState::Completed,
            SessionOutcome::Cancelled => SessionState::Cancelled,
            SessionOutcome::Failed(_) => SessionState::Failed,
        }
    }
}

/// Final snapshot of a session together with its outcome.
///
/// `session` is `None` when the conversation was cleared before the
/// session finished.
#[derive(Debug)]
pub struct SessionReport {
    pub session: Option<Session>,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    /// State of the snapshot, or the state implied by the outcome when the
    /// session is gone.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or_else(|| self.outcome.state(), |s| s.state)
    }
}

// ---------------------------------------------------------------------------
// Conversation history
// ---------------------------------------------------------------------------

/// Messages sent back to the backend as context on each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Drop the last user/assistant pair. Returns false when fewer than two
    /// messages exist.
    pub fn pop_exchange(&mut self) -> bool {
        if self.messages.len() < 2 {
            return false;
        }
        self.messages.pop();
        self.messages.pop();
        true
    }

    /// Everything except the most recent message (the question being asked).
    pub fn prior_context(&self) -> Vec<ChatMessage> {
        match self.messages.split_last() {
            Some((_, rest)) => rest.to_vec(),
            None => Vec::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

// ---------------------------------------------------------------------------
// Transcript (view model)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Pending(String),
    Answered {
        text: String,
        details: Vec<ReviewDetail>,
    },
    Stopped,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    ViewDetails,
    Regenerate,
}

/// One rendered user turn and the assistant slot below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub question: String,
    pub models: Vec<String>,
    pub ocr_text: Option<String>,
    pub answer: Answer,
    pub asked_at_ms: u64,
    pub answered_at_ms: Option<u64>,
}

impl Turn {
    pub fn affordances(&self) -> Vec<Affordance> {
        match &self.answer {
            Answer::Answered { details, .. } if !details.is_empty() => {
                vec![Affordance::ViewDetails, Affordance::Regenerate]
            }
            _ => Vec::new(),
        }
    }

    pub fn details(&self) -> &[ReviewDetail] {
        match &self.answer {
            Answer::Answered { details, .. } => details,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    pub fn pop(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Role/content/timestamp triples worth archiving: every question, and
    /// only answers that actually arrived.
    pub fn archivable(&self) -> Vec<(Role, String, u64)> {
        let mut out = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            out.push((Role::User, turn.question.clone(), turn.asked_at_ms));
            if let Answer::Answered { text, .. } = &turn.answer {
                out.push((
                    Role::Assistant,
                    text.clone(),
                    turn.answered_at_ms.unwrap_or(turn.asked_at_ms),
                ));
            }
        }
        out
    }
}

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> ReviewDetail {
        ReviewDetail {
            model_name: "p::m".to_string(),
            initial_answer: "a".to_string(),
            revised_answer: "b".to_string(),
            total_score: 9.5,
            critiques_received: vec![],
        }
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut s = Session::new("q", vec!["p::m".to_string()], None);
        assert!(s.advance(SessionState::Connecting));
        assert!(s.advance(SessionState::Streaming));
        assert!(s.advance(SessionState::Completed));
        assert!(s.state.is_terminal());
    }

    #[test]
    fn test_terminal_states_do_not_change() {
        let mut s = Session::new("q", vec!["p::m".to_string()], None);
        s.advance(SessionState::Connecting);
        s.advance(SessionState::Cancelled);
        assert!(!s.advance(SessionState::Failed));
        assert!(!s.advance(SessionState::Streaming));
        assert_eq!(s.state, SessionState::Cancelled);
    }

    #[test]
    fn test_idle_cannot_skip_to_streaming() {
        let mut s = Session::new("q", vec![], None);
        assert!(!s.advance(SessionState::Streaming));
        assert!(!s.advance(SessionState::Cancelled));
        assert!(s.advance(SessionState::Failed));
    }

    #[test]
    fn test_apply_status_then_complete() {
        let mut s = Session::new("q", vec![], None);
        s.advance(SessionState::Connecting);
        s.advance(SessionState::Streaming);
        s.apply(Effect::Status("thinking".to_string()));
        assert_eq!(s.pending_text, status_indicator("thinking"));
        s.apply(Effect::Complete {
            answer: "4".to_string(),
            details: vec![detail()],
        });
        assert_eq!(s.pending_text, "4");
        assert_eq!(s.final_answer.as_deref(), Some("4"));
        assert_eq!(s.details.len(), 1);
        assert_eq!(s.state, SessionState::Completed);
    }

    #[test]
    fn test_status_after_final_is_applied_as_received() {
        let mut s = Session::new("q", vec![], None);
        s.advance(SessionState::Connecting);
        s.advance(SessionState::Streaming);
        s.apply(Effect::Complete {
            answer: "4".to_string(),
            details: vec![],
        });
        s.apply(Effect::Status("late".to_string()));
        assert_eq!(s.pending_text, status_indicator("late"));
        assert_eq!(s.final_answer.as_deref(), Some("4"));
        assert_eq!(s.state, SessionState::Completed);
    }

    #[test]
    fn test_force_cancelled_overrides_completion() {
        let mut s = Session::new("q", vec![], None);
        s.advance(SessionState::Connecting);
        s.advance(SessionState::Streaming);
        s.apply(Effect::Complete {
            answer: "4".to_string(),
            details: vec![],
        });
        s.force_cancelled();
        assert_eq!(s.state, SessionState::Cancelled);
    }

    #[test]
    fn test_apply_fail_sets_failed() {
        let mut s = Session::new("q", vec![], None);
        s.advance(SessionState::Connecting);
        s.apply(Effect::Fail("no models".to_string()));
        assert_eq!(s.state, SessionState::Failed);
        assert_eq!(s.backend_error.as_deref(), Some("no models"));
    }

    #[test]
    fn test_history_prior_context_excludes_last() {
        let mut h = ConversationHistory::new();
        h.push_user("one");
        h.push_assistant("two");
        h.push_user("three");
        let ctx = h.prior_context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[1].content, "two");
    }

    #[test]
    fn test_history_pop_exchange() {
        let mut h = ConversationHistory::new();
        h.push_user("q");
        assert!(!h.pop_exchange());
        h.push_assistant("a");
        assert!(h.pop_exchange());
        assert!(h.is_empty());
    }

    #[test]
    fn test_affordances_only_with_details() {
        let mut turn = Turn {
            question: "q".to_string(),
            models: vec![],
            ocr_text: None,
            answer: Answer::Answered {
                text: "a".to_string(),
                details: vec![],
            },
            asked_at_ms: 1,
            answered_at_ms: Some(2),
        };
        assert!(turn.affordances().is_empty());
        turn.answer = Answer::Answered {
            text: "a".to_string(),
            details: vec![detail()],
        };
        assert_eq!(
            turn.affordances(),
            vec![Affordance::ViewDetails, Affordance::Regenerate]
        );
    }

    #[test]
    fn test_transcript_archivable_skips_unanswered() {
        let mut t = Transcript::default();
        t.push(Turn {
            question: "first".to_string(),
            models: vec![],
            ocr_text: None,
            answer: Answer::Stopped,
            asked_at_ms: 10,
            answered_at_ms: None,
        });
        t.push(Turn {
            question: "second".to_string(),
            models: vec![],
            ocr_text: None,
            answer: Answer::Answered {
                text: "ok".to_string(),
                details: vec![],
            },
            asked_at_ms: 20,
            answered_at_ms: Some(30),
        });
        let msgs = t.archivable();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2], (Role::Assistant, "ok".to_string(), 30));
    }

    #[test]
    fn test_now_ms_is_reasonable() {
        assert!(now_ms() > 1_700_000_000_000);
    }
}
