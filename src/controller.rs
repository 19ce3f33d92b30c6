//! # Session Controller
//!
//! ## Responsibility
//! Own the lifecycle of one question/answer exchange at a time: validate a
//! submission, open the `/api/process` stream, apply decoded events to the
//! session and the view, and finalize the conversation history.
//!
//! ## Guarantees
//! - At most one active session. A second submission while one is active is
//!   rejected before any request is issued.
//! - `stop()` is idempotent: it cancels the transport at most once per session
//!   and always leaves the session `Cancelled`.
//! - Every event application happens under the controller lock, so it is
//!   atomic relative to `stop()`. Events arriving for a stopped session are
//!   dropped.
//!
//! ## NOT Responsible For
//! - Frame decoding (see [`crate::reassembler`])
//! - Terminal output (see [`crate::render`])

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{dispatch, Effect, EventKind, ProgressNote};
use crate::error::{ClientError, Result, ValidationError};
use crate::i18n::{self, Lang};
use crate::protocol::{ModelId, ProcessRequest, ReviewDetail};
use crate::reassembler::{event_stream, ByteStream};
use crate::session::{
    now_ms, Affordance, Answer, ConversationHistory, Session, SessionOutcome, SessionReport,
    SessionState, Transcript, Turn,
};

/// Opens the streaming body of `POST /api/process`.
///
/// Resolves once response headers arrive with a success status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_process_stream(&self, request: &ProcessRequest) -> Result<ByteStream>;
}

/// Side effects of a session on whatever displays it.
///
/// Called with the controller lock held; implementations must not call back
/// into the controller.
pub trait SessionView: Send + Sync {
    fn set_busy(&self, busy: bool);
    fn show_pending(&self, text: &str);
    fn show_progress(&self, _note: &ProgressNote) {}
    fn show_answer(&self, answer: &str, affordances: &[Affordance]);
    fn show_error(&self, message: &str);
    fn show_stop_marker(&self, text: &str);
}

/// View that discards everything. Useful for scripted callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl SessionView for NullView {
    fn set_busy(&self, _busy: bool) {}
    fn show_pending(&self, _text: &str) {}
    fn show_answer(&self, _answer: &str, _affordances: &[Affordance]) {}
    fn show_error(&self, _message: &str) {}
    fn show_stop_marker(&self, _text: &str) {}
}

/// The single stop handle of the running session.
struct ActiveSlot {
    session_id: String,
    token: CancellationToken,
}

struct Inner {
    history: ConversationHistory,
    transcript: Transcript,
    active: Option<ActiveSlot>,
    session: Option<Session>,
    peer_review: bool,
    lang: Lang,
}

impl Inner {
    fn is_wanted(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.session_id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }
}

/// Drives sessions against a [`Transport`] and reports to a [`SessionView`].
///
/// Cheap to clone; clones share state, so a signal handler can hold one and
/// call [`SessionController::stop`] while another task awaits `submit`.
#[derive(Clone)]
pub struct SessionController {
    transport: Arc<dyn Transport>,
    view: Arc<dyn SessionView>,
    inner: Arc<Mutex<Inner>>,
    cancellations: Arc<AtomicUsize>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>, view: Arc<dyn SessionView>) -> Self {
        Self {
            transport,
            view,
            inner: Arc::new(Mutex::new(Inner {
                history: ConversationHistory::new(),
                transcript: Transcript::default(),
                active: None,
                session: None,
                peer_review: true,
                lang: Lang::default(),
            })),
            cancellations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_language(self, lang: Lang) -> Self {
        self.lock().lang = lang;
        self
    }

    /// When off, only the first selected model is sent.
    pub fn with_peer_review(self, enabled: bool) -> Self {
        self.lock().peer_review = enabled;
        self
    }

    pub fn set_language(&self, lang: Lang) {
        self.lock().lang = lang;
    }

    pub fn set_peer_review(&self, enabled: bool) {
        self.lock().peer_review = enabled;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and run one exchange to its end.
    ///
    /// Validation failures and a busy controller return `Err` without any
    /// request. Everything after that is reported through the outcome.
    pub async fn submit(
        &self,
        question: &str,
        models: Vec<String>,
        ocr_text: Option<String>,
    ) -> Result<SessionReport> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion.into());
        }
        if models.is_empty() {
            return Err(ValidationError::NoModelsSelected.into());
        }
        for model in &models {
            ModelId::parse(model)?;
        }
        let ocr_text = ocr_text.filter(|t| !t.trim().is_empty());

        let (request, token, id) = {
            let mut inner = self.lock();
            if inner.active.is_some() {
                return Err(ValidationError::SessionActive.into());
            }

            let mut models = models;
            if !inner.peer_review {
                models.truncate(1);
            }

            let mut session = Session::new(question, models.clone(), ocr_text.clone());
            session.advance(SessionState::Connecting);
            session.pending_text = i18n::t(inner.lang, "connecting");

            inner.history.push_user(question);
            let request = ProcessRequest {
                question: question.to_string(),
                selected_models: models.clone(),
                history: inner.history.prior_context(),
                ocr_text: ocr_text.clone(),
            };
            inner.transcript.push(Turn {
                question: question.to_string(),
                models,
                ocr_text,
                answer: Answer::Pending(session.pending_text.clone()),
                asked_at_ms: now_ms(),
                answered_at_ms: None,
            });

            let token = CancellationToken::new();
            let id = session.id.clone();
            inner.active = Some(ActiveSlot {
                session_id: id.clone(),
                token: token.clone(),
            });
            self.view.set_busy(true);
            self.view.show_pending(&session.pending_text);
            info!(session = %id, models = session.models.len(), "session connecting");
            inner.session = Some(session);
            (request, token, id)
        };

        let outcome = self.drive(&request, &token, &id).await;
        Ok(self.finalize(&id, outcome))
    }

    /// Read loop. Returns the raw result; `finalize` decides what sticks.
    async fn drive(
        &self,
        request: &ProcessRequest,
        token: &CancellationToken,
        id: &str,
    ) -> SessionOutcome {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return SessionOutcome::Cancelled,
            opened = self.transport.open_process_stream(request) => opened,
        };
        let body = match opened {
            Ok(body) => body,
            Err(e) => return SessionOutcome::Failed(e),
        };

        {
            let mut inner = self.lock();
            if !inner.is_wanted(id) {
                return SessionOutcome::Cancelled;
            }
            if let Some(session) = inner.session_mut(id) {
                session.advance(SessionState::Streaming);
            }
            info!(session = %id, "session streaming");
        }

        let mut events = event_stream(body);
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return SessionOutcome::Cancelled,
                next = events.next() => next,
            };
            let event = match next {
                None => break,
                Some(Err(e)) => {
                    let inner = self.lock();
                    let completed = inner
                        .session
                        .as_ref()
                        .is_some_and(|s| s.id == id && s.state == SessionState::Completed);
                    if completed {
                        warn!(session = %id, error = %e, "stream broke after final result");
                        break;
                    }
                    return SessionOutcome::Failed(e);
                }
                Some(Ok(event)) => event,
            };

            let kind = EventKind::of(&event);
            let effect = dispatch(event);
            debug!(session = %id, ?kind, "applying event");

            let mut guard = self.lock();
            if !guard.is_wanted(id) {
                debug!(session = %id, "dropping event for stopped session");
                return SessionOutcome::Cancelled;
            }
            let inner = &mut *guard;
            let Some(session) = inner.session.as_mut().filter(|s| s.id == id) else {
                return SessionOutcome::Cancelled;
            };
            let was_completed = session.state == SessionState::Completed;
            let is_status = matches!(effect, Effect::Status(_));

            if let Effect::Progress(note) = &effect {
                self.view.show_progress(note);
            }
            if let Effect::Fail(message) = &effect {
                if was_completed {
                    warn!(session = %id, %message, "backend error after final result ignored");
                    continue;
                }
                let message = message.clone();
                session.apply(effect);
                return SessionOutcome::Failed(ClientError::Backend(message));
            }
            session.apply(effect);

            if is_status {
                let text = session.pending_text.clone();
                if let Some(turn) = inner.transcript.last_mut() {
                    if matches!(turn.answer, Answer::Pending(_)) {
                        turn.answer = Answer::Pending(text.clone());
                    }
                }
                self.view.show_pending(&text);
            } else if !was_completed && session.state == SessionState::Completed {
                info!(session = %id, details = session.details.len(), "final result received");
            }
        }

        let inner = self.lock();
        match inner.session.as_ref().filter(|s| s.id == id) {
            Some(session) if session.state == SessionState::Completed => {
                SessionOutcome::Completed {
                    answer: session.final_answer.clone().unwrap_or_default(),
                    details: session.details.clone(),
                }
            }
            Some(_) => SessionOutcome::Failed(ClientError::IncompleteStream),
            None => SessionOutcome::Cancelled,
        }
    }

    /// Apply the end of a session to history, transcript and view.
    fn finalize(&self, id: &str, outcome: SessionOutcome) -> SessionReport {
        let mut inner = self.lock();

        // Stopped while the loop was winding down: stop() already did the work.
        let outcome = if inner.is_wanted(id) {
            inner.active = None;
            outcome
        } else {
            SessionOutcome::Cancelled
        };

        let lang = inner.lang;
        match &outcome {
            SessionOutcome::Completed { answer, details } => {
                inner.history.push_assistant(answer.clone());
                let mut affordances = Vec::new();
                if let Some(turn) = inner.transcript.last_mut() {
                    turn.answer = Answer::Answered {
                        text: answer.clone(),
                        details: details.clone(),
                    };
                    turn.answered_at_ms = Some(now_ms());
                    affordances = turn.affordances();
                }
                self.view.show_answer(answer, &affordances);
                self.view.set_busy(false);
                info!(session = %id, "session completed");
            }
            SessionOutcome::Failed(e) => {
                if let Some(session) = inner.session_mut(id) {
                    session.advance(SessionState::Failed);
                }
                let message = i18n::tf(lang, "errorPrefix", &[("message", e.to_string().as_str())]);
                if let Some(turn) = inner.transcript.last_mut() {
                    turn.answer = Answer::Error(e.to_string());
                }
                self.view.show_error(&message);
                self.view.set_busy(false);
                warn!(session = %id, error = %e, "session failed");
            }
            SessionOutcome::Cancelled => {
                info!(session = %id, "session cancelled");
            }
        }

        let session = inner.session.clone().filter(|s| s.id == id);
        SessionReport { session, outcome }
    }

    /// Stop the running generation. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        let Some(slot) = inner.active.take() else {
            debug!("stop requested with no active session");
            return false;
        };
        slot.token.cancel();
        self.cancellations.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = inner.session_mut(&slot.session_id) {
            session.force_cancelled();
        }
        if let Some(turn) = inner.transcript.last_mut() {
            turn.answer = Answer::Stopped;
        }
        self.view.set_busy(false);
        self.view.show_stop_marker(&i18n::t(inner.lang, "stopped"));
        info!(session = %slot.session_id, "stop requested");
        true
    }

    /// Number of transport cancellations issued so far.
    pub fn cancellations_issued(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Discard the last answered exchange and ask the same question again.
    pub async fn regenerate(&self) -> Result<SessionReport> {
        let (question, models, ocr_text) = {
            let mut inner = self.lock();
            if inner.active.is_some() {
                return Err(ValidationError::SessionActive.into());
            }
            let Some(turn) = inner.transcript.last() else {
                return Err(ValidationError::NothingToRegenerate.into());
            };
            if !matches!(turn.answer, Answer::Answered { .. }) {
                return Err(ValidationError::NothingToRegenerate.into());
            }
            let turn = inner
                .transcript
                .pop()
                .ok_or(ValidationError::NothingToRegenerate)?;
            inner.history.pop_exchange();
            (turn.question, turn.models, turn.ocr_text)
        };
        debug!(question = %question, "regenerating");
        self.submit(&question, models, ocr_text).await
    }

    /// Stop anything running and forget the conversation.
    pub fn clear(&self) {
        self.stop();
        let mut inner = self.lock();
        inner.history.clear();
        inner.transcript.clear();
        inner.session = None;
    }

    pub fn history(&self) -> ConversationHistory {
        self.lock().history.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    /// Snapshot of the current (or most recent) session.
    pub fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Review trace behind the answer of turn `index`, if it has one.
    pub fn details(&self, index: usize) -> Option<Vec<ReviewDetail>> {
        let inner = self.lock();
        let turn = inner.transcript.turns().get(index)?;
        let details = turn.details();
        (!details.is_empty()).then(|| details.to_vec())
    }

    /// Review trace of the most recent answered turn.
    pub fn last_details(&self) -> Option<Vec<ReviewDetail>> {
        let inner = self.lock();
        inner
            .transcript
            .turns()
            .iter()
            .rev()
            .find(|t| matches!(t.answer, Answer::Answered { .. }))
            .map(|t| t.details().to_vec())
            .filter(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Replays canned chunks; counts requests.
    struct CannedTransport {
        chunks: Vec<&'static str>,
        requests: AtomicUsize,
        last: Mutex<Option<ProcessRequest>>,
    }

    impl CannedTransport {
        fn new(chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                requests: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn open_process_stream(&self, request: &ProcessRequest) -> Result<ByteStream> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            let items: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    const STATUS: &str = "data: {\"type\":\"status\",\"data\":\"thinking\"}\n\n";
    const FINAL: &str =
        "data: {\"type\":\"final_result\",\"data\":{\"best_answer\":\"4\",\"process_details\":[]}}\n\n";

    fn models() -> Vec<String> {
        vec!["acme::m1".to_string(), "acme::m2".to_string()]
    }

    #[tokio::test]
    async fn test_completed_session_appends_history() {
        let transport = CannedTransport::new(vec![STATUS, FINAL]);
        let ctl = SessionController::new(transport.clone(), Arc::new(NullView));
        let report = ctl.submit("2+2?", models(), None).await.unwrap();
        assert!(matches!(report.outcome, SessionOutcome::Completed { ref answer, .. } if answer == "4"));
        assert_eq!(report.state(), SessionState::Completed);
        assert_eq!(report.session.map(|s| s.pending_text).as_deref(), Some("4"));
        let history = ctl.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].content, "4");
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn test_request_excludes_current_question_from_history() {
        let transport = CannedTransport::new(vec![FINAL]);
        let ctl = SessionController::new(transport.clone(), Arc::new(NullView));
        ctl.submit("first", models(), None).await.unwrap();
        ctl.submit("second", models(), Some("ocr".to_string())).await.unwrap();
        let req = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(req.question, "second");
        assert_eq!(req.history.len(), 2);
        assert_eq!(req.ocr_text.as_deref(), Some("ocr"));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_request() {
        let transport = CannedTransport::new(vec![FINAL]);
        let ctl = SessionController::new(transport.clone(), Arc::new(NullView));
        let err = ctl.submit("   ", models(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::EmptyQuestion)));
        let err = ctl.submit("q", vec![], None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::NoModelsSelected)));
        let err = ctl.submit("q", vec!["bad".to_string()], None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::InvalidModelId(_))));
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
        assert!(ctl.history().is_empty());
    }

    #[tokio::test]
    async fn test_peer_review_off_sends_first_model_only() {
        let transport = CannedTransport::new(vec![FINAL]);
        let ctl = SessionController::new(transport.clone(), Arc::new(NullView)).with_peer_review(false);
        ctl.submit("q", models(), None).await.unwrap();
        let req = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(req.selected_models, vec!["acme::m1".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_without_final_result_fails() {
        let transport = CannedTransport::new(vec![STATUS]);
        let ctl = SessionController::new(transport, Arc::new(NullView));
        let report = ctl.submit("q", models(), None).await.unwrap();
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed(ClientError::IncompleteStream)
        ));
        assert_eq!(ctl.history().len(), 1);
        assert!(matches!(
            ctl.transcript().last().unwrap().answer,
            Answer::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_backend_error_event_fails() {
        let transport =
            CannedTransport::new(vec!["data: {\"type\":\"error\",\"data\":\"no usable model\"}\n\n"]);
        let ctl = SessionController::new(transport, Arc::new(NullView));
        let report = ctl.submit("q", models(), None).await.unwrap();
        match &report.outcome {
            SessionOutcome::Failed(ClientError::Backend(msg)) => assert_eq!(msg, "no usable model"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let ctl = SessionController::new(CannedTransport::new(vec![]), Arc::new(NullView));
        assert!(!ctl.stop());
        assert_eq!(ctl.cancellations_issued(), 0);
    }

    #[tokio::test]
    async fn test_regenerate_requires_answer() {
        let ctl = SessionController::new(CannedTransport::new(vec![STATUS]), Arc::new(NullView));
        let err = ctl.regenerate().await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::NothingToRegenerate)));
        ctl.submit("q", models(), None).await.unwrap();
        assert!(ctl.regenerate().await.is_err());
    }

    #[tokio::test]
    async fn test_regenerate_replaces_last_exchange() {
        let transport = CannedTransport::new(vec![FINAL]);
        let ctl = SessionController::new(transport.clone(), Arc::new(NullView));
        ctl.submit("q", models(), Some("text".to_string())).await.unwrap();
        ctl.regenerate().await.unwrap();
        assert_eq!(ctl.history().len(), 2);
        assert_eq!(ctl.transcript().turns().len(), 1);
        assert_eq!(transport.requests.load(Ordering::SeqCst), 2);
        let req = transport.last.lock().unwrap().clone().unwrap();
        assert!(req.history.is_empty());
        assert_eq!(req.ocr_text.as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_clear_forgets_conversation() {
        let ctl = SessionController::new(CannedTransport::new(vec![FINAL]), Arc::new(NullView));
        ctl.submit("q", models(), None).await.unwrap();
        ctl.clear();
        assert!(ctl.history().is_empty());
        assert!(ctl.transcript().turns().is_empty());
        assert!(ctl.current_session().is_none());
    }
}
