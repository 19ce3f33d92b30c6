//! Maps decoded stream events to the effect they have on a session.
//!
//! The dispatcher is pure: it never touches the session or the view. The
//! controller applies the returned [`Effect`] in arrival order.

use crate::protocol::{ReviewDetail, StreamEvent};

/// Per-model progress reported between status updates.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressNote {
    InitialAnswer { model: String, chars: usize },
    Critique { critic: String, target: String, score: Option<f64> },
    Revision { model: String, chars: usize },
}

impl std::fmt::Display for ProgressNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressNote::InitialAnswer { model, chars } => {
                write!(f, "{model}: initial answer ({chars} chars)")
            }
            ProgressNote::Critique { critic, target, score: Some(s) } => {
                write!(f, "{critic} reviewed {target}: {s}/12")
            }
            ProgressNote::Critique { critic, target, score: None } => {
                write!(f, "{critic} reviewed {target}")
            }
            ProgressNote::Revision { model, chars } => {
                write!(f, "{model}: revised answer ({chars} chars)")
            }
        }
    }
}

/// What a single event does to the pending answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Replace the pending text with an in-progress indicator.
    Status(String),
    /// Record the best answer and review trace; the session is complete.
    Complete {
        answer: String,
        details: Vec<ReviewDetail>,
    },
    /// The backend gave up on this exchange.
    Fail(String),
    Progress(ProgressNote),
    /// Unknown event type; nothing to do.
    Ignore,
}

/// Which handler an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    FinalResult,
    Error,
    Progress,
    Unknown,
}

impl EventKind {
    pub fn of(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::Status { .. } => EventKind::Status,
            StreamEvent::FinalResult { .. } => EventKind::FinalResult,
            StreamEvent::Error { .. } => EventKind::Error,
            StreamEvent::InitialAnswerComplete { .. }
            | StreamEvent::CritiqueComplete { .. }
            | StreamEvent::RevisionComplete { .. } => EventKind::Progress,
            StreamEvent::Unknown => EventKind::Unknown,
        }
    }
}

/// Compute the effect of one event. Consumes the event to avoid cloning answers.
pub fn dispatch(event: StreamEvent) -> Effect {
    match event {
        StreamEvent::Status { data } => Effect::Status(data),
        StreamEvent::FinalResult { data } => Effect::Complete {
            answer: data.best_answer,
            details: data.process_details,
        },
        StreamEvent::Error { data } => Effect::Fail(data),
        StreamEvent::InitialAnswerComplete { model_name, answer } => {
            Effect::Progress(ProgressNote::InitialAnswer {
                model: model_name,
                chars: answer.chars().count(),
            })
        }
        StreamEvent::CritiqueComplete {
            critic_name,
            target_model,
            critique_data,
        } => Effect::Progress(ProgressNote::Critique {
            critic: critic_name,
            target: target_model,
            score: critique_data.map(|c| c.score),
        }),
        StreamEvent::RevisionComplete {
            model_name,
            revised_answer,
        } => Effect::Progress(ProgressNote::Revision {
            model: model_name,
            chars: revised_answer.chars().count(),
        }),
        StreamEvent::Unknown => Effect::Ignore,
    }
}

/// In-progress indicator rendering of a status line.
pub fn status_indicator(status: &str) -> String {
    format!("⋯ {status}")
}
