//! Client library for a multi-model "AI peer review" chat backend.
//!
//! A question is sent to several models; the backend has them critique and
//! revise each other's answers and streams progress plus a best answer back
//! as `data: <json>` frames. This crate decodes that stream
//! ([`reassembler`], [`dispatcher`]), drives one exchange at a time with
//! user-initiated cancellation ([`controller`]), talks to the rest of the
//! backend's REST surface ([`api`]), and keeps local preferences and chat
//! history ([`settings`], [`history`]).

pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod i18n;
pub mod protocol;
pub mod reassembler;
pub mod render;
pub mod session;
pub mod settings;
pub mod store;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use controller::{NullView, SessionController, SessionView, Transport};
pub use error::{ClientError, Result, ValidationError};
pub use reassembler::{event_stream, ByteStream, EventStream, FrameReassembler};
pub use session::{SessionOutcome, SessionReport, SessionState};
