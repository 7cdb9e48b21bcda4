//! Admission gate for untrusted score submissions.
//!
//! Every submission passes, in order, request deduplication, rate limiting,
//! session token authentication, score validation and behavioral checks (see
//! [`pipeline::AdmissionPipeline`]). Only admitted submissions may be handed to
//! a [`commit::Committer`].

pub mod behavior;
pub mod clock;
pub mod commit;
pub mod config;
pub mod content_hash;
pub mod dedup;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod session;
pub mod sweeper;
pub mod token;
pub mod validator;

pub use self::config::GateConfig;
pub use self::error::{GateError, RejectReason, Rejection, Stage, ValidationFailure};
pub use self::pipeline::{AdmissionPipeline, Decision, RequestContext, Submission};
