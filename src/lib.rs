#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod publish;
pub mod retry;
pub mod sandbox;
pub mod source;
pub mod util;

pub use config::Config;
pub use error::{PipewrightError, Result};
pub use publish::{UploadResult, Uploader};
pub use sandbox::{ExecutionOutcome, SandboxSpec};
