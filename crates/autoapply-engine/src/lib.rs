pub mod apply;
pub mod backend;
pub mod config;
pub mod control;
pub mod discovery;
pub mod dom;
pub mod llm;
pub mod matcher;
pub mod orchestrator;
pub mod poll;
pub mod progress;
pub mod signin;
pub mod site;
pub mod store;

pub use autoapply_common::model;
pub use autoapply_common::protocol;

pub use control::{ControlError, ControlFlags, SESSION_LIST_LIMIT, SessionManager};
pub use orchestrator::{RunOutcome, SessionError, SessionRunner};
