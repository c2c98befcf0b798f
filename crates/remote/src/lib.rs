//! `remote` crate: contracts for the engine's external collaborators.
//!
//! The engine never talks to a model provider, a job server or the prompt
//! library directly; it goes through [`RemoteExecutor`], [`PushChannel`] and
//! [`PromptLibrary`]. This crate holds those traits, their wire types, an
//! HTTP implementation (feature `http`) and test doubles.

pub mod error;
pub mod traits;
pub mod messages;
pub mod library;
pub mod mock;
#[cfg(feature = "http")]
pub mod http;

pub use error::RemoteError;
pub use traits::{PromptLibrary, PushChannel, RemoteExecutor};
pub use messages::{
    ChannelMessage, PushEvent, RemoteTaskStatus, StoredPrompt, SubmitRequest, SubmitResponse,
    TaskRequest,
};
pub use library::{InMemoryPromptLibrary, Unconfigured};
#[cfg(feature = "http")]
pub use http::HttpRemote;
