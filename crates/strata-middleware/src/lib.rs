//! `strata-middleware` – the per-frame event fan-out.
//!
//! Carries read-only views of finalised frames from the pipeline to optional
//! subscribers (annotation export, live viewers) without caring about the
//! data's meaning.  Subscribers can never write back into pipeline state.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
