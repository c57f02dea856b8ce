//! `vigil-kernel` – Loop Detection & Supervision
//!
//! The supervisory brainstem of Vigil. It does not act; it watches the
//! agent's event history and tells the controller when the agent has stopped
//! making progress.
//!
//! # Modules
//!
//! - [`history`] – [`inspectable_tail`][history::inspectable_tail]:
//!   computes the slice of session history a stuck check is allowed to
//!   inspect, removing user messages and null scaffolding events and, in
//!   interactive mode, everything up to the last user message.
//! - [`stuck`] – [`StuckDetector`][stuck::StuckDetector]:
//!   a multi-pattern loop recognizer that evaluates six independent pattern
//!   checks over the filtered tail in a fixed order and reports the first
//!   match as a [`StuckAnalysis`][vigil_types::StuckAnalysis].

pub mod history;
pub mod stuck;

pub use history::inspectable_tail;
pub use stuck::StuckDetector;
