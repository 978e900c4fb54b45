//! Multi-person pose tracking and gesture triggers for camera-driven
//! interfaces.

pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod gestures;
pub mod ipc;
pub mod lobby;
pub mod pipeline;
pub mod pose;
pub mod score;
pub mod slots;
pub mod smoothing;
pub mod source;
pub mod swipe;
pub mod tracker;

pub use config::Profile;
pub use engine::{EngineStatus, PoseEngine};
pub use error::{EngineError, SchemaError, SourceError};
pub use pipeline::{FrameState, Pipeline, UiEvent};
pub use source::{JsonLinesSource, PoseSource, RawFrame};
