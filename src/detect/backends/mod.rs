pub mod motion;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::{MotionConfig, MotionDetector};
pub use scripted::ScriptedDetector;

#[cfg(feature = "backend-tract")]
pub use tract::{TractConfig, TractDetector};
