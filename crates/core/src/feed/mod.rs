//! Feed navigation.
//!
//! The feed is advanced with a primary scroll gesture and a fallback key
//! press. Success is detected by comparing [`ItemSignature`]s captured before
//! and after the gesture, never by trusting the gesture itself.

mod config;
mod navigator;
mod signature;

pub use config::NavigatorConfig;
pub use navigator::FeedNavigator;
pub use signature::{capture_signature, ItemSignature, SIGNATURE_SCRIPT};
