//! Shared infrastructure utilities for dcprobe.
//!
//! - **`atomic_write`**: crash-safe report persistence (temp + rename)
//! - **`security`**: secret redaction and control-character stripping

pub mod atomic_write;
pub mod security;

pub use atomic_write::atomic_write;
pub use security::{SecretRedactor, sanitize_display_text};
