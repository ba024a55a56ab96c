pub mod window;

// Re-exports for convenience
pub use window::{RollingWindow, WindowStats};
