pub mod classify;
pub mod core;
pub mod types;

// Re-export main types for easier access
pub use classify::{FileClassifier, extension_label};
pub use core::Scanner;
pub use types::{ExtensionFilter, FileCategory, ScanMode, ScanResult, ScanStats, ScannerConfig};
