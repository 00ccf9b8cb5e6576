pub mod export;
pub mod get;
pub mod import;
pub mod put;
pub mod rm;
pub mod space;

/// Store used when `--store` is not given.
pub const DEFAULT_STORE: &str = "default";

/// Ensure a file-layer path starts with `/`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
