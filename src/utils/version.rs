//! Build version

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `pytr/<version>`, as printed in startup logs
pub fn product_token() -> String {
    format!("pytr/{}", VERSION)
}
