pub mod config;
pub mod core_cipher;
pub mod core_crypto;
pub mod core_group;
pub mod core_keys;
pub mod core_session;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
    }
}
