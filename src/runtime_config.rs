//! Environment-variable runtime configuration.
//!
//! ## Variables
//!
//! - `HAPIC_STACK_SIZE` - stack size for cooperative controller coroutines,
//!   decimal (`16384`) or hexadecimal (`0x4000`). Default: `0x4000` (16 KB).
//! - `HAPIC_DEBUG` - truthy values (`1`, `true`, `yes`, `on`) allow
//!   tracebacks in error payloads for contexts that delegate their debug
//!   flag here.

use std::env;

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for controller coroutines in bytes.
    pub stack_size: usize,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: 0x4000,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = env::var("HAPIC_STACK_SIZE")
            .ok()
            .and_then(|value| {
                if let Some(hex) = value.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).ok()
                } else {
                    value.parse().ok()
                }
            })
            .unwrap_or(0x4000);
        let debug = env::var("HAPIC_DEBUG")
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        RuntimeConfig { stack_size, debug }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.stack_size, 0x4000);
        assert!(!config.debug);
    }
}
