//! Bridge configuration and logging setup

use std::sync::Once;

/// What `rb_bug` does after the engine has reported the bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BugAction {
    /// Abort the process, like the reference engine.
    #[default]
    Abort,
    /// Unwind with `Abrupt::Bug` so an embedder can observe it.
    Unwind,
}

impl BugAction {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(BugAction::Abort),
            "unwind" => Some(BugAction::Unwind),
            _ => None,
        }
    }
}

/// Per-context bridge configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeConfig {
    pub bug_action: BugAction,
}

impl BridgeConfig {
    pub const BUG_ACTION_VAR: &'static str = "CEXT_BRIDGE_BUG_ACTION";

    /// Defaults overridden by `CEXT_BRIDGE_BUG_ACTION`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(Self::BUG_ACTION_VAR) {
            match BugAction::parse(&raw) {
                Some(action) => config.bug_action = action,
                None => tracing::warn!(
                    var = Self::BUG_ACTION_VAR,
                    value = %raw,
                    "unrecognized bug action, keeping default"
                ),
            }
        }
        config
    }
}

/// Environment variable holding the log filter (env-filter syntax).
pub const LOG_FILTER_VAR: &str = "CEXT_BRIDGE_LOG";

/// Install a stderr log subscriber filtered by `CEXT_BRIDGE_LOG`.
///
/// Safe to call more than once; only the first call installs anything, and an
/// already installed global subscriber is left alone.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_FILTER_VAR)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
