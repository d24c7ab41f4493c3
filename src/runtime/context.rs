//! Which managed engine native calls are routed to
//!
//! An embedder installs one process-wide engine. A thread can also enter a
//! scoped engine that shadows the global one until the scope is dropped;
//! scopes nest.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

use super::config::BridgeConfig;
use super::engine::ManagedEngine;
use super::error::BridgeError;

#[derive(Clone)]
struct Context {
    engine: Arc<dyn ManagedEngine>,
    config: BridgeConfig,
}

static GLOBAL: OnceLock<Context> = OnceLock::new();

thread_local! {
    static SCOPES: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

/// Install the process-wide engine. Only the first call succeeds.
pub fn install(engine: Arc<dyn ManagedEngine>, config: BridgeConfig) -> Result<(), BridgeError> {
    GLOBAL
        .set(Context { engine, config })
        .map_err(|_| BridgeError::EngineAlreadyInstalled)?;
    tracing::debug!(?config, "installed global managed engine");
    Ok(())
}

/// Route this thread's native calls to `engine` until the scope is dropped.
pub fn enter(engine: Arc<dyn ManagedEngine>, config: BridgeConfig) -> EngineScope {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        scopes.push(Context { engine, config });
        tracing::debug!(depth = scopes.len(), "entered engine scope");
    });
    EngineScope { _not_send: std::marker::PhantomData }
}

/// Guard returned by `enter`; restores the previous engine on drop.
pub struct EngineScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for EngineScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            scopes.pop();
            tracing::debug!(depth = scopes.len(), "left engine scope");
        });
    }
}

fn current() -> Option<Context> {
    SCOPES
        .with(|scopes| scopes.borrow().last().cloned())
        .or_else(|| GLOBAL.get().cloned())
}

/// The engine for the current thread.
pub fn engine() -> Result<Arc<dyn ManagedEngine>, BridgeError> {
    current().map(|c| c.engine).ok_or(BridgeError::NoEngine)
}

/// The configuration for the current thread (defaults when no engine is set).
pub fn config() -> BridgeConfig {
    current().map(|c| c.config).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostEngine;

    #[test]
    fn test_scopes_nest_and_restore() {
        let outer = HostEngine::new();
        let inner = HostEngine::new();
        {
            let _a = enter(outer.clone(), BridgeConfig::default());
            let e = engine().unwrap();
            assert!(std::ptr::addr_eq(Arc::as_ptr(&e), Arc::as_ptr(&outer)));
            {
                let _b = enter(inner.clone(), BridgeConfig::default());
                let e = engine().unwrap();
                assert!(std::ptr::addr_eq(Arc::as_ptr(&e), Arc::as_ptr(&inner)));
            }
            let e = engine().unwrap();
            assert!(std::ptr::addr_eq(Arc::as_ptr(&e), Arc::as_ptr(&outer)));
        }
    }

    #[test]
    fn test_scope_carries_config() {
        let host = HostEngine::new();
        let config = BridgeConfig {
            bug_action: crate::runtime::config::BugAction::Unwind,
        };
        let _scope = enter(host, config);
        assert_eq!(
            super::config().bug_action,
            crate::runtime::config::BugAction::Unwind
        );
    }

    #[test]
    fn test_no_engine_on_fresh_thread() {
        // Tests never install the global engine, so a fresh thread has none.
        let result = std::thread::spawn(|| engine().is_err()).join().unwrap();
        assert!(result);
    }
}
