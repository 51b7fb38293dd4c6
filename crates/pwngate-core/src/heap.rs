//! Choosing how allocator metadata gets located.
//!
//! Two strategies exist: read addresses from debug symbols, or find them
//! heuristically for a known C library version. [`HeapResolutionContext`]
//! remembers which one is active and, per heap command invocation, decides
//! whether it can stay active, must be swapped, or whether the command cannot
//! run at all:
//!
//! ```text
//!                 auto && symbols resolvable
//!        ┌──────────────────────────────────────────┐
//!        ▼                                          │
//!  ┌───────────────┐  auto && !symbols && heur  ┌───┴───────────┐
//!  │ DebugSymbols  │ ─────────────────────────► │ Heuristic     │
//!  └───────────────┘                            └───────────────┘
//!                      force && heur
//! ```
//!
//! The selector reads the [`ResolutionMode`] but never changes it.

use crate::config::{Config, GlibcVersion, ResolutionMode};
use crate::console::{inform_report_issue, inform_verbose_and_debug, Console};
use crate::error::HeapError;
use crate::host::Host;

/// Symbols that must resolve before debug information counts as usable.
pub const DEBUG_SYMBOLS_REQUIRED: &[&str] = &["main_arena", "mp_"];

const SET_GLIBC_HINT: &str = "Please set the GLIBC version you think the target binary was compiled (using `set glibc <version>` command; e.g. 2.32) and re-run this command.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HeapStrategy {
    #[default]
    DebugSymbols,
    Heuristic,
}

impl HeapStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            HeapStrategy::DebugSymbols => "debug-symbols",
            HeapStrategy::Heuristic => "heuristic",
        }
    }

    pub fn can_be_resolved(&self, host: &dyn Host, config: &Config) -> bool {
        match self {
            HeapStrategy::DebugSymbols => DEBUG_SYMBOLS_REQUIRED
                .iter()
                .all(|s| host.symbol_address(s).is_some()),
            HeapStrategy::Heuristic => effective_glibc_version(host, config).is_some(),
        }
    }

    pub fn resolve(&self, host: &dyn Host, config: &Config, symbol: &str) -> Result<u64, HeapError> {
        let found = match self {
            HeapStrategy::DebugSymbols => host.symbol_address(symbol),
            HeapStrategy::Heuristic => config.heap_addresses.get(symbol).copied().or_else(|| {
                effective_glibc_version(host, config)
                    .and_then(|version| host.scan_heap_symbol(symbol, version))
            }),
        };
        found.ok_or_else(|| HeapError::SymbolUnresolvable {
            symbol: symbol.to_string(),
        })
    }
}

/// Operator override first, then whatever the host detected.
pub fn effective_glibc_version(host: &dyn Host, config: &Config) -> Option<GlibcVersion> {
    config.glibc.or_else(|| host.glibc_version())
}

pub fn is_statically_linked(host: &dyn Host) -> bool {
    host.shared_libraries().is_empty()
}

/// Result of running a body under [`HeapResolutionContext::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapRun {
    /// No strategy could be used; the body did not run.
    Unavailable,
    Completed,
    /// The body failed and the failure was reported and swallowed.
    Absorbed,
}

#[derive(Debug, Default)]
pub struct HeapResolutionContext {
    current: HeapStrategy,
}

impl HeapResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> HeapStrategy {
        self.current
    }

    /// Used when the operator changes the resolution mode.
    pub fn set_current(&mut self, strategy: HeapStrategy) {
        self.current = strategy;
    }

    /// Pick the strategy for this invocation, or explain why there is none.
    pub fn select(
        &mut self,
        host: &dyn Host,
        config: &Config,
        console: &mut dyn Console,
    ) -> Option<HeapStrategy> {
        let mode = config.resolve_heap_via_heuristic;

        if self.current == HeapStrategy::Heuristic
            && mode == ResolutionMode::Auto
            && HeapStrategy::DebugSymbols.can_be_resolved(host, config)
        {
            tracing::debug!("debug symbols became available, leaving heuristic resolution");
            self.current = HeapStrategy::DebugSymbols;
        }

        // Force mode never runs on debug symbols, even when they resolve.
        if mode == ResolutionMode::Force
            && self.current == HeapStrategy::DebugSymbols
            && HeapStrategy::Heuristic.can_be_resolved(host, config)
        {
            tracing::debug!("forced heuristic resolution, leaving debug symbols");
            self.current = HeapStrategy::Heuristic;
        }

        let usable = !(mode == ResolutionMode::Force && self.current == HeapStrategy::DebugSymbols);
        if usable && self.current.can_be_resolved(host, config) {
            return Some(self.current);
        }

        match (self.current, mode) {
            (HeapStrategy::DebugSymbols, ResolutionMode::Auto) => {
                if HeapStrategy::Heuristic.can_be_resolved(host, config) {
                    tracing::warn!("falling back to heuristic heap resolution");
                    self.current = HeapStrategy::Heuristic;
                    console.warn(
                        "pwngate will try to resolve the heap symbols via heuristic now since we cannot resolve the heap via the debug symbols.\n\
                         This might not work in all cases. Use `help set resolve-heap-via-heuristic` for more details.",
                    );
                    return Some(self.current);
                }
                if is_statically_linked(host) {
                    console.error("Can't find GLIBC version required for this command to work since this is a statically linked binary");
                    console.warn(SET_GLIBC_HINT);
                } else {
                    report_glibc_not_loaded(console);
                }
            }
            (HeapStrategy::DebugSymbols, ResolutionMode::Force) => {
                console.error("You are forcing to resolve the heap symbols via heuristic, but the active strategy still resolves them via the debug symbols.");
                console.warn("Use `set resolve-heap-via-heuristic auto` and re-run this command.");
            }
            _ if effective_glibc_version(host, config).is_none() => {
                if is_statically_linked(host) {
                    console.error("Can't resolve the heap since the GLIBC version is not set.");
                    console.warn(SET_GLIBC_HINT);
                } else {
                    report_glibc_not_loaded(console);
                }
            }
            _ => {
                console.error("An unknown error occurred when resolved the heap.");
                inform_report_issue(console, "An unknown error occurred when resolved the heap");
            }
        }
        None
    }

    /// Select a strategy and run `body` under it, translating failures into
    /// operator guidance. `Err` is returned only when the configuration asks
    /// for raw errors.
    pub fn run<F>(
        &mut self,
        host: &dyn Host,
        config: &Config,
        console: &mut dyn Console,
        command: &str,
        body: F,
    ) -> anyhow::Result<HeapRun>
    where
        F: FnOnce(HeapStrategy, &mut dyn Console) -> anyhow::Result<()>,
    {
        let Some(strategy) = self.select(host, config, console) else {
            return Ok(HeapRun::Unavailable);
        };

        let err = match body(strategy, &mut *console) {
            Ok(()) => return Ok(HeapRun::Completed),
            Err(err) => err,
        };

        match err.downcast_ref::<HeapError>() {
            Some(HeapError::SymbolUnresolvable { symbol }) => {
                console.error(&format!(
                    "{command}: Fail to resolve the symbol: `{symbol}`"
                ));
                console.warn(&format!(
                    "You can try to determine the libc symbols addresses manually and set them appropriately. For this, see the `heap_config` command output and set the config about `{symbol}`."
                ));
            }
            _ => {
                console.error(&format!(
                    "{command}: An unknown error occurred when running this command."
                ));
                if strategy == HeapStrategy::Heuristic {
                    console.warn("Maybe you can try to determine the libc symbols addresses manually, set them appropriately and re-run this command. For this, see the `heap_config` command output and set the `main_arena`, `mp_`, `global_max_fast`, `tcache` and `thread_arena` addresses.");
                } else {
                    console.warn("You can try `set resolve-heap-via-heuristic force` and re-run this command.");
                }
            }
        }

        if config.wants_raw_errors() {
            return Err(err);
        }
        inform_verbose_and_debug(console);
        Ok(HeapRun::Absorbed)
    }
}

fn report_glibc_not_loaded(console: &mut dyn Console) {
    console.error("Can't find GLIBC version required for this command to work, maybe is because GLIBC is not loaded yet.");
    console.warn(&format!(
        "If you believe the GLIBC is loaded or this is a statically linked binary. {SET_GLIBC_HINT}"
    ));
}
