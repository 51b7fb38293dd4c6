//! The boundary to the host debugger.
//!
//! The core never talks to a debugger directly; everything it needs (expression
//! evaluation, command history, symbol lookup, session flags) goes through
//! [`Host`]. All methods are reads.

use crate::config::GlibcVersion;
use crate::error::HostError;
use serde::{Deserialize, Serialize};

/// Snapshot of the session flags the capability gates look at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub file_loaded: bool,
    pub process_alive: bool,
    pub arch: String,
    pub is_qemu: bool,
    pub is_qemu_kernel: bool,
    pub kernel_debug_syms: bool,
    pub paging_enabled: bool,
    pub has_tcache: bool,
    pub heap_initialized: bool,
}

pub trait Host {
    /// Evaluate an expression in the host's own language.
    fn evaluate(&self, expr: &str) -> Result<i128, HostError>;

    /// Register names of the current architecture (without `$`).
    fn register_names(&self) -> Vec<String>;

    /// The last line of the host command history, formatted as
    /// `<sequence number> <command text>`.
    fn history_tail(&self) -> Option<String>;

    /// The host's "help all" style listing of its built-in commands.
    fn builtin_listing(&self) -> String;

    fn session(&self) -> SessionState;

    /// Shared libraries currently mapped into the target.
    fn shared_libraries(&self) -> Vec<String>;

    /// Look a symbol up through debug information.
    fn symbol_address(&self, name: &str) -> Option<u64>;

    /// Locate allocator metadata without debug information, assuming the given
    /// C library version.
    fn scan_heap_symbol(&self, name: &str, version: GlibcVersion) -> Option<u64>;

    /// C library version detected from the target, if any.
    fn glibc_version(&self) -> Option<GlibcVersion>;
}
