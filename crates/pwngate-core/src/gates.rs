//! Capability gates: preconditions a command declares up front.
//!
//! Each gate is a pure predicate over [`SessionState`]. The dispatcher walks a
//! command's [`GateChain`] before running the body and stops at the first unmet
//! gate, printing that gate's diagnostic.

use crate::host::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    WithFile,
    WhenRunning,
    WithArch(Vec<String>),
    WithKernelDebugSyms,
    WhenPagingEnabled,
    WhenQemuKernel,
    WithTcache,
    WhenHeapInitialized,
}

impl Gate {
    pub fn with_arch(names: &[&str]) -> Self {
        Gate::WithArch(names.iter().map(|s| s.to_string()).collect())
    }

    pub fn holds(&self, s: &SessionState) -> bool {
        match self {
            Gate::WithFile => s.file_loaded,
            Gate::WhenRunning => s.process_alive,
            Gate::WithArch(names) => names.iter().any(|n| *n == s.arch),
            Gate::WithKernelDebugSyms => s.kernel_debug_syms,
            Gate::WhenPagingEnabled => s.paging_enabled,
            Gate::WhenQemuKernel => s.is_qemu_kernel,
            Gate::WithTcache => s.has_tcache,
            Gate::WhenHeapInitialized => s.heap_initialized,
        }
    }

    /// The line shown when the gate does not hold.
    pub fn diagnostic(&self, command: &str, s: &SessionState) -> String {
        match self {
            Gate::WithFile if s.is_qemu => {
                "Could not determine the target binary on QEMU.".to_string()
            }
            Gate::WithFile => format!("{command}: There is no file loaded."),
            Gate::WhenRunning => format!("{command}: The program is not being run."),
            Gate::WithArch(names) => format!(
                "{command}: This command may only be run on the {} architecture(s)",
                names.join(", ")
            ),
            Gate::WithKernelDebugSyms => format!(
                "{command}: This command may only be run when debugging a Linux kernel with debug symbols."
            ),
            Gate::WhenPagingEnabled => {
                format!("{command}: This command may only be run when paging is enabled.")
            }
            Gate::WhenQemuKernel => format!(
                "{command}: This command may only be run when debugging the Linux kernel in QEMU."
            ),
            Gate::WithTcache => format!(
                "{command}: This version of GLIBC was not compiled with tcache support."
            ),
            Gate::WhenHeapInitialized => format!("{command}: Heap is not initialized yet."),
        }
    }
}

/// Gates that must all hold, checked in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateChain {
    gates: Vec<Gate>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, gate: Gate) {
        self.gates.push(gate);
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn first_unmet(&self, s: &SessionState) -> Option<&Gate> {
        self.gates.iter().find(|g| !g.holds(s))
    }
}

impl FromIterator<Gate> for GateChain {
    fn from_iter<I: IntoIterator<Item = Gate>>(iter: I) -> Self {
        Self {
            gates: iter.into_iter().collect(),
        }
    }
}
