//! pwngate command core
//!
//! Everything between "the operator typed a line" and "a command body runs":
//!
//! ```text
//!  operator line
//!       │
//!       ▼
//!  ┌──────────────┐   ┌────────────────┐   ┌────────────┐   ┌──────────────┐
//!  │ Argument     │──►│ Repeat         │──►│ Capability │──►│ Heap         │──► body
//!  │ pipeline     │   │ detector       │   │ gates      │   │ selector     │
//!  └──────────────┘   └────────────────┘   └────────────┘   └──────────────┘
//!       │ (expression coercion via the host evaluator)
//! ```
//!
//! The host debugger is abstracted behind [`host::Host`]; diagnostics go to a
//! [`console::Console`]. [`dispatch::Dispatcher`] owns the registry, the repeat
//! history, the heap strategy cell and the configuration.

pub mod args;
pub mod coerce;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod gates;
pub mod heap;
pub mod host;
pub mod registry;
pub mod repeat;

pub use args::{ArgValue, ArgumentSpec, Coercion, Param, ParsedArgs, UsageAborted};
pub use config::{Config, GlibcVersion, ResolutionMode};
pub use console::{BufferConsole, Console, Severity, StdConsole};
pub use dispatch::{CommandContext, Dispatcher, Outcome};
pub use error::{ConfigError, HeapError, HostError, RegistryError};
pub use gates::{Gate, GateChain};
pub use heap::{HeapResolutionContext, HeapStrategy};
pub use host::{Host, SessionState};
pub use registry::{CommandDescriptor, Registry};
pub use repeat::RepeatDetector;
