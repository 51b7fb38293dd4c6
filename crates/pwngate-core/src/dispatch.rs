//! Invocation-time entry point.
//!
//! [`Dispatcher`] owns the registry, the repeat history, the active heap
//! strategy and the configuration. One call to [`Dispatcher::invoke`] runs the
//! whole pipeline for one command:
//!
//! 1. look the name up (aliases included),
//! 2. parse and coerce the arguments (usage text on failure),
//! 3. decide whether this is a bare-Enter repeat,
//! 4. check the command's capability gates,
//! 5. select a heap strategy if the command needs one,
//! 6. run the body and contain whatever it returns.
//!
//! Nothing a command does can leave the dispatcher unusable: every failure is
//! reported on the console and turned into an [`Outcome`], unless the operator
//! asked for raw errors (`set exception-verbose on`), in which case the error
//! is handed back to the caller.

use crate::args::ParsedArgs;
use crate::coerce::ExpressionCoercer;
use crate::config::{Config, ResolutionMode};
use crate::console::{inform_verbose_and_debug, Console};
use crate::error::{ConfigError, HeapError, RegistryError};
use crate::gates::Gate;
use crate::heap::{HeapResolutionContext, HeapRun, HeapStrategy};
use crate::host::Host;
use crate::registry::{CommandDescriptor, Registry};
use crate::repeat::RepeatDetector;

/// What a command body gets to work with.
pub struct CommandContext<'a> {
    pub command: &'a str,
    pub host: &'a dyn Host,
    pub console: &'a mut dyn Console,
    pub config: &'a Config,
    pub args: &'a ParsedArgs,
    /// The operator re-ran the previous command by pressing Enter.
    pub repeat: bool,
    heap: Option<HeapStrategy>,
}

impl CommandContext<'_> {
    pub fn println(&mut self, line: &str) {
        self.console.plain(line);
    }

    /// Strategy selected for this invocation, for heap commands only.
    pub fn heap_strategy(&self) -> Option<HeapStrategy> {
        self.heap
    }

    pub fn resolve_heap_symbol(&self, symbol: &str) -> Result<u64, HeapError> {
        let strategy = self.heap.ok_or(HeapError::NotSelected)?;
        strategy.resolve(self.host, self.config, symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was typed.
    Empty,
    UnknownCommand,
    UsageAborted,
    PreconditionUnmet(Gate),
    HeapUnavailable,
    /// The body failed; the failure was reported and absorbed.
    Failed,
    Completed,
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Registry,
    repeat: RepeatDetector,
    heap: HeapResolutionContext,
    config: Config,
}

impl Dispatcher {
    /// The heap strategy starts out as debug symbols whatever `config` says;
    /// only [`Dispatcher::set_config`] moves it.
    pub fn new(registry: Registry, config: Config) -> Self {
        Self {
            registry,
            repeat: RepeatDetector::new(),
            heap: HeapResolutionContext::new(),
            config,
        }
    }

    /// A dispatcher whose registry knows the host's built-in commands.
    pub fn for_host(host: &dyn Host, config: Config) -> Self {
        Self::new(Registry::from_builtin_listing(&host.builtin_listing()), config)
    }

    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        self.registry.register(descriptor)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn heap(&self) -> &HeapResolutionContext {
        &self.heap
    }

    /// Change a setting. Setting the resolution mode also resets the active
    /// heap strategy to the mode's preferred one.
    pub fn set_config(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        self.config.set(name, value)?;
        if name == "resolve-heap-via-heuristic" {
            let mode = self.config.resolve_heap_via_heuristic;
            let strategy = match mode {
                ResolutionMode::Force => HeapStrategy::Heuristic,
                ResolutionMode::Auto => HeapStrategy::DebugSymbols,
            };
            tracing::debug!(%mode, strategy = strategy.name(), "resolution mode set");
            self.heap.set_current(strategy);
        }
        Ok(())
    }

    /// Split `line` into command name and argument string, then [`invoke`].
    ///
    /// [`invoke`]: Dispatcher::invoke
    pub fn invoke_line(
        &mut self,
        host: &dyn Host,
        console: &mut dyn Console,
        line: &str,
        interactive: bool,
    ) -> anyhow::Result<Outcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Outcome::Empty);
        }
        let (name, argument) = match line.find(char::is_whitespace) {
            Some(i) => (&line[..i], line[i..].trim_start()),
            None => (line, ""),
        };
        self.invoke(host, console, name, argument, interactive)
    }

    pub fn invoke(
        &mut self,
        host: &dyn Host,
        console: &mut dyn Console,
        name: &str,
        argument: &str,
        interactive: bool,
    ) -> anyhow::Result<Outcome> {
        let _span = tracing::debug_span!("invoke", command = name).entered();

        let Some((descriptor, is_alias)) = self.registry.lookup(name) else {
            console.error(&format!("Undefined command: \"{name}\".  Try \"help\"."));
            return Ok(Outcome::UnknownCommand);
        };
        tracing::debug!(primary = descriptor.name(), is_alias, "resolved command");

        let mut coercer = ExpressionCoercer::new(host);
        let args = match descriptor.arguments().parse(argument, &mut coercer) {
            Ok(args) => args,
            Err(abort) => {
                tracing::debug!(help = abort.help_requested, "argument parsing aborted");
                if abort.help_requested {
                    console.plain(abort.message.trim_end());
                } else {
                    console.error(abort.message.trim_end());
                }
                return Ok(Outcome::UsageAborted);
            }
        };

        let repeat = self.repeat.is_repeat(host, argument, interactive);

        // Diagnostics name the primary command, not the alias that was typed.
        let primary = descriptor.name();
        let session = host.session();
        if let Some(gate) = descriptor.gates().first_unmet(&session) {
            tracing::debug!(?gate, "precondition unmet");
            console.error(&gate.diagnostic(primary, &session));
            return Ok(Outcome::PreconditionUnmet(gate.clone()));
        }

        let config = &self.config;
        if descriptor.needs_heap() {
            let run = self.heap.run(host, config, console, primary, |strategy, console| {
                let mut ctx = CommandContext {
                    command: primary,
                    host,
                    console,
                    config,
                    args: &args,
                    repeat,
                    heap: Some(strategy),
                };
                descriptor.call(&mut ctx)
            })?;
            return Ok(match run {
                HeapRun::Unavailable => Outcome::HeapUnavailable,
                HeapRun::Completed => Outcome::Completed,
                HeapRun::Absorbed => Outcome::Failed,
            });
        }

        let mut ctx = CommandContext {
            command: primary,
            host,
            console: &mut *console,
            config,
            args: &args,
            repeat,
            heap: None,
        };
        let Err(err) = descriptor.call(&mut ctx) else {
            return Ok(Outcome::Completed);
        };

        console.error(&format!("Exception occurred: {primary}: {err:#}"));
        console.plain(&format!("'{primary}': {}", descriptor.description()));
        if config.wants_raw_errors() {
            return Err(err);
        }
        inform_verbose_and_debug(console);
        Ok(Outcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgumentSpec, Coercion, Param};
    use crate::console::BufferConsole;
    use crate::error::HostError;
    use crate::host::SessionState;
    use crate::GlibcVersion;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct StubHost {
        session: SessionState,
    }

    impl Host for StubHost {
        fn evaluate(&self, expr: &str) -> Result<i128, HostError> {
            expr.parse::<i128>()
                .map_err(|_| HostError::NoSymbol(expr.to_string()))
        }
        fn register_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn history_tail(&self) -> Option<String> {
            None
        }
        fn builtin_listing(&self) -> String {
            "print -- Print value of expression EXP.\n".to_string()
        }
        fn session(&self) -> SessionState {
            self.session.clone()
        }
        fn shared_libraries(&self) -> Vec<String> {
            Vec::new()
        }
        fn symbol_address(&self, _name: &str) -> Option<u64> {
            None
        }
        fn scan_heap_symbol(&self, _name: &str, _version: GlibcVersion) -> Option<u64> {
            None
        }
        fn glibc_version(&self) -> Option<GlibcVersion> {
            None
        }
    }

    #[test]
    fn alias_runs_primary_body_with_parsed_args() {
        let host = StubHost::default();
        let mut d = Dispatcher::for_host(&host, Config::default());
        let seen = Rc::new(Cell::new(0u64));
        let seen_in = seen.clone();
        d.register(
            CommandDescriptor::new(
                "distance",
                ArgumentSpec::new("Print the distance.")
                    .param(Param::positional("a", "First").coerce(Coercion::ExpressionIntOrRaise))
                    .param(Param::positional("b", "Second").coerce(Coercion::ExpressionIntOrRaise)),
                move |ctx| {
                    let a = ctx.args.int("a").unwrap_or_default();
                    let b = ctx.args.int("b").unwrap_or_default();
                    seen_in.set(b.wrapping_sub(a));
                    Ok(())
                },
            )
            .alias("dist"),
        )
        .unwrap();

        let mut out = BufferConsole::new();
        let outcome = d.invoke_line(&host, &mut out, "dist 10 42", true).unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(seen.get(), 32);
    }

    #[test]
    fn unknown_command_is_reported() {
        let host = StubHost::default();
        let mut d = Dispatcher::for_host(&host, Config::default());
        let mut out = BufferConsole::new();
        assert_eq!(
            d.invoke_line(&host, &mut out, "nosuch", true).unwrap(),
            Outcome::UnknownCommand
        );
        assert!(out.contains("Undefined command: \"nosuch\""));
        assert_eq!(d.invoke_line(&host, &mut out, "   ", true).unwrap(), Outcome::Empty);
    }

    #[test]
    fn body_failure_is_absorbed_with_description() {
        let host = StubHost::default();
        let mut d = Dispatcher::for_host(&host, Config::default());
        d.register(CommandDescriptor::new(
            "boom",
            ArgumentSpec::new("Always fails."),
            |_| Err(anyhow::anyhow!("kaboom")),
        ))
        .unwrap();

        let mut out = BufferConsole::new();
        assert_eq!(
            d.invoke_line(&host, &mut out, "boom", false).unwrap(),
            Outcome::Failed
        );
        assert!(out.contains("Exception occurred: boom: kaboom"));
        assert!(out.contains("'boom': Always fails."));

        d.set_config("exception-verbose", "on").unwrap();
        let err = d.invoke_line(&host, &mut out, "boom", false).unwrap_err();
        assert_eq!(err.to_string(), "kaboom");
    }

    #[test]
    fn mode_change_resets_active_strategy() {
        let host = StubHost::default();
        let mut d = Dispatcher::for_host(&host, Config::default());
        assert_eq!(d.heap().current(), HeapStrategy::DebugSymbols);
        d.set_config("resolve-heap-via-heuristic", "force").unwrap();
        assert_eq!(d.heap().current(), HeapStrategy::Heuristic);
        d.set_config("resolve-heap-via-heuristic", "auto").unwrap();
        assert_eq!(d.heap().current(), HeapStrategy::DebugSymbols);
    }

    #[test]
    fn builtin_collision_is_refused_at_registration() {
        let host = StubHost::default();
        let mut d = Dispatcher::for_host(&host, Config::default());
        let err = d
            .register(CommandDescriptor::new("print", ArgumentSpec::new("Nope."), |_| Ok(())))
            .unwrap_err();
        assert_eq!(err, RegistryError::BuiltinOverride("print".to_string()));
    }
}
