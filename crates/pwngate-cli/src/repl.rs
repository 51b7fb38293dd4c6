//! The operator shell.
//!
//! By default we use `rustyline` for line editing and tab completion.
//! A minimal stdin-based fallback exists behind `--no-default-features`.
//!
//! The shell plays the part of the host debugger: it owns the command history,
//! answers its own built-ins (`help`, `set`, `show`, `quit`) and hands every
//! other line to the [`Dispatcher`]. Like a debugger, an empty line at the
//! prompt re-runs the previous one without adding a history entry.

use anyhow::{anyhow, Result};
use colored::Colorize;
use pwngate_core::{Config, Console, Dispatcher};
use std::io;
#[cfg(not(feature = "repl-rustyline"))]
use std::io::Write;
use std::rc::Rc;

use crate::commands;
use crate::target::SimulatedTarget;

const PROMPT: &str = "pwngate> ";

/// Commands the shell answers itself.
const SHELL_BUILTINS: &[&str] = &["help", "set", "show", "quit", "exit"];

pub enum ShellControl {
    Continue,
    Exit,
}

pub struct Shell<C: Console> {
    target: Rc<SimulatedTarget>,
    dispatcher: Dispatcher,
    console: C,
    last_line: Option<String>,
}

impl<C: Console> Shell<C> {
    pub fn new(target: Rc<SimulatedTarget>, config: Config, console: C) -> Result<Self> {
        let mut dispatcher = Dispatcher::for_host(&*target, config);
        commands::register_all(&mut dispatcher, &target)?;
        Ok(Self {
            target,
            dispatcher,
            console,
            last_line: None,
        })
    }

    #[cfg(test)]
    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// A line typed at the prompt.
    pub fn handle_interactive(&mut self, line: &str) -> Result<ShellControl> {
        let line = line.trim();
        if line.is_empty() {
            let Some(last) = self.last_line.clone() else {
                return Ok(ShellControl::Continue);
            };
            tracing::debug!(line = %last, "repeating previous command");
            return self.execute(&last, true);
        }

        self.target.record_history(line);
        self.last_line = Some(line.to_string());
        self.execute(line, true)
    }

    /// A line from a script or `--command`. Never a repeat, never recorded.
    pub fn handle_script_line(&mut self, line: &str) -> Result<ShellControl> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(ShellControl::Continue);
        }
        self.execute(line, false)
    }

    fn execute(&mut self, line: &str, interactive: bool) -> Result<ShellControl> {
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name {
            "quit" | "exit" => return Ok(ShellControl::Exit),
            "help" => self.cmd_help(rest),
            "set" => self.cmd_set(rest),
            "show" => self.cmd_show(rest),
            _ => {
                let outcome =
                    self.dispatcher
                        .invoke(&*self.target, &mut self.console, name, rest, interactive)?;
                tracing::debug!(command = name, ?outcome, "command finished");
            }
        }
        Ok(ShellControl::Continue)
    }

    fn cmd_help(&mut self, topic: &str) {
        if topic.is_empty() {
            for (category, cmds) in self.dispatcher.registry().by_category() {
                self.console.plain(&format!("{category}:"));
                for cmd in cmds {
                    let name = if cmd.aliases().is_empty() {
                        cmd.name().to_string()
                    } else {
                        format!("{} ({})", cmd.name(), cmd.aliases().join(", "))
                    };
                    self.console
                        .plain(&format!("  {name:<22} {}", cmd.description()));
                }
            }
            self.console
                .plain(&format!("Shell: {}", SHELL_BUILTINS.join(", ")));
            return;
        }

        match self.dispatcher.registry().lookup(topic) {
            Some((cmd, _)) => {
                let help = cmd.arguments().help();
                self.console.plain(help.trim_end());
            }
            None => self
                .console
                .error(&format!("Undefined command: \"{topic}\".  Try \"help\".")),
        }
    }

    fn cmd_set(&mut self, rest: &str) {
        let (name, value) = match rest.split_once(char::is_whitespace) {
            Some((name, value)) => (name, value.trim()),
            None => (rest, ""),
        };
        if name.is_empty() {
            self.console.error("Argument required (expression to compute).");
            return;
        }
        if let Err(e) = self.dispatcher.set_config(name, value) {
            self.console.error(&e.to_string());
        }
    }

    fn cmd_show(&mut self, name: &str) {
        let settings = self.dispatcher.config().describe();
        let mut shown = false;
        for (setting, value) in settings {
            if name.is_empty() || name == setting {
                self.console.plain(&format!("{setting}: {value}"));
                shown = true;
            }
        }
        if !shown {
            self.console.error(&format!("unknown setting `{name}`"));
        }
    }

    /// Names offered by tab completion.
    #[cfg(feature = "repl-rustyline")]
    fn completion_words(&self) -> CompletionData {
        let mut commands: Vec<String> = SHELL_BUILTINS.iter().map(|s| s.to_string()).collect();
        for cmd in self.dispatcher.registry().iter() {
            commands.push(cmd.name().to_string());
            commands.extend(cmd.aliases().iter().cloned());
        }
        commands.sort();
        let settings = self
            .dispatcher
            .config()
            .describe()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        CompletionData { commands, settings }
    }
}

pub fn run_script<C: Console>(
    shell: &mut Shell<C>,
    lines: &[String],
    continue_on_error: bool,
    quiet: bool,
) -> Result<()> {
    for (idx, raw_line) in lines.iter().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !quiet {
            println!("{PROMPT}{line}");
        }

        match shell.handle_script_line(line) {
            Ok(ShellControl::Continue) => {}
            Ok(ShellControl::Exit) => break,
            Err(e) => {
                if continue_on_error {
                    report_error(shell, &e);
                } else {
                    return Err(anyhow!("script failed at line {}: {e:#}", idx + 1));
                }
            }
        }
    }
    Ok(())
}

pub fn run_interactive<C: Console>(shell: &mut Shell<C>) -> Result<()> {
    #[cfg(feature = "repl-rustyline")]
    {
        return run_rustyline(shell);
    }
    #[cfg(not(feature = "repl-rustyline"))]
    {
        return run_simple(shell);
    }
}

fn report_error<C: Console>(shell: &Shell<C>, e: &anyhow::Error) {
    if shell.dispatcher().config().exception_debugger {
        eprintln!("{} {e:?}", "error:".red().bold());
    } else {
        eprintln!("{} {e:#}", "error:".red().bold());
    }
}

fn banner() {
    println!("{}", "pwngate".green().bold());
    println!("Type `help` for commands. Type `quit` to exit.\n");
}

#[cfg(not(feature = "repl-rustyline"))]
fn run_simple<C: Console>(shell: &mut Shell<C>) -> Result<()> {
    banner();

    let stdin = io::stdin();
    loop {
        print!("{}", PROMPT.cyan().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }

        match shell.handle_interactive(&line) {
            Ok(ShellControl::Continue) => {}
            Ok(ShellControl::Exit) => break,
            Err(e) => report_error(shell, &e),
        }
    }

    Ok(())
}

#[cfg(feature = "repl-rustyline")]
fn run_rustyline<C: Console>(shell: &mut Shell<C>) -> Result<()> {
    use rustyline::error::ReadlineError;
    use rustyline::Editor;

    banner();

    let helper = ReplLineHelper {
        data: shell.completion_words(),
    };
    let mut rl: Editor<ReplLineHelper, rustyline::history::DefaultHistory> =
        Editor::new().map_err(|e| anyhow!("failed to init rustyline: {e}"))?;
    rl.set_helper(Some(helper));

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => continue,
            Err(e) => return Err(anyhow!("readline error: {e}")),
        };

        if !line.trim().is_empty() {
            rl.add_history_entry(line.trim())
                .map_err(|e| anyhow!("failed to record history: {e}"))?;
        }

        match shell.handle_interactive(&line) {
            Ok(ShellControl::Continue) => {}
            Ok(ShellControl::Exit) => break,
            Err(e) => report_error(shell, &e),
        }
    }

    Ok(())
}

/// Read a script from a file, or stdin for `-`.
pub fn read_script(path: &std::path::Path) -> Result<Vec<String>> {
    let text = if path.as_os_str() == "-" {
        io::read_to_string(io::stdin())?
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read script {}: {e}", path.display()))?
    };
    Ok(text.lines().map(str::to_string).collect())
}

// =============================================================================
// Tab completion (rustyline)
// =============================================================================

#[cfg(feature = "repl-rustyline")]
#[derive(Default, Debug, Clone)]
struct CompletionData {
    commands: Vec<String>,
    settings: Vec<String>,
}

#[cfg(feature = "repl-rustyline")]
struct ReplLineHelper {
    data: CompletionData,
}

#[cfg(feature = "repl-rustyline")]
impl ReplLineHelper {
    fn pairs_from_prefix(items: &[String], prefix: &str) -> Vec<rustyline::completion::Pair> {
        items
            .iter()
            .filter(|item| item.starts_with(prefix))
            .map(|item| rustyline::completion::Pair {
                display: item.clone(),
                replacement: item.clone(),
            })
            .collect()
    }
}

#[cfg(feature = "repl-rustyline")]
impl rustyline::Helper for ReplLineHelper {}

#[cfg(feature = "repl-rustyline")]
impl rustyline::highlight::Highlighter for ReplLineHelper {}

#[cfg(feature = "repl-rustyline")]
impl rustyline::hint::Hinter for ReplLineHelper {
    type Hint = String;
    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        None
    }
}

#[cfg(feature = "repl-rustyline")]
impl rustyline::validate::Validator for ReplLineHelper {}

#[cfg(feature = "repl-rustyline")]
impl rustyline::completion::Completer for ReplLineHelper {
    type Candidate = rustyline::completion::Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        let start = word_start(line, pos);
        let word = &line[start..pos];
        let tokens: Vec<&str> = line[..start].split_whitespace().collect();

        match tokens.as_slice() {
            [] => Ok((start, Self::pairs_from_prefix(&self.data.commands, word))),
            ["set" | "show"] => Ok((start, Self::pairs_from_prefix(&self.data.settings, word))),
            ["help"] => Ok((start, Self::pairs_from_prefix(&self.data.commands, word))),
            _ => Ok((start, Vec::new())),
        }
    }
}

/// Byte offset where the word under the cursor begins.
#[cfg(feature = "repl-rustyline")]
fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0)
}
