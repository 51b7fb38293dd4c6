//! Operator-facing diagnostic output.

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Regular command output.
    Plain,
    Info,
    Warn,
    Error,
}

/// Sink for single-line diagnostics and command output.
pub trait Console {
    fn emit(&mut self, severity: Severity, line: &str);

    fn plain(&mut self, line: &str) {
        self.emit(Severity::Plain, line);
    }

    fn info(&mut self, line: &str) {
        self.emit(Severity::Info, line);
    }

    fn warn(&mut self, line: &str) {
        self.emit(Severity::Warn, line);
    }

    fn error(&mut self, line: &str) {
        self.emit(Severity::Error, line);
    }
}

/// Prints to stdout, styling by severity.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn emit(&mut self, severity: Severity, line: &str) {
        match severity {
            Severity::Plain => println!("{line}"),
            Severity::Info => println!("{}", line.cyan()),
            Severity::Warn => println!("{}", line.yellow()),
            Severity::Error => println!("{}", line.red()),
        }
    }
}

/// Captures every emitted line. Used by tests and scripted runs.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    pub lines: Vec<(Severity, String)>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|(_, l)| l.contains(needle))
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, l)| l.as_str())
            .collect()
    }

    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|(_, l)| l.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Console for BufferConsole {
    fn emit(&mut self, severity: Severity, line: &str) {
        // Multi-line messages are stored line by line so assertions can match
        // on individual lines.
        for part in line.lines() {
            self.lines.push((severity, part.to_string()));
        }
        if line.is_empty() {
            self.lines.push((severity, String::new()));
        }
    }
}

/// Pointer to the settings that make failures propagate with full detail.
pub fn inform_verbose_and_debug(console: &mut dyn Console) {
    console.info(
        "For more info invoke `set exception-verbose on` and rerun the command\n\
         or debug it by yourself with `set exception-debugger on`",
    );
}

pub fn inform_report_issue(console: &mut dyn Console, what: &str) {
    console.info(&format!(
        "If you think this is a bug, please report it with the steps that led to: {what}"
    ));
}
