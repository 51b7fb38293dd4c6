//! Turning operator tokens into machine integers.
//!
//! A token is first evaluated verbatim by the host. If that fails, bare
//! register names are rewritten into the host's `$reg` form and the result is
//! evaluated once more.

use crate::console::Console;
use crate::error::HostError;
use crate::host::Host;
use regex::{Captures, Regex};
use std::collections::BTreeSet;

/// Values are coerced to the widest target word.
const WORD_MASK: i128 = 0xFFFF_FFFF_FFFF_FFFF;

/// Architecture-neutral aliases every host understands.
const GENERIC_REGISTERS: &[&str] = &["sp", "pc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    /// Return the raw token instead of nothing when evaluation fails.
    pub sloppy: bool,
    /// Do not print the evaluation failure.
    pub quiet: bool,
    /// Propagate the evaluation failure.
    pub reraise: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            sloppy: false,
            quiet: true,
            reraise: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fixed {
    Int(u64),
    Raw(String),
}

pub struct ExpressionCoercer<'a> {
    host: &'a dyn Host,
    console: Option<&'a mut dyn Console>,
}

impl<'a> ExpressionCoercer<'a> {
    pub fn new(host: &'a dyn Host) -> Self {
        Self {
            host,
            console: None,
        }
    }

    /// Where non-quiet failures are reported.
    pub fn with_console(mut self, console: &'a mut dyn Console) -> Self {
        self.console = Some(console);
        self
    }

    fn evaluate(&self, expr: &str) -> Result<u64, HostError> {
        self.host.evaluate(expr).map(|v| (v & WORD_MASK) as u64)
    }

    pub fn fix(&mut self, token: &str, opts: FixOptions) -> Result<Option<Fixed>, HostError> {
        let first = match self.evaluate(token) {
            Ok(v) => return Ok(Some(Fixed::Int(v))),
            Err(e) => e,
        };

        let rewritten = rewrite_registers(token, &self.host.register_names());
        let err = if rewritten == token {
            first
        } else {
            match self.evaluate(&rewritten) {
                Ok(v) => {
                    tracing::trace!(token, rewritten = %rewritten, "register rewrite resolved token");
                    return Ok(Some(Fixed::Int(v)));
                }
                Err(e) => e,
            }
        };

        if !opts.quiet {
            if let Some(console) = self.console.as_deref_mut() {
                console.error(&err.to_string());
            }
        }
        if opts.reraise {
            return Err(err);
        }
        if opts.sloppy {
            return Ok(Some(Fixed::Raw(token.to_string())));
        }
        Ok(None)
    }

    /// Evaluate or fail.
    pub fn fix_int(&mut self, token: &str) -> Result<u64, HostError> {
        let opts = FixOptions {
            reraise: true,
            ..FixOptions::default()
        };
        match self.fix(token, opts)? {
            Some(Fixed::Int(v)) => Ok(v),
            _ => Err(HostError::Other(format!("cannot evaluate `{token}`"))),
        }
    }

    /// Evaluate, keeping the token as a string on failure.
    pub fn sloppy_parse(&mut self, token: &str) -> Fixed {
        let opts = FixOptions {
            sloppy: true,
            ..FixOptions::default()
        };
        match self.fix(token, opts) {
            Ok(Some(fixed)) => fixed,
            _ => Fixed::Raw(token.to_string()),
        }
    }
}

/// Rewrite bare (or already `$`-prefixed) register names into `$name`.
pub fn rewrite_registers(expr: &str, registers: &[String]) -> String {
    let mut names: BTreeSet<&str> = registers
        .iter()
        .map(|r| r.trim_start_matches('$'))
        .filter(|r| !r.is_empty())
        .collect();
    names.extend(GENERIC_REGISTERS.iter().copied());

    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(re) = Regex::new(&format!(r"\$?\b({alternation})\b")) else {
        return expr.to_string();
    };
    re.replace_all(expr, |caps: &Captures| format!("${}", &caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferConsole;
    use crate::host::SessionState;
    use crate::GlibcVersion;
    use std::cell::RefCell;

    /// Knows `$rax`, `$sp`, `$pc`, plain integers and the symbol `main`.
    #[derive(Default)]
    struct RegHost {
        calls: RefCell<Vec<String>>,
    }

    impl Host for RegHost {
        fn evaluate(&self, expr: &str) -> Result<i128, HostError> {
            self.calls.borrow_mut().push(expr.to_string());
            match expr {
                "$rax" => Ok(0x41),
                "$rax+8" => Ok(0x49),
                "$sp" => Ok(0x7ffe_0000),
                "main" => Ok(0x401000),
                "-1" => Ok(-1),
                other => other
                    .parse::<i128>()
                    .map_err(|_| HostError::NoSymbol(other.to_string())),
            }
        }
        fn register_names(&self) -> Vec<String> {
            vec!["rax".into(), "rbx".into(), "rsp".into()]
        }
        fn history_tail(&self) -> Option<String> {
            None
        }
        fn builtin_listing(&self) -> String {
            String::new()
        }
        fn session(&self) -> SessionState {
            SessionState::default()
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
    fn rewrites_register_names_on_word_boundaries() {
        let regs = vec!["rax".to_string(), "rsp".to_string()];
        assert_eq!(rewrite_registers("rax+8", &regs), "$rax+8");
        assert_eq!(rewrite_registers("$rax", &regs), "$rax");
        assert_eq!(rewrite_registers("sp", &regs), "$sp");
        assert_eq!(rewrite_registers("raxx", &regs), "raxx");
        assert_eq!(rewrite_registers("*(rsp+pc)", &regs), "*($rsp+$pc)");
    }

    #[test]
    fn verbatim_success_skips_rewrite() {
        let host = RegHost::default();
        let mut c = ExpressionCoercer::new(&host);
        assert_eq!(c.fix_int("main").unwrap(), 0x401000);
        assert_eq!(host.calls.borrow().len(), 1);
    }

    #[test]
    fn retries_once_with_register_rewrite() {
        let host = RegHost::default();
        let mut c = ExpressionCoercer::new(&host);
        assert_eq!(c.fix_int("rax+8").unwrap(), 0x49);
        assert_eq!(*host.calls.borrow(), vec!["rax+8", "$rax+8"]);
    }

    #[test]
    fn identical_rewrite_is_not_evaluated_twice() {
        let host = RegHost::default();
        let mut c = ExpressionCoercer::new(&host);
        assert!(c.fix_int("nosuchthing").is_err());
        assert_eq!(host.calls.borrow().len(), 1);
    }

    #[test]
    fn negative_values_wrap_to_word() {
        let host = RegHost::default();
        let mut c = ExpressionCoercer::new(&host);
        assert_eq!(c.fix_int("-1").unwrap(), u64::MAX);
    }

    #[test]
    fn modes_control_failure_shape() {
        let host = RegHost::default();
        let mut console = BufferConsole::new();
        {
            let mut c = ExpressionCoercer::new(&host).with_console(&mut console);
            let sloppy = FixOptions {
                sloppy: true,
                ..FixOptions::default()
            };
            assert_eq!(
                c.fix("bogus", sloppy).unwrap(),
                Some(Fixed::Raw("bogus".to_string()))
            );
            assert_eq!(c.fix("bogus", FixOptions::default()).unwrap(), None);
            let loud = FixOptions {
                quiet: false,
                ..FixOptions::default()
            };
            assert_eq!(c.fix("bogus", loud).unwrap(), None);
        }
        assert_eq!(console.lines.len(), 1);
        assert!(console.contains("No symbol \"bogus\""));
    }
}
