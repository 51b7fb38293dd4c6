//! A debuggee described by a JSON file.
//!
//! The shell has no real debugger behind it. Instead a [`SimulatedTarget`]
//! answers every [`Host`] query from a static description: register values,
//! symbols, mapped libraries, the C library version and the session flags the
//! capability gates look at. Expressions are evaluated by a small `nom`
//! grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor ('*' factor)*
//! factor := number | '$' ident | ident | '(' expr ')' | '-' factor
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char as pchar, digit1, hex_digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, recognize},
    multi::fold_many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use pwngate_core::{GlibcVersion, Host, HostError, SessionState};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

/// What `help all` prints on a stock debugger, trimmed to the commands that
/// matter for shadowing checks.
pub const DEFAULT_BUILTINS: &str = "\
Command class: aliases

ni -- Step one instruction, but proceed through subroutine calls.
si -- Step one instruction exactly.
c -- Continue program being debugged, after signal or breakpoint.

Command class: breakpoints

break -- Set breakpoint at specified location.
delete -- Delete all or some breakpoints.
ignore -- Set ignore-count of breakpoint number N to COUNT.
tbreak -- Set a temporary breakpoint.

Command class: data

display -- Print value of expression EXP each time the program stops.
output -- Like \"print\" but don't put in value history and don't print newline.
print -- Print value of expression EXP.
set -- Evaluate expression EXP and assign result to variable VAR.
x -- Examine memory: x/FMT ADDRESS.

Command class: files

cd -- Set working directory to DIR for debugger.
file -- Use FILE as program to be debugged.
pwd -- Print working directory.
search -- Search for the next line matching the given regex.

Command class: running

continue -- Continue program being debugged, after signal or breakpoint.
finish -- Execute until selected stack frame returns.
kill -- Kill execution of program being debugged.
next -- Step program, proceeding through subroutine calls.
run -- Start debugged program.
start -- Start the debugged program stopping at the beginning of the main procedure.
step -- Step program until it reaches a different source line.

Command class: stack

backtrace -- Print backtrace of all stack frames, or innermost COUNT frames.
down -- Select and print stack frame called by this one.
frame -- Select and print a stack frame.
up -- Select and print stack frame that called this one.

Command class: status

info -- Generic command for showing things about the program being debugged.
show -- Generic command for showing things about the debugger.

Command class: support

define -- Define a new command name.
help -- Print list of commands.
quit -- Exit the debugger.
source -- Read commands from a file named FILE.
";

/// On-disk description of a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDescription {
    pub session: SessionState,
    pub registers: BTreeMap<String, u64>,
    pub symbols: BTreeMap<String, u64>,
    /// What a heuristic scan of the C library would find.
    pub heap_scan: BTreeMap<String, u64>,
    pub shared_libraries: Vec<String>,
    pub glibc: Option<GlibcVersion>,
    /// Replaces [`DEFAULT_BUILTINS`] when present.
    pub builtins: Option<String>,
    pub kernel_version: Option<String>,
    /// Function name → decompiled source.
    pub decompiled: BTreeMap<String, String>,
    /// Call sites `nextcall` steps through, in execution order.
    pub call_sites: Vec<CallSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub address: u64,
    pub callee: String,
}

#[derive(Debug, Default)]
pub struct SimulatedTarget {
    desc: TargetDescription,
    history: RefCell<Vec<(u64, String)>>,
}

impl SimulatedTarget {
    pub fn new(desc: TargetDescription) -> Self {
        Self {
            desc,
            history: RefCell::new(Vec::new()),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read target {}: {e}", path.display()))?;
        let desc: TargetDescription = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid target {}: {e}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            arch = %desc.session.arch,
            alive = desc.session.process_alive,
            "loaded target"
        );
        Ok(Self::new(desc))
    }

    pub fn description(&self) -> &TargetDescription {
        &self.desc
    }

    /// Append an interactively typed line to the command history.
    pub fn record_history(&self, line: &str) {
        let mut history = self.history.borrow_mut();
        let number = history.last().map(|(n, _)| n + 1).unwrap_or(1);
        history.push((number, line.to_string()));
    }

    fn register(&self, name: &str) -> Result<u64, HostError> {
        if !self.desc.session.process_alive {
            return Err(HostError::Other("No registers.".to_string()));
        }
        let fallbacks: &[&str] = match name {
            "pc" => &["pc", "rip", "eip"],
            "sp" => &["sp", "rsp", "esp"],
            _ => &[],
        };
        std::iter::once(name)
            .chain(fallbacks.iter().copied())
            .find_map(|n| self.desc.registers.get(n).copied())
            .ok_or_else(|| HostError::Other(format!("Invalid register `{name}'")))
    }

    fn symbol(&self, name: &str) -> Result<u64, HostError> {
        self.desc
            .symbols
            .get(name)
            .copied()
            .ok_or_else(|| HostError::NoSymbol(name.to_string()))
    }

    fn eval(&self, expr: &Expr) -> Result<i128, HostError> {
        let overflow = || HostError::Other("Integer overflow in expression.".to_string());
        match expr {
            Expr::Num(n) => Ok(*n),
            Expr::Register(name) => self.register(name).map(i128::from),
            Expr::Symbol(name) => self.symbol(name).map(i128::from),
            Expr::Neg(inner) => self.eval(inner)?.checked_neg().ok_or_else(overflow),
            Expr::Binary(op, lhs, rhs) => {
                let (a, b) = (self.eval(lhs)?, self.eval(rhs)?);
                let value = match op {
                    '+' => a.checked_add(b),
                    '-' => a.checked_sub(b),
                    _ => a.checked_mul(b),
                };
                value.ok_or_else(overflow)
            }
        }
    }
}

impl Host for SimulatedTarget {
    fn evaluate(&self, expr: &str) -> Result<i128, HostError> {
        let ast = parse_expression(expr)?;
        self.eval(&ast)
    }

    fn register_names(&self) -> Vec<String> {
        self.desc.registers.keys().cloned().collect()
    }

    fn history_tail(&self) -> Option<String> {
        self.history
            .borrow()
            .last()
            .map(|(number, text)| format!("{number:5}  {text}"))
    }

    fn builtin_listing(&self) -> String {
        self.desc
            .builtins
            .clone()
            .unwrap_or_else(|| DEFAULT_BUILTINS.to_string())
    }

    fn session(&self) -> SessionState {
        self.desc.session.clone()
    }

    fn shared_libraries(&self) -> Vec<String> {
        self.desc.shared_libraries.clone()
    }

    fn symbol_address(&self, name: &str) -> Option<u64> {
        self.desc.symbols.get(name).copied()
    }

    fn scan_heap_symbol(&self, name: &str, version: GlibcVersion) -> Option<u64> {
        let found = self.desc.heap_scan.get(name).copied();
        tracing::debug!(symbol = name, %version, ?found, "heuristic scan");
        found
    }

    fn glibc_version(&self) -> Option<GlibcVersion> {
        self.desc.glibc
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Num(i128),
    Register(String),
    Symbol(String),
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

fn parse_expression(text: &str) -> Result<Expr, HostError> {
    all_consuming(ws(expr))(text)
        .map(|(_, e)| e)
        .map_err(|_| HostError::Syntax(text.trim().to_string()))
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

fn number(input: &str) -> IResult<&str, i128> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h: &str| {
            i128::from_str_radix(h, 16)
        }),
        map_res(digit1, str::parse::<i128>),
    ))(input)
}

fn factor(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Num),
        map(preceded(pchar('$'), ident), |r: &str| Expr::Register(r.to_string())),
        map(ident, |s: &str| Expr::Symbol(s.to_string())),
        delimited(pchar('('), expr, pchar(')')),
        map(preceded(pchar('-'), factor), |e| Expr::Neg(Box::new(e))),
    )))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    fold_many0(
        pair(ws(tag("*")), factor),
        move || first.clone(),
        |acc, (_, rhs)| Expr::Binary('*', Box::new(acc), Box::new(rhs)),
    )(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(ws(one_of("+-")), term),
        move || first.clone(),
        |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)),
    )(input)
}
