//! Argument pipeline: raw command line → typed values.
//!
//! Parameters are declared once per command as an [`ArgumentSpec`]. The
//! declaration is turned into a `clap` command, which owns flag handling and the usage
//! text; after `clap` has matched the tokens, each value is coerced according
//! to its [`Coercion`] rule (possibly through the host evaluator).
//!
//! Any failure yields [`UsageAborted`], never a partially parsed bundle.

use crate::coerce::{ExpressionCoercer, Fixed};
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ColorChoice};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Pass the token through.
    Raw,
    /// Evaluate; keep the token as a string on failure.
    ExpressionInt,
    /// Evaluate; abort the parse on failure.
    ExpressionIntOrRaise,
    /// Base-16 literal first, then as [`Coercion::ExpressionIntOrRaise`].
    HexOrExpression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(u64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Positional { required: bool },
    Option { long: String, short: Option<char> },
    Flag { long: String, short: Option<char> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub coercion: Coercion,
    pub default: Option<ArgValue>,
    pub help: String,
}

impl Param {
    fn base(name: &str, kind: ParamKind, help: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            coercion: Coercion::Raw,
            default: None,
            help: help.to_string(),
        }
    }

    pub fn positional(name: &str, help: &str) -> Self {
        Self::base(name, ParamKind::Positional { required: true }, help)
    }

    /// A positional that may be left out (`nargs="?"`).
    pub fn optional(name: &str, help: &str) -> Self {
        Self::base(name, ParamKind::Positional { required: false }, help)
    }

    /// `--name <value>`.
    pub fn option(name: &str, help: &str) -> Self {
        let long = name.replace('_', "-");
        Self::base(name, ParamKind::Option { long, short: None }, help)
    }

    /// `--name`, stored as a boolean.
    pub fn flag(name: &str, help: &str) -> Self {
        let long = name.replace('_', "-");
        let mut p = Self::base(name, ParamKind::Flag { long, short: None }, help);
        p.default = Some(ArgValue::Bool(false));
        p
    }

    pub fn short(mut self, c: char) -> Self {
        match &mut self.kind {
            ParamKind::Option { short, .. } | ParamKind::Flag { short, .. } => *short = Some(c),
            ParamKind::Positional { .. } => {}
        }
        self
    }

    pub fn coerce(mut self, coercion: Coercion) -> Self {
        self.coercion = coercion;
        self
    }

    pub fn default_value(mut self, value: ArgValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Defaults are shown the way an operator would type them: integers in
    /// decimal, flags as `True`/`False`.
    fn help_text(&self) -> String {
        let shown = match &self.default {
            None => return self.help.clone(),
            Some(ArgValue::Int(v)) => v.to_string(),
            Some(ArgValue::Bool(true)) => "True".to_string(),
            Some(ArgValue::Bool(false)) => "False".to_string(),
            Some(ArgValue::Str(s)) => s.clone(),
        };
        format!("{} (default: {shown})", self.help)
    }

    fn to_clap(&self) -> Arg {
        let arg = Arg::new(self.name.clone()).help(self.help_text());
        match &self.kind {
            ParamKind::Positional { required } => arg
                .value_name(self.name.clone())
                .required(*required)
                .allow_negative_numbers(true)
                .action(ArgAction::Set),
            ParamKind::Option { long, short } => {
                let arg = arg
                    .long(long.clone())
                    .value_name(self.name.to_ascii_uppercase())
                    .allow_negative_numbers(true)
                    .action(ArgAction::Set);
                match short {
                    Some(c) => arg.short(*c),
                    None => arg,
                }
            }
            ParamKind::Flag { long, short } => {
                let arg = arg.long(long.clone()).action(ArgAction::SetTrue);
                match short {
                    Some(c) => arg.short(*c),
                    None => arg,
                }
            }
        }
    }
}

/// Per-command parameter declarations plus the command description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub description: String,
    pub params: Vec<Param>,
}

impl ArgumentSpec {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

/// Coerced arguments, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    values: Vec<(String, ArgValue)>,
}

impl ParsedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn int(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ArgValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ArgValue::Bool(true)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Parsing stopped; `message` is what the operator should see instead of the
/// command running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UsageAborted {
    pub message: String,
    /// The operator asked for `--help`, nothing was actually wrong.
    pub help_requested: bool,
}

#[derive(Debug, Clone)]
pub struct ArgumentPipeline {
    command: clap::Command,
    spec: ArgumentSpec,
}

impl ArgumentPipeline {
    pub fn new(name: &str, spec: ArgumentSpec) -> Self {
        let mut command = clap::Command::new(name.to_string())
            .about(spec.description.clone())
            .no_binary_name(true)
            .disable_version_flag(true)
            .color(ColorChoice::Never);
        for param in &spec.params {
            command = command.arg(param.to_clap());
        }
        Self { command, spec }
    }

    pub fn spec(&self) -> &ArgumentSpec {
        &self.spec
    }

    pub fn help(&self) -> String {
        self.command.clone().render_help().to_string()
    }

    pub fn parse(
        &self,
        raw_line: &str,
        coercer: &mut ExpressionCoercer<'_>,
    ) -> Result<ParsedArgs, UsageAborted> {
        let tokens = split_command_line(raw_line);
        let matches = self
            .command
            .clone()
            .try_get_matches_from(tokens)
            .map_err(|e| UsageAborted {
                help_requested: matches!(
                    e.kind(),
                    ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ),
                message: e.render().to_string(),
            })?;

        let mut values = Vec::with_capacity(self.spec.params.len());
        for param in &self.spec.params {
            if let ParamKind::Flag { .. } = param.kind {
                values.push((param.name.clone(), ArgValue::Bool(matches.get_flag(&param.name))));
                continue;
            }

            let value = match matches.get_one::<String>(&param.name) {
                Some(token) => self.coerce(param, token, coercer)?,
                None => match &param.default {
                    Some(d) => d.clone(),
                    None => continue,
                },
            };
            values.push((param.name.clone(), value));
        }

        Ok(ParsedArgs { values })
    }

    fn coerce(
        &self,
        param: &Param,
        token: &str,
        coercer: &mut ExpressionCoercer<'_>,
    ) -> Result<ArgValue, UsageAborted> {
        match param.coercion {
            Coercion::Raw => Ok(ArgValue::Str(token.to_string())),
            Coercion::ExpressionInt => Ok(match coercer.sloppy_parse(token) {
                Fixed::Int(v) => ArgValue::Int(v),
                Fixed::Raw(s) => ArgValue::Str(s),
            }),
            Coercion::ExpressionIntOrRaise => self.expression_or_abort(param, token, coercer),
            Coercion::HexOrExpression => match parse_hex(token) {
                Some(v) => Ok(ArgValue::Int(v)),
                None => self.expression_or_abort(param, token, coercer),
            },
        }
    }

    fn expression_or_abort(
        &self,
        param: &Param,
        token: &str,
        coercer: &mut ExpressionCoercer<'_>,
    ) -> Result<ArgValue, UsageAborted> {
        coercer.fix_int(token).map(ArgValue::Int).map_err(|_| {
            let err = self.command.clone().error(
                ErrorKind::ValueValidation,
                format!(
                    "argument {}: Incorrect address (or GDB expression): {token}",
                    param.name
                ),
            );
            UsageAborted {
                message: err.render().to_string(),
                help_requested: false,
            }
        })
    }
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Split a line into arguments with shell-like quoting: `"..."` and `'...'`
/// group words, a backslash escapes the next character (except inside single
/// quotes). Quoted empty strings are kept as empty arguments.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut pending = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                pending = true;
            }
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    pending = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if pending || !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            (_, c) => current.push(c),
        }
    }

    if pending || !current.is_empty() {
        out.push(current);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::host::{Host, SessionState};
    use crate::GlibcVersion;

    struct EvalHost;

    impl Host for EvalHost {
        fn evaluate(&self, expr: &str) -> Result<i128, HostError> {
            match expr {
                "$rsp" => Ok(0x7ffd_1000),
                "main" => Ok(0x401136),
                "main+4" => Ok(0x40113a),
                other => other
                    .parse::<i128>()
                    .map_err(|_| HostError::NoSymbol(other.to_string())),
            }
        }
        fn register_names(&self) -> Vec<String> {
            vec!["rsp".to_string()]
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

    fn parse(spec: ArgumentSpec, line: &str) -> Result<ParsedArgs, UsageAborted> {
        let host = EvalHost;
        let mut coercer = ExpressionCoercer::new(&host);
        ArgumentPipeline::new("cmd", spec).parse(line, &mut coercer)
    }

    #[test]
    fn split_command_line_handles_quotes_and_escapes() {
        assert_eq!(
            split_command_line(r#"a "b c" 'd \e' f\ g"#),
            vec!["a", "b c", r"d \e", "f g"]
        );
        assert_eq!(split_command_line(r#"x "" y"#), vec!["x", "", "y"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn empty_line_with_no_params_is_empty_bundle() {
        let args = parse(ArgumentSpec::new("Nothing to see."), "").unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn missing_required_positional_aborts_with_usage() {
        let spec = ArgumentSpec::new("Needs an address.")
            .param(Param::positional("addr", "Address").coerce(Coercion::ExpressionIntOrRaise));
        let err = parse(spec, "").unwrap_err();
        assert!(!err.help_requested);
        assert!(err.message.contains("Usage: cmd <addr>"), "{}", err.message);
    }

    #[test]
    fn unknown_flags_and_extra_tokens_abort() {
        let spec = ArgumentSpec::new("One arg.").param(Param::optional("func", "Function"));
        assert!(parse(spec.clone(), "--nope").is_err());
        assert!(parse(spec, "a b").is_err());
    }

    #[test]
    fn help_flag_is_reported_as_help() {
        let spec = ArgumentSpec::new("Prints the thing.");
        let err = parse(spec, "--help").unwrap_err();
        assert!(err.help_requested);
        assert!(err.message.contains("Prints the thing."));
    }

    #[test]
    fn hex_or_expression_prefers_base16() {
        let spec = ArgumentSpec::new("Hex.")
            .param(Param::positional("addr", "Address").coerce(Coercion::HexOrExpression));
        assert_eq!(parse(spec.clone(), "1234").unwrap().int("addr"), Some(0x1234));
        assert_eq!(parse(spec.clone(), "0x10").unwrap().int("addr"), Some(0x10));
        assert_eq!(parse(spec.clone(), "main+4").unwrap().int("addr"), Some(0x40113a));
        let err = parse(spec, "bogus$$").unwrap_err();
        assert!(err
            .message
            .contains("Incorrect address (or GDB expression): bogus$$"));
    }

    #[test]
    fn expression_int_falls_back_to_string() {
        let spec = ArgumentSpec::new("Sloppy.")
            .param(Param::positional("what", "Thing").coerce(Coercion::ExpressionInt));
        assert_eq!(parse(spec.clone(), "rsp").unwrap().int("what"), Some(0x7ffd_1000));
        assert_eq!(
            parse(spec, "printf").unwrap().str("what"),
            Some("printf")
        );
    }

    #[test]
    fn defaults_options_and_flags() {
        let spec = ArgumentSpec::new("Mixed.")
            .param(Param::optional("func", "Function"))
            .param(
                Param::option("count", "How many")
                    .short('c')
                    .coerce(Coercion::ExpressionIntOrRaise)
                    .default_value(ArgValue::Int(8)),
            )
            .param(Param::flag("verbose", "Be loud").short('v'));

        let args = parse(spec.clone(), "").unwrap();
        assert_eq!(args.str("func"), None);
        assert_eq!(args.int("count"), Some(8));
        assert!(!args.flag("verbose"));

        let args = parse(spec.clone(), "main -c 3 -v").unwrap();
        assert_eq!(args.str("func"), Some("main"));
        assert_eq!(args.int("count"), Some(3));
        assert!(args.flag("verbose"));

        let help = ArgumentPipeline::new("cmd", spec).help();
        assert!(help.contains("How many (default: 8)"), "{help}");
        assert!(help.contains("Be loud (default: False)"), "{help}");
        assert!(!help.contains("Function (default"), "{help}");
    }
}
