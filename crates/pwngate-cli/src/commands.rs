//! The shell's own commands.
//!
//! Each one is deliberately thin: it exists to put a particular combination of
//! argument coercion, gates and heap resolution through the dispatcher.

use anyhow::{anyhow, bail};
use pwngate_core::{
    ArgumentSpec, ArgValue, Coercion, CommandContext, CommandDescriptor, Dispatcher, Gate, Param,
    RegistryError,
};
use regex::Regex;
use std::cell::Cell;
use std::rc::Rc;

use crate::target::SimulatedTarget;

/// Pointer width of the simulated targets.
const PTR_SIZE: i128 = 8;

pub fn register_all(
    dispatcher: &mut Dispatcher,
    target: &Rc<SimulatedTarget>,
) -> Result<(), RegistryError> {
    for descriptor in [
        segment_base("fsbase", "fs_base"),
        segment_base("gsbase", "gs_base"),
        ghidra(target.clone()),
        distance(),
        nextcall(target.clone()),
        kversion(target.clone()),
        arena(),
        tcachebins(),
        heap_config(),
    ] {
        dispatcher.register(descriptor)?;
    }
    Ok(())
}

fn segment_base(name: &str, register: &'static str) -> CommandDescriptor {
    let segment = &register[..2];
    CommandDescriptor::new(
        name,
        ArgumentSpec::new(&format!("Prints out the {segment} base address.")),
        move |ctx| {
            let base = ctx.host.evaluate(&format!("${register}"))?;
            ctx.println(&format!("{:#x}", base as u64));
            Ok(())
        },
    )
    .category("Register")
    .gate(Gate::WhenRunning)
    .gate(Gate::with_arch(&["i386", "x86-64"]))
}

fn ghidra(target: Rc<SimulatedTarget>) -> CommandDescriptor {
    CommandDescriptor::new(
        "ghidra",
        ArgumentSpec::new("Decompile a given function using Ghidra.").param(Param::optional(
            "func",
            "Function to be decompiled. Defaults to the current function.",
        )),
        move |ctx| {
            let func = match ctx.args.str("func") {
                Some(f) => f.to_string(),
                None => current_function(ctx, &target)?,
            };
            let Some(source) = target.description().decompiled.get(&func) else {
                bail!("Could not find function {func}");
            };
            for line in source.lines() {
                ctx.println(line);
            }
            Ok(())
        },
    )
    .category("Integrations")
    .gate(Gate::WithFile)
}

fn current_function(ctx: &CommandContext<'_>, target: &SimulatedTarget) -> anyhow::Result<String> {
    let pc = ctx.host.evaluate("$pc")? as u64;
    target
        .description()
        .symbols
        .iter()
        .filter(|(_, addr)| **addr <= pc)
        .max_by_key(|(_, addr)| **addr)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| anyhow!("Could not determine the current function at {pc:#x}"))
}

fn distance() -> CommandDescriptor {
    CommandDescriptor::new(
        "distance",
        ArgumentSpec::new("Print the distance between the two arguments.")
            .param(Param::positional("a", "The first address.").coerce(Coercion::ExpressionIntOrRaise))
            .param(Param::positional("b", "The second address.").coerce(Coercion::ExpressionIntOrRaise)),
        |ctx| {
            let (Some(a), Some(b)) = (ctx.args.int("a"), ctx.args.int("b")) else {
                bail!("both addresses are required");
            };
            let dist = i128::from(b) - i128::from(a);
            ctx.println(&format!(
                "{a:#x}->{b:#x} is {} bytes ({} words)",
                signed_hex(dist),
                signed_hex(dist / PTR_SIZE)
            ));
            Ok(())
        },
    )
    .alias("dist")
    .category("Memory")
}

fn signed_hex(v: i128) -> String {
    if v < 0 {
        format!("-{:#x}", v.unsigned_abs())
    } else {
        format!("{v:#x}")
    }
}

fn nextcall(target: Rc<SimulatedTarget>) -> CommandDescriptor {
    let cursor = Cell::new(0usize);
    CommandDescriptor::new(
        "nextcall",
        ArgumentSpec::new("Breaks at the next call instruction.").param(Param::optional(
            "symbol_regex",
            "A regex matching the name of the next function to stop at.",
        )),
        move |ctx| {
            let filter = ctx.args.str("symbol_regex").map(Regex::new).transpose()?;
            if ctx.repeat {
                ctx.console.info("Continuing to the next call (repeated)");
            }

            let sites = &target.description().call_sites;
            let found = sites
                .iter()
                .enumerate()
                .skip(cursor.get())
                .find(|(_, site)| filter.as_ref().map_or(true, |re| re.is_match(&site.callee)));
            match found {
                Some((index, site)) => {
                    cursor.set(index + 1);
                    ctx.println(&format!("Stopped at call {:#x} <{}>", site.address, site.callee));
                }
                None => {
                    cursor.set(sites.len());
                    ctx.console.warn("No further call instructions.");
                }
            }
            Ok(())
        },
    )
    .category("Step/Next/Continue")
    .gate(Gate::WhenRunning)
}

fn kversion(target: Rc<SimulatedTarget>) -> CommandDescriptor {
    CommandDescriptor::new(
        "kversion",
        ArgumentSpec::new("Displays the kernel version."),
        move |ctx| {
            let version = target
                .description()
                .kernel_version
                .as_deref()
                .ok_or_else(|| anyhow!("linux_banner is not readable"))?;
            ctx.println(version);
            Ok(())
        },
    )
    .category("Kernel")
    .gate(Gate::WhenQemuKernel)
    .gate(Gate::WithKernelDebugSyms)
    .gate(Gate::WhenPagingEnabled)
}

fn arena() -> CommandDescriptor {
    CommandDescriptor::new(
        "arena",
        ArgumentSpec::new("Print the contents of an arena.").param(
            Param::optional("addr", "Address of the arena.").coerce(Coercion::HexOrExpression),
        ),
        |ctx| {
            let addr = match ctx.args.get("addr") {
                Some(ArgValue::Int(addr)) => *addr,
                _ => ctx.resolve_heap_symbol("main_arena")?,
            };
            let via = ctx.heap_strategy().map(|s| s.name()).unwrap_or("none");
            ctx.println(&format!("arena @ {addr:#x} (resolved via {via})"));
            Ok(())
        },
    )
    .category("Heap")
    .gate(Gate::WhenRunning)
    .gate(Gate::WhenHeapInitialized)
    .requires_resolved_heap()
}

fn tcachebins() -> CommandDescriptor {
    CommandDescriptor::new(
        "tcachebins",
        ArgumentSpec::new("Print the contents of a tcache."),
        |ctx| {
            let tcache = ctx.resolve_heap_symbol("tcache")?;
            ctx.println(&format!("tcachebins @ {tcache:#x}"));
            Ok(())
        },
    )
    .category("Heap")
    .gate(Gate::WhenRunning)
    .gate(Gate::WhenHeapInitialized)
    .gate(Gate::WithTcache)
    .requires_resolved_heap()
}

fn heap_config() -> CommandDescriptor {
    CommandDescriptor::new(
        "heap_config",
        ArgumentSpec::new("Shows heap related configuration."),
        |ctx| {
            let settings = ctx.config.describe();
            let width = settings.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
            for (name, value) in settings {
                ctx.println(&format!("{name:<width$} = {value}"));
            }
            ctx.println("Use `set <setting> <value>` to change them.");
            Ok(())
        },
    )
    .category("Heap")
}
