use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

fn pwngate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pwngate"))
}

fn pwngate() -> Command {
    let mut cmd = Command::new(pwngate_bin());
    cmd.env("NO_COLOR", "1").env_remove("PWNGATE_LOG");
    cmd
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(&value).expect("serialize json"))
        .expect("write json");
    path
}

fn live_target() -> serde_json::Value {
    serde_json::json!({
        "session": {
            "file_loaded": true,
            "process_alive": true,
            "arch": "x86-64",
            "has_tcache": true,
            "heap_initialized": true
        },
        "registers": {
            "rip": 0x401150u64,
            "rsp": 0x7fffffffe000u64,
            "fs_base": 0x7ffff7d8a740u64
        },
        "symbols": {
            "main": 0x401136u64,
            "win": 0x401200u64
        },
        "heap_scan": {
            "main_arena": 0x7ffff7e19c80u64
        },
        "shared_libraries": ["/lib/x86_64-linux-gnu/libc.so.6"],
        "glibc": "2.35"
    })
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

#[test]
fn commands_run_against_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_json(dir.path(), "target.json", live_target());

    let out = pwngate()
        .arg("--target")
        .arg(&target)
        .args(["-q", "-x", "distance main win", "-x", "fsbase", "-x", "dist rsp rsp+16"])
        .output()
        .expect("run pwngate");

    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("0x401136->0x401200 is 0xca bytes (0x19 words)"), "{text}");
    assert!(text.contains("0x7ffff7d8a740"), "{text}");
    assert!(text.contains("0x7fffffffe000->0x7fffffffe010 is 0x10 bytes (0x2 words)"), "{text}");
}

#[test]
fn scripted_commands_are_echoed_unless_quiet() {
    let out = pwngate()
        .args(["-x", "show glibc"])
        .output()
        .expect("run pwngate");
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("pwngate> show glibc"), "{text}");
    assert!(text.contains("glibc: (auto)"), "{text}");
}

#[test]
fn gates_block_without_a_process() {
    let out = pwngate()
        .args(["-q", "-x", "fsbase", "-x", "nosuch"])
        .output()
        .expect("run pwngate");
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("fsbase: The program is not being run."), "{text}");
    assert!(text.contains("Undefined command: \"nosuch\".  Try \"help\"."), "{text}");
}

#[test]
fn heap_command_falls_back_to_heuristic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_json(dir.path(), "target.json", live_target());

    let out = pwngate()
        .arg("--target")
        .arg(&target)
        .args(["-q", "-x", "arena", "-x", "tcachebins"])
        .output()
        .expect("run pwngate");

    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("resolve the heap symbols via heuristic now"), "{text}");
    assert!(text.contains("arena @ 0x7ffff7e19c80 (resolved via"), "{text}");
    assert!(text.contains("tcachebins: Fail to resolve the symbol: `tcache`"), "{text}");
    assert!(text.contains("set exception-verbose on"), "{text}");
}

#[test]
fn config_file_overrides_heap_symbols() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_json(dir.path(), "target.json", live_target());
    let config = write_json(
        dir.path(),
        "config.json",
        serde_json::json!({
            "resolve_heap_via_heuristic": "force",
            "heap_addresses": { "tcache": 0x405010u64 }
        }),
    );

    let out = pwngate()
        .arg("--target")
        .arg(&target)
        .arg("--config")
        .arg(&config)
        .args(["-q", "-x", "tcachebins", "-x", "heap_config"])
        .output()
        .expect("run pwngate");

    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("tcachebins @ 0x405010"), "{text}");
    assert!(!text.contains("via heuristic now"), "{text}");
    assert!(text.contains("resolve-heap-via-heuristic"), "{text}");
}

#[test]
fn verbose_failures_stop_the_script() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_json(dir.path(), "target.json", live_target());

    let out = pwngate()
        .arg("--target")
        .arg(&target)
        .args(["-q", "-x", "set exception-verbose on", "-x", "ghidra nosuch", "-x", "fsbase"])
        .output()
        .expect("run pwngate");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("script failed at line 2"), "{}", stderr(&out));
    assert!(!stdout(&out).contains("0x7ffff7d8a740"));

    let out = pwngate()
        .arg("--target")
        .arg(&target)
        .args([
            "-q",
            "--continue-on-error",
            "-x",
            "set exception-verbose on",
            "-x",
            "ghidra nosuch",
            "-x",
            "fsbase",
        ])
        .output()
        .expect("run pwngate");
    assert!(out.status.success());
    assert!(stderr(&out).contains("Could not find function nosuch"));
    assert!(stdout(&out).contains("0x7ffff7d8a740"));
}

#[test]
fn script_from_stdin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = write_json(dir.path(), "target.json", live_target());

    let mut child = pwngate()
        .arg("--target")
        .arg(&target)
        .args(["-q", "--script", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn pwngate");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"# distance check\ndistance 0 0x40\nquit\nfsbase\n")
        .expect("write script");
    let out = child.wait_with_output().expect("wait pwngate");

    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("0x0->0x40 is 0x40 bytes (0x8 words)"), "{text}");
    assert!(!text.contains("0x7ffff7d8a740"), "{text}");
}

#[test]
fn usage_errors_print_usage() {
    let out = pwngate()
        .args(["-q", "-x", "distance 1", "-x", "help distance"])
        .output()
        .expect("run pwngate");
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("Usage: distance <a> <b>"), "{text}");
    assert!(text.contains("The second address."), "{text}");
}
