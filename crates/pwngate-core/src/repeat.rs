//! Detecting "the operator just pressed Enter".
//!
//! Hosts re-run the previous command on an empty line without appending to
//! their history. So if the newest history entry carries a sequence number we
//! have already seen, the current invocation is a repeat.

use crate::host::Host;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone)]
pub struct RepeatDetector {
    seen: BTreeSet<u64>,
}

impl RepeatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_repeat(&mut self, host: &dyn Host, raw: &str, interactive: bool) -> bool {
        if !interactive {
            return false;
        }

        let Some(last_line) = host.history_tail() else {
            return false;
        };
        let Some((number, command)) = parse_history_line(&last_line) else {
            tracing::debug!(line = %last_line, "unparsable history entry, assuming new command");
            return false;
        };

        if self.seen.insert(number) {
            return false;
        }

        command.ends_with(raw)
    }

    #[cfg(test)]
    fn seen(&self, number: u64) -> bool {
        self.seen.contains(&number)
    }
}

/// `"  5  next"` → `(5, "next")`.
fn parse_history_line(line: &str) -> Option<(u64, &str)> {
    let line = line.trim_start();
    let split = line.find(char::is_whitespace)?;
    let number = line[..split].parse::<u64>().ok()?;
    Some((number, line[split..].trim()))
}
