//! Test doubles shared by the adapter and runner tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{CommandResult, CommandRunner, CommandSpec, ProcessRunner};

/// Records every command an adapter builds and substitutes a real `sh -c` script for it.
///
/// Scripts are consumed in order; the last one repeats once the list runs out.
/// `pkill` is never executed and reports "nothing matched".
pub struct ScriptedRunner {
    scripts: Vec<String>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new<I, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripts: scripts.into_iter().map(Into::into).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn backend_calls(&self) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program.as_os_str() != "pkill")
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> CommandResult {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(spec.clone());
            calls.iter().filter(|c| c.program.as_os_str() != "pkill").count()
        };

        if spec.program.as_os_str() == "pkill" {
            return CommandResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
            };
        }

        let script = self
            .scripts
            .get(index - 1)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default();

        ProcessRunner
            .run(&CommandSpec::new("sh").arg("-c").arg(script), timeout)
            .await
    }
}

/// A script that prints `text` verbatim on stdout.
pub fn print_stdout(text: &str) -> String {
    format!("cat <<'BURNOFF_EOF'\n{}\nBURNOFF_EOF", text)
}

/// A script that prints `text` verbatim on stderr.
pub fn print_stderr(text: &str) -> String {
    format!("cat 1>&2 <<'BURNOFF_EOF'\n{}\nBURNOFF_EOF", text)
}
