// External command backend: runs an executable and parses its JSON stdout

use anyhow::{anyhow, bail, Context};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A command invocation with a bounded run time
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(
        exec: &[String],
        env: BTreeMap<String, String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let (program, args) = exec
            .split_first()
            .ok_or_else(|| anyhow!("command exec is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env,
            timeout,
        })
    }

    /// Run the command and return its stdout.
    ///
    /// The timeout bounds the whole run, including collecting output that a
    /// background grandchild may keep open after the child exits. Non-zero
    /// exit status and exceeding the timeout are errors; a timed out child
    /// is killed.
    pub fn run(&self) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;
        let deadline = Instant::now() + self.timeout;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout of {} not captured", self.program))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr of {} not captured", self.program))?;
        let stdout = drain(stdout);
        let stderr = drain(stderr);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait().ok();
                bail!("{} timed out after {:?}", self.program, self.timeout);
            }
            sleep(POLL_INTERVAL);
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let output = match stdout.recv_timeout(remaining) {
            Ok(read) => {
                read.with_context(|| format!("Failed to read stdout of {}", self.program))?
            }
            Err(RecvTimeoutError::Timeout) => bail!(
                "{} timed out after {:?} waiting for its output to close",
                self.program,
                self.timeout
            ),
            Err(RecvTimeoutError::Disconnected) => {
                bail!("stdout reader of {} stopped unexpectedly", self.program)
            }
        };

        if !status.success() {
            let stderr = stderr
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok()
                .and_then(|read| read.ok())
                .unwrap_or_default();
            bail!("{} exited with {}: {}", self.program, status, stderr.trim());
        }
        Ok(output)
    }

    /// Run the command and parse its stdout as JSON
    pub fn run_json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let output = self.run()?;
        serde_json::from_str(&output)
            .with_context(|| format!("Invalid JSON output from {}", self.program))
    }
}

/// Read a pipe to its end on a detached thread. The reader outlives a
/// timed out run, until whoever holds the pipe open closes it.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = String::new();
        let read = pipe.read_to_string(&mut buf).map(|_| buf);
        // the receiver is gone once the run gave up waiting
        tx.send(read).ok();
    });
    rx
}
