//! Process supervisor.
//!
//! Runs each case in its own child process, one at a time. The child's stdout
//! is read on a dedicated thread and fed line by line into the transcript, so
//! every record written before a crash is kept. stderr is drained on another
//! thread and forwarded to the log. Each child leads its own process group;
//! the group is killed once the case is over, the child is reaped, and every
//! reader thread is joined before the next case starts.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::exec::{termination_from_status, unterminated_case, CaseLauncher};
use crate::error::HarnessError;
use crate::model::{FaultKind, RunReport, Termination};
use crate::protocol::WireFormat;
use crate::summary::Transcript;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    timeout: Option<Duration>,
    wire: WireFormat,
}

impl Supervisor {
    pub fn new(timeout: Option<Duration>, wire: WireFormat) -> Self {
        Self { timeout, wire }
    }

    /// Runs `cases` through `launcher` and builds the report. When `echo` is
    /// given, the aggregated marker stream is written to it as it arrives.
    pub fn run(
        &self,
        suite: &str,
        launcher: &dyn CaseLauncher,
        cases: &[(usize, String)],
        skipped: Vec<String>,
        echo: Option<&mut dyn Write>,
    ) -> Result<RunReport, HarnessError> {
        debug!(suite, target = %launcher.describe(), cases = cases.len(), "supervising");
        let mut transcript = Transcript::new(echo, self.wire);
        for (index, name) in cases {
            self.run_case(launcher, *index, name, &mut transcript)?;
        }
        Ok(transcript.finish(suite, skipped))
    }

    fn run_case(
        &self,
        launcher: &dyn CaseLauncher,
        index: usize,
        name: &str,
        transcript: &mut Transcript<'_>,
    ) -> Result<(), HarnessError> {
        transcript.open(name);
        let mut command = launcher.command(index);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Leader of its own group, so a kill reaches its descendants too.
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(case = name, "failed to launch {}: {}", launcher.describe(), err);
                return transcript.close(Termination::Faulted(FaultKind::Launch {
                    message: err.to_string(),
                }));
            }
        };

        let (tx, rx) = mpsc::channel::<String>();
        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| spawn_reader(stdout, move |line| tx.send(line).is_ok()));
        let case_name = name.to_string();
        let stderr_reader = child.stderr.take().map(|stderr| {
            spawn_reader(stderr, move |line| {
                if !line.trim().is_empty() {
                    warn!(case = %case_name, "stderr: {}", line);
                }
                true
            })
        });

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut timed_out = false;
        let mut exited = None;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => transcript.line(&line)?,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // Output may stay open in a process the case left behind.
                    if let Some(status) = child.try_wait()? {
                        exited = Some(status);
                        break;
                    }
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                timed_out = true;
                break;
            }
        }

        let status = match exited {
            Some(status) => status,
            None if timed_out => kill_and_reap(&mut child)?,
            None => match wait_until(&mut child, deadline)? {
                Some(status) => status,
                None => {
                    timed_out = true;
                    kill_and_reap(&mut child)?
                }
            },
        };

        // Nothing the case started outlives it, so its pipes close and the
        // readers finish.
        kill_group(&mut child);
        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            if reader.join().is_err() {
                error!(case = name, "output reader thread panicked");
            }
        }
        for line in rx.try_iter() {
            transcript.line(&line)?;
        }

        if timed_out {
            let ms = self.timeout.map_or(0, |t| t.as_millis() as u64);
            warn!(case = name, "killed after {} ms", ms);
            let fault = FaultKind::Timeout { ms };
            return if transcript.is_open() {
                transcript.close(Termination::Faulted(fault))
            } else {
                transcript.fault_closed(fault)
            };
        }
        if transcript.is_open() {
            transcript.close(unterminated_case(status, launcher.protocol()))
        } else if let Termination::Faulted(kind) = termination_from_status(status) {
            transcript.fault_closed(kind)
        } else {
            Ok(())
        }
    }
}

/// Reads `source` line by line on a new thread until EOF or until `sink`
/// returns `false`. Invalid UTF-8 is replaced, never fatal.
fn spawn_reader<R, S>(source: R, mut sink: S) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    S: FnMut(String) -> bool + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if !sink(line) {
                        break;
                    }
                }
            }
        }
    })
}

/// Waits for the child, giving up at `deadline`.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>, HarnessError> {
    let Some(deadline) = deadline else {
        return Ok(Some(child.wait()?));
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut Child) -> Result<ExitStatus, HarnessError> {
    kill_group(child);
    Ok(child.wait()?)
}

/// Kills the case's whole process group: the child and anything it forked.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // ESRCH once the group is empty.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
    // Fails only if the child already exited, which wait() reports anyway.
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
