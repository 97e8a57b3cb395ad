//! Launches one simulator invocation and watches it until it exits or its
//! time runs out.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Appended to a cell's log when the run is cut short.
pub const TIMEOUT_SENTINEL: &str = "!!!!! TIMED OUT !!!!!";

const DOTS_PER_LINE: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Exit code of the child. A child killed by signal `n` reports `-n`.
    NonZeroExit(i32),
    TimedOut,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "ok",
            RunStatus::NonZeroExit(_) => "error",
            RunStatus::TimedOut => "timeout",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunStatus::Success => Some(0),
            RunStatus::NonZeroExit(code) => Some(*code),
            RunStatus::TimedOut => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub log_path: PathBuf,
    pub elapsed: Duration,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How often the child is checked for exit.
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL once a run has timed out.
    pub kill_grace: Duration,
    /// Print a dot to stdout on every poll.
    pub progress: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            kill_grace: Duration::from_secs(5),
            progress: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Runs `command` with stdout and stderr both sent to `log_path`
    /// (truncated first) and returns once the child has exited or has been
    /// terminated after `timeout`.
    ///
    /// The child's own failures come back as a `RunStatus`; an `Err` means
    /// the supervisor could not do its job (log not writable, binary not
    /// launchable). The log file exists after return in every case.
    pub fn run(&self, command: &[String], log_path: &Path, timeout: Duration) -> Result<RunResult> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        let mut log = File::create(log_path).map_err(|e| Error::io(log_path, e))?;
        let program = command.first().ok_or(Error::EmptyCommand)?;

        let stdout = log.try_clone().map_err(|e| Error::io(log_path, e))?;
        let stderr = log.try_clone().map_err(|e| Error::io(log_path, e))?;
        let mut cmd = Command::new(program);
        cmd.args(&command[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        drop(cmd);
        let pid = child.id();
        debug!(pid, program = %program, log = %log_path.display(), "spawned");

        // a timeout too large to represent never expires
        let deadline = started.checked_add(timeout);
        let mut ticks: u64 = 0;
        let exit = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child, self.options.kill_grace);
                    return Err(Error::io(log_path, e));
                }
            }
            let now = Instant::now();
            let nap = match deadline {
                Some(deadline) if now >= deadline => break None,
                Some(deadline) => self.options.poll_interval.min(deadline - now),
                None => self.options.poll_interval,
            };
            if self.options.progress {
                print_dot(ticks);
            }
            ticks += 1;
            thread::sleep(nap);
        };

        let status = match exit {
            Some(exit) => classify(exit),
            None => {
                warn!(pid, timeout_secs = timeout.as_secs_f64(), "run timed out, terminating");
                terminate(&mut child, self.options.kill_grace);
                writeln!(log, "{}", TIMEOUT_SENTINEL).map_err(|e| Error::io(log_path, e))?;
                RunStatus::TimedOut
            }
        };
        log.flush().map_err(|e| Error::io(log_path, e))?;

        Ok(RunResult {
            status,
            log_path: log_path.to_path_buf(),
            elapsed: started.elapsed(),
            pid,
        })
    }
}

fn print_dot(tick: u64) {
    let mut out = std::io::stdout().lock();
    let _ = if tick % DOTS_PER_LINE == DOTS_PER_LINE - 1 {
        writeln!(out, ".")
    } else {
        write!(out, ".")
    };
    let _ = out.flush();
}

fn classify(exit: ExitStatus) -> RunStatus {
    match exit.code() {
        Some(0) => RunStatus::Success,
        Some(code) => RunStatus::NonZeroExit(code),
        None => RunStatus::NonZeroExit(-signal_of(&exit)),
    }
}

#[cfg(unix)]
fn signal_of(exit: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    exit.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn signal_of(_exit: &ExitStatus) -> i32 {
    0
}

/// SIGTERM to the child's process group once, then SIGKILL if it is still
/// around after `grace`. Always reaps the child.
#[cfg(unix)]
fn terminate(child: &mut Child, grace: Duration) {
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::killpg(pgid, libc::SIGTERM);
    }
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() >= deadline => break,
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(_) => break,
        }
    }
    warn!(pid = pgid, "child ignored SIGTERM, sending SIGKILL");
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "warpbench_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    fn quick() -> Supervisor {
        Supervisor::new(SupervisorOptions {
            poll_interval: Duration::from_millis(50),
            kill_grace: Duration::from_millis(500),
            progress: false,
        })
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn success_captures_stdout_and_stderr() {
        let dir = scratch_dir("sup_ok");
        let log = dir.join("ok.log");
        let res = quick()
            .run(&sh("echo out; echo err 1>&2"), &log, Duration::from_secs(10))
            .expect("run");
        assert_eq!(res.status, RunStatus::Success);
        let text = fs::read_to_string(&log).expect("log");
        assert!(text.contains("out"), "stdout missing: {:?}", text);
        assert!(text.contains("err"), "stderr missing: {:?}", text);
        assert!(!text.contains(TIMEOUT_SENTINEL));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn nonzero_exit_is_reported_with_code() {
        let dir = scratch_dir("sup_rc");
        let log = dir.join("rc.log");
        let res = quick().run(&sh("exit 3"), &log, Duration::from_secs(10)).expect("run");
        assert_eq!(res.status, RunStatus::NonZeroExit(3));
        assert!(log.exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn timeout_terminates_child_and_writes_sentinel() {
        let dir = scratch_dir("sup_timeout");
        let log = dir.join("slow.log");
        let cmd = vec!["sleep".to_string(), "30".to_string()];
        let res = quick().run(&cmd, &log, Duration::from_millis(300)).expect("run");
        assert_eq!(res.status, RunStatus::TimedOut);
        assert!(res.elapsed < Duration::from_secs(10), "took {:?}", res.elapsed);
        assert!(!is_alive(res.pid), "child {} still running", res.pid);
        let text = fs::read_to_string(&log).expect("log");
        assert!(text.contains(TIMEOUT_SENTINEL), "sentinel missing: {:?}", text);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn huge_timeout_means_no_deadline() {
        let dir = scratch_dir("sup_huge");
        let log = dir.join("huge.log");
        let cmd = vec!["true".to_string()];
        let res = quick().run(&cmd, &log, Duration::from_secs(u64::MAX)).expect("run");
        assert_eq!(res.status, RunStatus::Success);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn timeout_escalates_when_sigterm_is_ignored() {
        let dir = scratch_dir("sup_stubborn");
        let log = dir.join("stubborn.log");
        let res = quick()
            .run(&sh("trap '' TERM; sleep 30"), &log, Duration::from_millis(200))
            .expect("run");
        assert_eq!(res.status, RunStatus::TimedOut);
        assert!(!is_alive(res.pid), "child {} survived SIGKILL", res.pid);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_binary_is_a_spawn_error_but_log_exists() {
        let dir = scratch_dir("sup_spawn");
        let log = dir.join("missing.log");
        let cmd = vec![dir.join("no_such_sim").to_string_lossy().to_string()];
        let err = quick().run(&cmd, &log, Duration::from_secs(1)).expect_err("spawn must fail");
        assert!(matches!(err, Error::Spawn { .. }), "unexpected error: {}", err);
        assert!(log.exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_command_is_rejected() {
        let dir = scratch_dir("sup_empty");
        let err = quick()
            .run(&[], &dir.join("empty.log"), Duration::from_secs(1))
            .expect_err("empty command");
        assert!(matches!(err, Error::EmptyCommand));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn signal_death_reports_negative_code() {
        let dir = scratch_dir("sup_signal");
        let log = dir.join("sig.log");
        let res = quick().run(&sh("kill -9 $$"), &log, Duration::from_secs(10)).expect("run");
        assert_eq!(res.status, RunStatus::NonZeroExit(-9));
        let _ = fs::remove_dir_all(dir);
    }
}
