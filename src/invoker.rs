use crate::error::DispatchError;
use crate::resolver::ResolvedCommand;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Everything captured from one finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl InvocationResult {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines()
    }
}

/// Runs resolved commands. The dispatcher only talks to this seam, so tests
/// can substitute a spy.
pub trait Invoke: Send + Sync {
    fn invoke(&self, cmd: ResolvedCommand) -> Result<InvocationResult, DispatchError>;
}

/// Spawns real child processes with a cleared environment.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    path: String,
    env: BTreeMap<String, String>,
    max_output_bytes: usize,
}

impl ProcessInvoker {
    pub fn new(path: impl Into<String>, env: BTreeMap<String, String>, max_output_bytes: usize) -> Self {
        Self {
            path: path.into(),
            env,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &crate::config::DispatchConfig) -> Self {
        Self::new(config.path.clone(), config.env.clone(), config.max_output_bytes)
    }

    fn spawn(&self, cmd: &ResolvedCommand) -> Result<Child, DispatchError> {
        let mut command = Command::new(cmd.program());
        command
            .args(cmd.argv())
            .env_clear()
            .env("PATH", &self.path)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout can take down anything the script forked.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|source| DispatchError::Spawn {
            program: cmd.program().display().to_string(),
            source,
        })
    }
}

impl Invoke for ProcessInvoker {
    fn invoke(&self, cmd: ResolvedCommand) -> Result<InvocationResult, DispatchError> {
        let start_time = Instant::now();
        let timeout = cmd.timeout();
        let deadline = start_time + timeout;
        let mut child = self.spawn(&cmd)?;
        let pid = child.id();
        debug!(pid, operation = %cmd.operation(), "spawned");

        let mut readers = Readers::start(&mut child, self.max_output_bytes);

        let waited = child
            .wait_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|source| DispatchError::Io {
                context: "wait for child process",
                source,
            });

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(pid, timeout_ms = timeout.as_millis() as u64, "terminating timed out child");
                terminate(&mut child);
                // A descendant that left the group can hold the pipes open indefinitely.
                let _ = readers.settle(Instant::now() + READER_GRACE);
                return Err(DispatchError::OperationTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(err) => {
                terminate(&mut child);
                return Err(err);
            }
        };

        // The script is done, but anything it left running may still hold the pipes.
        if !readers.settle(deadline)? {
            warn!(pid, "output still open at the deadline; killing leftover processes");
            kill_group(pid);
            let _ = readers.settle(Instant::now() + READER_GRACE);
        }

        let (stdout, stderr) = readers.output();
        Ok(InvocationResult {
            exit_code: exit_code(status),
            stdout,
            stderr,
            duration: start_time.elapsed(),
        })
    }
}

/// How long readers get to finish after the process group was killed.
const READER_GRACE: Duration = Duration::from_millis(200);

/// Bytes read so far from one pipe.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}

/// Reader threads for both output pipes. Each reports once, on EOF or error.
struct Readers {
    stdout: Captured,
    stderr: Captured,
    done: Receiver<io::Result<()>>,
    pending: usize,
}

impl Readers {
    fn start(child: &mut Child, limit: usize) -> Self {
        let (tx, done) = mpsc::channel();
        let mut pending = 0;
        let stdout = Captured::default();
        let stderr = Captured::default();
        if let Some(pipe) = child.stdout.take() {
            drain(pipe, limit, stdout.clone(), tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            drain(pipe, limit, stderr.clone(), tx);
            pending += 1;
        }
        Self {
            stdout,
            stderr,
            done,
            pending,
        }
    }

    /// Waits for the outstanding readers until `deadline`. `Ok(false)` means
    /// some pipe was still open when time ran out.
    fn settle(&mut self, deadline: Instant) -> Result<bool, DispatchError> {
        while self.pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(remaining) {
                Ok(result) => {
                    self.pending -= 1;
                    result.map_err(|source| DispatchError::Io {
                        context: "read child output",
                        source,
                    })?;
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispatchError::Io {
                        context: "output reader panicked",
                        source: io::Error::new(io::ErrorKind::Other, "reader thread exited without reporting"),
                    })
                }
            }
        }
        Ok(true)
    }

    fn output(&self) -> (String, String) {
        (self.stdout.text(), self.stderr.text())
    }
}

/// Reads `pipe` to EOF on its own thread, keeping at most `limit` bytes in `sink`.
fn drain(mut pipe: impl Read + Send + 'static, limit: usize, sink: Captured, done: Sender<io::Result<()>>) {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        let result = loop {
            match pipe.read(&mut buffer) {
                Ok(0) => break Ok(()),
                Ok(bytes_read) => {
                    let mut collected = sink.lock();
                    let room = limit.saturating_sub(collected.len());
                    collected.extend_from_slice(&buffer[..bytes_read.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        let _ = done.send(result);
    });
}

/// SIGKILL to every process in the child's group.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: plain syscall on the group id we created at spawn time.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kills the child's process group (or just the child off Unix) and reaps it.
fn terminate(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::resolver::CommandResolver;
    use crate::sanitizer::sanitize;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), format!("#!/bin/sh\n{}\n", body)).unwrap();
    }

    fn resolve(dir: &Path, op: &str, args: &[&str], timeout: Duration) -> ResolvedCommand {
        let resolver = CommandResolver::new(dir, vec!["/bin/sh".to_string()], timeout);
        let args = args.iter().map(|a| sanitize("t", a).unwrap()).collect();
        resolver.resolve(op, args).unwrap()
    }

    fn invoker() -> ProcessInvoker {
        let mut env = BTreeMap::new();
        env.insert("PANEL_MARKER".to_string(), "on".to_string());
        ProcessInvoker::new("/usr/bin:/bin", env, 1024)
    }

    #[test]
    fn captures_streams_and_exit_code() {
        let dir = TempDir::new().unwrap();
        script(
            dir.path(),
            "v-suspend-cron-job",
            "echo \"user=$1 job=$2 marker=$PANEL_MARKER home=${HOME:-unset}\"\necho 'job not found' >&2\nexit 3",
        );

        let cmd = resolve(dir.path(), "suspend-cron", &["jdoe", "3"], Duration::from_secs(10));
        let result = invoker().invoke(cmd).unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(
            result.stdout_lines().collect::<Vec<_>>(),
            vec!["user=jdoe job=3 marker=on home=unset"]
        );
        assert_eq!(result.stderr.trim(), "job not found");
    }

    #[test]
    fn arguments_are_not_reinterpreted() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "v-restart-service", "printf '%s' \"$1\"");

        let hostile = "x'; touch pwned; echo '";
        let cmd = resolve(dir.path(), "restart-service", &[hostile], Duration::from_secs(10));
        let result = invoker().invoke(cmd).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, hostile);
        assert!(!dir.path().join("pwned").exists());
    }

    #[test]
    fn output_is_capped() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "v-restart-service", "i=0\nwhile [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done");

        let cmd = resolve(dir.path(), "restart-service", &["nginx"], Duration::from_secs(10));
        let result = invoker().invoke(cmd).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.len(), 1024);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let resolver = CommandResolver::new("/nonexistent", Vec::new(), Duration::from_secs(1));
        let cmd = resolver
            .resolve("restart-service", vec![sanitize("srv", "nginx").unwrap()])
            .unwrap();
        let err = invoker().invoke(cmd).unwrap_err();
        assert!(matches!(err, DispatchError::Spawn { .. }));
    }

    #[test]
    fn background_leftover_cannot_outlive_the_deadline() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "v-restart-service", "echo started\nsleep 6 &\nexit 0");

        let cmd = resolve(dir.path(), "restart-service", &["nginx"], Duration::from_millis(500));
        let started = Instant::now();
        let result = invoker().invoke(cmd).unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "invoke took {:?} with a 500ms timeout",
            started.elapsed()
        );
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "started");
    }

    #[test]
    fn timeout_returns_even_if_a_descendant_escaped_the_group() {
        let dir = TempDir::new().unwrap();
        script(
            dir.path(),
            "v-restart-service",
            "if command -v setsid >/dev/null 2>&1; then setsid sleep 5 & fi\nsleep 30",
        );

        let cmd = resolve(dir.path(), "restart-service", &["nginx"], Duration::from_millis(500));
        let started = Instant::now();
        let err = invoker().invoke(cmd).unwrap_err();
        assert!(matches!(err, DispatchError::OperationTimeout { timeout_ms: 500 }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // State follows the parenthesised command name; zombies count as gone.
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map(|state| state != "Z" && state != "X")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_child_and_descendants() {
        let dir = TempDir::new().unwrap();
        let pids = dir.path().join("pids");
        script(
            dir.path(),
            "v-restart-service",
            &format!("sleep 30 &\necho $$ $! > '{}'\nwait", pids.display()),
        );

        let cmd = resolve(dir.path(), "restart-service", &["nginx"], Duration::from_millis(500));
        let started = Instant::now();
        let err = invoker().invoke(cmd).unwrap_err();
        assert!(matches!(err, DispatchError::OperationTimeout { timeout_ms: 500 }));
        assert!(started.elapsed() < Duration::from_secs(10));

        let recorded = fs::read_to_string(&pids).unwrap();
        let pids: Vec<u32> = recorded.split_whitespace().map(|p| p.parse().unwrap()).collect();
        assert_eq!(pids.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        while pids.iter().any(|p| alive(*p)) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        for pid in pids {
            assert!(!alive(pid), "process {} survived the timeout", pid);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn leftover_process_is_killed_at_the_deadline() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        script(
            dir.path(),
            "v-restart-service",
            &format!("sleep 30 &\necho $! > '{}'\nexit 0", pid_file.display()),
        );

        let cmd = resolve(dir.path(), "restart-service", &["nginx"], Duration::from_millis(500));
        assert_eq!(invoker().invoke(cmd).unwrap().exit_code, 0);

        let pid: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while alive(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!alive(pid), "background process {} outlived the invocation", pid);
    }
}
