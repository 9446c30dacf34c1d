//! Install orchestration
//!
//! Runs the two external installer tools and turns their output into
//! progress events:
//! - `installer` writes the product into the sparse volume
//! - `startosinstall` from that volume erases and reinstalls the machine
//!
//! Both follow the same loop: spawn, read lines until the output ends,
//! classify each line, then decide the outcome from the exit status.

pub mod classify;
pub mod session;
pub mod spawn;
pub mod stream;

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, error, info, warn};

use crate::error::InstallError;
use crate::models::EventSink;
use classify::{classify_erase_install_line, classify_installer_line};
use session::InstallSession;
use stream::LineStream;

pub use classify::{EraseInstallLine, InstallerLine};
pub use spawn::{select_spawner, ProcessSpawner, PtySpawner, ScriptSpawner, SpawnedProcess, TerminalMode};

/// Runs the package installer and the erase-install tool
pub struct InstallOrchestrator {
    installer_path: PathBuf,
    spawner: Box<dyn ProcessSpawner>,
    /// Longest silence tolerated from a tool; `None` waits forever
    line_timeout: Option<Duration>,
    cancel: Arc<AtomicBool>,
}

impl InstallOrchestrator {
    pub fn new(
        installer_path: impl Into<PathBuf>,
        spawner: Box<dyn ProcessSpawner>,
        line_timeout: Option<Duration>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            installer_path: installer_path.into(),
            spawner,
            line_timeout,
            cancel,
        }
    }

    /// Install the product described by `dist_path` onto `target_volume`.
    ///
    /// Only the exit status decides the result; a `%100` line followed by a
    /// non-zero exit is still a failure.
    pub fn run_installer(
        &self,
        dist_path: &Path,
        target_volume: &Path,
        events: &EventSink,
    ) -> Result<(), InstallError> {
        let program = self.installer_path.display().to_string();
        info!("Installing {} onto {}", dist_path.display(), target_volume.display());

        let mut child = Command::new(&self.installer_path)
            .arg("-pkg")
            .arg(dist_path)
            .arg("-target")
            .arg(target_volume)
            .arg("-verboseR")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InstallError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stderr_drain = child.stderr.take().map(|stderr| drain_stderr(program.clone(), stderr));
        let Some(stdout) = child.stdout.take() else {
            return Err(InstallError::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not captured"),
            });
        };

        let mut session = InstallSession::new(events.clone());
        let streamed = self.pump(&mut child, stdout, &program, &mut session, |session, line| {
            session.apply_installer(classify_installer_line(line))
        });

        if let Some(handle) = stderr_drain {
            let _ = handle.join();
        }
        let status = streamed?;

        if status.success() {
            info!("Product installation complete");
            Ok(())
        } else {
            log_failure("installer", &status, &session.log);
            Err(InstallError::InstallFailure {
                status: status.to_string(),
                log: session.log,
            })
        }
    }

    /// Run startosinstall from `app_path` with erase-install options.
    ///
    /// On success the tool reboots the machine, so a return is only seen when
    /// the restart marker appeared or the tool exited 0 on its own.
    pub fn run_erase_install(
        &self,
        startosinstall: &Path,
        app_path: &Path,
        events: &EventSink,
    ) -> Result<(), InstallError> {
        let program = startosinstall.display().to_string();
        info!("Starting erase-install from {} via {}", app_path.display(), self.spawner.name());

        let args: [&OsStr; 5] = [
            "--applicationpath".as_ref(),
            app_path.as_os_str(),
            "--eraseinstall".as_ref(),
            "--agreetolicense".as_ref(),
            "--nointeraction".as_ref(),
        ];
        let SpawnedProcess { mut child, output } = self
            .spawner
            .spawn(startosinstall, &args)
            .map_err(|source| InstallError::Spawn {
                program: program.clone(),
                source,
            })?;

        let mut session = InstallSession::new(events.clone());
        let status = self.pump(&mut child, output, &program, &mut session, |session, line| {
            session.apply_erase_install(classify_erase_install_line(line))
        })?;

        if session.restart_pending || status.success() {
            Ok(())
        } else {
            log_failure("startosinstall", &status, &session.log);
            Err(InstallError::EraseInstallFailed {
                status: status.to_string(),
                log: session.log,
            })
        }
    }

    /// Feed every output line through `apply` until the output ends, then reap the child
    fn pump<R, F>(
        &self,
        child: &mut Child,
        output: R,
        program: &str,
        session: &mut InstallSession,
        mut apply: F,
    ) -> Result<ExitStatus, InstallError>
    where
        R: Read + Send + 'static,
        F: FnMut(&mut InstallSession, &str),
    {
        let lines = LineStream::spawn(output, self.cancel.clone());

        loop {
            match lines.next_line(self.line_timeout) {
                Ok(Some(line)) => {
                    session.record(&line);
                    apply(session, &line);
                }
                Ok(None) => break,
                Err(source) => {
                    warn!("Stopping {}: {}", program, source);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(InstallError::Stream {
                        program: program.to_string(),
                        source,
                        log: std::mem::take(&mut session.log),
                    });
                }
            }
        }

        child.wait().map_err(|source| InstallError::Wait {
            program: program.to_string(),
            source,
        })
    }
}

/// Dump a failed tool's captured output, in arrival order
fn log_failure(tool: &str, status: &ExitStatus, log: &[String]) {
    error!("{} exited with {}; output follows", tool, status);
    for line in log {
        error!("{}", line);
    }
}

fn drain_stderr<R: Read + Send + 'static>(program: String, stderr: R) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            match line {
                Ok(line) if !line.trim().is_empty() => warn!("{}: {}", program, line),
                Ok(_) => {}
                Err(err) => {
                    debug!("{} stderr closed: {}", program, err);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::models::ProgressEvent;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn orchestrator(installer: PathBuf, timeout: Option<Duration>) -> InstallOrchestrator {
        InstallOrchestrator::new(
            installer,
            Box::new(PtySpawner),
            timeout,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_installer_success_emits_progress() {
        let dir = tempfile::tempdir().expect("temp dir");
        let installer = write_script(
            dir.path(),
            "installer",
            "echo 'installer:PHASE:Preparing'\necho 'installer:%57.3'\necho 'installer:STATUS:Writing'\necho oops >&2\nexit 0\n",
        );

        let (events, receiver) = EventSink::channel();
        orchestrator(installer, None)
            .run_installer(Path::new("/w/x.dist"), Path::new("/tmp/dmg.1"), &events)
            .expect("install succeeds");
        drop(events);

        let received: Vec<_> = receiver.iter().collect();
        assert_eq!(
            received,
            vec![
                ProgressEvent::Phase("Preparing".to_string()),
                ProgressEvent::Percent(57.3),
                ProgressEvent::Status("Writing".to_string()),
            ]
        );
    }

    #[test]
    fn test_installer_nonzero_exit_fails_despite_complete_percent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let installer = write_script(dir.path(), "installer", "echo 'installer:%100'\nexit 1\n");

        let result = orchestrator(installer, None).run_installer(
            Path::new("/w/x.dist"),
            Path::new("/tmp/dmg.1"),
            &EventSink::silent(),
        );

        match result {
            Err(InstallError::InstallFailure { log, .. }) => assert_eq!(log, vec!["installer:%100"]),
            other => panic!("expected InstallFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_installer_failure_keeps_output_in_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let installer = write_script(
            dir.path(),
            "installer",
            "echo 'installer:PHASE:Preparing for installation'
             echo 'installer: Package name is macOS Monterey'
             echo 'installer:%12.0'
             echo 'installer: The install failed. (The Installer encountered an error.)'
             exit 1
",
        );

        let err = orchestrator(installer, None)
            .run_installer(Path::new("/w/x.dist"), Path::new("/tmp/dmg.1"), &EventSink::silent())
            .expect_err("non-zero exit");

        assert!(matches!(err, InstallError::InstallFailure { .. }));
        assert_eq!(
            err.log(),
            &[
                "installer:PHASE:Preparing for installation".to_string(),
                "installer: Package name is macOS Monterey".to_string(),
                "installer:%12.0".to_string(),
                "installer: The install failed. (The Installer encountered an error.)".to_string(),
            ]
        );
    }

    #[test]
    fn test_installer_receives_expected_arguments() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args_file = dir.path().join("args");
        let installer = write_script(
            dir.path(),
            "installer",
            &format!("echo \"$@\" > '{}'\n", args_file.display()),
        );

        orchestrator(installer, None)
            .run_installer(Path::new("/w/x.dist"), Path::new("/tmp/dmg.1"), &EventSink::silent())
            .expect("install succeeds");

        let args = fs::read_to_string(&args_file).expect("args recorded");
        assert_eq!(args.trim(), "-pkg /w/x.dist -target /tmp/dmg.1 -verboseR");
    }

    #[test]
    fn test_installer_silence_times_out() {
        let dir = tempfile::tempdir().expect("temp dir");
        let installer = write_script(dir.path(), "installer", "exec sleep 30\n");

        let result = orchestrator(installer, Some(Duration::from_millis(300))).run_installer(
            Path::new("/w/x.dist"),
            Path::new("/tmp/dmg.1"),
            &EventSink::silent(),
        );
        assert!(matches!(
            result,
            Err(InstallError::Stream { source: StreamError::TimedOut(_), .. })
        ));
    }

    #[test]
    fn test_missing_installer_is_spawn_error() {
        let result = orchestrator(PathBuf::from("/nonexistent/installer"), None).run_installer(
            Path::new("/w/x.dist"),
            Path::new("/tmp/dmg.1"),
            &EventSink::silent(),
        );
        assert!(matches!(result, Err(InstallError::Spawn { .. })));
    }

    #[test]
    fn test_erase_install_restart_marker_is_success() {
        if !PtySpawner::probe() {
            return;
        }
        let dir = tempfile::tempdir().expect("temp dir");
        let tool = write_script(
            dir.path(),
            "startosinstall",
            "echo 'By using the agreetolicense option, you are agreeing'\n\
             echo 'Preparing to run macOS Installer...'\n\
             echo 'Preparing 42.0.'\n\
             echo 'System going down for install'\n\
             exit 1\n",
        );

        let (events, receiver) = EventSink::channel();
        orchestrator(PathBuf::from("/usr/sbin/installer"), Some(Duration::from_secs(10)))
            .run_erase_install(&tool, Path::new("/tmp/dmg.1/Install macOS.app"), &events)
            .expect("restart marker means success");
        drop(events);

        let received: Vec<_> = receiver.iter().collect();
        assert!(received.contains(&ProgressEvent::Phase("Preparing to run macOS Installer...".to_string())));
        assert!(received.contains(&ProgressEvent::Percent(42.0)));
        assert_eq!(received.last(), Some(&ProgressEvent::Status("done".to_string())));
    }

    #[test]
    fn test_erase_install_failure_keeps_log() {
        if !PtySpawner::probe() {
            return;
        }
        let dir = tempfile::tempdir().expect("temp dir");
        let tool = write_script(
            dir.path(),
            "startosinstall",
            "echo 'Error: could not find volume'\nexit 3\n",
        );

        let result = orchestrator(PathBuf::from("/usr/sbin/installer"), Some(Duration::from_secs(10)))
            .run_erase_install(&tool, Path::new("/tmp/app"), &EventSink::silent());

        match result {
            Err(err @ InstallError::EraseInstallFailed { .. }) => {
                assert_eq!(err.log(), &["Error: could not find volume".to_string()]);
            }
            other => panic!("expected EraseInstallFailed, got {:?}", other),
        }
    }
}
