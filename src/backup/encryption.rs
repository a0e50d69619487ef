use crate::error::Cancelled;
use crate::utils::config::GeneralSettings;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tool path is empty.
pub const NOT_CONFIGURED: i64 = -10;
/// Tool path does not point at an executable.
pub const TOOL_MISSING: i64 = -11;
/// The subprocess could not be started.
pub const LAUNCH_FAILED: i64 = -12;
/// Anything else, including termination without an exit code.
pub const UNEXPECTED_FAULT: i64 = -13;

const FILE_PLACEHOLDER: &str = "{file}";

/// Delegates encryption to the configured external tool, one invocation at
/// a time across every job of the run.
///
/// Outcomes are folded into a signed duration: `0` when the file does not
/// need encryption, elapsed milliseconds on success, a negative code on
/// failure. Only cancellation is reported out of band.
pub struct EncryptionGate {
    settings: Arc<GeneralSettings>,
    slot: Semaphore,
}

impl EncryptionGate {
    pub fn new(settings: Arc<GeneralSettings>) -> Self {
        Self {
            settings,
            slot: Semaphore::new(1),
        }
    }

    pub fn should_encrypt(&self, path: &Path) -> bool {
        self.settings.needs_encryption(path)
    }

    pub async fn encrypt(&self, path: &Path, cancel: &CancellationToken) -> Result<i64, Cancelled> {
        if !self.should_encrypt(path) {
            return Ok(0);
        }

        let tool = self.settings.crypto_tool_path.trim();
        if tool.is_empty() {
            return Ok(NOT_CONFIGURED);
        }
        let Some(tool) = resolve_tool(tool) else {
            warn!("Encryption tool not found: {}", self.settings.crypto_tool_path);
            return Ok(TOOL_MISSING);
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            permit = self.slot.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(UNEXPECTED_FAULT),
            },
        };

        let file = match std::path::absolute(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot resolve {}: {}", path.display(), e);
                return Ok(UNEXPECTED_FAULT);
            }
        };
        let args = render_args(&self.settings.crypto_tool_args_template, &file);
        debug!("Running encryption tool {:?} {:?}", tool, args);

        let start = Instant::now();
        let mut child = match Command::new(&tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start encryption tool {:?}: {}", tool, e);
                return Ok(LAUNCH_FAILED);
            }
        };

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill encryption tool: {}", e);
                }
                return Err(Cancelled);
            }
            status = child.wait() => status,
        };

        let elapsed = start.elapsed().as_millis() as i64;
        Ok(match status {
            Ok(status) if status.success() => elapsed,
            Ok(status) => match status.code() {
                Some(code) => {
                    warn!("Encryption tool exited with {} for {}", code, path.display());
                    -(i64::from(code).abs().max(1))
                }
                None => UNEXPECTED_FAULT,
            },
            Err(e) => {
                warn!("Waiting on encryption tool failed: {}", e);
                UNEXPECTED_FAULT
            }
        })
    }
}

/// Split the template on whitespace and substitute the path into each
/// token, so a path containing spaces stays a single argument.
fn render_args(template: &str, path: &Path) -> Vec<String> {
    let file = path.to_string_lossy();
    let args: Vec<String> = template
        .split_whitespace()
        .map(|token| token.replace(FILE_PLACEHOLDER, &file))
        .collect();

    if args.is_empty() {
        vec![file.into_owned()]
    } else {
        args
    }
}

/// A path with a directory component must be a file; a bare name is looked
/// up on `PATH`.
fn resolve_tool(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(candidate))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn settings(tool: &str, template: &str) -> Arc<GeneralSettings> {
        Arc::new(
            GeneralSettings {
                crypto_extensions: HashSet::from(["txt".to_string()]),
                crypto_tool_path: tool.to_string(),
                crypto_tool_args_template: template.to_string(),
                ..Default::default()
            }
            .normalized(),
        )
    }

    #[test]
    fn renders_template() {
        let path = Path::new("/tmp/my file.txt");
        assert_eq!(render_args("{file}", path), vec!["/tmp/my file.txt"]);
        assert_eq!(
            render_args("-k secret --in={file}", path),
            vec!["-k", "secret", "--in=/tmp/my file.txt"]
        );
        assert_eq!(render_args("", path), vec!["/tmp/my file.txt"]);
    }

    #[tokio::test]
    async fn skips_files_outside_crypto_extensions() {
        let gate = EncryptionGate::new(settings("/definitely/missing/tool", "{file}"));
        let result = gate.encrypt(Path::new("/tmp/a.bin"), &CancellationToken::new()).await;
        assert_eq!(result, Ok(0));
        assert!(!gate.should_encrypt(Path::new("/tmp/noext")));
    }

    #[tokio::test]
    async fn reports_configuration_errors() {
        let cancel = CancellationToken::new();
        let file = Path::new("/tmp/a.TXT");

        let gate = EncryptionGate::new(settings("", "{file}"));
        assert_eq!(gate.encrypt(file, &cancel).await, Ok(NOT_CONFIGURED));

        let gate = EncryptionGate::new(settings("/definitely/missing/tool", "{file}"));
        assert_eq!(gate.encrypt(file, &cancel).await, Ok(TOOL_MISSING));

        let gate = EncryptionGate::new(settings("definitely-missing-tool-4242", "{file}"));
        assert_eq!(gate.encrypt(file, &cancel).await, Ok(TOOL_MISSING));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn returns_elapsed_time_on_success() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("seen");
            let tool = script(dir.path(), "tool.sh", &format!("echo \"$1\" > {}", marker.display()));

            let gate = EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}"));
            let file = dir.path().join("secret.txt");
            let elapsed = gate.encrypt(&file, &CancellationToken::new()).await.unwrap();

            assert!(elapsed >= 0);
            let seen = std::fs::read_to_string(&marker).unwrap();
            assert_eq!(seen.trim(), file.to_str().unwrap());
        }

        #[tokio::test]
        async fn relative_path_is_made_absolute() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("seen");
            let tool = script(dir.path(), "tool.sh", &format!("echo \"$1\" > {}", marker.display()));

            let gate = EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}"));
            let relative = Path::new("backup/secret.txt");
            gate.encrypt(relative, &CancellationToken::new()).await.unwrap();

            let seen = std::fs::read_to_string(&marker).unwrap();
            let seen = Path::new(seen.trim());
            assert!(seen.is_absolute());
            assert_eq!(seen, std::env::current_dir().unwrap().join(relative));
        }

        #[tokio::test]
        async fn negates_exit_code() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(dir.path(), "fail.sh", "exit 3");

            let gate = EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}"));
            let result = gate.encrypt(Path::new("/tmp/a.txt"), &CancellationToken::new()).await;
            assert_eq!(result, Ok(-3));
        }

        #[tokio::test]
        async fn non_executable_tool_fails_to_launch() {
            let dir = tempfile::tempdir().unwrap();
            let tool = dir.path().join("plain.sh");
            std::fs::write(&tool, "exit 0\n").unwrap();
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();

            let gate = EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}"));
            let result = gate.encrypt(Path::new("/tmp/a.txt"), &CancellationToken::new()).await;
            assert_eq!(result, Ok(LAUNCH_FAILED));
        }

        #[tokio::test]
        async fn only_one_subprocess_at_a_time() {
            let dir = tempfile::tempdir().unwrap();
            let lock = dir.path().join("lock");
            let tool = script(
                dir.path(),
                "exclusive.sh",
                &format!("mkdir {lock} || exit 7\nsleep 0.05\nrmdir {lock}", lock = lock.display()),
            );

            let gate = Arc::new(EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}")));
            let failures = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::new();
            for i in 0..4 {
                let gate = gate.clone();
                let failures = failures.clone();
                handles.push(tokio::spawn(async move {
                    let file = PathBuf::from(format!("/tmp/f{}.txt", i));
                    let result = gate.encrypt(&file, &CancellationToken::new()).await.unwrap();
                    if result < 0 {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(failures.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn cancellation_kills_the_tool() {
            let dir = tempfile::tempdir().unwrap();
            let tool = script(dir.path(), "slow.sh", "sleep 5");

            let gate = EncryptionGate::new(settings(tool.to_str().unwrap(), "{file}"));
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let started = Instant::now();
            let result = gate.encrypt(Path::new("/tmp/a.txt"), &cancel).await;
            assert_eq!(result, Err(Cancelled));
            assert!(started.elapsed() < Duration::from_secs(4));
        }
    }
}
