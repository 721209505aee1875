//! External process invocation
//!
//! Analysis tools and the scheduler client are run as shell command lines.
//! Every call is awaited to completion; there is no timeout.

use async_trait::async_trait;
use tokio::process::Command;

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when terminated by a signal
    pub status: i32,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs shell command lines
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput>;
}

/// Production runner: `sh -c <command>`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        tracing::debug!(command, "Running command");

        let output = Command::new("sh").arg("-c").arg(command).output().await?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            output: captured,
        })
    }
}

/// Join arguments into one shell line, single-quoting those that need it
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_join_plain_args() {
        assert_eq!(
            shell_join(&["slicer", "/nii/a.nii.gz", "-S", "5", "1600", "/qc/a.png"]),
            "slicer /nii/a.nii.gz -S 5 1600 /qc/a.png"
        );
    }

    #[test]
    fn test_shell_join_quotes_special_chars() {
        assert_eq!(shell_join(&["echo", "two words"]), "echo 'two words'");
        assert_eq!(shell_join(&["echo", "it's"]), r"echo 'it'\''s'");
        assert_eq!(shell_join(&["echo", ""]), "echo ''");
    }

    #[tokio::test]
    async fn test_shell_runner_captures_status_and_output() {
        let out = ShellRunner.run("echo hello; exit 3").await.unwrap();
        assert_eq!(out.status, 3);
        assert!(!out.success());
        assert_eq!(out.output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_shell_runner_success() {
        let out = ShellRunner.run("true").await.unwrap();
        assert!(out.success());
    }
}
