use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{program}: command not found")]
    NotFound { program: String },
    #[error("{program}: permission denied")]
    PermissionDenied { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// The formatter or linter being wrapped, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    /// Split an argv into program and arguments. `None` if it is empty.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Run the tool in `working_dir` with the terminal's stdio, and wait for it.
///
/// The tool's output is not interpreted; only the files it leaves behind
/// matter. A non-zero exit status is returned, not treated as an error.
pub fn run(command: &ToolCommand, working_dir: &Path) -> Result<ExitStatus, RunnerError> {
    info!(command = %command, dir = %working_dir.display(), "running tool");

    let status = Command::new(&command.program)
        .args(&command.args)
        .current_dir(working_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|source| {
            let program = command.program_name();
            match source.kind() {
                ErrorKind::NotFound => RunnerError::NotFound { program },
                ErrorKind::PermissionDenied => RunnerError::PermissionDenied { program },
                _ => RunnerError::Spawn { program, source },
            }
        })?;

    debug!(status = %status, "tool finished");
    Ok(status)
}

/// Process exit code equivalent to `status`, using the shell's 128+signal
/// convention for signalled processes.
pub fn exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return (code & 0xff) as u8;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal).min(255) as u8;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_argv_splits_program() {
        let cmd = ToolCommand::from_argv(["black", "-q", "."]).unwrap();
        assert_eq!(cmd.program, OsString::from("black"));
        assert_eq!(cmd.args, vec![OsString::from("-q"), OsString::from(".")]);
        assert_eq!(cmd.to_string(), "black -q .");
    }

    #[test]
    fn from_empty_argv_is_none() {
        assert!(ToolCommand::from_argv(Vec::<String>::new()).is_none());
    }

    #[test]
    fn missing_program_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::from_argv(["rmr-definitely-not-a-real-tool"]).unwrap();
        let result = run(&cmd, dir.path());
        assert!(matches!(result, Err(RunnerError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::from_argv(["sh", "-c", "exit 3"]).unwrap();
        let status = run(&cmd, dir.path()).unwrap();
        assert_eq!(exit_code(status), 3);
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::from_argv(["sh", "-c", "echo hi > out.txt"]).unwrap();
        assert!(run(&cmd, dir.path()).unwrap().success());
        assert!(dir.path().join("out.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fmt.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

        let cmd = ToolCommand::from_argv([script.as_os_str()]).unwrap();
        let result = run(&cmd, dir.path());
        assert!(matches!(result, Err(RunnerError::PermissionDenied { .. })));
    }
}
