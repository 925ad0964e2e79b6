use std::{
    fmt::Display,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::mpsc::{self, Sender},
    thread,
};

use log::{debug, trace};

use crate::error::{CommandError, CommandFailed, ProcessExecutionError};

/// One program invocation. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandInvocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        CommandInvocation {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl Display for CommandInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    exit_status: i32,
    lines: Vec<String>,
}

impl ProcessResult {
    pub fn new(exit_status: i32, lines: Vec<String>) -> Self {
        ProcessResult { exit_status, lines }
    }

    /// Exit code of the process, `-1` when it was terminated by a signal.
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Whether any captured line contains `marker`.
    pub fn contains(&self, marker: &str) -> bool {
        self.lines.iter().any(|line| line.contains(marker))
    }
}

/// Streaming line filter.
///
/// With `matching` patterns only lines containing one of them are kept. A
/// line containing the `clear` pattern discards everything kept so far and
/// is not kept itself, even when it also matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchFilter {
    matching: Vec<String>,
    clear: Option<String>,
}

impl MatchFilter {
    /// Adds a pattern to keep, on top of the ones already set.
    pub fn matching<S: Into<String>>(mut self, pattern: S) -> Self {
        self.matching.push(pattern.into());
        self
    }

    pub fn clear_on<S: Into<String>>(mut self, pattern: S) -> Self {
        self.clear = Some(pattern.into());
        self
    }

    pub fn capture(&self) -> Capture<'_> {
        Capture {
            filter: self,
            lines: Vec::new(),
        }
    }
}

/// Line buffer driven by a [`MatchFilter`].
pub struct Capture<'f> {
    filter: &'f MatchFilter,
    lines: Vec<String>,
}

impl Capture<'_> {
    pub fn push(&mut self, line: String) {
        if let Some(clear) = &self.filter.clear {
            if line.contains(clear.as_str()) {
                trace!("clearing {} captured lines", self.lines.len());
                self.lines.clear();
                return;
            }
        }
        let matching = &self.filter.matching;
        if matching.is_empty() || matching.iter().any(|pattern| line.contains(pattern.as_str())) {
            self.lines.push(line);
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Runs commands to completion.
///
/// The production implementation is [`ProcessExecutor`]; tests substitute
/// scripted runners that record invocations.
pub trait CommandRunner {
    /// Runs `command`, feeding every output line through `filter`. A non-zero
    /// exit status is not an error at this level.
    fn execute(
        &self,
        command: &CommandInvocation,
        filter: &MatchFilter,
    ) -> Result<ProcessResult, ProcessExecutionError>;

    fn run(&self, command: &CommandInvocation) -> Result<ProcessResult, CommandError> {
        self.run_filtered(command, &MatchFilter::default())
    }

    /// Like [`CommandRunner::execute`] but a non-zero exit becomes
    /// [`CommandFailed`].
    fn run_filtered(
        &self,
        command: &CommandInvocation,
        filter: &MatchFilter,
    ) -> Result<ProcessResult, CommandError> {
        let result = self.execute(command, filter)?;
        if result.success() {
            Ok(result)
        } else {
            Err(CommandFailed {
                command: command.to_string(),
                exit_status: result.exit_status(),
                lines: result.into_lines(),
            }
            .into())
        }
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn execute(
        &self,
        command: &CommandInvocation,
        filter: &MatchFilter,
    ) -> Result<ProcessResult, ProcessExecutionError> {
        (**self).execute(command, filter)
    }
}

/// Spawns real processes and blocks until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandRunner for ProcessExecutor {
    fn execute(
        &self,
        command: &CommandInvocation,
        filter: &MatchFilter,
    ) -> Result<ProcessResult, ProcessExecutionError> {
        let rendered = command.to_string();
        debug!("🐋 $ {rendered}");

        let mut process = Command::new(command.program());
        process
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = command.working_dir() {
            process.current_dir(dir);
        }

        let mut child = process
            .spawn()
            .map_err(|source| ProcessExecutionError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        let missing_pipe = || ProcessExecutionError::MissingPipe {
            command: rendered.clone(),
        };
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let stderr = child.stderr.take().ok_or_else(missing_pipe)?;

        let mut capture = filter.capture();
        let read_error = thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel();
            let stderr_sender = sender.clone();
            scope.spawn(move || forward_lines(stdout, sender));
            scope.spawn(move || forward_lines(stderr, stderr_sender));

            // drain until both pipes are closed, even after a read error
            let mut first_error = None;
            for received in receiver {
                match received {
                    Ok(line) => capture.push(line),
                    Err(error) => {
                        first_error.get_or_insert(error);
                    }
                }
            }
            first_error
        });

        let status = child.wait().map_err(|source| ProcessExecutionError::Wait {
            command: rendered.clone(),
            source,
        })?;
        if let Some(source) = read_error {
            return Err(ProcessExecutionError::Read {
                command: rendered,
                source,
            });
        }

        let exit_status = status.code().unwrap_or(-1);
        debug!("🐋 `{rendered}` exited with {exit_status}");
        Ok(ProcessResult::new(exit_status, capture.into_lines()))
    }
}

fn forward_lines<R: Read>(pipe: R, sender: Sender<io::Result<String>>) {
    let mut reader = BufReader::new(pipe);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buffer)).into_owned();
                if sender.send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                let _ = sender.send(Err(error));
                // keep the child from blocking on a full pipe
                let _ = io::copy(&mut reader, &mut io::sink());
                return;
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filtered(filter: &MatchFilter, input: &[&str]) -> Vec<String> {
        let mut capture = filter.capture();
        for line in input {
            capture.push(line.to_string());
        }
        capture.into_lines()
    }

    #[test]
    fn match_pattern_keeps_matching_lines_in_order() {
        let filter = MatchFilter::default().matching("ready");
        assert_eq!(
            filtered(&filter, &["init", "ready 1", "noise", "not ready", "ready 2"]),
            vec!["ready 1", "not ready", "ready 2"]
        );
    }

    #[test]
    fn clear_pattern_resets_the_buffer() {
        let filter = MatchFilter::default().clear_on("CLEAR");
        assert_eq!(
            filtered(&filter, &["a", "CLEAR-HERE", "b", "c"]),
            vec!["b", "c"]
        );
    }

    #[test]
    fn clear_wins_over_match_on_the_same_line() {
        let filter = MatchFilter::default().matching("ready").clear_on("restart");
        assert_eq!(
            filtered(
                &filter,
                &["ready once", "ready after restart", "noise", "ready twice"]
            ),
            vec!["ready twice"]
        );
    }

    #[test]
    fn several_match_patterns_keep_any_of_them() {
        let filter = MatchFilter::default().matching("ready").matching("PANIC");
        assert_eq!(
            filtered(&filter, &["init", "PANIC: disk full", "noise", "ready"]),
            vec!["PANIC: disk full", "ready"]
        );
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = MatchFilter::default();
        assert_eq!(filtered(&filter, &["a", "", "b"]), vec!["a", "", "b"]);
    }

    #[test]
    fn invocation_is_rendered_for_logs() {
        let command = CommandInvocation::new("docker")
            .arg("exec")
            .args(["db", "psql", "-c", "SELECT 1"]);
        assert_eq!(command.to_string(), r#"docker exec db psql -c "SELECT 1""#);
    }

    #[test]
    fn line_endings_are_trimmed() {
        assert_eq!(trim_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc"), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn executor_merges_stdout_and_stderr() {
        let command = CommandInvocation::new("sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2; echo out again");
        let result = ProcessExecutor
            .execute(&command, &MatchFilter::default())
            .unwrap();
        assert!(result.success());
        let mut lines = result.lines().to_vec();
        lines.sort();
        assert_eq!(lines, vec!["err", "out", "out again"]);
    }

    #[cfg(unix)]
    #[test]
    fn executor_filters_while_reading() {
        let command = CommandInvocation::new("sh")
            .arg("-c")
            .arg("echo keep 1; echo drop; echo RESET; echo keep 2");
        let filter = MatchFilter::default().matching("keep").clear_on("RESET");
        let result = ProcessExecutor.execute(&command, &filter).unwrap();
        assert_eq!(result.lines(), &["keep 2".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported_as_command_failed() {
        let command = CommandInvocation::new("sh")
            .arg("-c")
            .arg("echo boom 1>&2; exit 3");
        match ProcessExecutor.run(&command) {
            Err(CommandError::Failed(failed)) => {
                assert_eq!(failed.exit_status, 3);
                assert_eq!(failed.lines, vec!["boom"]);
            }
            other => panic!("expected a command failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn working_directory_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandInvocation::new("pwd").current_dir(dir.path());
        let result = ProcessExecutor.run(&command).unwrap();
        let reported = std::fs::canonicalize(&result.lines()[0]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn missing_program_is_an_execution_error() {
        let command = CommandInvocation::new("this-program-does-not-exist-anywhere");
        assert!(matches!(
            ProcessExecutor.run(&command),
            Err(CommandError::Execution(ProcessExecutionError::Spawn { .. }))
        ));
    }
}
