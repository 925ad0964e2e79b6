use std::{num::NonZeroU32, thread, time::Duration};

use log::{debug, warn};

use crate::{
    error::ProcessExecutionError,
    process::{CommandInvocation, CommandRunner, MatchFilter},
};

/// Log lines that tell whether a service accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    ready_marker: String,
    failure_marker: Option<String>,
    restart_marker: Option<String>,
    restart_expected: bool,
}

impl Readiness {
    pub fn new<S: Into<String>>(ready_marker: S) -> Self {
        Readiness {
            ready_marker: ready_marker.into(),
            failure_marker: None,
            restart_marker: None,
            restart_expected: false,
        }
    }

    /// A line proving the service will never become ready.
    pub fn with_failure_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }

    /// A line after which earlier log output no longer counts, for images
    /// that run and stop a temporary server before the real one.
    pub fn with_restart_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.restart_marker = Some(marker.into());
        self
    }

    /// For a freshly created container: the ready marker only counts once
    /// the restart marker has been logged, the temporary server logs it too.
    pub fn expecting_restart(mut self) -> Self {
        self.restart_expected = self.restart_marker.is_some();
        self
    }

    pub fn ready_marker(&self) -> &str {
        &self.ready_marker
    }

    pub fn failure_marker(&self) -> Option<&str> {
        self.failure_marker.as_deref()
    }

    pub fn restart_marker(&self) -> Option<&str> {
        self.restart_marker.as_deref()
    }

    /// Keeps the marker lines only. The restart line is kept while it is
    /// awaited, otherwise it clears what came before.
    fn filter(&self) -> MatchFilter {
        let mut filter = MatchFilter::default().matching(self.ready_marker.as_str());
        if let Some(marker) = &self.failure_marker {
            filter = filter.matching(marker.as_str());
        }
        match &self.restart_marker {
            Some(marker) if self.restart_expected => filter.matching(marker.as_str()),
            Some(marker) => filter.clear_on(marker.as_str()),
            None => filter,
        }
    }

    fn verdict(&self, lines: &[String]) -> Verdict {
        let mut awaiting_restart = self.restart_expected;
        let mut verdict = Verdict::Pending;
        for line in lines {
            match &self.restart_marker {
                Some(marker) if line.contains(marker.as_str()) => {
                    awaiting_restart = false;
                    verdict = Verdict::Pending;
                    continue;
                }
                _ => {}
            }
            if line.contains(self.ready_marker.as_str()) {
                if !awaiting_restart {
                    return Verdict::Ready;
                }
            } else if self
                .failure_marker
                .as_deref()
                .is_some_and(|marker| line.contains(marker))
            {
                verdict = Verdict::Failed;
            }
        }
        verdict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Ready,
    Failed,
}

pub struct ReadinessPoller<R> {
    runner: R,
    interval: Duration,
}

impl<R: CommandRunner> ReadinessPoller<R> {
    pub fn new(runner: R, interval: Duration) -> Self {
        ReadinessPoller { runner, interval }
    }

    /// Runs one probe per attempt until the ready marker shows up in its
    /// output. Returns `false` when the failure marker is seen or the budget
    /// is exhausted. A probe exiting non-zero only uses up its attempt.
    pub fn wait_ready<F>(
        &self,
        mut probe: F,
        readiness: &Readiness,
        max_attempts: NonZeroU32,
    ) -> Result<bool, ProcessExecutionError>
    where
        F: FnMut() -> CommandInvocation,
    {
        let filter = readiness.filter();
        for attempt in 1..=max_attempts.get() {
            let command = probe();
            let result = self.runner.execute(&command, &filter)?;
            if !result.success() {
                debug!(
                    "🐋 probe `{command}` exited with {} (attempt {attempt}/{max_attempts})",
                    result.exit_status()
                );
            } else {
                match readiness.verdict(result.lines()) {
                    Verdict::Ready => {
                        debug!("🐋 ready marker seen on attempt {attempt}/{max_attempts}");
                        return Ok(true);
                    }
                    Verdict::Failed => {
                        warn!("🐋 failure marker seen, giving up on attempt {attempt}");
                        return Ok(false);
                    }
                    Verdict::Pending => {}
                }
            }
            if attempt < max_attempts.get() {
                thread::sleep(self.interval);
            }
        }
        warn!(
            "🐋 {:?} not seen after {max_attempts} attempts",
            readiness.ready_marker()
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io};

    use super::*;
    use crate::process::ProcessResult;

    /// Answers each probe with the next scripted output, then repeats the last.
    struct ScriptedProbe {
        outputs: Vec<Result<ProcessResult, ()>>,
        calls: RefCell<usize>,
    }

    impl ScriptedProbe {
        fn new(outputs: Vec<Result<ProcessResult, ()>>) -> Self {
            ScriptedProbe {
                outputs,
                calls: RefCell::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.borrow()
        }
    }

    impl CommandRunner for ScriptedProbe {
        fn execute(
            &self,
            command: &CommandInvocation,
            filter: &MatchFilter,
        ) -> Result<ProcessResult, ProcessExecutionError> {
            let mut calls = self.calls.borrow_mut();
            let index = (*calls).min(self.outputs.len() - 1);
            *calls += 1;
            match &self.outputs[index] {
                Ok(result) => {
                    let mut capture = filter.capture();
                    for line in result.lines() {
                        capture.push(line.clone());
                    }
                    Ok(ProcessResult::new(result.exit_status(), capture.into_lines()))
                }
                Err(()) => Err(ProcessExecutionError::Spawn {
                    command: command.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no docker"),
                }),
            }
        }
    }

    fn logs(lines: &[&str]) -> Result<ProcessResult, ()> {
        Ok(ProcessResult::new(
            0,
            lines.iter().map(|line| line.to_string()).collect(),
        ))
    }

    fn attempts(count: u32) -> NonZeroU32 {
        NonZeroU32::new(count).unwrap()
    }

    fn probe() -> CommandInvocation {
        CommandInvocation::new("docker").args(["logs", "db"])
    }

    #[test]
    fn stops_polling_on_the_attempt_that_sees_the_marker() {
        let runner = ScriptedProbe::new(vec![
            logs(&["starting"]),
            logs(&["starting", "still starting"]),
            logs(&["starting", "still starting", "ready to accept connections"]),
        ]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let ready = poller
            .wait_ready(probe, &Readiness::new("ready to accept"), attempts(5))
            .unwrap();
        assert!(ready);
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn reports_timeout_as_false_after_the_whole_budget() {
        let runner = ScriptedProbe::new(vec![logs(&["starting"])]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let ready = poller
            .wait_ready(probe, &Readiness::new("ready"), attempts(3))
            .unwrap();
        assert!(!ready);
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn failing_probe_uses_up_an_attempt_without_aborting() {
        let runner = ScriptedProbe::new(vec![
            Ok(ProcessResult::new(1, vec!["Error: No such container: db".into()])),
            logs(&["ready"]),
        ]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        assert!(poller
            .wait_ready(probe, &Readiness::new("ready"), attempts(3))
            .unwrap());
        assert_eq!(runner.calls(), 2);
    }

    #[test]
    fn spawn_failure_aborts_polling() {
        let runner = ScriptedProbe::new(vec![Err(())]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        assert!(poller
            .wait_ready(probe, &Readiness::new("ready"), attempts(3))
            .is_err());
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn failure_marker_ends_polling_early() {
        let runner = ScriptedProbe::new(vec![logs(&["PANIC: could not write"])]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let readiness = Readiness::new("ready").with_failure_marker("PANIC:");
        assert!(!poller.wait_ready(probe, &readiness, attempts(5)).unwrap());
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn marker_before_a_restart_does_not_count() {
        let runner = ScriptedProbe::new(vec![
            logs(&["ready to accept connections", "init process complete"]),
            logs(&[
                "ready to accept connections",
                "init process complete",
                "ready to accept connections",
            ]),
        ]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let readiness =
            Readiness::new("ready to accept").with_restart_marker("init process complete");
        assert!(poller.wait_ready(probe, &readiness, attempts(5)).unwrap());
        assert_eq!(runner.calls(), 2);
    }

    #[test]
    fn fresh_container_ignores_the_temporary_server() {
        let runner = ScriptedProbe::new(vec![
            logs(&[
                "initdb: syncing data",
                "LOG:  database system is ready to accept connections",
            ]),
            logs(&[
                "initdb: syncing data",
                "LOG:  database system is ready to accept connections",
                "PostgreSQL init process complete; ready for start up.",
            ]),
            logs(&[
                "initdb: syncing data",
                "LOG:  database system is ready to accept connections",
                "PostgreSQL init process complete; ready for start up.",
                "LOG:  database system is ready to accept connections",
            ]),
        ]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let readiness = Readiness::new("database system is ready to accept connections")
            .with_restart_marker("PostgreSQL init process complete")
            .expecting_restart();
        assert!(poller.wait_ready(probe, &readiness, attempts(5)).unwrap());
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn reused_container_accepts_the_marker_without_a_restart() {
        let runner = ScriptedProbe::new(vec![logs(&[
            "LOG:  database system is ready to accept connections",
        ])]);
        let poller = ReadinessPoller::new(&runner, Duration::ZERO);
        let readiness = Readiness::new("database system is ready to accept connections")
            .with_restart_marker("PostgreSQL init process complete");
        assert!(poller.wait_ready(probe, &readiness, attempts(5)).unwrap());
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn only_marker_lines_are_captured() {
        let readiness = Readiness::new("ready to accept")
            .with_failure_marker("PANIC:")
            .with_restart_marker("init process complete")
            .expecting_restart();
        let filter = readiness.filter();
        let mut capture = filter.capture();
        for n in 0..10_000 {
            capture.push(format!("LOG:  checkpoint {n}"));
        }
        capture.push("init process complete".to_string());
        capture.push("ready to accept connections".to_string());
        assert_eq!(
            capture.into_lines(),
            vec!["init process complete", "ready to accept connections"]
        );
    }
}
