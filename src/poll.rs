// Waiting for submitted tasks.
//
// All pending tasks are polled round-robin: one status call per task per
// round, then a pause. A task that finishes is fetched in the same round,
// so one slow document never holds back the others.

use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::api::{ParseService, RemoteStatus};
use crate::error::ApiError;
use crate::fetch::{unique_names, ResultFetcher};
use crate::shutdown::ShutdownFlag;
use crate::submit::Submission;
use crate::task::{BatchReport, Outcome, ParseTask, RemoteId, ReportEntry, TaskState};

const TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

/// Looks up the status of one remote job. Upload batches carry a single
/// file, so their first result is the task's status; an empty result list
/// means the upload has not been registered yet.
pub fn status_of(service: &dyn ParseService, id: &RemoteId) -> Result<RemoteStatus, ApiError> {
    match id {
        RemoteId::Task(task_id) => service.task_status(task_id),
        RemoteId::Batch(batch_id) => Ok(service
            .batch_status(batch_id)?
            .into_iter()
            .next()
            .unwrap_or_else(|| RemoteStatus {
                state: "waiting-file".into(),
                ..RemoteStatus::default()
            })),
    }
}

struct Slot {
    label: String,
    /// Output folder name, unique within the run.
    name: String,
    task: Option<ParseTask>,
    outcome: Option<Outcome>,
}

impl Slot {
    fn new(submission: Submission, name: String) -> Self {
        match submission {
            Submission::Accepted(task) => Slot {
                label: task.source().label(),
                name,
                task: Some(task),
                outcome: None,
            },
            Submission::Rejected { source, reason } => Slot {
                label: source.label(),
                name,
                task: None,
                outcome: Some(Outcome::Failed(reason)),
            },
            Submission::Unsent(source) => Slot {
                label: source.label(),
                name,
                task: None,
                outcome: Some(Outcome::NotSubmitted),
            },
        }
    }

    fn finish(self, fallback: Outcome) -> ReportEntry {
        ReportEntry {
            label: self.label,
            remote_id: self.task.map(|t| t.remote_id().clone()),
            outcome: self.outcome.unwrap_or(fallback),
        }
    }
}

pub struct Poller<'a> {
    service: &'a dyn ParseService,
    fetcher: &'a ResultFetcher,
    settings: PollSettings,
    progress: ProgressBar,
    shutdown: ShutdownFlag,
}

impl<'a> Poller<'a> {
    pub fn new(
        service: &'a dyn ParseService,
        fetcher: &'a ResultFetcher,
        settings: PollSettings,
    ) -> Self {
        Self {
            service,
            fetcher,
            settings,
            progress: ProgressBar::hidden(),
            shutdown: ShutdownFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Polls until every task is terminal, the deadline passes, or the user
    /// interrupts. Every submission appears exactly once in the report.
    /// Authentication failures abort the wait. Network hiccups and garbled
    /// responses are logged and the task is asked again next round; any
    /// other error ends that task as failed.
    pub fn wait_all(&self, submissions: Vec<Submission>) -> Result<BatchReport, ApiError> {
        let names = unique_names(submissions.iter().map(|s| s.source().stem()).collect());
        let mut slots: Vec<Slot> = submissions
            .into_iter()
            .zip(names)
            .map(|(submission, name)| Slot::new(submission, name))
            .collect();
        let started = Instant::now();
        let mut round = 0u32;

        let fallback = loop {
            round += 1;
            for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
                if self.shutdown.is_requested() {
                    break;
                }
                let Some(task) = slot.task.as_mut() else {
                    continue;
                };
                match status_of(self.service, task.remote_id()) {
                    Ok(status) => slot.outcome = self.observe(task, &status, &slot.name),
                    Err(e @ ApiError::Auth(_)) => return Err(e),
                    Err(e @ (ApiError::Network(_) | ApiError::InvalidResponse(_))) => {
                        warn!(id = %task.remote_id(), error = %e, "Status poll failed")
                    }
                    Err(e) => slot.outcome = Some(Outcome::Failed(e.to_string())),
                }
                if let Some(outcome) = &slot.outcome {
                    let line = ReportEntry {
                        label: slot.label.clone(),
                        remote_id: Some(task.remote_id().clone()),
                        outcome: outcome.clone(),
                    };
                    self.progress.println(line.to_string());
                }
            }

            self.report_progress(&slots, started);
            let pending = slots.iter().filter(|s| s.outcome.is_none()).count();
            debug!(round, pending, "Poll round finished");
            if pending == 0 {
                break Outcome::TimedOut;
            }
            if self.shutdown.is_requested() {
                info!(pending, "Wait interrupted");
                break Outcome::Interrupted;
            }
            if started.elapsed() >= self.settings.max_wait {
                info!(pending, "Gave up waiting");
                break Outcome::TimedOut;
            }
            if self.pause() {
                info!(pending, "Wait interrupted");
                break Outcome::Interrupted;
            }
        };

        Ok(BatchReport::new(
            slots.into_iter().map(|s| s.finish(fallback.clone())).collect(),
        ))
    }

    fn observe(&self, task: &mut ParseTask, status: &RemoteStatus, name: &str) -> Option<Outcome> {
        let state = TaskState::from_remote(&status.state);
        if !task.advance(state) {
            debug!(id = %task.remote_id(), remote = %status.state, "Ignoring stale state");
        }
        task.set_result_url(status.zip_url().map(str::to_string));

        match task.state() {
            TaskState::Done => {
                let outcome = match task.result_url() {
                    Some(url) => match self.fetcher.fetch(self.service, name, url) {
                        Ok(output) => Outcome::Done { output },
                        Err(e) => Outcome::Failed(e.to_string()),
                    },
                    None => Outcome::Failed("completed without a result archive".into()),
                };
                Some(outcome)
            }
            TaskState::Failed => Some(Outcome::Failed(status.error_message())),
            TaskState::Pending | TaskState::Running => None,
        }
    }

    fn report_progress(&self, slots: &[Slot], started: Instant) {
        let total = slots.len();
        let done = slots
            .iter()
            .filter(|s| matches!(s.outcome, Some(Outcome::Done { .. })))
            .count();
        let failed = slots
            .iter()
            .filter(|s| matches!(s.outcome, Some(Outcome::Failed(_))))
            .count();
        self.progress.set_message(format!(
            "Progress: {done}/{total} done, {failed} failed ({}s)",
            started.elapsed().as_secs()
        ));
    }

    /// Sleeps one interval in short ticks. Returns true when interrupted.
    fn pause(&self) -> bool {
        let deadline = Instant::now() + self.settings.interval;
        loop {
            if self.shutdown.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(TICK));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockParseService;
    use crate::fetch::tests::zip_bytes;
    use crate::fetch::OutputLayout;
    use crate::task::Source;
    use std::fs;
    use std::path::PathBuf;

    fn fast() -> PollSettings {
        PollSettings {
            interval: Duration::ZERO,
            max_wait: Duration::from_secs(30),
        }
    }

    fn url_task(name: &str) -> Submission {
        Submission::Accepted(ParseTask::submitted(
            Source::Url(format!("https://example.com/{name}.pdf")),
            RemoteId::Task(format!("t-{name}")),
        ))
    }

    fn status(state: &str) -> RemoteStatus {
        RemoteStatus {
            state: state.into(),
            ..RemoteStatus::default()
        }
    }

    fn done(url: &str) -> RemoteStatus {
        RemoteStatus {
            state: "done".into(),
            full_zip_url: Some(url.into()),
            ..RemoteStatus::default()
        }
    }

    #[test]
    fn slow_task_does_not_hold_back_finished_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockParseService::new();
        let mut slow_calls = 0;
        service.expect_task_status().returning(move |id| match id {
            "t-fast" => Ok(done("https://cdn/fast.zip")),
            _ => {
                slow_calls += 1;
                Ok(if slow_calls < 3 {
                    status("running")
                } else {
                    done("https://cdn/slow.zip")
                })
            }
        });
        let bytes = zip_bytes(&[("full.md", "x")]);
        service
            .expect_download()
            .times(2)
            .returning(move |_| Ok(bytes.clone()));

        let fetcher = ResultFetcher::new(OutputLayout::PerTask(dir.path().to_path_buf()));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![url_task("slow"), url_task("fast")])
            .unwrap();

        assert_eq!(report.entries.len(), 2);
        assert!(report.all_succeeded());
        assert_eq!(
            report.entries[1].outcome,
            Outcome::Done {
                output: dir.path().join("fast")
            }
        );
    }

    #[test]
    fn never_terminal_task_times_out() {
        let mut service = MockParseService::new();
        service
            .expect_task_status()
            .returning(|_| Ok(status("running")));
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let settings = PollSettings {
            interval: Duration::ZERO,
            max_wait: Duration::ZERO,
        };
        let report = Poller::new(&service, &fetcher, settings)
            .wait_all(vec![url_task("stuck")])
            .unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].outcome, Outcome::TimedOut);
        assert_eq!(report.resumable(), vec![&RemoteId::Task("t-stuck".into())]);
    }

    #[test]
    fn failed_task_reports_remote_message() {
        let mut service = MockParseService::new();
        service.expect_task_status().returning(|_| {
            Ok(RemoteStatus {
                state: "failed".into(),
                err_msg: Some("file is encrypted".into()),
                ..RemoteStatus::default()
            })
        });
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![url_task("locked")])
            .unwrap();
        assert_eq!(report.entries[0].outcome, Outcome::Failed("file is encrypted".into()));
        assert_eq!(
            report.entries[0].to_string(),
            "https://example.com/locked.pdf: failed: file is encrypted"
        );
    }

    #[test]
    fn batch_ids_use_batch_status_and_wait_for_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockParseService::new();
        let mut calls = 0;
        service.expect_batch_status().returning(move |_| {
            calls += 1;
            Ok(match calls {
                1 => Vec::new(),
                2 => vec![status("pending")],
                _ => vec![done("https://cdn/a.zip")],
            })
        });
        let bytes = zip_bytes(&[("full.md", "x")]);
        service
            .expect_download()
            .times(1)
            .returning(move |_| Ok(bytes.clone()));

        let fetcher = ResultFetcher::new(OutputLayout::Flat(dir.path().join("a_out")));
        let submission = Submission::Accepted(ParseTask::submitted(
            Source::File(PathBuf::from("/docs/a.pdf")),
            RemoteId::Batch("b-1".into()),
        ));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![submission])
            .unwrap();
        assert_eq!(
            report.entries[0].outcome,
            Outcome::Done {
                output: dir.path().join("a_out")
            }
        );
        assert!(dir.path().join("a_out").join("full.md").exists());
    }

    #[test]
    fn transient_poll_errors_keep_polling() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockParseService::new();
        let mut calls = 0;
        service.expect_task_status().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ApiError::Network("reset".into()))
            } else {
                Ok(done("https://cdn/x.zip"))
            }
        });
        let bytes = zip_bytes(&[("full.md", "x")]);
        service.expect_download().returning(move |_| Ok(bytes.clone()));
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(dir.path().to_path_buf()));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![url_task("x")])
            .unwrap();
        assert!(report.all_succeeded());
    }

    #[test]
    fn auth_failure_while_polling_aborts() {
        let mut service = MockParseService::new();
        service
            .expect_task_status()
            .returning(|_| Err(ApiError::Auth("token expired".into())));
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let err = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![url_task("x")])
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn interrupt_leaves_tasks_resumable() {
        let mut service = MockParseService::new();
        service.expect_task_status().never();
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let report = Poller::new(&service, &fetcher, fast())
            .with_shutdown(shutdown)
            .wait_all(vec![url_task("big")])
            .unwrap();
        assert_eq!(report.entries[0].outcome, Outcome::Interrupted);
        assert_eq!(report.resumable().len(), 1);
    }

    #[test]
    fn ctrl_c_mid_round_skips_the_remaining_tasks() {
        let shutdown = ShutdownFlag::new();
        let flag = shutdown.clone();
        let mut service = MockParseService::new();
        service
            .expect_task_status()
            .times(1)
            .returning(move |_| {
                flag.request();
                Ok(status("running"))
            });
        service.expect_download().never();
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let report = Poller::new(&service, &fetcher, fast())
            .with_shutdown(shutdown)
            .wait_all(vec![url_task("a"), url_task("b"), url_task("c")])
            .unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.count(|o| *o == Outcome::Interrupted), 3);
        assert_eq!(report.resumable().len(), 3);
    }

    #[test]
    fn service_error_while_polling_fails_the_task() {
        let mut service = MockParseService::new();
        service.expect_task_status().times(1).returning(|_| {
            Err(ApiError::Service {
                code: "-60012".into(),
                message: "task not found".into(),
            })
        });
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![url_task("gone")])
            .unwrap();
        assert_eq!(
            report.entries[0].to_string(),
            "https://example.com/gone.pdf: failed: Service error: task not found (code: -60012)"
        );
    }

    #[test]
    fn same_stem_results_get_separate_folders() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockParseService::new();
        service.expect_task_status().returning(|id| {
            Ok(done(&format!("https://cdn/{id}.zip")))
        });
        service.expect_download().times(2).returning(|url| {
            let body = if url.contains("03762") { "attention" } else { "other" };
            Ok(zip_bytes(&[("full.md", body)]))
        });
        let paper = |id: &str| {
            Submission::Accepted(ParseTask::submitted(
                Source::Url(format!("https://arxiv.org/pdf/{id}")),
                RemoteId::Task(format!("t-{id}")),
            ))
        };

        let fetcher = ResultFetcher::new(OutputLayout::PerTask(dir.path().to_path_buf()));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![paper("1706.03762"), paper("1706.05137")])
            .unwrap();

        let first = dir.path().join("1706");
        let second = dir.path().join("1706_2");
        assert_eq!(report.entries[0].outcome, Outcome::Done { output: first.clone() });
        assert_eq!(report.entries[1].outcome, Outcome::Done { output: second.clone() });
        assert_eq!(fs::read_to_string(first.join("full.md")).unwrap(), "attention");
        assert_eq!(fs::read_to_string(second.join("full.md")).unwrap(), "other");
    }

    #[test]
    fn rejected_submissions_are_reported_without_polling() {
        let service = MockParseService::new();
        let fetcher = ResultFetcher::new(OutputLayout::PerTask(PathBuf::from("/unused")));
        let report = Poller::new(&service, &fetcher, fast())
            .wait_all(vec![Submission::Rejected {
                source: Source::File(PathBuf::from("/x/missing.pdf")),
                reason: "file not found: /x/missing.pdf".into(),
            }])
            .unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].remote_id, None);
        assert!(!report.all_succeeded());
    }
}
