//! Daily trigger loop. One cycle runs at startup, then one per day at the
//! configured wall-clock time.

use crate::clock::Clock;
use crate::cycle::{CycleOutcome, CycleRunner};
use chrono::{
    DateTime, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};

/// Longest DST gap searched for a valid instant.
const MAX_GAP_MINUTES: i64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub at: NaiveTime,
    pub tz: Tz,
}

impl DailySchedule {
    pub fn new(at: NaiveTime, tz: Tz) -> Self {
        Self { at, tz }
    }

    /// First occurrence strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = now.with_timezone(&self.tz).date_naive();
        for _ in 0..4 {
            if let Some(candidate) = self.occurrence_on(date) {
                if candidate > now {
                    return candidate;
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        now + ChronoDuration::days(1)
    }

    /// Ambiguous local times take the earlier instant; times inside a DST
    /// gap move forward to the first minute that exists.
    fn occurrence_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = date.and_time(self.at);
        (0..=MAX_GAP_MINUTES).find_map(|offset| {
            match self
                .tz
                .from_local_datetime(&(local + ChronoDuration::minutes(offset)))
            {
                LocalResult::Single(at) => Some(at.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Scheduled(DateTime<Utc>),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub remote_ids: Vec<String>,
}

pub struct Scheduler {
    runner: Arc<CycleRunner>,
    schedule: DailySchedule,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(runner: Arc<CycleRunner>, schedule: DailySchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            schedule,
            clock,
        }
    }

    /// Run until `shutdown` resolves. Triggers flow through a single-slot
    /// channel: while a cycle runs, one trigger can wait and any further
    /// ones are dropped.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerSummary
    where
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::channel(1);
        if tx.try_send(Trigger::Startup).is_err() {
            warn!(target: "tidevault::scheduler", "startup trigger could not be queued");
        }
        let ticker = tokio::spawn(tick(self.schedule, self.clock.clone(), tx));

        tokio::pin!(shutdown);
        let mut summary = SchedulerSummary::default();
        loop {
            let trigger = tokio::select! {
                _ = &mut shutdown => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            info!(target: "tidevault::scheduler", ?trigger, "trigger fired");

            let runner = self.runner.clone();
            let mut cycle = tokio::spawn(async move { runner.run_cycle().await });
            tokio::select! {
                _ = &mut shutdown => {
                    warn!(target: "tidevault::scheduler", "shutdown requested mid-cycle; abandoning it");
                    cycle.abort();
                    break;
                }
                joined = &mut cycle => match joined {
                    Ok(result) => {
                        match &result.outcome {
                            CycleOutcome::Uploaded { remote, .. } => {
                                summary.cycles += 1;
                                summary.succeeded += 1;
                                summary.remote_ids.push(remote.id.clone());
                            }
                            CycleOutcome::Failed(_) => {
                                summary.cycles += 1;
                                summary.failed += 1;
                            }
                            CycleOutcome::Skipped => summary.skipped += 1,
                        }
                    }
                    Err(err) => {
                        summary.cycles += 1;
                        summary.failed += 1;
                        error!(target: "tidevault::scheduler", error = %err, "backup cycle task panicked");
                    }
                },
            }
        }

        ticker.abort();
        info!(
            target: "tidevault::scheduler",
            cycles = summary.cycles,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "scheduler stopped"
        );
        summary
    }
}

async fn tick(schedule: DailySchedule, clock: Arc<dyn Clock>, tx: mpsc::Sender<Trigger>) {
    // A slot fires at most once, even if the wall clock steps backwards.
    let mut last_fired: Option<DateTime<Utc>> = None;
    loop {
        let now = clock.now();
        let next = schedule.next_after(last_fired.map_or(now, |fired| now.max(fired)));
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(
            target: "tidevault::scheduler",
            next = %next.with_timezone(&schedule.tz),
            "next backup scheduled"
        );
        tokio::time::sleep(wait).await;
        last_fired = Some(next);

        match tx.try_send(Trigger::Scheduled(next)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "tidevault::scheduler",
                    at = %next,
                    "previous cycle still busy with a trigger queued; dropping this one"
                );
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::testing::{FakeAuth, FakeDumper, FakeUploader};
    use chrono::Timelike;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let schedule = DailySchedule::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            chrono_tz::America::Lima,
        );
        // 10:15:30Z is 05:15:30 in Lima; next local midnight is 05:00Z next day.
        assert_eq!(schedule.next_after(utc(2024, 3, 5, 10, 15, 30)), utc(2024, 3, 6, 5, 0, 0));
        // Exactly on the trigger moves to the following day.
        assert_eq!(schedule.next_after(utc(2024, 3, 6, 5, 0, 0)), utc(2024, 3, 7, 5, 0, 0));

        let early = DailySchedule::new(NaiveTime::from_hms_opt(23, 0, 0).unwrap(), chrono_tz::UTC);
        assert_eq!(early.next_after(utc(2024, 3, 5, 10, 0, 0)), utc(2024, 3, 5, 23, 0, 0));
    }

    #[test]
    fn dst_gap_moves_to_first_valid_minute() {
        // 2024-03-10 02:30 does not exist in New York.
        let schedule = DailySchedule::new(
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            chrono_tz::America::New_York,
        );
        let next = schedule.next_after(utc(2024, 3, 10, 0, 0, 0));
        assert_eq!(next, utc(2024, 3, 10, 7, 0, 0));
        assert_eq!(next.with_timezone(&chrono_tz::America::New_York).hour(), 3);
    }

    #[test]
    fn ambiguous_time_uses_earliest_instant() {
        // 2024-11-03 01:30 happens twice in New York; EDT comes first.
        let schedule = DailySchedule::new(
            NaiveTime::from_hms_opt(1, 30, 0).unwrap(),
            chrono_tz::America::New_York,
        );
        assert_eq!(schedule.next_after(utc(2024, 11, 3, 0, 0, 0)), utc(2024, 11, 3, 5, 30, 0));
    }

    /// Wall clock that follows tokio's (pausable) clock from a fixed origin.
    struct TokioClock {
        origin: DateTime<Utc>,
        start: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = ChronoDuration::from_std(self.start.elapsed())
                .unwrap_or_else(|_| ChronoDuration::zero());
            self.origin + elapsed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_at_startup_then_daily_until_shutdown() {
        let dumper = Arc::new(FakeDumper::default());
        let auth = Arc::new(FakeAuth::default());
        let uploader = Arc::new(FakeUploader::default());
        let runner = Arc::new(CycleRunner::new(dumper.clone(), auth, uploader, "folder-1"));
        let clock = Arc::new(TokioClock {
            origin: utc(2024, 3, 5, 10, 15, 30),
            start: tokio::time::Instant::now(),
        });
        let scheduler = Scheduler::new(
            runner,
            DailySchedule::new(NaiveTime::from_hms_opt(0, 0, 0).unwrap(), chrono_tz::UTC),
            clock,
        );

        let summary = scheduler
            .run(tokio::time::sleep(Duration::from_secs(3 * 86_400 + 60)))
            .await;

        // startup + midnights of the 6th, 7th and 8th
        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.succeeded, 4);
        let mut ids = summary.remote_ids.clone();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(dumper.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    /// Follows tokio's clock, then jumps back `step` once it has read a time
    /// at or past `step_at`.
    struct SteppingClock {
        inner: TokioClock,
        step_at: DateTime<Utc>,
        step: ChronoDuration,
        stepped: std::sync::atomic::AtomicBool,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let now = self.inner.now();
            if now >= self.step_at {
                self.stepped.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            if self.stepped.load(std::sync::atomic::Ordering::SeqCst) {
                now - self.step
            } else {
                now
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backward_clock_step_does_not_refire_a_slot() {
        let dumper = Arc::new(FakeDumper::default());
        let runner = Arc::new(CycleRunner::new(
            dumper.clone(),
            Arc::new(FakeAuth::default()),
            Arc::new(FakeUploader::default()),
            "folder-1",
        ));
        let clock = Arc::new(SteppingClock {
            inner: TokioClock {
                origin: utc(2024, 3, 5, 23, 59, 50),
                start: tokio::time::Instant::now(),
            },
            step_at: utc(2024, 3, 6, 0, 0, 0),
            step: ChronoDuration::seconds(2),
            stepped: std::sync::atomic::AtomicBool::new(false),
        });
        let scheduler = Scheduler::new(
            runner,
            DailySchedule::new(NaiveTime::from_hms_opt(0, 0, 0).unwrap(), chrono_tz::UTC),
            clock,
        );

        let summary = scheduler
            .run(tokio::time::sleep(Duration::from_secs(120)))
            .await;

        // startup plus the single midnight slot
        assert_eq!(summary.cycles, 2);
        assert_eq!(dumper.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_do_not_stop_the_schedule() {
        let dumper = Arc::new(FakeDumper {
            fail: true,
            ..Default::default()
        });
        let runner = Arc::new(CycleRunner::new(
            dumper,
            Arc::new(FakeAuth::default()),
            Arc::new(FakeUploader::default()),
            "folder-1",
        ));
        let scheduler = Scheduler::new(
            runner,
            DailySchedule::new(NaiveTime::from_hms_opt(0, 0, 0).unwrap(), chrono_tz::UTC),
            Arc::new(TokioClock {
                origin: utc(2024, 3, 5, 10, 15, 30),
                start: tokio::time::Instant::now(),
            }),
        );

        let summary = scheduler
            .run(tokio::time::sleep(Duration::from_secs(86_400)))
            .await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed, 2);
        assert!(summary.remote_ids.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_cycle_abandons_it() {
        let dumper = Arc::new(FakeDumper {
            hold: Some(Duration::from_secs(3_600)),
            ..Default::default()
        });
        let runner = Arc::new(CycleRunner::new(
            dumper.clone(),
            Arc::new(FakeAuth::default()),
            Arc::new(FakeUploader::default()),
            "folder-1",
        ));
        let scheduler = Scheduler::new(
            runner,
            DailySchedule::new(NaiveTime::from_hms_opt(0, 0, 0).unwrap(), chrono_tz::UTC),
            Arc::new(TokioClock {
                origin: utc(2024, 3, 5, 10, 15, 30),
                start: tokio::time::Instant::now(),
            }),
        );

        let summary = scheduler
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(summary.cycles, 0);
        assert_eq!(dumper.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
