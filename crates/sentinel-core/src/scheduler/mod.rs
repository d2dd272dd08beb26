//! Cooperative task scheduler
//!
//! A fixed-capacity task table with due-time bookkeeping. Each call to
//! [`Scheduler::run_once`] picks one due task, runs it to completion and
//! reschedules it. Nothing here preempts: a task body that blocks stalls
//! every other task, so task bodies are written as short, resumable steps.
//!
//! ## Selection
//!
//! Among the enabled tasks whose next-due time is `<= now`, the task with
//! the highest [`Priority`] runs first, then the one that has been due the
//! longest, then the one registered first.
//!
//! ## Rescheduling
//!
//! - On time: `next_due = last_due + period` (no drift).
//! - Fell behind by whole periods: missed slots are skipped, phase is kept.
//! - Overran its budget: `next_due = completed + period`, the overrun is
//!   logged and counted.
//! - Returned a [`TaskFault`]: the task is disabled for good.

use core::fmt::Debug;

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{debug, error, warn};
use thiserror_no_std::Error;

use crate::clock::Clock;

/// Priority tier of a task. Earlier variants win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Sensor acquisition; pulse timing suffers when starved.
    Sensor,
    /// Control decisions that consume sensor output.
    Control,
    /// Display, telemetry and input glue.
    Interface,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task period must be non-zero")]
    ZeroPeriod,
    #[error("task table is full")]
    TableFull,
    #[error("task is already registered")]
    DuplicateTask,
}

/// Unrecoverable fault raised by a task body. The scheduler disables the
/// task that raised it and keeps running the rest.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFault {
    #[error("{task} hit a programming fault: {details}")]
    ProgrammingFault {
        task: &'static str,
        details: &'static str,
    },
}

/// Static description of a task, supplied at registration.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec<Id> {
    pub id: Id,
    /// Minimum interval between two runs.
    pub period: Duration,
    /// Maximum expected run time of one invocation.
    pub budget: Duration,
    pub priority: Priority,
}

/// One entry of the task table.
#[derive(Debug, Clone, Copy)]
pub struct TaskDescriptor<Id> {
    spec: TaskSpec<Id>,
    next_due: Instant,
    enabled: bool,
    runs: u32,
    overruns: u32,
}

impl<Id: Copy> TaskDescriptor<Id> {
    pub fn id(&self) -> Id {
        self.spec.id
    }

    pub fn spec(&self) -> &TaskSpec<Id> {
        &self.spec
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

/// Aggregate counters, handed to every task so telemetry can report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u32,
    pub overruns: u32,
    pub skipped_slots: u32,
    pub disabled_tasks: u8,
}

/// What a task body gets to see about the current invocation.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    /// Time at which the scheduler selected the task.
    pub now: Instant,
    pub stats: SchedulerStats,
}

/// The set of task bodies the scheduler dispatches into.
pub trait TaskSet {
    type Id: Copy + Eq + Debug;

    /// Run one invocation of `id`. Must return within the task's budget.
    fn run(&mut self, id: Self::Id, ctx: TaskContext) -> Result<(), TaskFault>;
}

pub struct Scheduler<Id, const N: usize> {
    tasks: Vec<TaskDescriptor<Id>, N>,
    stats: SchedulerStats,
}

impl<Id: Copy + Eq + Debug, const N: usize> Default for Scheduler<Id, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Copy + Eq + Debug, const N: usize> Scheduler<Id, N> {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            stats: SchedulerStats {
                runs: 0,
                overruns: 0,
                skipped_slots: 0,
                disabled_tasks: 0,
            },
        }
    }

    /// Register a task whose first run is due at `first_due`.
    pub fn add(&mut self, spec: TaskSpec<Id>, first_due: Instant) -> Result<(), SchedulerError> {
        if spec.period.as_ticks() == 0 {
            return Err(SchedulerError::ZeroPeriod);
        }
        if self.tasks.iter().any(|t| t.spec.id == spec.id) {
            return Err(SchedulerError::DuplicateTask);
        }

        self.tasks
            .push(TaskDescriptor {
                spec,
                next_due: first_due,
                enabled: true,
                runs: 0,
                overruns: 0,
            })
            .map_err(|_| SchedulerError::TableFull)?;

        debug!(
            "Registered task {:?} (period {} ms, {:?})",
            spec.id,
            spec.period.as_millis(),
            spec.priority
        );
        Ok(())
    }

    /// Index of the task that should run at `now`, if any.
    fn select(&self, now: Instant) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.enabled && t.next_due <= now)
            .min_by_key(|(index, t)| (t.spec.priority, t.next_due, *index))
            .map(|(index, _)| index)
    }

    /// Run at most one due task. Returns the id of the task that ran.
    pub fn run_once<T, C>(&mut self, tasks: &mut T, clock: &C) -> Option<Id>
    where
        T: TaskSet<Id = Id>,
        C: Clock,
    {
        let started = clock.now();
        let index = self.select(started)?;
        let id = self.tasks[index].spec.id;

        let result = tasks.run(
            id,
            TaskContext {
                now: started,
                stats: self.stats,
            },
        );
        let completed = clock.now();

        self.stats.runs = self.stats.runs.wrapping_add(1);
        let task = &mut self.tasks[index];
        task.runs = task.runs.wrapping_add(1);

        if let Err(fault) = result {
            error!("Task {:?} disabled: {}", id, fault);
            task.enabled = false;
            self.stats.disabled_tasks = self.stats.disabled_tasks.saturating_add(1);
            return Some(id);
        }

        let elapsed = completed.saturating_duration_since(started);
        if elapsed > task.spec.budget {
            warn!(
                "Task {:?} overran its budget: {} us > {} us",
                id,
                elapsed.as_micros(),
                task.spec.budget.as_micros()
            );
            task.overruns = task.overruns.saturating_add(1);
            self.stats.overruns = self.stats.overruns.saturating_add(1);
            task.next_due = completed + task.spec.period;
        } else {
            let period = task.spec.period;
            let mut next = task.next_due + period;
            if next + period <= completed {
                let missed = completed.saturating_duration_since(next).as_ticks() / period.as_ticks();
                next += Duration::from_ticks(missed * period.as_ticks());
                self.stats.skipped_slots = self.stats.skipped_slots.saturating_add(missed as u32);
            }
            task.next_due = next;
        }

        Some(id)
    }

    /// Run due tasks until none is left. Returns how many ran.
    ///
    /// A task runs at most twice per call (its own slot plus one catch-up
    /// slot), so the pass is bounded even with a clock that keeps moving.
    pub fn run_pending<T, C>(&mut self, tasks: &mut T, clock: &C) -> usize
    where
        T: TaskSet<Id = Id>,
        C: Clock,
    {
        let mut ran = 0;
        while ran < 2 * N {
            if self.run_once(tasks, clock).is_none() {
                break;
            }
            ran += 1;
        }
        ran
    }

    /// Earliest due time among enabled tasks.
    pub fn next_wake(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.next_due)
            .min()
    }

    pub fn task(&self, id: Id) -> Option<&TaskDescriptor<Id>> {
        self.tasks.iter().find(|t| t.spec.id == id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor<Id>> {
        self.tasks.iter()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestTask {
        Fast,
        Medium,
        Slow,
    }

    struct Recorder<'a> {
        clock: &'a ManualClock,
        log: std::vec::Vec<(TestTask, u64)>,
        cost: Option<(TestTask, Duration)>,
        faulty: Option<TestTask>,
    }

    impl<'a> Recorder<'a> {
        fn new(clock: &'a ManualClock) -> Self {
            Self {
                clock,
                log: std::vec::Vec::new(),
                cost: None,
                faulty: None,
            }
        }

        fn count(&self, task: TestTask) -> usize {
            self.log.iter().filter(|(t, _)| *t == task).count()
        }
    }

    impl TaskSet for Recorder<'_> {
        type Id = TestTask;

        fn run(&mut self, id: TestTask, ctx: TaskContext) -> Result<(), TaskFault> {
            self.log.push((id, ctx.now.as_millis()));
            if let Some((task, cost)) = self.cost {
                if task == id {
                    self.clock.advance(cost);
                }
            }
            if self.faulty == Some(id) {
                return Err(TaskFault::ProgrammingFault {
                    task: "test",
                    details: "injected",
                });
            }
            Ok(())
        }
    }

    fn spec(id: TestTask, period_ms: u64, priority: Priority) -> TaskSpec<TestTask> {
        TaskSpec {
            id,
            period: Duration::from_millis(period_ms),
            budget: Duration::from_millis(5),
            priority,
        }
    }

    fn three_task_scheduler() -> Scheduler<TestTask, 4> {
        let start = Instant::from_millis(0);
        let mut scheduler = Scheduler::new();
        // Registered in reverse so registration order cannot explain the result.
        scheduler
            .add(spec(TestTask::Slow, 10_000, Priority::Interface), start)
            .unwrap();
        scheduler
            .add(spec(TestTask::Medium, 5_000, Priority::Control), start)
            .unwrap();
        scheduler
            .add(spec(TestTask::Fast, 1_000, Priority::Sensor), start)
            .unwrap();
        scheduler
    }

    #[test]
    fn test_round_robin_over_ten_seconds() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);

        for _ in 0..100 {
            scheduler.run_pending(&mut recorder, &clock);
            clock.advance(Duration::from_millis(100));
        }

        assert_eq!(recorder.count(TestTask::Fast), 10);
        assert_eq!(recorder.count(TestTask::Medium), 2);
        assert_eq!(recorder.count(TestTask::Slow), 1);
    }

    #[test]
    fn test_priority_tier_orders_same_tick_ties() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);

        for _ in 0..100 {
            scheduler.run_pending(&mut recorder, &clock);
            clock.advance(Duration::from_millis(100));
        }

        let at_zero: std::vec::Vec<_> = recorder
            .log
            .iter()
            .filter(|(_, t)| *t == 0)
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(at_zero, [TestTask::Fast, TestTask::Medium, TestTask::Slow]);

        let at_five: std::vec::Vec<_> = recorder
            .log
            .iter()
            .filter(|(_, t)| *t == 5_000)
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(at_five, [TestTask::Fast, TestTask::Medium]);
    }

    #[test]
    fn test_same_tier_runs_longest_due_first() {
        let clock = ManualClock::default();
        let mut scheduler: Scheduler<TestTask, 4> = Scheduler::new();
        scheduler
            .add(
                spec(TestTask::Fast, 1_000, Priority::Interface),
                Instant::from_millis(300),
            )
            .unwrap();
        scheduler
            .add(
                spec(TestTask::Slow, 1_000, Priority::Interface),
                Instant::from_millis(100),
            )
            .unwrap();
        let mut recorder = Recorder::new(&clock);

        clock.advance(Duration::from_millis(500));
        scheduler.run_pending(&mut recorder, &clock);

        let order: std::vec::Vec<_> = recorder.log.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, [TestTask::Slow, TestTask::Fast]);
    }

    #[test]
    fn test_next_due_strictly_increases_without_drift() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);

        // Run the fast task 3 ms late every time; it must stay on its grid.
        let mut previous = scheduler.task(TestTask::Fast).unwrap().next_due();
        for second in 0..5u64 {
            clock.advance_to(Instant::from_millis(second * 1_000 + 3));
            scheduler.run_pending(&mut recorder, &clock);
            let next = scheduler.task(TestTask::Fast).unwrap().next_due();
            assert!(next > previous);
            assert_eq!(next.as_millis(), (second + 1) * 1_000);
            previous = next;
        }
    }

    #[test]
    fn test_overrun_degrades_cadence_and_is_counted() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);
        recorder.cost = Some((TestTask::Medium, Duration::from_millis(40)));

        scheduler.run_pending(&mut recorder, &clock);

        let medium = scheduler.task(TestTask::Medium).unwrap();
        assert_eq!(medium.overruns(), 1);
        assert_eq!(medium.next_due().as_millis(), 5_040);
        assert_eq!(scheduler.stats().overruns, 1);
        // The other tasks still ran in the same pass.
        assert_eq!(recorder.count(TestTask::Slow), 1);
        assert_eq!(recorder.count(TestTask::Fast), 1);
    }

    #[test]
    fn test_faulty_task_is_disabled_and_others_keep_running() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);
        recorder.faulty = Some(TestTask::Medium);

        for _ in 0..100 {
            scheduler.run_pending(&mut recorder, &clock);
            clock.advance(Duration::from_millis(100));
        }

        assert_eq!(recorder.count(TestTask::Medium), 1);
        assert_eq!(recorder.count(TestTask::Fast), 10);
        assert!(!scheduler.task(TestTask::Medium).unwrap().is_enabled());
        assert_eq!(scheduler.stats().disabled_tasks, 1);
    }

    #[test]
    fn test_missed_slots_are_skipped_in_phase() {
        let clock = ManualClock::default();
        let mut scheduler: Scheduler<TestTask, 2> = Scheduler::new();
        scheduler
            .add(spec(TestTask::Fast, 100, Priority::Sensor), Instant::from_millis(0))
            .unwrap();
        let mut recorder = Recorder::new(&clock);

        clock.advance_to(Instant::from_millis(1_050));
        let ran = scheduler.run_pending(&mut recorder, &clock);

        // The overdue slot plus one catch-up run for the 1000 ms slot.
        assert_eq!(ran, 2);
        assert_eq!(
            scheduler.task(TestTask::Fast).unwrap().next_due().as_millis(),
            1_100
        );
        assert_eq!(scheduler.stats().skipped_slots, 9);
    }

    #[test]
    fn test_registration_errors() {
        let mut scheduler: Scheduler<TestTask, 2> = Scheduler::new();
        let start = Instant::from_millis(0);

        let mut zero = spec(TestTask::Fast, 1, Priority::Sensor);
        zero.period = Duration::from_ticks(0);
        assert_eq!(scheduler.add(zero, start), Err(SchedulerError::ZeroPeriod));

        scheduler
            .add(spec(TestTask::Fast, 10, Priority::Sensor), start)
            .unwrap();
        assert_eq!(
            scheduler.add(spec(TestTask::Fast, 10, Priority::Sensor), start),
            Err(SchedulerError::DuplicateTask)
        );
        scheduler
            .add(spec(TestTask::Medium, 10, Priority::Sensor), start)
            .unwrap();
        assert_eq!(
            scheduler.add(spec(TestTask::Slow, 10, Priority::Sensor), start),
            Err(SchedulerError::TableFull)
        );
    }

    #[test]
    fn test_next_wake_ignores_disabled_tasks() {
        let clock = ManualClock::default();
        let mut scheduler = three_task_scheduler();
        let mut recorder = Recorder::new(&clock);
        recorder.faulty = Some(TestTask::Fast);

        assert_eq!(scheduler.next_wake(), Some(Instant::from_millis(0)));
        scheduler.run_pending(&mut recorder, &clock);
        assert_eq!(scheduler.next_wake(), Some(Instant::from_millis(5_000)));
        assert!(scheduler.run_once(&mut recorder, &clock).is_none());
    }
}
