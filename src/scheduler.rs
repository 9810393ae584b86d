use crate::engine::{AudioEngine, EngineState};
use crate::observers::{SubscriptionId, Subscribers};
use crate::recurrence::{ChimeKind, ChimeSchedule, ScheduleWindow, WindowPhase};
use chrono::{NaiveDateTime, TimeDelta};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ── Status ───────────────────────────────────────────────────────────────────

/// Whether the schedule is being followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    Stopped,
    Started,
    Error,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Stopped => write!(f, "stopped"),
            ScheduleStatus::Started => write!(f, "started"),
            ScheduleStatus::Error => write!(f, "error"),
        }
    }
}

struct BoardInner {
    current: Mutex<ScheduleStatus>,
    observers: Subscribers<ScheduleStatus>,
}

/// Current schedule status plus its observers. A new observer is told the
/// current status as part of registering.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl StatusBoard {
    pub fn new() -> Self {
        StatusBoard {
            inner: Arc::new(BoardInner {
                current: Mutex::new(ScheduleStatus::Stopped),
                observers: Subscribers::new(),
            }),
        }
    }

    pub fn status(&self) -> ScheduleStatus {
        *self.inner.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `status`; observers hear about it only if it changed.
    /// Observers run after the board lock is released, so they may read it.
    pub fn publish(&self, status: ScheduleStatus) {
        {
            let mut current = self.inner.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == status {
                return;
            }
            *current = status;
        }
        info!(%status, "schedule status");
        self.inner.observers.notify(status);
    }

    pub fn register<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(ScheduleStatus) + Send + Sync + 'static,
    {
        let observer = Arc::new(observer);
        let id = {
            let observer = observer.clone();
            self.inner.observers.subscribe(move |status| observer(status))
        };
        observer(self.status());
        id
    }

    pub fn deregister(&self, id: SubscriptionId) {
        self.inner.observers.unsubscribe(id);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    StartShow,
    EndShow,
    Chime(ChimeKind),
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::StartShow => write!(f, "start-show"),
            JobAction::EndShow => write!(f, "end-show"),
            JobAction::Chime(kind) => write!(f, "{} chime", kind),
        }
    }
}

/// A pending action. Recurring jobs re-arm `every` after firing until they
/// reach `expires`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub at: NaiveDateTime,
    pub action: JobAction,
    pub every: Option<TimeDelta>,
    pub expires: Option<NaiveDateTime>,
}

impl Job {
    pub fn once(at: NaiveDateTime, action: JobAction) -> Self {
        Job {
            at,
            action,
            every: None,
            expires: None,
        }
    }

    pub fn recurring(
        at: NaiveDateTime,
        action: JobAction,
        every: TimeDelta,
        expires: NaiveDateTime,
    ) -> Self {
        Job {
            at,
            action,
            every: Some(every),
            expires: Some(expires),
        }
    }

    fn expired_at(&self, instant: NaiveDateTime) -> bool {
        self.expires.is_some_and(|expires| instant >= expires)
    }
}

/// Pending jobs, polled by a single owner.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable { jobs: Vec::new() }
    }

    /// Swap in a whole new job set.
    pub fn replace(&mut self, jobs: Vec<Job>) {
        self.jobs = jobs;
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn arm(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Earliest pending instant.
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().map(|j| j.at).min()
    }

    /// Remove and return the earliest job due at `now`. A recurring job is
    /// re-armed at its next occurrence after `now`, and is skipped instead of
    /// fired when a whole period late. Expired jobs are dropped without firing.
    pub fn pop_due(&mut self, now: NaiveDateTime) -> Option<(JobAction, NaiveDateTime)> {
        loop {
            let index = self
                .jobs
                .iter()
                .enumerate()
                .filter(|(_, job)| job.at <= now)
                .min_by_key(|(_, job)| job.at)
                .map(|(i, _)| i)?;
            let job = self.jobs.swap_remove(index);
            if job.expired_at(job.at) {
                debug!(action = %job.action, "job expired");
                continue;
            }

            let mut missed = false;
            if let Some(every) = job.every.filter(|e| *e > TimeDelta::zero()) {
                missed = now - job.at >= every;
                let mut next = job.at + every;
                while next <= now {
                    next += every;
                }
                if !job.expired_at(next) {
                    self.jobs.push(Job { at: next, ..job.clone() });
                }
            }
            if missed {
                warn!(action = %job.action, at = %job.at, "recurring job missed its slot; skipped");
                continue;
            }
            return Some((job.action, job.at));
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

/// Tone parameters for the chimes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChimeConfig {
    pub frequency: f64,
    pub level_dbfs: f64,
    pub long: Duration,
    pub short: Duration,
}

impl ChimeConfig {
    pub fn duration(&self, kind: ChimeKind) -> Duration {
        match kind {
            ChimeKind::Long => self.long,
            ChimeKind::Short => self.short,
        }
    }
}

impl Default for ChimeConfig {
    fn default() -> Self {
        ChimeConfig {
            frequency: 1000.0,
            level_dbfs: -18.0,
            long: Duration::from_secs(1),
            short: Duration::from_millis(500),
        }
    }
}

/// Follows the weekly window: fades the relay in and out at its boundaries
/// and chimes while off air. Driven by `tick`; owns its job table.
pub struct ScheduleController {
    engine: Arc<AudioEngine>,
    window: ScheduleWindow,
    chimes: ChimeConfig,
    jobs: JobTable,
    status: StatusBoard,
    /// The window is open and the relay should be carried.
    on_air: bool,
}

impl ScheduleController {
    pub fn new(engine: Arc<AudioEngine>, window: ScheduleWindow, chimes: ChimeConfig) -> Self {
        ScheduleController {
            engine,
            window,
            chimes,
            jobs: JobTable::new(),
            status: StatusBoard::new(),
            on_air: false,
        }
    }

    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status.status()
    }

    pub fn window(&self) -> &ScheduleWindow {
        &self.window
    }

    pub fn chimes(&self) -> &ChimeConfig {
        &self.chimes
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    /// Begin following the schedule as of `now`.
    pub fn start(&mut self, now: NaiveDateTime) {
        if matches!(self.engine.state(), EngineState::Stopped | EngineState::Error) {
            self.engine.start();
        }
        match self.engine.state() {
            EngineState::Error => {
                self.fail();
                return;
            }
            EngineState::Stopped => {
                error!("audio engine did not start; check the input and output devices");
                self.fail();
                return;
            }
            _ => {}
        }

        self.status.publish(ScheduleStatus::Started);
        match self.window.evaluate(now) {
            WindowPhase::OnAir { until } => {
                info!(%until, "window open");
                self.start_show(now);
            }
            WindowPhase::OffAir { next_start } => {
                info!(%next_start, "window closed");
                self.end_show(now);
            }
        }
    }

    /// Stop following the schedule. The relay is faded out; streams stay open.
    pub fn stop(&mut self) {
        self.jobs.clear();
        self.on_air = false;
        self.leave_air();
        self.status.publish(ScheduleStatus::Stopped);
    }

    /// Window opened: fade in and arm the end of this window.
    pub fn start_show(&mut self, now: NaiveDateTime) {
        let until = self.window.following_finish(now);
        self.jobs.replace(vec![Job::once(until, JobAction::EndShow)]);
        self.on_air = true;
        self.go_on_air();
        info!(%until, "show started");
    }

    /// Window closed: fade out, arm the next start and the chimes leading up to it.
    pub fn end_show(&mut self, now: NaiveDateTime) {
        let next_start = self.window.next_start(now);
        let chimes = ChimeSchedule::before(next_start);

        let mut jobs = vec![Job::once(next_start, JobAction::StartShow)];
        jobs.extend(chimes.first_slots(now).into_iter().map(|(at, kind)| {
            Job::recurring(at, JobAction::Chime(kind), TimeDelta::minutes(1), chimes.cutoff)
        }));
        self.jobs.replace(jobs);

        self.on_air = false;
        self.leave_air();
        info!(%next_start, cutoff = %chimes.cutoff, "show ended");
    }

    /// Apply a new window and chime config, re-evaluating if started.
    pub fn reconfigure(&mut self, window: ScheduleWindow, chimes: ChimeConfig, now: NaiveDateTime) {
        self.window = window;
        self.chimes = chimes;
        info!(%window, "schedule reconfigured");
        if self.status() == ScheduleStatus::Started {
            self.start(now);
        }
    }

    /// Run every job due at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) {
        if self.status() != ScheduleStatus::Started {
            return;
        }
        if self.engine.state() == EngineState::Error {
            self.fail();
            return;
        }
        if self.on_air && self.engine.state() == EngineState::Started {
            info!("window open but relay off; fading in");
            self.engine.fade_in();
        }

        while let Some((action, at)) = self.jobs.pop_due(now) {
            debug!(%action, %at, "job due");
            match action {
                JobAction::StartShow => self.start_show(now),
                JobAction::EndShow => self.end_show(now),
                JobAction::Chime(kind) => self.chime(kind),
            }
        }
    }

    fn chime(&self, kind: ChimeKind) {
        let duration = self.chimes.duration(kind);
        debug!(%kind, ?duration, "chime");
        self.engine
            .play_tone(self.chimes.frequency, duration, self.chimes.level_dbfs);
    }

    /// Fade in once any pending fade has resolved. A fade-out that has not
    /// finished yet is picked up again by `tick`.
    fn go_on_air(&self) {
        match self.engine.settle() {
            EngineState::Started => self.engine.fade_in(),
            EngineState::FadeIn | EngineState::Relaying => debug!("already on air"),
            state => debug!(%state, "fade-in deferred"),
        }
    }

    fn leave_air(&self) {
        if self.engine.settle() == EngineState::Relaying {
            self.engine.fade_out();
        }
    }

    fn fail(&mut self) {
        error!("audio engine failed; schedule halted until restarted");
        self.jobs.clear();
        self.on_air = false;
        self.status.publish(ScheduleStatus::Error);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
