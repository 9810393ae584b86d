//! ScheduleRuntime: dedicated thread that owns the `ScheduleController`.
//!
//! Commands arrive over an mpsc channel; between commands the loop ticks the
//! controller twice a second via `recv_timeout`. The job table never leaves
//! this thread, so a stop or reconfigure replaces it in one step.

use crate::observers::SubscriptionId;
use crate::recurrence::ScheduleWindow;
use crate::scheduler::{ChimeConfig, ScheduleController, ScheduleStatus, StatusBoard};
use chrono::NaiveDateTime;
use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often pending jobs are polled.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Commands sent from the owner to the schedule thread.
#[derive(Debug)]
pub enum ScheduleCmd {
    Start,
    Stop,
    Reconfigure {
        window: ScheduleWindow,
        chimes: ChimeConfig,
    },
    Shutdown,
}

/// Handle for talking to the schedule thread. Dropping it shuts the thread down.
pub struct ScheduleHandle {
    tx: mpsc::Sender<ScheduleCmd>,
    status: StatusBoard,
    thread: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    pub fn start(&self) {
        self.send(ScheduleCmd::Start);
    }

    pub fn stop(&self) {
        self.send(ScheduleCmd::Stop);
    }

    pub fn reconfigure(&self, window: ScheduleWindow, chimes: ChimeConfig) {
        self.send(ScheduleCmd::Reconfigure { window, chimes });
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status.status()
    }

    /// The observer is called with the current status straight away.
    pub fn register_status_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ScheduleStatus) + Send + Sync + 'static,
    {
        self.status.register(callback)
    }

    pub fn deregister_status_callback(&self, id: SubscriptionId) {
        self.status.deregister(id);
    }

    /// Stop the schedule and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn send(&self, cmd: ScheduleCmd) {
        if self.tx.send(cmd).is_err() {
            warn!("schedule runtime is gone; command dropped");
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(ScheduleCmd::Shutdown);
            if thread.join().is_err() {
                warn!("schedule runtime panicked");
            }
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.join();
    }
}

/// Spawn the schedule thread. `clock` supplies the wall-clock instant used
/// for every decision.
pub fn spawn_schedule_runtime<C>(
    controller: ScheduleController,
    clock: C,
) -> io::Result<ScheduleHandle>
where
    C: Fn() -> NaiveDateTime + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let status = controller.status_board();

    let thread = std::thread::Builder::new()
        .name("schedule-runtime".into())
        .spawn(move || schedule_thread_loop(rx, controller, clock))?;

    Ok(ScheduleHandle {
        tx,
        status,
        thread: Some(thread),
    })
}

/// Local wall-clock time, as the window is defined in local time.
pub fn local_clock() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn schedule_thread_loop<C>(
    rx: mpsc::Receiver<ScheduleCmd>,
    mut controller: ScheduleController,
    clock: C,
) where
    C: Fn() -> NaiveDateTime,
{
    info!("schedule runtime started");
    loop {
        match rx.recv_timeout(TICK_INTERVAL) {
            Ok(ScheduleCmd::Start) => controller.start(clock()),
            Ok(ScheduleCmd::Stop) => controller.stop(),
            Ok(ScheduleCmd::Reconfigure { window, chimes }) => {
                controller.reconfigure(window, chimes, clock())
            }
            Ok(ScheduleCmd::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!("schedule runtime shutting down");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        controller.tick(clock());
    }
    if controller.status() == ScheduleStatus::Started {
        controller.stop();
    }
    info!("schedule runtime stopped");
}
