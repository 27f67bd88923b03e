/*!
 * World-Switch Worker Task
 *
 * One dedicated thread per manual world switch. It blocks on a command channel whose
 * receive deadline doubles as the one-shot switch timer, so wakes, timer re-arms and
 * cancellation are all serialized through the same queue.
 */

use super::WorldSwitch;
use crate::core::types::WorldSwitchId;
use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Control messages for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
    /// Run one loop iteration now
    Wake,
    /// Run one iteration after this many µs, replacing any pending deadline
    ArmTimer(u64),
    /// Drop the pending deadline
    CancelTimer,
    Shutdown,
}

/// Loop-side handle: wake the worker and arm its timer
///
/// Without a worker (inline driving) commands are only counted, and the caller runs
/// the loop and the timer expiry by hand.
pub struct TaskSignal {
    tx: Option<Sender<TaskCommand>>,
    armed_us: AtomicU64,
    wakes: AtomicU64,
}

impl TaskSignal {
    pub(super) fn new(tx: Option<Sender<TaskCommand>>) -> Self {
        Self {
            tx,
            armed_us: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
        }
    }

    fn send(&self, cmd: TaskCommand) {
        if let Some(tx) = &self.tx {
            if tx.send(cmd).is_err() {
                debug!("world switch worker gone, dropped {:?}", cmd);
            }
        }
    }

    pub fn wake(&self) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
        self.send(TaskCommand::Wake);
    }

    pub fn arm(&self, us: u64) {
        self.armed_us.store(us, Ordering::Release);
        self.send(TaskCommand::ArmTimer(us));
    }

    pub fn cancel(&self) {
        self.armed_us.store(0, Ordering::Release);
        self.send(TaskCommand::CancelTimer);
    }

    /// Last armed slice, `None` after a cancel or an expiry
    pub fn armed(&self) -> Option<u64> {
        match self.armed_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(us),
        }
    }

    pub(super) fn expired(&self) {
        self.armed_us.store(0, Ordering::Release);
    }

    pub fn wakes(&self) -> u64 {
        self.wakes.load(Ordering::Relaxed)
    }
}

/// Handle to the worker thread; dropping it shuts the thread down
pub struct SwitchTask {
    tx: Sender<TaskCommand>,
    handle: Option<JoinHandle<()>>,
}

impl SwitchTask {
    /// Spawn the worker for `ws`
    ///
    /// The worker only holds a weak reference, so the world switch can be dropped while
    /// the thread is parked.
    pub(super) fn spawn(
        id: WorldSwitchId,
        ws: Weak<WorldSwitch>,
        tx: Sender<TaskCommand>,
        rx: Receiver<TaskCommand>,
    ) -> std::io::Result<Self> {
        let handle = std::thread::Builder::new()
            .name(format!("world-switch-{}", id))
            .spawn(move || run_worker_loop(id, ws, rx))?;
        info!("World switch {} worker spawned", id);
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(TaskCommand::Shutdown);
        // The last strong reference may be released on the worker itself
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("World switch worker panicked");
        } else {
            debug!("World switch worker shutdown complete");
        }
    }
}

impl Drop for SwitchTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker_loop(id: WorldSwitchId, ws: Weak<WorldSwitch>, rx: Receiver<TaskCommand>) {
    let mut deadline: Option<Instant> = None;
    loop {
        let received = match deadline {
            Some(at) => rx.recv_deadline(at),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(TaskCommand::Wake) => {
                if let Some(ws) = ws.upgrade() {
                    ws.process();
                }
            }
            Ok(TaskCommand::ArmTimer(us)) => {
                deadline = Some(Instant::now() + Duration::from_micros(us));
            }
            Ok(TaskCommand::CancelTimer) => deadline = None,
            Ok(TaskCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                if let Some(ws) = ws.upgrade() {
                    ws.timer_expired();
                    ws.process();
                }
            }
        }
    }
    debug!("World switch {} worker exiting", id);
}
