//! Launches the external gesture-driven executables (volume control and
//! friends) and reports when they start and stop. Independent of the
//! recognition session.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick, unbounded};
use serde::Deserialize;

use crate::{error::SupervisorError, lock};

const WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// An executable, either as a bare path or with arguments.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProcessSpec {
    Program(PathBuf),
    WithArgs {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ProcessSpec {
    pub fn program(&self) -> &Path {
        match self {
            ProcessSpec::Program(program) | ProcessSpec::WithArgs { program, .. } => program,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            ProcessSpec::Program(_) => &[],
            ProcessSpec::WithArgs { args, .. } => args,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.args(self.args()).stdin(Stdio::null());
        command
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessStatusChanged {
    pub process_id: String,
    pub is_running: bool,
}

struct RunningProcess {
    id: String,
    child: Child,
}

#[derive(Default)]
struct Subscribers(Mutex<Vec<Sender<ProcessStatusChanged>>>);

impl Subscribers {
    fn broadcast(&self, process_id: &str, is_running: bool) {
        let event = ProcessStatusChanged {
            process_id: process_id.to_string(),
            is_running,
        };
        lock(&self.0).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub struct ProcessSupervisor {
    registry: BTreeMap<String, ProcessSpec>,
    running: Arc<Mutex<Option<RunningProcess>>>,
    subscribers: Arc<Subscribers>,
    stop_tx: Option<Sender<()>>,
    watcher: Option<thread::JoinHandle<()>>,
}

impl ProcessSupervisor {
    pub fn new(registry: BTreeMap<String, ProcessSpec>) -> Self {
        let running: Arc<Mutex<Option<RunningProcess>>> = Arc::new(Mutex::new(None));
        let subscribers = Arc::new(Subscribers::default());
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let watcher = {
            let running = Arc::clone(&running);
            let subscribers = Arc::clone(&subscribers);
            thread::Builder::new()
                .name("process-watcher".into())
                .spawn(move || watch(stop_rx, running, subscribers))
        };
        let watcher = match watcher {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("process watcher unavailable, exits will not be reported: {err}");
                None
            }
        };

        Self {
            registry,
            running,
            subscribers,
            stop_tx: Some(stop_tx),
            watcher,
        }
    }

    pub fn subscribe(&self) -> Receiver<ProcessStatusChanged> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers.0).push(tx);
        rx
    }

    /// Starts `id`, closing whatever was running before. Does not wait for
    /// the process to finish.
    pub fn execute(&self, id: &str) -> Result<(), SupervisorError> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownProcess(id.to_string()))?;
        self.close_process();

        let child = entry.command().spawn().map_err(|source| SupervisorError::Launch {
            id: id.to_string(),
            source,
        })?;
        log::info!(
            "launched `{id}` ({}) as pid {}",
            entry.program().display(),
            child.id()
        );
        // Announce before the watcher can observe an early exit.
        let mut running = lock(&self.running);
        *running = Some(RunningProcess {
            id: id.to_string(),
            child,
        });
        self.subscribers.broadcast(id, true);
        Ok(())
    }

    /// Terminates the running process, if any.
    pub fn close_process(&self) {
        let Some(mut process) = lock(&self.running).take() else {
            return;
        };
        if let Err(err) = process.child.kill() {
            log::debug!("`{}` already gone: {err}", process.id);
        }
        if let Err(err) = process.child.wait() {
            log::warn!("failed to reap `{}`: {err}", process.id);
        }
        log::info!("closed `{}`", process.id);
        self.subscribers.broadcast(&process.id, false);
    }

    pub fn status(&self, id: &str) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|process| process.id == id)
    }

    pub fn running(&self) -> Option<String> {
        lock(&self.running).as_ref().map(|process| process.id.clone())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.close_process();
        drop(self.stop_tx.take());
        if let Some(handle) = self.watcher.take() {
            if handle.join().is_err() {
                log::error!("process watcher panicked");
            }
        }
    }
}

fn watch(
    stop_rx: Receiver<()>,
    running: Arc<Mutex<Option<RunningProcess>>>,
    subscribers: Arc<Subscribers>,
) {
    let ticker = tick(WATCH_INTERVAL);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {}
        }

        let exited = {
            let mut slot = lock(&running);
            let finished = match slot.as_mut().map(|process| process.child.try_wait()) {
                Some(Ok(Some(status))) => Some(status.to_string()),
                Some(Err(err)) => Some(err.to_string()),
                Some(Ok(None)) | None => None,
            };
            finished.and_then(|status| slot.take().map(|process| (process.id, status)))
        };

        if let Some((id, status)) = exited {
            log::info!("`{id}` exited on its own ({status})");
            subscribers.broadcast(&id, false);
        }
    }
}
