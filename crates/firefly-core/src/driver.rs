//! Request/acknowledge handshake around a world running on its own thread.

use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

use crate::snapshot::WorldSnapshot;
use crate::world::World;
use crate::{FireflyConfig, FireflyId, TickReport, WorldError};

/// Errors raised by [`WorldDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The worker thread is gone, usually because a tick panicked.
    #[error("world worker disconnected")]
    Disconnected,
    #[error("failed to spawn world worker: {0}")]
    Spawn(String),
    #[error(transparent)]
    World(#[from] WorldError),
}

type Reply<T> = mpsc::Sender<T>;

enum DriverCommand {
    Step(Reply<TickReport>),
    Snapshot(Reply<WorldSnapshot>),
    Hatch(usize, Reply<Result<Vec<FireflyId>, WorldError>>),
    Finish(Reply<World>),
    Shutdown,
}

/// Owns a [`World`] on a named worker thread; every call blocks until the
/// worker acknowledges it.
pub struct WorldDriver {
    tx: mpsc::Sender<DriverCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorldDriver {
    /// Build a world from `config` and start driving it.
    pub fn new(config: FireflyConfig) -> Result<Self, DriverError> {
        Self::from_world(World::new(config)?)
    }

    /// Take ownership of an existing world.
    pub fn from_world(mut world: World) -> Result<Self, DriverError> {
        let (tx, rx) = mpsc::channel::<DriverCommand>();
        let handle = thread::Builder::new()
            .name("firefly-world".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        DriverCommand::Step(reply) => {
                            let report = world.step();
                            if reply.send(report).is_err() {
                                warn!(tick = report.tick.0, "step acknowledgement dropped");
                            }
                        }
                        DriverCommand::Snapshot(reply) => {
                            let _ = reply.send(world.snapshot());
                        }
                        DriverCommand::Hatch(count, reply) => {
                            let _ = reply.send(world.hatch_fireflies(count));
                        }
                        DriverCommand::Finish(reply) => {
                            let _ = reply.send(world);
                            return;
                        }
                        DriverCommand::Shutdown => break,
                    }
                }
                debug!("world worker stopped");
            })
            .map_err(|err| DriverError::Spawn(err.to_string()))?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> DriverCommand,
    ) -> Result<T, DriverError> {
        let (reply, ack) = mpsc::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| DriverError::Disconnected)?;
        ack.recv().map_err(|_| DriverError::Disconnected)
    }

    /// Run one tick and wait for its report.
    pub fn step(&self) -> Result<TickReport, DriverError> {
        self.request(DriverCommand::Step)
    }

    /// Run `ticks` ticks back to back, returning every report.
    pub fn run(&self, ticks: usize) -> Result<Vec<TickReport>, DriverError> {
        (0..ticks).map(|_| self.step()).collect()
    }

    pub fn snapshot(&self) -> Result<WorldSnapshot, DriverError> {
        self.request(DriverCommand::Snapshot)
    }

    /// Hatch `count` new fireflies with fresh ids.
    pub fn hatch(&self, count: usize) -> Result<Vec<FireflyId>, DriverError> {
        Ok(self.request(|reply| DriverCommand::Hatch(count, reply))??)
    }

    /// Stop the worker and hand the world back.
    pub fn finish(self) -> Result<World, DriverError> {
        self.request(DriverCommand::Finish)
    }
}

impl Drop for WorldDriver {
    fn drop(&mut self) {
        let _ = self.tx.send(DriverCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            warn!(?err, "world worker thread panicked");
        }
    }
}
