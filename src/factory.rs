//! Peer factory contexts and their execution threads.
//!
//! The SDK runs its network, signaling and worker tasks on threads the
//! caller provides. A [`FactoryContext`] owns one such thread triple plus the
//! peer factory built on it. The session keeps two contexts, one for
//! producing and one for consuming.

use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;

use crate::audio::device::ProducerAudioDevice;
use crate::errors::ConnectorError;
use crate::sdk::{AudioDeviceModule, MediaSdk, PeerFactory, SdkError, SdkResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ExecThreadInner {
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// A named thread running posted jobs in order.
///
/// Clones share the thread. `stop` closes the queue and joins; jobs already
/// queued still run.
#[derive(Clone)]
pub struct ExecThread {
    inner: Arc<ExecThreadInner>,
}

impl ExecThread {
    pub fn start(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx.iter() {
                    job();
                }
            })?;

        Ok(Self {
            inner: Arc::new(ExecThreadInner {
                name: name.to_string(),
                thread_id: handle.thread().id(),
                sender: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.sender.lock().is_some()
    }

    /// Queue a job without waiting for it.
    pub fn post<F>(&self, job: F) -> SdkResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.inner.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx
                .send(Box::new(job))
                .map_err(|_| SdkError::Failure(format!("{} has exited", self.inner.name))),
            None => Err(SdkError::Failure(format!("{} is stopped", self.inner.name))),
        }
    }

    /// Run a job on the thread and wait for its result. Runs inline when
    /// called from the thread itself.
    pub fn invoke<R, F>(&self, job: F) -> SdkResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }
        let (tx, rx) = bounded(1);
        self.post(move || {
            let _ = tx.send(job());
        })?;
        rx.recv().map_err(|_| SdkError::Abandoned)
    }

    pub fn stop(&self) {
        drop(self.inner.sender.lock().take());
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            if self.is_current() {
                // Cannot join ourselves; the loop ends once this job returns.
                return;
            }
            if handle.join().is_err() {
                log::error!("{} panicked", self.inner.name);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryRole {
    Producer,
    Consumer,
}

impl FactoryRole {
    pub fn thread_prefix(&self) -> &'static str {
        match self {
            FactoryRole::Producer => "crabsoup-producer",
            FactoryRole::Consumer => "crabsoup-consumer",
        }
    }
}

/// Network, signaling and worker threads of one factory.
#[derive(Clone)]
pub struct FactoryThreads {
    pub network: ExecThread,
    pub signaling: ExecThread,
    pub worker: ExecThread,
}

impl FactoryThreads {
    pub fn start(role: FactoryRole) -> Result<Self, ConnectorError> {
        let prefix = role.thread_prefix();
        let spawn = |suffix: &str| {
            let name = format!("{prefix}-{suffix}");
            ExecThread::start(&name).map_err(|e| {
                ConnectorError::factory_init(format!("failed to start thread {name}: {e}"))
            })
        };

        let network = spawn("net")?;
        let signaling = match spawn("signal") {
            Ok(t) => t,
            Err(e) => {
                network.stop();
                return Err(e);
            }
        };
        let worker = match spawn("work") {
            Ok(t) => t,
            Err(e) => {
                network.stop();
                signaling.stop();
                return Err(e);
            }
        };

        Ok(Self {
            network,
            signaling,
            worker,
        })
    }

    pub fn names(&self) -> [&str; 3] {
        [self.network.name(), self.signaling.name(), self.worker.name()]
    }

    pub fn is_running(&self) -> bool {
        self.network.is_running() && self.signaling.is_running() && self.worker.is_running()
    }

    pub fn stop(&self) {
        self.network.stop();
        self.signaling.stop();
        self.worker.stop();
    }
}

/// A peer factory and the threads it runs on. Dropping it stops the threads.
pub struct FactoryContext {
    role: FactoryRole,
    threads: FactoryThreads,
    factory: Arc<dyn PeerFactory>,
}

impl FactoryContext {
    /// Factory whose audio comes from the session's injected device.
    pub fn producer(
        sdk: &dyn MediaSdk,
        audio_device: Arc<ProducerAudioDevice>,
    ) -> Result<Self, ConnectorError> {
        Self::build(
            sdk,
            FactoryRole::Producer,
            AudioDeviceModule::Injected(audio_device),
        )
    }

    /// Factory on the platform default audio device. The device is built on
    /// a short-lived thread that is joined before the factory exists.
    pub fn consumer(sdk: &dyn MediaSdk) -> Result<Self, ConnectorError> {
        let audio = std::thread::scope(|scope| {
            let spawned = std::thread::Builder::new()
                .name("crabsoup-consumer-adm".to_string())
                .spawn_scoped(scope, || sdk.create_platform_audio_device())
                .map_err(|e| {
                    ConnectorError::factory_init(format!("failed to start audio device thread: {e}"))
                })?;
            spawned
                .join()
                .map_err(|_| ConnectorError::factory_init("audio device thread panicked"))?
                .map_err(|e| {
                    ConnectorError::factory_init(format!("failed to create audio device: {e}"))
                })
        })?;

        Self::build(sdk, FactoryRole::Consumer, audio)
    }

    fn build(
        sdk: &dyn MediaSdk,
        role: FactoryRole,
        audio: AudioDeviceModule,
    ) -> Result<Self, ConnectorError> {
        let threads = FactoryThreads::start(role)?;
        let factory = match sdk.create_peer_factory(&threads, audio) {
            Ok(f) => f,
            Err(e) => {
                threads.stop();
                return Err(ConnectorError::factory_init(format!(
                    "failed to create {role:?} peer factory: {e}"
                )));
            }
        };
        log::debug!("{role:?} factory ready on {:?}", threads.names());
        Ok(Self {
            role,
            threads,
            factory,
        })
    }

    pub fn role(&self) -> FactoryRole {
        self.role
    }

    pub fn threads(&self) -> &FactoryThreads {
        &self.threads
    }

    pub fn peer_factory(&self) -> &Arc<dyn PeerFactory> {
        &self.factory
    }
}

impl Drop for FactoryContext {
    fn drop(&mut self) {
        self.threads.stop();
    }
}
