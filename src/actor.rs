//! Actor-based session access
//!
//! A [`WavefrontSession`] is single-threaded: every operation runs to
//! completion and may block on driver I/O for the settle time. When several
//! tasks need the same mirror, the session is moved into a [`SessionActor`]
//! that processes [`SessionCommand`]s one at a time on a blocking worker.
//! Callers hold a cheap, cloneable [`SessionHandle`] and await replies over
//! `oneshot` channels.
//!
//! Requests are served strictly in arrival order, so no two driver calls ever
//! overlap.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::driver::MirrorDriver;
use crate::error::{AppResult, ArtifactKind, DmError};
use crate::property::PropertyAdapter;
use crate::session::{SessionSnapshot, WavefrontSession};
use crate::zernike::Mode;

/// Default depth of the request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Commands that can be sent to the [`SessionActor`]
#[derive(Debug)]
pub enum SessionCommand {
    /// Bring up the mirror with the configured paths
    Initialize {
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Set the absolute target of one mode
    SetMode {
        mode: Mode,
        target: f64,
        response: oneshot::Sender<AppResult<f64>>,
    },

    /// Query applied plus pending coefficient of one mode
    CurrentTarget {
        mode: Mode,
        response: oneshot::Sender<f64>,
    },

    /// Dispatch all pending deltas
    ApplyPending {
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Replace the mirror shape from a file
    LoadWavefront {
        path: PathBuf,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Save actuator positions; `None` uses the configured save path
    SavePosition {
        path: Option<PathBuf>,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Override or swap an artifact path
    SetArtifactPath {
        kind: ArtifactKind,
        path: PathBuf,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Read a host property by name
    GetProperty {
        name: String,
        response: oneshot::Sender<AppResult<String>>,
    },

    /// Write a host property by name
    SetProperty {
        name: String,
        value: String,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Serializable view of the session
    Snapshot {
        response: oneshot::Sender<SessionSnapshot>,
    },

    /// Release the mirror but keep serving; a later `Initialize` reopens it
    Release {
        response: oneshot::Sender<()>,
    },

    /// Release the mirror and stop the actor
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    pub fn initialize() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Initialize { response: tx }, rx)
    }

    pub fn set_mode(mode: Mode, target: f64) -> (Self, oneshot::Receiver<AppResult<f64>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetMode {
                mode,
                target,
                response: tx,
            },
            rx,
        )
    }

    pub fn current_target(mode: Mode) -> (Self, oneshot::Receiver<f64>) {
        let (tx, rx) = oneshot::channel();
        (Self::CurrentTarget { mode, response: tx }, rx)
    }

    pub fn apply_pending() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ApplyPending { response: tx }, rx)
    }

    pub fn load_wavefront(path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LoadWavefront { path, response: tx }, rx)
    }

    pub fn save_position(path: Option<PathBuf>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SavePosition { path, response: tx }, rx)
    }

    pub fn set_artifact_path(kind: ArtifactKind, path: PathBuf) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetArtifactPath {
                kind,
                path,
                response: tx,
            },
            rx,
        )
    }

    pub fn get_property(name: String) -> (Self, oneshot::Receiver<AppResult<String>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetProperty { name, response: tx }, rx)
    }

    pub fn set_property(name: String, value: String) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetProperty {
                name,
                value,
                response: tx,
            },
            rx,
        )
    }

    pub fn snapshot() -> (Self, oneshot::Receiver<SessionSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::Snapshot { response: tx }, rx)
    }

    pub fn release() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Release { response: tx }, rx)
    }

    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// Owns a session and serves its request queue.
pub struct SessionActor<D: MirrorDriver> {
    session: WavefrontSession<D>,
}

impl<D: MirrorDriver + 'static> SessionActor<D> {
    pub fn new(session: WavefrontSession<D>) -> Self {
        Self { session }
    }

    /// Move the session onto a blocking worker and return its handle.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn spawn(session: WavefrontSession<D>, capacity: usize) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let actor = Self::new(session);
        let task = tokio::task::spawn_blocking(move || actor.run(rx));
        (SessionHandle { tx }, task)
    }

    /// Process commands until `Shutdown` arrives or every handle is dropped.
    ///
    /// Blocks the calling thread.
    pub fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!("SessionActor started");

        while let Some(command) = command_rx.blocking_recv() {
            match command {
                SessionCommand::Initialize { response } => {
                    let _ = response.send(self.session.initialize());
                }

                SessionCommand::SetMode {
                    mode,
                    target,
                    response,
                } => {
                    let _ = response.send(self.session.set_mode(mode, target));
                }

                SessionCommand::CurrentTarget { mode, response } => {
                    let _ = response.send(self.session.current_target(mode));
                }

                SessionCommand::ApplyPending { response } => {
                    let _ = response.send(self.session.apply_pending());
                }

                SessionCommand::LoadWavefront { path, response } => {
                    let _ = response.send(self.session.load_absolute_wavefront(&path));
                }

                SessionCommand::SavePosition { path, response } => {
                    let result = match path {
                        Some(path) => self.session.save_current_position(&path),
                        None => self.session.save_to_default(),
                    };
                    let _ = response.send(result);
                }

                SessionCommand::SetArtifactPath {
                    kind,
                    path,
                    response,
                } => {
                    let _ = response.send(self.session.set_artifact_path(kind, path));
                }

                SessionCommand::GetProperty { name, response } => {
                    let _ = response.send(self.session.get_property(&name));
                }

                SessionCommand::SetProperty {
                    name,
                    value,
                    response,
                } => {
                    let _ = response.send(self.session.set_property(&name, &value));
                }

                SessionCommand::Snapshot { response } => {
                    let _ = response.send(self.session.snapshot());
                }

                SessionCommand::Release { response } => {
                    self.session.shutdown();
                    let _ = response.send(());
                }

                SessionCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    self.session.shutdown();
                    let _ = response.send(());
                    break;
                }
            }
        }

        // all handles dropped without an explicit shutdown
        if self.session.is_ready() {
            debug!("Releasing mirror on actor exit");
            self.session.shutdown();
        }
        info!("SessionActor shutting down");
    }
}

/// Async client of a [`SessionActor`]. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(&self, (command, rx): (SessionCommand, oneshot::Receiver<T>)) -> AppResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DmError::ActorUnavailable)?;
        rx.await.map_err(|_| DmError::ActorUnavailable)
    }

    pub async fn initialize(&self) -> AppResult<()> {
        self.request(SessionCommand::initialize()).await?
    }

    pub async fn set_mode(&self, mode: Mode, target: f64) -> AppResult<f64> {
        self.request(SessionCommand::set_mode(mode, target)).await?
    }

    pub async fn current_target(&self, mode: Mode) -> AppResult<f64> {
        self.request(SessionCommand::current_target(mode)).await
    }

    pub async fn apply_pending(&self) -> AppResult<()> {
        self.request(SessionCommand::apply_pending()).await?
    }

    pub async fn load_wavefront(&self, path: impl Into<PathBuf>) -> AppResult<()> {
        self.request(SessionCommand::load_wavefront(path.into())).await?
    }

    pub async fn save_position(&self, path: Option<PathBuf>) -> AppResult<()> {
        self.request(SessionCommand::save_position(path)).await?
    }

    pub async fn set_artifact_path(&self, kind: ArtifactKind, path: impl Into<PathBuf>) -> AppResult<()> {
        self.request(SessionCommand::set_artifact_path(kind, path.into()))
            .await?
    }

    pub async fn get_property(&self, name: &str) -> AppResult<String> {
        self.request(SessionCommand::get_property(name.to_string()))
            .await?
    }

    pub async fn set_property(&self, name: &str, value: &str) -> AppResult<()> {
        self.request(SessionCommand::set_property(name.to_string(), value.to_string()))
            .await?
    }

    pub async fn snapshot(&self) -> AppResult<SessionSnapshot> {
        self.request(SessionCommand::snapshot()).await
    }

    /// Release the mirror and return the session to uninitialized. The actor
    /// keeps serving, so `initialize` may be called again.
    pub async fn release(&self) -> AppResult<()> {
        self.request(SessionCommand::release()).await
    }

    /// Release the mirror and stop the actor. Later requests fail with
    /// `ActorUnavailable`.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(SessionCommand::shutdown()).await
    }
}
