//! Master election, argument forwarding and the host-facing lifecycle.
//!
//! One [`SingleInstance`] per process owns the lock, the listener and the
//! queue of forwarded messages. Mutating operations take `&mut self`, so a
//! setter can never race a handshake in flight or a running master loop.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use crate::config::InstanceConfig;
use crate::error::{HandshakeError, InstanceError};
use crate::identity::{InstanceId, Scope};
use crate::lock::InstanceLock;
use crate::net::Handshake;
use crate::notify::{NotifyTarget, QuitHandle};
use crate::paths::InstancePaths;
use crate::server::{Listener, ServerOptions};

mod recover;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    ElectingMaster,
    Master,
    Secondary,
    Delivered,
    Recovering,
    Failed,
}

type StartupFn = Box<dyn FnMut() -> i32>;
type MessageFn = Box<dyn FnMut(Vec<String>)>;

enum LoopEvent {
    Message(Vec<String>),
    Quit(i32),
}

pub struct SingleInstance {
    config: InstanceConfig,
    scope: Scope,
    id: InstanceId,
    paths: InstancePaths,
    // Declared before `lock`: on drop the socket goes away before the lock does.
    listener: Option<Listener>,
    lock: InstanceLock,
    state: CoordinatorState,

    startup: Option<StartupFn>,
    on_message: Option<MessageFn>,
    notify: Option<Weak<dyn NotifyTarget>>,

    inbox_tx: mpsc::UnboundedSender<Vec<String>>,
    inbox_rx: mpsc::UnboundedReceiver<Vec<String>>,
    quit_tx: mpsc::UnboundedSender<i32>,
    quit_rx: mpsc::UnboundedReceiver<i32>,
}

impl SingleInstance {
    pub fn new(config: InstanceConfig) -> Self {
        let scope = config.scope();
        let id = InstanceId::derive(&config.app_name, &config.vendor, scope);
        let paths = InstancePaths::new(&id, scope, config.runtime_dir.as_deref());
        let lock = InstanceLock::new(paths.lock.clone());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (quit_tx, quit_rx) = mpsc::unbounded_channel();
        Self {
            config,
            scope,
            id,
            paths,
            listener: None,
            lock,
            state: CoordinatorState::Idle,
            startup: None,
            on_message: None,
            notify: None,
            inbox_tx,
            inbox_rx,
            quit_tx,
            quit_rx,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.id
    }

    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_master(&self) -> bool {
        self.state == CoordinatorState::Master
    }

    /// Master and actually able to receive forwarded arguments.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn is_global(&self) -> bool {
        self.scope.is_global()
    }

    pub fn is_auto_recovery_active(&self) -> bool {
        self.config.auto_recovery
    }

    pub fn set_auto_recovery(&mut self, auto_recovery: bool) {
        self.config.auto_recovery = auto_recovery;
    }

    /// Switch scope; with `recreate_id` the identity is derived again for it.
    pub fn set_global(&mut self, global: bool, recreate_id: bool) -> Result<(), InstanceError> {
        if self.is_master() {
            return Err(InstanceError::Busy);
        }
        self.scope = Scope::from_global(global);
        self.config.global = global;
        if recreate_id {
            self.id = InstanceId::derive(&self.config.app_name, &self.config.vendor, self.scope);
        }
        self.reset_lock();
        Ok(())
    }

    pub fn set_instance_id(&mut self, id: &str) -> Result<(), InstanceError> {
        if self.is_master() {
            return Err(InstanceError::Busy);
        }
        let id = InstanceId::explicit(id)?;
        if id != self.id {
            self.id = id;
            self.reset_lock();
            log::debug!("identity: set id={}", self.id);
        }
        Ok(())
    }

    pub fn reset_instance_id(&mut self) -> Result<(), InstanceError> {
        if self.is_master() {
            return Err(InstanceError::Busy);
        }
        let id = InstanceId::derive(&self.config.app_name, &self.config.vendor, self.scope);
        if id != self.id {
            self.id = id;
            self.reset_lock();
            log::debug!("identity: reset id={}", self.id);
        }
        Ok(())
    }

    fn reset_lock(&mut self) {
        debug_assert!(!self.lock.is_held());
        self.paths = InstancePaths::new(&self.id, self.scope, self.config.runtime_dir.as_deref());
        self.lock = InstanceLock::new(self.paths.lock.clone());
    }

    /// Called once each time this process becomes master. Its return value is
    /// the process exit code when non-zero.
    pub fn set_startup_function(&mut self, f: impl FnMut() -> i32 + 'static) {
        self.startup = Some(Box::new(f));
    }

    /// Called with every argument list forwarded by another launch, from the
    /// master loop of [`single_exec`](Self::single_exec).
    pub fn on_message(&mut self, f: impl FnMut(Vec<String>) + 'static) {
        self.on_message = Some(Box::new(f));
    }

    pub fn set_notify_target<T: NotifyTarget + 'static>(&mut self, target: &Arc<T>) {
        let weak = Arc::downgrade(target);
        self.notify = Some(weak as Weak<dyn NotifyTarget>);
    }

    pub fn clear_notify_target(&mut self) {
        self.notify = None;
    }

    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle::new(self.quit_tx.clone())
    }

    /// Try to become master. Returns whether this process now is.
    ///
    /// Must be called from inside a tokio runtime (the listener is spawned
    /// onto it).
    pub fn start(&mut self) -> bool {
        debug_assert_eq!(
            self.is_master(),
            self.lock.is_held(),
            "lock state is not as expected"
        );
        if self.is_master() {
            return true;
        }

        self.state = CoordinatorState::ElectingMaster;
        let acquired = match self.lock.try_acquire() {
            Ok(v) => v,
            Err(e) => {
                log::warn!(
                    "elect: cannot use lock path={} err={e}",
                    self.lock.path().display()
                );
                false
            }
        };
        if !acquired {
            log::debug!("elect: another master is running id={}", self.id);
            self.state = CoordinatorState::Secondary;
            return false;
        }

        log::info!("elect: this instance is master id={}", self.id);
        self.state = CoordinatorState::Master;
        self.listen();
        true
    }

    fn listen(&mut self) {
        let opts = ServerOptions {
            receive_timeout: self.config.handshake_timeout(),
            disconnect_grace: self.config.disconnect_grace(),
            max_payload_bytes: self.config.max_payload_bytes,
            private: self.scope == Scope::Local,
        };
        match Listener::bind(&self.paths.socket, opts, self.inbox_tx.clone()) {
            Ok(l) => self.listener = Some(l),
            // Still master; later launches just can't reach us.
            Err(e) => log::warn!(
                "listen: failed, other instances cannot forward arguments path={} err={e}",
                self.paths.socket.display()
            ),
        }
    }

    async fn forward<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), HandshakeError> {
        let mut hs = Handshake::new(self.config.handshake_timeout());
        hs.forward(&self.paths.socket, args).await
    }

    /// Become master, or forward `args` to the running master and wait for
    /// its ack. No master loop is run.
    ///
    /// `true`: this process is master (possibly through recovery) or its
    /// arguments were delivered and it should exit. `false`: forwarding
    /// failed and recovery was off or impossible.
    pub async fn process<S: AsRef<str>>(&mut self, args: &[S]) -> bool {
        if self.start() {
            return true;
        }
        if args.is_empty() {
            return true;
        }
        match self.forward(args).await {
            Ok(()) => {
                log::info!("forward: delivered to master id={}", self.id);
                self.state = CoordinatorState::Delivered;
                true
            }
            Err(e) => {
                log::warn!("forward: failed to transfer arguments to master: {e}");
                self.recover_action(&e)
            }
        }
    }

    /// Full lifecycle: as master, run the startup function and then dispatch
    /// forwarded messages until a [`QuitHandle`] fires; as secondary, forward
    /// `args` and return.
    ///
    /// Returns the exit code for the process. With `auto_close` the instance
    /// is closed once the master loop ends or startup fails.
    pub async fn single_exec<S: AsRef<str>>(&mut self, args: &[S], auto_close: bool) -> i32 {
        if self.start() {
            return self.run_master(auto_close).await;
        }

        match self.forward(args).await {
            Ok(()) => {
                log::info!("forward: delivered to master id={}", self.id);
                self.state = CoordinatorState::Delivered;
                0
            }
            Err(e) => {
                log::warn!("forward: failed to transfer arguments to master: {e}");
                if self.recover_action(&e) {
                    // Our own arguments never go through the socket.
                    self.run_master(auto_close).await
                } else {
                    e.code()
                }
            }
        }
    }

    async fn run_master(&mut self, auto_close: bool) -> i32 {
        let code = self.run_startup();
        if code != 0 {
            log::warn!("startup: host startup function failed code={code}");
            if auto_close {
                self.close_instance();
            }
            return code;
        }

        let code = self.exec().await;
        if auto_close {
            self.close_instance();
        }
        code
    }

    fn run_startup(&mut self) -> i32 {
        match self.startup.as_mut() {
            Some(f) => f(),
            None => 0,
        }
    }

    async fn exec(&mut self) -> i32 {
        loop {
            let event = tokio::select! {
                code = self.quit_rx.recv() => LoopEvent::Quit(code.unwrap_or(0)),
                args = self.inbox_rx.recv() => match args {
                    Some(args) => LoopEvent::Message(args),
                    None => continue,
                },
            };
            match event {
                LoopEvent::Message(args) => self.dispatch(args),
                LoopEvent::Quit(code) => {
                    log::debug!("exec: quit requested code={code}");
                    return code;
                }
            }
        }
    }

    fn dispatch(&mut self, args: Vec<String>) {
        self.activate_notify_target();
        match self.on_message.as_mut() {
            Some(f) => f(args),
            None => log::debug!("message: no handler, dropped args={}", args.len()),
        }
    }

    /// Wait for the next forwarded argument list, for hosts that run their
    /// own loop after [`process`](Self::process) instead of `single_exec`.
    pub async fn next_message(&mut self) -> Option<Vec<String>> {
        let args = self.inbox_rx.recv().await?;
        self.activate_notify_target();
        Some(args)
    }

    fn activate_notify_target(&self) {
        if let Some(target) = self.notify.as_ref().and_then(Weak::upgrade) {
            target.activate();
        }
    }

    /// Stop being master: close the listener and release the lock.
    /// A no-op when this instance is not master.
    pub fn close_instance(&mut self) {
        if !self.is_master() {
            return;
        }
        self.listener = None;
        self.lock.release();
        self.state = CoordinatorState::Idle;
        log::info!("close: master released id={}", self.id);
    }
}

#[cfg(test)]
mod tests;
