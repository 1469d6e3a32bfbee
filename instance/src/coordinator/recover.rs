use super::{CoordinatorState, SingleInstance};
use crate::error::HandshakeError;

impl SingleInstance {
    /// Decide what happens after a failed handshake.
    ///
    /// Returns `true` when this process took over as master. The failed
    /// client connection is already gone by the time this runs.
    pub(super) fn recover_action(&mut self, cause: &HandshakeError) -> bool {
        self.state = CoordinatorState::Recovering;
        if !self.config.auto_recovery {
            log::debug!("recover: disabled, giving up code={}", cause.code());
            self.state = CoordinatorState::Failed;
            return false;
        }

        log::info!("recover: trying to create a new master instance id={}", self.id);
        // The lock file is never unlinked: a launch that already opened it
        // must contend for the same inode we are about to lock.
        match self.lock.has_live_holder() {
            Ok(false) => {
                if self.start() {
                    log::info!("recover: ok, this instance is now the master");
                    return true;
                }
            }
            Ok(true) => log::debug!("recover: lock is still held by a live master"),
            Err(e) => log::warn!(
                "recover: cannot inspect lock path={} err={e}",
                self.lock.path().display()
            ),
        }

        log::warn!(
            "recover: failed to create new master instance, cannot recover (cause: {cause})"
        );
        self.state = CoordinatorState::Failed;
        false
    }
}
