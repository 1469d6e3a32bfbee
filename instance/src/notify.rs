use tokio::sync::mpsc;

/// Something the host wants raised when another launch forwards arguments,
/// usually its main window. The coordinator only keeps a `Weak` to it.
pub trait NotifyTarget {
    fn activate(&self);
}

/// Ends the master loop of [`crate::SingleInstance::single_exec`] with a code.
///
/// Cheap to clone; message callbacks capture one to quit on request.
#[derive(Clone, Debug)]
pub struct QuitHandle {
    tx: mpsc::UnboundedSender<i32>,
}

impl QuitHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<i32>) -> Self {
        Self { tx }
    }

    pub fn quit(&self, code: i32) {
        // The coordinator may already be gone; nothing left to stop then.
        let _ = self.tx.send(code);
    }
}
