// Single-instance election and argument forwarding.
//
// The first launch takes the lock and listens; later launches forward their
// arguments to it and exit. The `single-instance` binary is a thin host
// around these modules.

pub mod config;
pub mod consts;
pub mod coordinator;
pub mod error;
pub mod hash;
pub mod identity;
pub mod lock;
pub mod net;
pub mod notify;
pub mod paths;
pub mod server;

pub use config::InstanceConfig;
pub use coordinator::{CoordinatorState, SingleInstance};
pub use error::{HandshakeError, InstanceError};
pub use identity::{InstanceId, Scope};
pub use notify::{NotifyTarget, QuitHandle};
