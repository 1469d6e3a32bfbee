use std::time::Duration;

pub const APP_DIR_NAME: &str = "single-instance";
pub const CONFIG_FILE_NAME: &str = "instance.toml";

// Every identity starts with this tag so stray sockets are easy to attribute.
pub const ID_NAMESPACE: &str = "singleinstance-";
pub const ID_FRAGMENT_LEN: usize = 8;

pub const LOCK_SUFFIX: &str = ".lock";

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(5000);
