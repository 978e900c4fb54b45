//! Unix-socket control plane: one JSON request line in, one JSON reply out.

mod dispatch;
mod runtime;
mod server;

pub use dispatch::{OUTBOX_CAPACITY, Outbox, dispatch_event, event_key};
pub use runtime::{runtime_dir, socket_path};
pub use server::{DaemonOptions, client_request, load_config, run_daemon, shutdown_flag};
