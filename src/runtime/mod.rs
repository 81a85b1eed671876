//! Multi-threaded tokio runtime hosting the dispatcher and its handlers.
//!
//! The worker count is fixed when the runtime is built and never changes
//! afterwards. Every connection runs as an independent task on that pool.

mod connection;

pub use connection::{CloseReason, Closed, Handler, HandlerConfig};

use crate::config::Config;
use crate::server::{Server, ServerError};
use tokio::runtime::Builder;
use tracing::info;

/// Build the runtime, bind the listener and serve until a fatal error.
pub fn run(config: Config) -> Result<(), ServerError> {
    let workers = config.worker_threads();

    let runtime = Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("hello-worker")
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    info!(workers, "Starting tokio runtime");

    runtime.block_on(async {
        let server = Server::bind(&config)?;
        server.run().await
    })
}
