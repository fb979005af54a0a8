//! Provides logging utilities, used by the library.

use std::{io, sync::Once};

use chrono::Local;
use slog::{o, Drain, Duplicate, FnValue, Fuse, Level, Logger, PushFnValue};
use slog_async::Async;
use slog_json::Json;

/// Re-exports common definitions for logging.
///
/// Use this module as following:
/// ```rust
/// use argo::log::prelude::*;
/// ```
pub mod prelude {
    pub use slog::{slog_debug, slog_error, slog_info, slog_trace, slog_warn};
    pub use slog_scope::{debug, error, info, trace, warn};
}

/// Builds JSON [`Logger`] which prints all its log records to `w_out`
/// writer, but WARN level (and higher) to `w_err` writer.
///
/// Produced log records carry `msg`, `lvl` and `time` fields; level
/// filtering honors the usual `RUST_LOG` environment variable via
/// [`slog_envlogger`].
pub fn new_dual_logger<W1, W2>(w_out: W1, w_err: W2) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse);
    let drain = slog_envlogger::new(drain).fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    Logger::root(
        drain,
        o!(
            "msg" => PushFnValue(|rec, ser| ser.emit(rec.msg())),
            "time" => FnValue(|_| Local::now().to_rfc3339()),
            "lvl" => FnValue(|rec| rec.level().as_str()),
        ),
    )
}

/// Installs a process-global stdout/stderr [`Logger`] behind
/// [`slog_scope`].
///
/// Idempotent; later calls are no-ops. Embedders that want their own drain
/// should install it through [`slog_scope::set_global_logger`] instead and
/// skip this helper.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let logger = new_dual_logger(io::stdout(), io::stderr());
        slog_scope::set_global_logger(logger).cancel_reset();
    });
}
