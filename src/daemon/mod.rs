//! Process-level collaborators named as out-of-scope by spec §1 ("the
//! command wiring: flag parsing, signal handler, process init") but still
//! needed to drive the in-core lifecycle contract of spec §4.6. This service
//! runs in the foreground under an external process supervisor, so only the
//! signal-to-cancellation bridge lives here; fork/detach/PID-file-style
//! daemonization has no counterpart in this spec and is not implemented.

pub mod signals;
