//! Ambient log-file sink and tail support for `GET /admin/logs` (process
//! logs). Grounded on `monoutils::log::RotatingLog`'s idiom
//! (file sink + background rotation), adapted inline with `tracing-appender`
//! doing the rotation and a small poll-based tailer doing the read side,
//! since `monoutils` itself was not carried into this tree.

pub mod rotating;

pub use rotating::{init_file_appender, tail_lines, tail_stream};
