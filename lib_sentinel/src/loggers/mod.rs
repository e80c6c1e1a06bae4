/// `tracing` bootstrap with console and rotated file output.
pub mod loggerlocal;

pub use loggerlocal::{init_logging, rotate_logs, LoggerGuard, LoggerLocalOptions};
