pub(crate) mod dispatcher;
pub mod executor;
pub mod guard;
pub mod progress;
pub mod scanner;

pub use executor::{execute, processor_fn, FnProcessor, JobProcessor, ProcessError};
pub use guard::{GuardScope, ResourceGuard};
pub use progress::{NoopProgress, ProgressReporter};
pub use scanner::DirectoryScanner;
