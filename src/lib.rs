pub(crate) mod process;

pub mod backend;
pub use backend::*;

pub mod domain;
pub use domain::*;

pub mod hcache;
pub use hcache::{HeaderCache, SqliteHeaderCache};

pub mod lock;
pub use lock::{LockGuard, LockService, ProcLockService};

pub mod prompt;
pub use prompt::{AutoPrompt, CmdPrompt, Prompt};

pub mod mx;
pub use mx::Mx;
