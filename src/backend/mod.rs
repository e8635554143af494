mod backend;
pub mod config;
pub mod path;

pub mod compressed;
pub mod maildir;
pub mod mbox;
pub mod mh;
pub mod remote;

pub use self::backend::{
    backends, discard, get_backend, is_url, probe, Backend, Context, Error, Result,
};
pub use self::compressed::CompressedBackend;
pub use self::config::{default_compress_hooks, CompressHook, MxConfig};
pub use self::maildir::MaildirBackend;
pub use self::mbox::MboxBackend;
pub use self::mh::MhBackend;
pub use self::remote::{Connector, Connectors, RemoteBackend, RemoteUrl, Session};
