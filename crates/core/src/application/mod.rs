// Application Layer - Session lifecycle and query plumbing

pub mod factory;
pub mod named_params;
pub mod session;

// Re-exports
pub use factory::SessionFactory;
pub use named_params::{rewrite, split_statements, Rewritten};
pub use session::{
    Finalizer, HookFuture, Initializer, NoticeHandler, Session, SessionState, Snapshot,
};
