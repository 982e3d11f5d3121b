//! Projection engine.
//!
//! A [`Projector`] runs handler callbacks over one or more streams, keeps
//! its checkpoint (`position` and `state`) in a projection row, holds an
//! expiring lock on that row while running and reacts to status commands
//! written by a [`ProjectionManager`].

mod cache;
mod context;
mod lock;
mod manager;
mod position;
mod projector;
mod status;

pub use cache::StreamNameCache;
pub use context::HandlerContext;
pub use lock::{lock_until, should_update_lock};
pub use manager::ProjectionManager;
pub use position::{is_already_processed, GapTracker, StreamPositions};
pub use projector::{handler, Handler, InitCallback, Projector, ProjectorOptions, ShutdownSignal};
pub use status::ProjectionStatus;
