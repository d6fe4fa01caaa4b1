//! Error taxonomy for the diff and merge entry points.
//!
//! The differ itself never fails except on its input contract; by
//! construction it always finds an action for any pair of non-empty
//! frontiers. The merger surfaces conflicts only under
//! [`Resolution::Fail`](crate::merger::Resolution) — under `Mine`/`Theirs`
//! conflicts resolve silently and the call succeeds once inputs are valid.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required tree input was absent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An unresolvable structural or property conflict was found while the
    /// resolution policy forbids picking a side.
    #[error("merge conflict: {0}")]
    MergeConflict(String),
}
