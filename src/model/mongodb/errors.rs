//! Server error codes we react to. The mongodb crate exposes them only as raw
//! integers.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

/// A unique index refused the write.
pub const DUPLICATE_KEY: i32 = 11000;

/// Did a unique index reject this write? For the `votes` collection, that
/// means the voter already voted on the post.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}
