//! Discussion polls: storage, tallying, lifecycle and the auto-close scheduler.

use sea_orm::DbErr;

use crate::notify::MailError;

pub mod links;
pub mod messages;
pub mod results;
pub mod scheduler;
pub mod scope;
pub mod service;
pub mod store;
pub mod tally;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("poll {0} not found")]
    PollNotFound(i32),
    #[error("discussion {0} not found")]
    SuggestionNotFound(i32),
    #[error("user {0} not found or inactive")]
    UserNotFound(i32),
    #[error("discussion {0} is not attached to a commission or project")]
    Unscoped(i32),
    #[error("discussion {0} is closed")]
    DiscussionClosed(i32),
    #[error("{0}")]
    InvalidInput(String),
    #[error("user {user_id} is not allowed to {action}")]
    Forbidden { user_id: i32, action: &'static str },
    #[error("poll {0} is no longer open for voting")]
    PollClosed(i32),
    #[error("poll {0} is already closed")]
    AlreadyClosed(i32),
    #[error("poll {0} is already nulled")]
    AlreadyNulled(i32),
    #[error("poll {0} has not been closed yet")]
    NotClosed(i32),
    #[error("poll {0} does not have notifications enabled")]
    NotificationsDisabled(i32),
    #[error("poll {0} result was already notified")]
    AlreadyNotified(i32),
    #[error("notification dispatch failed: {0}")]
    Dispatch(#[from] MailError),
}
