pub mod prelude;

pub mod commission;
pub mod commission_membership;
pub mod commission_project;
pub mod discussion_poll;
pub mod discussion_poll_vote;
pub mod suggestion;
pub mod user;
