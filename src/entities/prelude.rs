#![allow(unused_imports)]

pub use super::commission::Entity as Commission;
pub use super::commission_membership::Entity as CommissionMembership;
pub use super::commission_project::Entity as CommissionProject;
pub use super::discussion_poll::Entity as DiscussionPoll;
pub use super::discussion_poll_vote::Entity as DiscussionPollVote;
pub use super::suggestion::Entity as Suggestion;
pub use super::user::Entity as User;
