use std::collections::HashMap;

use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;

use crate::entities::discussion_poll_vote;

pub const VOTE_FOR: i32 = 1;
pub const VOTE_AGAINST: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCounts {
    pub votes_for: i64,
    pub votes_against: i64,
}

impl VoteCounts {
    pub fn total(&self) -> i64 {
        self.votes_for + self.votes_against
    }
}

/// Anonymous result of a poll. Abstentions are derived from the roster at the
/// time of evaluation and never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub votes_for: i64,
    pub votes_against: i64,
    pub abstentions: i64,
}

impl VoteTally {
    pub fn new(counts: VoteCounts, active_members: usize) -> Self {
        let members = i64::try_from(active_members).unwrap_or(i64::MAX);
        // Votes cast by members who later left the commission can exceed the roster.
        let abstentions = (members - counts.total()).max(0);
        Self {
            votes_for: counts.votes_for,
            votes_against: counts.votes_against,
            abstentions,
        }
    }
}

/// Per-poll counts of for/against votes.
pub async fn vote_summary<C>(database: &C, poll_ids: &[i32]) -> Result<HashMap<i32, VoteCounts>, DbErr>
where
    C: ConnectionTrait,
{
    if poll_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = discussion_poll_vote::Entity::find()
        .select_only()
        .column(discussion_poll_vote::Column::PollId)
        .column(discussion_poll_vote::Column::Value)
        .column_as(discussion_poll_vote::Column::Id.count(), "vote_count")
        .filter(discussion_poll_vote::Column::PollId.is_in(poll_ids.iter().copied()))
        .group_by(discussion_poll_vote::Column::PollId)
        .group_by(discussion_poll_vote::Column::Value)
        .into_tuple::<(i32, i32, i64)>()
        .all(database)
        .await?;

    let mut summary: HashMap<i32, VoteCounts> = HashMap::with_capacity(poll_ids.len());
    for (poll_id, value, count) in rows {
        let entry = summary.entry(poll_id).or_default();
        match value {
            VOTE_FOR => entry.votes_for += count,
            VOTE_AGAINST => entry.votes_against += count,
            _ => {}
        }
    }
    Ok(summary)
}

/// The vote value a given user cast on each of the polls, if any.
pub async fn user_votes<C>(
    database: &C,
    user_id: i32,
    poll_ids: &[i32],
) -> Result<HashMap<i32, i32>, DbErr>
where
    C: ConnectionTrait,
{
    if poll_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = discussion_poll_vote::Entity::find()
        .select_only()
        .column(discussion_poll_vote::Column::PollId)
        .column(discussion_poll_vote::Column::Value)
        .filter(discussion_poll_vote::Column::UserId.eq(user_id))
        .filter(discussion_poll_vote::Column::PollId.is_in(poll_ids.iter().copied()))
        .into_tuple::<(i32, i32)>()
        .all(database)
        .await?;

    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::testing::Fixture;

    #[test]
    fn abstentions_are_members_without_a_vote() {
        let tally = VoteTally::new(
            VoteCounts {
                votes_for: 3,
                votes_against: 1,
            },
            7,
        );
        assert_eq!(tally.abstentions, 3);
    }

    #[test]
    fn abstentions_never_go_negative() {
        let tally = VoteTally::new(
            VoteCounts {
                votes_for: 4,
                votes_against: 2,
            },
            5,
        );
        assert_eq!(tally.abstentions, 0);
        assert_eq!(tally.votes_for, 4);
    }

    #[tokio::test]
    async fn summary_groups_votes_per_poll() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(4).await;
        let first = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -60).await;
        let second = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -60).await;
        fx.vote(first.id, scoped.members[0].id, VOTE_FOR).await;
        fx.vote(first.id, scoped.members[1].id, VOTE_FOR).await;
        fx.vote(first.id, scoped.members[2].id, VOTE_AGAINST).await;
        fx.vote(second.id, scoped.members[0].id, VOTE_AGAINST).await;

        let summary = vote_summary(&fx.database, &[first.id, second.id, 999])
            .await
            .unwrap();
        assert_eq!(
            summary.get(&first.id),
            Some(&VoteCounts {
                votes_for: 2,
                votes_against: 1
            })
        );
        assert_eq!(
            summary.get(&second.id),
            Some(&VoteCounts {
                votes_for: 0,
                votes_against: 1
            })
        );
        assert!(!summary.contains_key(&999));

        let mine = user_votes(&fx.database, scoped.members[0].id, &[first.id, second.id])
            .await
            .unwrap();
        assert_eq!(mine.get(&first.id), Some(&VOTE_FOR));
        assert_eq!(mine.get(&second.id), Some(&VOTE_AGAINST));
    }
}
