//! Poll persistence. Every state transition is a single conditional `UPDATE`
//! whose affected-row count decides the winner, so concurrent writers (ticks,
//! admin actions, other processes) cannot both apply a transition.

use chrono::{DateTime, FixedOffset};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};

use crate::entities::discussion_poll::{self, PollStatus};
use crate::entities::{discussion_poll_vote, suggestion};

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub suggestion_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub end_at: DateTime<FixedOffset>,
    pub notify_enabled: bool,
    pub created_by: i32,
}

/// Outcome of [`PollStore::record_vote`].
#[derive(Debug)]
pub enum VoteWrite {
    Recorded(discussion_poll_vote::Model),
    Unchanged(discussion_poll_vote::Model),
    PollNotOpen,
}

#[derive(Clone)]
pub struct PollStore {
    database: DatabaseConnection,
}

impl PollStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    pub async fn find(&self, poll_id: i32) -> Result<Option<discussion_poll::Model>, DbErr> {
        discussion_poll::Entity::find_by_id(poll_id)
            .one(&self.database)
            .await
    }

    pub async fn list_for_suggestion(
        &self,
        suggestion_id: i32,
    ) -> Result<Vec<discussion_poll::Model>, DbErr> {
        discussion_poll::Entity::find()
            .filter(discussion_poll::Column::SuggestionId.eq(suggestion_id))
            .order_by_desc(discussion_poll::Column::CreatedAt)
            .order_by_desc(discussion_poll::Column::Id)
            .all(&self.database)
            .await
    }

    /// Active polls whose end has passed.
    pub async fn find_due(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<discussion_poll::Model>, DbErr> {
        discussion_poll::Entity::find()
            .filter(discussion_poll::Column::Status.eq(PollStatus::Active))
            .filter(discussion_poll::Column::EndAt.lte(now))
            .order_by_asc(discussion_poll::Column::EndAt)
            .order_by_asc(discussion_poll::Column::Id)
            .all(&self.database)
            .await
    }

    pub async fn insert(
        &self,
        poll: NewPoll,
        now: DateTime<FixedOffset>,
    ) -> Result<discussion_poll::Model, DbErr> {
        let model = discussion_poll::ActiveModel {
            suggestion_id: Set(poll.suggestion_id),
            title: Set(poll.title),
            description: Set(poll.description),
            end_at: Set(poll.end_at),
            status: Set(PollStatus::Active),
            notify_enabled: Set(poll.notify_enabled),
            created_by: Set(poll.created_by),
            created_at: Set(now),
            closed_at: Set(None),
            nulled_at: Set(None),
            nulled_by: Set(None),
            result_notified_at: Set(None),
            ..Default::default()
        };
        model.insert(&self.database).await
    }

    /// `activa -> finalizada`. Returns `false` when the poll was no longer
    /// active (or not yet expired) at the moment of the write.
    pub async fn close_if_active(
        &self,
        poll_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, DbErr> {
        let result = discussion_poll::Entity::update_many()
            .col_expr(discussion_poll::Column::Status, Expr::value(PollStatus::Closed))
            .col_expr(discussion_poll::Column::ClosedAt, Expr::value(now))
            .filter(discussion_poll::Column::Id.eq(poll_id))
            .filter(discussion_poll::Column::Status.eq(PollStatus::Active))
            .filter(discussion_poll::Column::EndAt.lte(now))
            .exec(&self.database)
            .await?;
        assert!(result.rows_affected <= 1, "Poll id must be unique");
        Ok(result.rows_affected == 1)
    }

    /// `activa -> nula`. Returns `false` when the poll had already left the
    /// active state.
    pub async fn nullify_if_active(
        &self,
        poll_id: i32,
        nulled_by: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, DbErr> {
        let result = discussion_poll::Entity::update_many()
            .col_expr(discussion_poll::Column::Status, Expr::value(PollStatus::Nulled))
            .col_expr(discussion_poll::Column::NulledAt, Expr::value(now))
            .col_expr(discussion_poll::Column::NulledBy, Expr::value(nulled_by))
            .filter(discussion_poll::Column::Id.eq(poll_id))
            .filter(discussion_poll::Column::Status.eq(PollStatus::Active))
            .exec(&self.database)
            .await?;
        assert!(result.rows_affected <= 1, "Poll id must be unique");
        Ok(result.rows_affected == 1)
    }

    /// Records a delivered result notification. Only a closed poll with
    /// notifications enabled and no previous mark can be updated.
    pub async fn mark_result_notified(
        &self,
        poll_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, DbErr> {
        let result = discussion_poll::Entity::update_many()
            .col_expr(discussion_poll::Column::ResultNotifiedAt, Expr::value(now))
            .filter(discussion_poll::Column::Id.eq(poll_id))
            .filter(discussion_poll::Column::Status.eq(PollStatus::Closed))
            .filter(discussion_poll::Column::NotifyEnabled.eq(true))
            .filter(discussion_poll::Column::ResultNotifiedAt.is_null())
            .exec(&self.database)
            .await?;
        assert!(result.rows_affected <= 1, "Poll id must be unique");
        Ok(result.rows_affected == 1)
    }

    /// Bumps the discussion's activity timestamp after a poll change.
    pub async fn touch_suggestion(
        &self,
        suggestion_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<(), DbErr> {
        suggestion::Entity::update_many()
            .col_expr(suggestion::Column::UpdatedAt, Expr::value(now))
            .filter(suggestion::Column::Id.eq(suggestion_id))
            .exec(&self.database)
            .await?;
        Ok(())
    }

    pub async fn find_vote(
        &self,
        poll_id: i32,
        user_id: i32,
    ) -> Result<Option<discussion_poll_vote::Model>, DbErr> {
        discussion_poll_vote::Entity::find()
            .filter(discussion_poll_vote::Column::PollId.eq(poll_id))
            .filter(discussion_poll_vote::Column::UserId.eq(user_id))
            .one(&self.database)
            .await
    }

    /// Inserts or replaces the user's vote, but only while the poll is still
    /// `activa` and before its deadline. The poll row is share-locked for the
    /// duration so a concurrent close waits for the vote to commit.
    pub async fn record_vote(
        &self,
        poll_id: i32,
        user_id: i32,
        value: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<VoteWrite, DbErr> {
        let txn = self.database.begin().await?;
        let open = discussion_poll::Entity::find_by_id(poll_id)
            .filter(discussion_poll::Column::Status.eq(PollStatus::Active))
            .filter(discussion_poll::Column::EndAt.gt(now))
            .lock_shared()
            .one(&txn)
            .await?;
        if open.is_none() {
            txn.rollback().await?;
            return Ok(VoteWrite::PollNotOpen);
        }

        let existing = discussion_poll_vote::Entity::find()
            .filter(discussion_poll_vote::Column::PollId.eq(poll_id))
            .filter(discussion_poll_vote::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;
        let written = match existing {
            Some(vote) if vote.value == value => VoteWrite::Unchanged(vote),
            Some(vote) => {
                let mut model: discussion_poll_vote::ActiveModel = vote.into();
                model.value = Set(value);
                VoteWrite::Recorded(model.update(&txn).await?)
            }
            None => {
                let model = discussion_poll_vote::ActiveModel {
                    poll_id: Set(poll_id),
                    user_id: Set(user_id),
                    value: Set(value),
                    created_at: Set(now),
                    ..Default::default()
                };
                VoteWrite::Recorded(model.insert(&txn).await?)
            }
        };
        txn.commit().await?;
        Ok(written)
    }
}
