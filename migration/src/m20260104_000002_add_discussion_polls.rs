use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

use crate::m20260104_000001_create_portal_tables::{Suggestions, Users};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DiscussionPolls::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DiscussionPolls::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::SuggestionId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::Title)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DiscussionPolls::Description).text().null())
                    .col(
                        ColumnDef::new(DiscussionPolls::EndAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    // activa | finalizada | nula
                    .col(
                        ColumnDef::new(DiscussionPolls::Status)
                            .string_len(16)
                            .not_null()
                            .default("activa"),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::NotifyEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::CreatedBy)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPolls::NulledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(DiscussionPolls::NulledBy).integer().null())
                    .col(
                        ColumnDef::new(DiscussionPolls::ResultNotifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_discussion_polls_suggestion")
                            .from(DiscussionPolls::Table, DiscussionPolls::SuggestionId)
                            .to(Suggestions::Table, Suggestions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_discussion_polls_created_by")
                            .from(DiscussionPolls::Table, DiscussionPolls::CreatedBy)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_discussion_polls_nulled_by")
                            .from(DiscussionPolls::Table, DiscussionPolls::NulledBy)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Scheduler scan: status = 'activa' AND end_at <= now
        manager
            .create_index(
                Index::create()
                    .name("idx_discussion_polls_status_end_at")
                    .table(DiscussionPolls::Table)
                    .col(DiscussionPolls::Status)
                    .col(DiscussionPolls::EndAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_discussion_polls_suggestion")
                    .table(DiscussionPolls::Table)
                    .col(DiscussionPolls::SuggestionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DiscussionPollVotes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DiscussionPollVotes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPollVotes::PollId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPollVotes::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DiscussionPollVotes::Value)
                            .integer()
                            .not_null()
                            .check(Expr::col(DiscussionPollVotes::Value).is_in([-1, 1])),
                    )
                    .col(
                        ColumnDef::new(DiscussionPollVotes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_discussion_poll_votes_poll")
                            .from(DiscussionPollVotes::Table, DiscussionPollVotes::PollId)
                            .to(DiscussionPolls::Table, DiscussionPolls::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_discussion_poll_votes_user")
                            .from(DiscussionPollVotes::Table, DiscussionPollVotes::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_discussion_poll_vote_user")
                    .table(DiscussionPollVotes::Table)
                    .col(DiscussionPollVotes::PollId)
                    .col(DiscussionPollVotes::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DiscussionPollVotes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DiscussionPolls::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum DiscussionPolls {
    Table,
    Id,
    SuggestionId,
    Title,
    Description,
    EndAt,
    Status,
    NotifyEnabled,
    CreatedBy,
    CreatedAt,
    ClosedAt,
    NulledAt,
    NulledBy,
    ResultNotifiedAt,
}

#[derive(DeriveIden)]
enum DiscussionPollVotes {
    Table,
    Id,
    PollId,
    UserId,
    Value,
    CreatedAt,
}
