use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PollStatus {
    #[sea_orm(string_value = "activa")]
    #[serde(rename = "activa")]
    Active,
    #[sea_orm(string_value = "finalizada")]
    #[serde(rename = "finalizada")]
    Closed,
    #[sea_orm(string_value = "nula")]
    #[serde(rename = "nula")]
    Nulled,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "activa",
            Self::Closed => "finalizada",
            Self::Nulled => "nula",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discussion_polls")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub suggestion_id: i32,
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub end_at: DateTimeWithTimeZone,
    pub status: PollStatus,
    pub notify_enabled: bool,
    pub created_by: i32,
    pub created_at: DateTimeWithTimeZone,
    pub closed_at: Option<DateTimeWithTimeZone>,
    pub nulled_at: Option<DateTimeWithTimeZone>,
    pub nulled_by: Option<i32>,
    pub result_notified_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::suggestion::Entity",
        from = "Column::SuggestionId",
        to = "super::suggestion::Column::Id"
    )]
    Suggestion,
    #[sea_orm(has_many = "super::discussion_poll_vote::Entity")]
    DiscussionPollVote,
}

impl Related<super::suggestion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Suggestion.def()
    }
}

impl Related<super::discussion_poll_vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscussionPollVote.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
