use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discussion_poll_votes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub poll_id: i32,
    pub user_id: i32,
    pub value: i32, // 1=For, -1=Against
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::discussion_poll::Entity",
        from = "Column::PollId",
        to = "super::discussion_poll::Column::Id"
    )]
    DiscussionPoll,
}

impl Related<super::discussion_poll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscussionPoll.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
