use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_CLOSED: &str = "cerrada";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "suggestions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    /// `comision:<id>` or `proyecto:<id>` for scoped discussions.
    pub category: Option<String>,
    pub status: String,
    pub created_by: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::discussion_poll::Entity")]
    DiscussionPoll,
}

impl Related<super::discussion_poll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscussionPoll.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
