use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::commission_membership::Entity")]
    CommissionMembership,
    #[sea_orm(has_many = "super::commission_project::Entity")]
    CommissionProject,
}

impl Related<super::commission_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommissionMembership.def()
    }
}

impl Related<super::commission_project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommissionProject.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
