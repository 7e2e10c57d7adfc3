use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::{commission, commission_membership, commission_project, suggestion, user};

const COMMISSION_PREFIX: &str = "comision:";
const PROJECT_PREFIX: &str = "proyecto:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRef {
    Commission(i32),
    Project(i32),
}

/// Reads a discussion category of the form `comision:<id>` or `proyecto:<id>`.
pub fn parse_discussion_category(raw: Option<&str>) -> Option<ScopeRef> {
    let category = raw?.trim().to_ascii_lowercase();
    if let Some(id) = category.strip_prefix(COMMISSION_PREFIX) {
        return parse_positive_id(id).map(ScopeRef::Commission);
    }
    if let Some(id) = category.strip_prefix(PROJECT_PREFIX) {
        return parse_positive_id(id).map(ScopeRef::Project);
    }
    None
}

fn parse_positive_id(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|id| *id > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionScope {
    pub commission: commission::Model,
    pub project: Option<commission_project::Model>,
}

impl DiscussionScope {
    pub fn label(&self) -> String {
        match &self.project {
            Some(project) => format!("{} / {}", self.commission.name, project.title),
            None => self.commission.name.clone(),
        }
    }
}

/// Resolves the commission owning a discussion. Projects resolve to their
/// parent commission, whose roster is the electorate.
pub async fn resolve_scope<C>(
    database: &C,
    suggestion: &suggestion::Model,
) -> Result<Option<DiscussionScope>, DbErr>
where
    C: ConnectionTrait,
{
    match parse_discussion_category(suggestion.category.as_deref()) {
        Some(ScopeRef::Commission(commission_id)) => {
            let commission = commission::Entity::find_by_id(commission_id)
                .one(database)
                .await?;
            Ok(commission.map(|commission| DiscussionScope {
                commission,
                project: None,
            }))
        }
        Some(ScopeRef::Project(project_id)) => {
            let Some(project) = commission_project::Entity::find_by_id(project_id)
                .one(database)
                .await?
            else {
                return Ok(None);
            };
            let commission = commission::Entity::find_by_id(project.commission_id)
                .one(database)
                .await?;
            Ok(commission.map(|commission| DiscussionScope {
                commission,
                project: Some(project),
            }))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMember {
    pub user_id: i32,
    pub email: String,
    pub role: String,
}

/// Active memberships whose user is itself active and not deleted.
pub async fn active_members<C>(database: &C, commission_id: i32) -> Result<Vec<ActiveMember>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = commission_membership::Entity::find()
        .find_also_related(user::Entity)
        .filter(commission_membership::Column::CommissionId.eq(commission_id))
        .filter(commission_membership::Column::IsActive.eq(true))
        .filter(user::Column::IsActive.eq(true))
        .filter(user::Column::DeletedAt.is_null())
        .order_by_asc(commission_membership::Column::Id)
        .all(database)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(membership, user)| {
            let user = user.filter(user::Model::is_enabled)?;
            Some(ActiveMember {
                user_id: user.id,
                email: user.email,
                role: membership.role,
            })
        })
        .collect())
}

pub async fn active_membership<C>(
    database: &C,
    commission_id: i32,
    user_id: i32,
) -> Result<Option<commission_membership::Model>, DbErr>
where
    C: ConnectionTrait,
{
    commission_membership::Entity::find()
        .filter(commission_membership::Column::CommissionId.eq(commission_id))
        .filter(commission_membership::Column::UserId.eq(user_id))
        .filter(commission_membership::Column::IsActive.eq(true))
        .one(database)
        .await
}
