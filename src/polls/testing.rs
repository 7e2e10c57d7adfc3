use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use migration::{Migrator, MigratorTrait};
use reqwest::StatusCode;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait};

use crate::entities::discussion_poll;
use crate::entities::{
    commission, commission_membership, commission_project, discussion_poll_vote, suggestion, user,
};
use crate::notify::{MailError, Mailer, OutgoingMail};
use crate::polls::store::{NewPoll, PollStore};
use crate::time::fixed_now;

pub(crate) struct Fixture {
    pub database: DatabaseConnection,
    pub store: PollStore,
}

pub(crate) struct ScopedDiscussion {
    pub commission: commission::Model,
    pub suggestion: suggestion::Model,
    pub coordinator: user::Model,
    pub members: Vec<user::Model>,
}

impl Fixture {
    /// Fresh in-memory database. A single pooled connection keeps every query
    /// on the same SQLite memory instance.
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let database = Database::connect(options).await.expect("sqlite connects");
        Migrator::up(&database, None).await.expect("migrations apply");
        Self {
            store: PollStore::new(database.clone()),
            database,
        }
    }

    pub async fn commission(&self, name: &str, slug: &str) -> commission::Model {
        commission::ActiveModel {
            name: Set(name.to_string()),
            slug: Set(slug.to_string()),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("commission inserted")
    }

    pub async fn project(&self, commission_id: i32, title: &str) -> commission_project::Model {
        commission_project::ActiveModel {
            commission_id: Set(commission_id),
            title: Set(title.to_string()),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("project inserted")
    }

    pub async fn user(&self, email: &str, is_admin: bool) -> user::Model {
        user::ActiveModel {
            email: Set(email.to_string()),
            display_name: Set(None),
            is_active: Set(true),
            is_admin: Set(is_admin),
            created_at: Set(fixed_now()),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("user inserted")
    }

    pub async fn suggestion(&self, creator_id: i32, category: Option<&str>) -> suggestion::Model {
        let now = fixed_now();
        suggestion::ActiveModel {
            title: Set("Excursión de fin de curso".to_string()),
            category: Set(category.map(str::to_string)),
            status: Set("pendiente".to_string()),
            created_by: Set(creator_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("suggestion inserted")
    }

    pub async fn member(
        &self,
        commission_id: i32,
        user_id: i32,
        role: &str,
        is_active: bool,
    ) -> commission_membership::Model {
        commission_membership::ActiveModel {
            commission_id: Set(commission_id),
            user_id: Set(user_id),
            role: Set(role.to_string()),
            is_active: Set(is_active),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("membership inserted")
    }

    pub async fn deactivate_user(&self, user_id: i32) {
        let mut model: user::ActiveModel = self.find_user(user_id).await.into();
        model.is_active = Set(false);
        model.update(&self.database).await.expect("user updated");
    }

    pub async fn delete_user(&self, user_id: i32) {
        let mut model: user::ActiveModel = self.find_user(user_id).await.into();
        model.deleted_at = Set(Some(fixed_now()));
        model.update(&self.database).await.expect("user updated");
    }

    pub async fn close_suggestion(&self, suggestion_id: i32) {
        let existing = suggestion::Entity::find_by_id(suggestion_id)
            .one(&self.database)
            .await
            .expect("suggestion query")
            .expect("suggestion exists");
        let mut model: suggestion::ActiveModel = existing.into();
        model.status = Set(suggestion::STATUS_CLOSED.to_string());
        model.update(&self.database).await.expect("suggestion updated");
    }

    /// A commission discussion with one coordinator and `members` plain
    /// members, all active.
    pub async fn scoped_discussion(&self, members: usize) -> ScopedDiscussion {
        let commission = self.commission("Comisión de Fiestas", "fiestas").await;
        let coordinator = self.user("coordinacion@example.org", false).await;
        self.member(
            commission.id,
            coordinator.id,
            commission_membership::ROLE_COORDINATOR,
            true,
        )
        .await;

        let mut roster = Vec::with_capacity(members);
        for index in 0..members {
            let member = self.user(&format!("socio{index}@example.org"), false).await;
            self.member(commission.id, member.id, "vocal", true).await;
            roster.push(member);
        }

        let suggestion = self
            .suggestion(coordinator.id, Some(&format!("comision:{}", commission.id)))
            .await;
        ScopedDiscussion {
            commission,
            suggestion,
            coordinator,
            members: roster,
        }
    }

    /// Active poll with notifications enabled, ending `end_offset_seconds`
    /// from now (negative means already expired).
    pub async fn active_poll(
        &self,
        suggestion_id: i32,
        creator_id: i32,
        end_offset_seconds: i64,
    ) -> discussion_poll::Model {
        self.poll_with(suggestion_id, creator_id, end_offset_seconds, true)
            .await
    }

    pub async fn poll_with(
        &self,
        suggestion_id: i32,
        creator_id: i32,
        end_offset_seconds: i64,
        notify_enabled: bool,
    ) -> discussion_poll::Model {
        let now = fixed_now();
        let end_at = now + Duration::seconds(end_offset_seconds);
        let created_at = end_at.min(now) - Duration::hours(1);
        self.store
            .insert(
                NewPoll {
                    suggestion_id,
                    title: "¿Organizamos la excursión?".to_string(),
                    description: None,
                    end_at,
                    notify_enabled,
                    created_by: creator_id,
                },
                created_at,
            )
            .await
            .expect("poll inserted")
    }

    pub async fn vote(&self, poll_id: i32, user_id: i32, value: i32) -> discussion_poll_vote::Model {
        discussion_poll_vote::ActiveModel {
            poll_id: Set(poll_id),
            user_id: Set(user_id),
            value: Set(value),
            created_at: Set(fixed_now()),
            ..Default::default()
        }
        .insert(&self.database)
        .await
        .expect("vote inserted")
    }

    pub async fn reload(&self, poll_id: i32) -> discussion_poll::Model {
        self.store
            .find(poll_id)
            .await
            .expect("poll query")
            .expect("poll exists")
    }

    async fn find_user(&self, user_id: i32) -> user::Model {
        user::Entity::find_by_id(user_id)
            .one(&self.database)
            .await
            .expect("user query")
            .expect("user exists")
    }
}

/// Mailer double that records every message and can be switched to fail.
#[derive(Clone, Default)]
pub(crate) struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    attempts: Arc<Mutex<usize>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().expect("mailer lock").clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().expect("mailer lock")
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        *self.attempts.lock().expect("mailer lock") += 1;
        if self.failing {
            return Err(MailError::Rejected {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "relay unavailable".to_string(),
            });
        }
        self.sent.lock().expect("mailer lock").push(mail.clone());
        Ok(())
    }
}
