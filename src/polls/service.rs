use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use sea_orm::EntityTrait;
use tracing::{debug, info};

use crate::entities::discussion_poll::{self, PollStatus};
use crate::entities::prelude::{Suggestion, User};
use crate::entities::{suggestion, user};
use crate::notify::Mailer;
use crate::state::ApiCache;

use super::PollError;
use super::links::PollLinks;
use super::results::{self, DispatchOutcome, NoticeKind};
use super::scope::{self, DiscussionScope};
use super::store::{NewPoll, PollStore, VoteWrite};
use super::tally::{self, VOTE_AGAINST, VOTE_FOR, VoteCounts, VoteTally};

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CreatePoll {
    pub suggestion_id: i32,
    pub actor_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub end_at: DateTime<FixedOffset>,
    pub notify_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub poll_id: i32,
    pub value: i32,
    pub changed: bool,
    pub tally: VoteTally,
}

/// A poll as seen at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub poll: discussion_poll::Model,
    /// Stored status, except that an expired active poll already reads as closed.
    pub status: PollStatus,
    pub tally: VoteTally,
    pub active_members: usize,
    pub viewer_vote: Option<i32>,
}

/// Viewer-independent list of a discussion's polls, cached per suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionPolls {
    pub suggestion_id: i32,
    pub scope_label: Option<String>,
    pub active_members: usize,
    pub polls: Vec<(discussion_poll::Model, VoteCounts)>,
}

impl SuggestionPolls {
    fn is_stale(&self, now: DateTime<FixedOffset>) -> bool {
        self.polls
            .iter()
            .any(|(poll, _)| poll.status == PollStatus::Active && poll.end_at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollListing {
    pub suggestion_id: i32,
    pub scope_label: Option<String>,
    pub polls: Vec<PollSnapshot>,
}

pub fn effective_status(poll: &discussion_poll::Model, now: DateTime<FixedOffset>) -> PollStatus {
    match poll.status {
        PollStatus::Active if poll.end_at <= now => PollStatus::Closed,
        status => status,
    }
}

#[derive(Clone)]
pub struct PollService {
    store: PollStore,
    mailer: Arc<dyn Mailer>,
    links: PollLinks,
    cache: Arc<ApiCache>,
}

impl PollService {
    pub fn new(
        store: PollStore,
        mailer: Arc<dyn Mailer>,
        links: PollLinks,
        cache: Arc<ApiCache>,
    ) -> Self {
        Self {
            store,
            mailer,
            links,
            cache,
        }
    }

    pub async fn create_poll(
        &self,
        request: CreatePoll,
        now: DateTime<FixedOffset>,
    ) -> Result<discussion_poll::Model, PollError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(PollError::InvalidInput("title is required".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(PollError::InvalidInput(format!(
                "title exceeds {MAX_TITLE_LEN} characters"
            )));
        }
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(PollError::InvalidInput(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if request.end_at <= now {
            return Err(PollError::InvalidInput(
                "end_at must be in the future".to_string(),
            ));
        }

        let suggestion = self.open_suggestion(request.suggestion_id).await?;
        let scope = scope::resolve_scope(self.store.database(), &suggestion)
            .await?
            .ok_or(PollError::Unscoped(suggestion.id))?;
        self.require_manager(request.actor_id, Some(&scope), "create polls")
            .await?;

        let poll = self
            .store
            .insert(
                NewPoll {
                    suggestion_id: suggestion.id,
                    title: title.to_string(),
                    description,
                    end_at: request.end_at,
                    notify_enabled: request.notify_enabled,
                    created_by: request.actor_id,
                },
                now,
            )
            .await?;
        self.store.touch_suggestion(suggestion.id, now).await?;
        self.cache.poll_lists.invalidate(&suggestion.id).await;
        info!(
            poll_id = poll.id,
            suggestion_id = suggestion.id,
            actor_id = request.actor_id,
            "Poll created"
        );

        if poll.notify_enabled {
            results::send_notice(
                &self.store,
                self.mailer.as_ref(),
                &self.links,
                &poll,
                NoticeKind::Invitation,
            )
            .await;
        }
        Ok(poll)
    }

    pub async fn cast_vote(
        &self,
        poll_id: i32,
        actor_id: i32,
        value: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<VoteOutcome, PollError> {
        if value != VOTE_FOR && value != VOTE_AGAINST {
            return Err(PollError::InvalidInput(format!(
                "vote value must be {VOTE_FOR} or {VOTE_AGAINST}"
            )));
        }

        let poll = self.find_poll(poll_id).await?;
        if effective_status(&poll, now) != PollStatus::Active {
            return Err(PollError::PollClosed(poll_id));
        }
        let suggestion = self.open_suggestion(poll.suggestion_id).await?;
        let scope = scope::resolve_scope(self.store.database(), &suggestion)
            .await?
            .ok_or(PollError::Unscoped(suggestion.id))?;

        self.find_enabled_user(actor_id).await?;
        let membership =
            scope::active_membership(self.store.database(), scope.commission.id, actor_id)
                .await?;
        if membership.is_none() {
            return Err(PollError::Forbidden {
                user_id: actor_id,
                action: "vote on this poll",
            });
        }

        let changed = match self.store.record_vote(poll_id, actor_id, value, now).await? {
            VoteWrite::Recorded(_) => {
                self.cache.poll_lists.invalidate(&poll.suggestion_id).await;
                debug!(poll_id, actor_id, "Vote recorded");
                true
            }
            VoteWrite::Unchanged(_) => false,
            // Closed or nulled between the status check and the write.
            VoteWrite::PollNotOpen => return Err(PollError::PollClosed(poll_id)),
        };

        let tally = self.tally_for(&poll, &scope).await?;
        Ok(VoteOutcome {
            poll_id,
            value,
            changed,
            tally,
        })
    }

    /// `activa -> nula`. A poll the scheduler already closed stays closed.
    pub async fn nullify_poll(
        &self,
        poll_id: i32,
        actor_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<discussion_poll::Model, PollError> {
        let poll = self.find_poll(poll_id).await?;
        terminal_error(&poll)?;

        let suggestion = self.find_suggestion(poll.suggestion_id).await?;
        let scope = scope::resolve_scope(self.store.database(), &suggestion).await?;
        self.require_manager(actor_id, scope.as_ref(), "nullify polls")
            .await?;

        if !self.store.nullify_if_active(poll_id, actor_id, now).await? {
            // Lost against a concurrent close or nullify.
            let current = self.find_poll(poll_id).await?;
            terminal_error(&current)?;
            return Err(PollError::AlreadyClosed(poll_id));
        }

        self.store.touch_suggestion(poll.suggestion_id, now).await?;
        self.cache.poll_lists.invalidate(&poll.suggestion_id).await;
        info!(poll_id, actor_id, "Poll nulled");

        let nulled = self.find_poll(poll_id).await?;
        if nulled.notify_enabled {
            results::send_notice(
                &self.store,
                self.mailer.as_ref(),
                &self.links,
                &nulled,
                NoticeKind::Nullification,
            )
            .await;
        }
        Ok(nulled)
    }

    pub async fn poll_detail(
        &self,
        poll_id: i32,
        viewer: Option<i32>,
        now: DateTime<FixedOffset>,
    ) -> Result<PollSnapshot, PollError> {
        let poll = self.find_poll(poll_id).await?;
        let suggestion = self.find_suggestion(poll.suggestion_id).await?;
        let active_members = self.member_count(&suggestion).await?;
        let counts = tally::vote_summary(self.store.database(), &[poll.id])
            .await?
            .remove(&poll.id)
            .unwrap_or_default();
        let viewer_vote = match viewer {
            Some(user_id) => self.store.find_vote(poll.id, user_id).await?.map(|v| v.value),
            None => None,
        };

        Ok(PollSnapshot {
            status: effective_status(&poll, now),
            tally: VoteTally::new(counts, active_members),
            active_members,
            viewer_vote,
            poll,
        })
    }

    pub async fn list_polls(
        &self,
        suggestion_id: i32,
        viewer: Option<i32>,
        now: DateTime<FixedOffset>,
    ) -> Result<PollListing, PollError> {
        let listing = self.suggestion_polls(suggestion_id, now).await?;
        let poll_ids: Vec<i32> = listing.polls.iter().map(|(poll, _)| poll.id).collect();
        let viewer_votes = match viewer {
            Some(user_id) => tally::user_votes(self.store.database(), user_id, &poll_ids).await?,
            None => Default::default(),
        };

        let polls = listing
            .polls
            .iter()
            .map(|(poll, counts)| PollSnapshot {
                poll: poll.clone(),
                status: effective_status(poll, now),
                tally: VoteTally::new(*counts, listing.active_members),
                active_members: listing.active_members,
                viewer_vote: viewer_votes.get(&poll.id).copied(),
            })
            .collect();
        Ok(PollListing {
            suggestion_id,
            scope_label: listing.scope_label.clone(),
            polls,
        })
    }

    /// Manual retry of a result notification that was never delivered.
    pub async fn resend_result(
        &self,
        poll_id: i32,
        actor_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<DispatchOutcome, PollError> {
        let poll = self.find_poll(poll_id).await?;
        match poll.status {
            PollStatus::Active => return Err(PollError::NotClosed(poll_id)),
            PollStatus::Nulled => return Err(PollError::AlreadyNulled(poll_id)),
            PollStatus::Closed => {}
        }
        if !poll.notify_enabled {
            return Err(PollError::NotificationsDisabled(poll_id));
        }
        if poll.result_notified_at.is_some() {
            return Err(PollError::AlreadyNotified(poll_id));
        }

        let suggestion = self.find_suggestion(poll.suggestion_id).await?;
        let scope = scope::resolve_scope(self.store.database(), &suggestion).await?;
        self.require_manager(actor_id, scope.as_ref(), "resend poll results")
            .await?;

        let outcome = results::dispatch_result(
            &self.store,
            self.mailer.as_ref(),
            &self.links,
            &poll,
            now,
        )
        .await?;
        self.cache.poll_lists.invalidate(&poll.suggestion_id).await;
        info!(poll_id, actor_id, ?outcome, "Poll result resend handled");
        Ok(outcome)
    }

    async fn suggestion_polls(
        &self,
        suggestion_id: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<Arc<SuggestionPolls>, PollError> {
        if let Some(cached) = self.cache.poll_lists.get(&suggestion_id).await {
            if !cached.is_stale(now) {
                return Ok(cached);
            }
        }

        let suggestion = self.find_suggestion(suggestion_id).await?;
        let scope = scope::resolve_scope(self.store.database(), &suggestion).await?;
        let active_members = match &scope {
            Some(scope) => scope::active_members(self.store.database(), scope.commission.id)
                .await?
                .len(),
            None => 0,
        };
        let polls = self.store.list_for_suggestion(suggestion_id).await?;
        let poll_ids: Vec<i32> = polls.iter().map(|poll| poll.id).collect();
        let mut summary = tally::vote_summary(self.store.database(), &poll_ids).await?;

        let listing = Arc::new(SuggestionPolls {
            suggestion_id,
            scope_label: scope.as_ref().map(DiscussionScope::label),
            active_members,
            polls: polls
                .into_iter()
                .map(|poll| {
                    let counts = summary.remove(&poll.id).unwrap_or_default();
                    (poll, counts)
                })
                .collect(),
        });
        self.cache
            .poll_lists
            .insert(suggestion_id, Arc::clone(&listing))
            .await;
        Ok(listing)
    }

    async fn tally_for(
        &self,
        poll: &discussion_poll::Model,
        scope: &DiscussionScope,
    ) -> Result<VoteTally, PollError> {
        let members = scope::active_members(self.store.database(), scope.commission.id).await?;
        let counts = tally::vote_summary(self.store.database(), &[poll.id])
            .await?
            .remove(&poll.id)
            .unwrap_or_default();
        Ok(VoteTally::new(counts, members.len()))
    }

    async fn member_count(&self, suggestion: &suggestion::Model) -> Result<usize, PollError> {
        match scope::resolve_scope(self.store.database(), suggestion).await? {
            Some(scope) => Ok(
                scope::active_members(self.store.database(), scope.commission.id)
                    .await?
                    .len(),
            ),
            None => Ok(0),
        }
    }

    async fn find_poll(&self, poll_id: i32) -> Result<discussion_poll::Model, PollError> {
        self.store
            .find(poll_id)
            .await?
            .ok_or(PollError::PollNotFound(poll_id))
    }

    async fn find_suggestion(&self, suggestion_id: i32) -> Result<suggestion::Model, PollError> {
        Suggestion::find_by_id(suggestion_id)
            .one(self.store.database())
            .await?
            .ok_or(PollError::SuggestionNotFound(suggestion_id))
    }

    async fn open_suggestion(&self, suggestion_id: i32) -> Result<suggestion::Model, PollError> {
        let suggestion = self.find_suggestion(suggestion_id).await?;
        if suggestion.status == suggestion::STATUS_CLOSED {
            return Err(PollError::DiscussionClosed(suggestion_id));
        }
        Ok(suggestion)
    }

    async fn find_enabled_user(&self, user_id: i32) -> Result<user::Model, PollError> {
        User::find_by_id(user_id)
            .one(self.store.database())
            .await?
            .filter(user::Model::is_enabled)
            .ok_or(PollError::UserNotFound(user_id))
    }

    /// Admins, or the coordinator of the owning commission.
    async fn require_manager(
        &self,
        actor_id: i32,
        scope: Option<&DiscussionScope>,
        action: &'static str,
    ) -> Result<user::Model, PollError> {
        let actor = self.find_enabled_user(actor_id).await?;
        if actor.is_admin {
            return Ok(actor);
        }
        if let Some(scope) = scope {
            let membership =
                scope::active_membership(self.store.database(), scope.commission.id, actor_id)
                    .await?;
            if membership.is_some_and(|m| m.is_coordinator()) {
                return Ok(actor);
            }
        }
        Err(PollError::Forbidden {
            user_id: actor_id,
            action,
        })
    }
}

fn terminal_error(poll: &discussion_poll::Model) -> Result<(), PollError> {
    match poll.status {
        PollStatus::Active => Ok(()),
        PollStatus::Closed => Err(PollError::AlreadyClosed(poll.id)),
        PollStatus::Nulled => Err(PollError::AlreadyNulled(poll.id)),
    }
}
