//! Result and notice delivery shared by the scheduler and manual actions.

use chrono::{DateTime, FixedOffset};
use sea_orm::EntityTrait;
use tracing::{debug, info, warn};

use crate::entities::{discussion_poll, suggestion};
use crate::notify::{MAX_RECIPIENTS_PER_MESSAGE, Mailer, OutgoingMail, normalize_recipients};

use super::PollError;
use super::links::PollLinks;
use super::messages::{self, PollContext};
use super::scope::{self, DiscussionScope};
use super::store::PollStore;
use super::tally::{self, VoteTally};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { recipients: usize },
    SkippedNoScope,
    SkippedNoRecipients,
    AlreadyNotified,
}

/// Everything needed to address the members of a poll's discussion.
pub(crate) struct Audience {
    pub suggestion: suggestion::Model,
    pub scope: DiscussionScope,
    pub member_count: usize,
    pub recipients: Vec<String>,
}

pub(crate) async fn load_audience(
    store: &PollStore,
    poll: &discussion_poll::Model,
) -> Result<Option<Audience>, PollError> {
    let database = store.database();
    let Some(suggestion) = suggestion::Entity::find_by_id(poll.suggestion_id)
        .one(database)
        .await?
    else {
        return Ok(None);
    };
    let Some(scope) = scope::resolve_scope(database, &suggestion).await? else {
        return Ok(None);
    };
    let members = scope::active_members(database, scope.commission.id).await?;
    let emails: Vec<String> = members.iter().map(|member| member.email.clone()).collect();
    Ok(Some(Audience {
        suggestion,
        scope,
        member_count: members.len(),
        recipients: normalize_recipients(&emails),
    }))
}

/// Sends the anonymous result of a closed poll and records the delivery.
/// The mark is only written after the relay accepted every message.
pub async fn dispatch_result(
    store: &PollStore,
    mailer: &dyn Mailer,
    links: &PollLinks,
    poll: &discussion_poll::Model,
    now: DateTime<FixedOffset>,
) -> Result<DispatchOutcome, PollError> {
    if poll.result_notified_at.is_some() {
        return Ok(DispatchOutcome::AlreadyNotified);
    }

    let Some(audience) = load_audience(store, poll).await? else {
        warn!(poll_id = poll.id, "Poll discussion has no scope, result not sent");
        return Ok(DispatchOutcome::SkippedNoScope);
    };
    if audience.recipients.is_empty() {
        warn!(poll_id = poll.id, "Poll scope has no active members, result not sent");
        return Ok(DispatchOutcome::SkippedNoRecipients);
    }

    let counts = tally::vote_summary(store.database(), &[poll.id])
        .await?
        .remove(&poll.id)
        .unwrap_or_default();
    let result = VoteTally::new(counts, audience.member_count);
    let poll_url = links.poll_url(audience.suggestion.id, poll.id, &audience.scope);
    let context = PollContext {
        poll,
        suggestion: &audience.suggestion,
        scope: &audience.scope,
        poll_url: &poll_url,
    };

    let recipients = audience.recipients.len();
    for batch in audience.recipients.chunks(MAX_RECIPIENTS_PER_MESSAGE) {
        let mail = messages::result_message(&context, &result, batch.to_vec());
        mailer.send(&mail).await?;
    }

    if !store.mark_result_notified(poll.id, now).await? {
        warn!(
            poll_id = poll.id,
            "Result delivered but notification mark was already set"
        );
    }
    info!(
        poll_id = poll.id,
        recipients,
        votes_for = result.votes_for,
        votes_against = result.votes_against,
        abstentions = result.abstentions,
        "Poll result notified"
    );
    Ok(DispatchOutcome::Sent { recipients })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Invitation,
    Nullification,
}

/// Best-effort informational notice. Failures are logged, never returned.
pub async fn send_notice(
    store: &PollStore,
    mailer: &dyn Mailer,
    links: &PollLinks,
    poll: &discussion_poll::Model,
    kind: NoticeKind,
) {
    let audience = match load_audience(store, poll).await {
        Ok(Some(audience)) if !audience.recipients.is_empty() => audience,
        Ok(_) => {
            debug!(poll_id = poll.id, ?kind, "No recipients for poll notice");
            return;
        }
        Err(err) => {
            warn!(poll_id = poll.id, ?kind, "Failed to resolve poll notice recipients: {err}");
            return;
        }
    };

    let poll_url = links.poll_url(audience.suggestion.id, poll.id, &audience.scope);
    let context = PollContext {
        poll,
        suggestion: &audience.suggestion,
        scope: &audience.scope,
        poll_url: &poll_url,
    };
    for batch in audience.recipients.chunks(MAX_RECIPIENTS_PER_MESSAGE) {
        let mail: OutgoingMail = match kind {
            NoticeKind::Invitation => messages::invitation_message(&context, batch.to_vec()),
            NoticeKind::Nullification => messages::nullification_message(&context, batch.to_vec()),
        };
        if let Err(err) = mailer.send(&mail).await {
            warn!(poll_id = poll.id, ?kind, "Failed to send poll notice: {err}");
            return;
        }
    }
    debug!(poll_id = poll.id, ?kind, recipients = audience.recipients.len(), "Poll notice sent");
}
