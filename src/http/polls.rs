use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::DateTime;
use serde::Deserialize;

use crate::models::polls::{
    ActorRequest, CreatePollRequest, NotifyResultResponse, PollListView, PollView, TallyView,
    VoteRequest, VoteResponse,
};
use crate::polls::results::DispatchOutcome;
use crate::polls::service::{CreatePoll, PollSnapshot};
use crate::polls::tally::VoteTally;
use crate::state::AppState;
use crate::time::{fixed_now, to_fixed_offset};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/suggestions/{suggestion_id}/polls",
            get(list_polls).post(create_poll),
        )
        .route("/polls/{poll_id}", get(get_poll))
        .route("/polls/{poll_id}/votes", post(cast_vote))
        .route("/polls/{poll_id}/nullify", post(nullify_poll))
        .route("/polls/{poll_id}/notify-result", post(notify_result))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ViewerQuery {
    viewer: Option<i32>,
}

async fn list_polls(
    Path(suggestion_id): Path<i32>,
    Query(query): Query<ViewerQuery>,
    State(state): State<AppState>,
) -> Result<Json<PollListView>, HttpError> {
    let listing = state
        .polls
        .list_polls(suggestion_id, query.viewer, fixed_now())
        .await?;
    let viewing = query.viewer.is_some();
    Ok(Json(PollListView {
        suggestion_id: listing.suggestion_id,
        scope: listing.scope_label,
        polls: listing
            .polls
            .into_iter()
            .map(|snapshot| poll_view(snapshot, viewing))
            .collect(),
    }))
}

async fn create_poll(
    Path(suggestion_id): Path<i32>,
    State(state): State<AppState>,
    Json(request): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), HttpError> {
    let end_at = DateTime::from_timestamp(request.end_at, 0)
        .map(to_fixed_offset)
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::BAD_REQUEST,
                format!("end_at {} is out of range", request.end_at),
            )
        })?;

    let now = fixed_now();
    let poll = state
        .polls
        .create_poll(
            CreatePoll {
                suggestion_id,
                actor_id: request.actor_id,
                title: request.title,
                description: request.description,
                end_at,
                notify_enabled: request.notify_enabled,
            },
            now,
        )
        .await?;
    let snapshot = state
        .polls
        .poll_detail(poll.id, Some(request.actor_id), now)
        .await?;
    Ok((StatusCode::CREATED, Json(poll_view(snapshot, true))))
}

async fn get_poll(
    Path(poll_id): Path<i32>,
    Query(query): Query<ViewerQuery>,
    State(state): State<AppState>,
) -> Result<Json<PollView>, HttpError> {
    let snapshot = state
        .polls
        .poll_detail(poll_id, query.viewer, fixed_now())
        .await?;
    Ok(Json(poll_view(snapshot, query.viewer.is_some())))
}

async fn cast_vote(
    Path(poll_id): Path<i32>,
    State(state): State<AppState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, HttpError> {
    let outcome = state
        .polls
        .cast_vote(poll_id, request.actor_id, request.value, fixed_now())
        .await?;
    Ok(Json(VoteResponse {
        poll_id: outcome.poll_id,
        value: outcome.value,
        changed: outcome.changed,
        tally: tally_view(outcome.tally),
    }))
}

async fn nullify_poll(
    Path(poll_id): Path<i32>,
    State(state): State<AppState>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<PollView>, HttpError> {
    let now = fixed_now();
    state
        .polls
        .nullify_poll(poll_id, request.actor_id, now)
        .await?;
    let snapshot = state
        .polls
        .poll_detail(poll_id, Some(request.actor_id), now)
        .await?;
    Ok(Json(poll_view(snapshot, true)))
}

async fn notify_result(
    Path(poll_id): Path<i32>,
    State(state): State<AppState>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<NotifyResultResponse>, HttpError> {
    let outcome = state
        .polls
        .resend_result(poll_id, request.actor_id, fixed_now())
        .await?;
    let (label, recipients) = match outcome {
        DispatchOutcome::Sent { recipients } => ("sent", recipients),
        DispatchOutcome::SkippedNoScope => ("skipped_no_scope", 0),
        DispatchOutcome::SkippedNoRecipients => ("skipped_no_recipients", 0),
        DispatchOutcome::AlreadyNotified => ("already_notified", 0),
    };
    Ok(Json(NotifyResultResponse {
        poll_id,
        outcome: label.to_string(),
        recipients,
    }))
}

fn poll_view(snapshot: PollSnapshot, viewing: bool) -> PollView {
    let PollSnapshot {
        poll,
        status,
        tally,
        active_members,
        viewer_vote,
    } = snapshot;
    PollView {
        poll_id: poll.id,
        suggestion_id: poll.suggestion_id,
        title: poll.title,
        description: poll.description,
        status: status.as_str().to_string(),
        stored_status: poll.status.as_str().to_string(),
        end_at: poll.end_at.timestamp(),
        notify_enabled: poll.notify_enabled,
        created_by: poll.created_by,
        created_at: poll.created_at.timestamp(),
        closed_at: poll.closed_at.map(|dt| dt.timestamp()),
        nulled_at: poll.nulled_at.map(|dt| dt.timestamp()),
        nulled_by: poll.nulled_by,
        result_notified_at: poll.result_notified_at.map(|dt| dt.timestamp()),
        tally: tally_view(tally),
        active_members: i64::try_from(active_members).unwrap_or(i64::MAX),
        has_voted: viewing.then_some(viewer_vote.is_some()),
        user_vote: viewer_vote,
    }
}

fn tally_view(tally: VoteTally) -> TallyView {
    TallyView {
        votes_for: tally.votes_for,
        votes_against: tally.votes_against,
        abstentions: tally.abstentions,
    }
}
