//! Member-facing message text. Results are anonymous: counts only.

use crate::entities::{discussion_poll, suggestion};
use crate::notify::OutgoingMail;

use super::scope::DiscussionScope;
use super::tally::VoteTally;

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M UTC";

pub struct PollContext<'a> {
    pub poll: &'a discussion_poll::Model,
    pub suggestion: &'a suggestion::Model,
    pub scope: &'a DiscussionScope,
    pub poll_url: &'a str,
}

impl PollContext<'_> {
    fn header(&self) -> String {
        let mut lines = vec![
            format!("Votación: {}", self.poll.title),
            format!("Discusión: {}", self.suggestion.title),
            format!("Ámbito: {}", self.scope.label()),
        ];
        if let Some(description) = self
            .poll
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            lines.push(String::new());
            lines.push(description.to_string());
        }
        lines.join("\n")
    }
}

pub fn result_message(
    context: &PollContext<'_>,
    tally: &VoteTally,
    recipients: Vec<String>,
) -> OutgoingMail {
    let subject = format!("Resultado de la votación: {}", context.poll.title);
    let body = format!(
        "La votación ha finalizado.\n\n{}\n\nA favor: {}\nEn contra: {}\nAbstenciones: {}\n\nConsulta la discusión: {}\n",
        context.header(),
        tally.votes_for,
        tally.votes_against,
        tally.abstentions,
        context.poll_url,
    );
    OutgoingMail::new(recipients, subject, body)
}

pub fn nullification_message(context: &PollContext<'_>, recipients: Vec<String>) -> OutgoingMail {
    let subject = format!("Votación anulada: {}", context.poll.title);
    let body = format!(
        "La votación ha sido anulada por la coordinación y no tendrá resultado.\n\n{}\n\nConsulta la discusión: {}\n",
        context.header(),
        context.poll_url,
    );
    OutgoingMail::new(recipients, subject, body)
}

pub fn invitation_message(context: &PollContext<'_>, recipients: Vec<String>) -> OutgoingMail {
    let subject = format!("Nueva votación: {}", context.poll.title);
    let body = format!(
        "Se ha abierto una nueva votación.\n\n{}\n\nPuedes votar hasta el {}.\n\nVota aquí: {}\n",
        context.header(),
        context.poll.end_at.format(DATE_FORMAT),
        context.poll_url,
    );
    OutgoingMail::new(recipients, subject, body)
}
