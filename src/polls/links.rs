use url::Url;

use super::scope::DiscussionScope;

/// Builds member-facing links back into the portal.
#[derive(Debug, Clone)]
pub struct PollLinks {
    base: Url,
}

impl PollLinks {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        // Url::join treats a base without trailing slash as a file.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn discussion_return_path(scope: &DiscussionScope) -> String {
        match &scope.project {
            Some(project) => format!(
                "/socios/comisiones/{}/proyectos/{}",
                scope.commission.slug, project.id
            ),
            None => format!("/socios/comisiones/{}", scope.commission.slug),
        }
    }

    pub fn poll_url(&self, suggestion_id: i32, poll_id: i32, scope: &DiscussionScope) -> String {
        let mut url = match self
            .base
            .join(&format!("socios/sugerencias/{suggestion_id}"))
        {
            Ok(url) => url,
            Err(_) => self.base.clone(),
        };
        url.query_pairs_mut()
            .append_pair("poll", &poll_id.to_string())
            .append_pair("return_to", &Self::discussion_return_path(scope));
        url.set_fragment(Some(&format!("poll-{poll_id}")));
        url.to_string()
    }
}
