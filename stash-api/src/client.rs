//! Bitbucket Server (Stash) REST 1.0 client for pull requests and comments.
//!
//! Endpoints used:
//!   * GET    /rest/api/1.0/projects/{project}/repos/{repo}/pull-requests?start={n}
//!   * GET    /rest/api/1.0/projects/{owner}/repos/{repo}/pull-requests/{id}/activities?start={n}
//!   * POST   /rest/api/1.0/projects/{project}/repos/{repo}/pull-requests/{id}/comments
//!   * DELETE /rest/api/1.0/projects/{project}/repos/{repo}/pull-requests/{id}/comments/{cid}
//!     with `?version=0`
//!   * GET    /rest/api/1.0/projects/{project}/repos/{repo}/pull-requests/{id}/merge
//!   * POST   /rest/api/1.0/projects/{project}/repos/{repo}/pull-requests/{id}/merge?version={v}
//!
//! Every call runs on its own worker task and is bounded by the request
//! deadline. On expiry the worker is aborted, which drops the connection.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::errors::{StashApiError, StashApiResult};
use crate::types::*;

/// Status codes treated as success for every request.
const SUCCESS_CODES: [u16; 5] = [200, 201, 202, 204, 205];

/// Connection settings for one trigger instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `https://stash.example.com` (trailing `/` is ignored).
    pub host: String,
    pub username: String,
    pub password: String,
    /// Project key owning the polled repository.
    pub project: String,
    /// Slug of the polled repository.
    pub repository: String,
    /// Disable certificate and hostname validation for this client only.
    pub ignore_ssl: bool,
    /// Hard deadline for one call, including body download.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum inactivity between two reads once connected.
    pub read_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            project: project.into(),
            repository: repository.into(),
            ignore_ssl: false,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Stash HTTP client wrapper.
///
/// Cheap to clone; clones share the underlying connection settings. Calls
/// are meant to be issued sequentially from one poll task.
#[derive(Debug, Clone)]
pub struct StashClient {
    http: Client,
    api_base: String, // "{host}/rest/api/1.0/projects"
    project: String,
    repository: String,
    username: String,
    password: String,
    request_timeout: Duration,
}

/// Status and body of a completed request.
struct RawResponse {
    status: StatusCode,
    body: String,
}

impl StashClient {
    /// Builds a client with its own transport settings.
    pub fn new(cfg: ClientConfig) -> StashApiResult<Self> {
        let api_base = format!(
            "{}/rest/api/1.0/projects",
            cfg.host.trim_end_matches('/')
        );
        debug!(
            "Creating StashClient with api_base={}, ignore_ssl={}",
            api_base, cfg.ignore_ssl
        );

        let http = Client::builder()
            .user_agent("stash-pr-builder/0.1")
            .connect_timeout(cfg.connect_timeout)
            .read_timeout(cfg.read_timeout)
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(cfg.ignore_ssl)
            .build()
            .map_err(|source| StashApiError::Transport {
                url: api_base.clone(),
                source,
            })?;

        Ok(Self {
            http,
            api_base,
            project: cfg.project,
            repository: cfg.repository,
            username: cfg.username,
            password: cfg.password,
            request_timeout: cfg.request_timeout,
        })
    }

    /// Lists all pull requests of the configured repository, following
    /// pagination until the last page.
    #[instrument(skip(self), fields(project = %self.project, repo = %self.repository))]
    pub async fn list_pull_requests(&self) -> StashApiResult<Vec<PullRequest>> {
        let url = self.pull_requests_url();
        let raw: Vec<StashPullRequest> = self.get_all_pages(&url, "pull request page").await?;
        debug!(count = raw.len(), "pull requests fetched");
        Ok(raw.into_iter().map(PullRequest::from).collect())
    }

    /// Lists the comments found in the activity stream of a pull request.
    ///
    /// `owner` and `repo` identify the repository hosting the pull request
    /// (its destination side). Activities without a comment are ignored.
    #[instrument(skip(self))]
    pub async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        pull_request_id: &str,
    ) -> StashApiResult<Vec<Comment>> {
        let url = format!(
            "{}/{}/repos/{}/pull-requests/{}/activities",
            self.api_base,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            urlencoding::encode(pull_request_id)
        );
        let activities: Vec<Option<StashActivity>> =
            self.get_all_pages(&url, "activity page").await?;

        let comments: Vec<Comment> = activities
            .into_iter()
            .flatten()
            .filter_map(|a| a.comment)
            .map(Comment::from)
            .collect();
        debug!(count = comments.len(), "comments fetched");
        Ok(comments)
    }

    /// Posts a new top-level comment.
    pub async fn post_comment(&self, pull_request_id: &str, text: &str) -> StashApiResult<Comment> {
        self.create_comment(pull_request_id, text, None).await
    }

    /// Posts a reply to an existing comment.
    pub async fn post_reply(
        &self,
        pull_request_id: &str,
        text: &str,
        parent_comment_id: i64,
    ) -> StashApiResult<Comment> {
        self.create_comment(pull_request_id, text, Some(parent_comment_id))
            .await
    }

    pub async fn delete_comment(
        &self,
        pull_request_id: &str,
        comment_id: i64,
    ) -> StashApiResult<()> {
        let url = format!(
            "{}/comments/{}",
            self.pull_request_url(pull_request_id),
            comment_id
        );
        debug!("Stash delete_comment: {}", url);

        let req = self
            .request(Method::DELETE, &url, true)
            .query(&[("version", "0")]);
        let resp = self.execute(&url, req).await?;
        ensure_success(&url, resp.status)?;
        Ok(())
    }

    /// Asks the server whether the pull request can be merged.
    ///
    /// Also nudges the server into refreshing the pull request refs, which it
    /// otherwise does lazily.
    pub async fn merge_status(&self, pull_request_id: &str) -> StashApiResult<MergeStatus> {
        let url = format!("{}/merge", self.pull_request_url(pull_request_id));
        debug!("Stash merge_status: {}", url);

        let req = self.request(Method::GET, &url, false);
        let resp = self.execute(&url, req).await?;
        ensure_success(&url, resp.status)?;

        let parsed: StashMergeStatus = decode(&resp.body, "merge status")?;
        Ok(parsed.into())
    }

    /// Merges the pull request at the given version.
    ///
    /// HTTP 409 and any non-`MERGED` answer are domain outcomes returned as
    /// [`MergeOutcome::Rejected`] with the server body.
    #[instrument(skip(self))]
    pub async fn merge(
        &self,
        pull_request_id: &str,
        version: &str,
    ) -> StashApiResult<MergeOutcome> {
        let url = format!("{}/merge", self.pull_request_url(pull_request_id));
        debug!("Stash merge: {} version={}", url, version);

        let req = self
            .request(Method::POST, &url, true)
            .query(&[("version", version)]);
        let resp = self.execute(&url, req).await?;

        if resp.status == StatusCode::CONFLICT {
            return Ok(MergeOutcome::Rejected(resp.body));
        }
        ensure_success(&url, resp.status)?;

        let parsed: StashPullRequest = decode(&resp.body, "merge response")?;
        if parsed.state.as_deref() == Some("MERGED") {
            Ok(MergeOutcome::Merged)
        } else {
            Ok(MergeOutcome::Rejected(resp.body))
        }
    }

    async fn create_comment(
        &self,
        pull_request_id: &str,
        text: &str,
        parent: Option<i64>,
    ) -> StashApiResult<Comment> {
        let url = format!("{}/comments", self.pull_request_url(pull_request_id));
        debug!("Stash post comment: {} parent={:?}", url, parent);

        let payload = StashCommentCreate {
            text,
            parent: parent.map(|id| StashCommentParent { id }),
        };
        let req = self.request(Method::POST, &url, true).json(&payload);
        let resp = self.execute(&url, req).await?;
        ensure_success(&url, resp.status)?;

        let created: StashComment = decode(&resp.body, "posted comment")?;
        Ok(created.into())
    }

    /// Follows `isLastPage`/`nextPageStart` and accumulates every page.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &'static str,
    ) -> StashApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut start: u64 = 0;

        loop {
            trace!("Stash page GET {} start={}", url, start);
            let req = self
                .request(Method::GET, url, false)
                .query(&[("start", start)]);
            let resp = self.execute(url, req).await?;
            ensure_success(url, resp.status)?;

            let page: StashPage<T> = decode(&resp.body, what)?;
            items.extend(page.values);

            if page.is_last_page {
                break;
            }
            // A non-last page must say where the next one starts.
            start = page.next_page_start.ok_or_else(|| {
                warn!(url, start, "page is not the last one but has no nextPageStart");
                StashApiError::Parse {
                    what,
                    source: serde::de::Error::custom("missing nextPageStart on a non-last page"),
                }
            })?;
        }

        Ok(items)
    }

    /// Common request setup: auth, JSON accept, no keep-alive, XSRF bypass
    /// for mutating calls.
    fn request(&self, method: Method, url: &str, mutating: bool) -> RequestBuilder {
        let req = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .header("Connection", "close");

        if mutating {
            req.header("X-Atlassian-Token", "no-check")
        } else {
            req
        }
    }

    /// Runs the request on a worker task bounded by the request deadline.
    async fn execute(&self, url: &str, req: RequestBuilder) -> StashApiResult<RawResponse> {
        let worker = tokio::spawn(async move {
            let resp = req.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>(RawResponse { status, body })
        });
        let abort = worker.abort_handle();

        match tokio::time::timeout(self.request_timeout, worker).await {
            Ok(Ok(Ok(resp))) => {
                trace!(url, status = resp.status.as_u16(), "response received");
                Ok(resp)
            }
            Ok(Ok(Err(source))) => Err(StashApiError::Transport {
                url: url.to_string(),
                source,
            }),
            // The worker only ends abnormally on panic or runtime shutdown.
            Ok(Err(join)) => {
                warn!(url, error = %join, "request worker ended abnormally");
                Err(StashApiError::Worker {
                    url: url.to_string(),
                    source: join,
                })
            }
            Err(_) => {
                abort.abort();
                warn!(url, after = ?self.request_timeout, "request aborted on deadline");
                Err(StashApiError::Timeout {
                    url: url.to_string(),
                    after: self.request_timeout,
                })
            }
        }
    }

    fn pull_requests_url(&self) -> String {
        format!(
            "{}/{}/repos/{}/pull-requests",
            self.api_base,
            urlencoding::encode(&self.project),
            urlencoding::encode(&self.repository)
        )
    }

    fn pull_request_url(&self, pull_request_id: &str) -> String {
        format!(
            "{}/{}",
            self.pull_requests_url(),
            urlencoding::encode(pull_request_id)
        )
    }
}

fn ensure_success(url: &str, status: StatusCode) -> StashApiResult<()> {
    if SUCCESS_CODES.contains(&status.as_u16()) {
        return Ok(());
    }
    Err(StashApiError::Protocol {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        url: url.to_string(),
    })
}

fn decode<T: DeserializeOwned>(body: &str, what: &'static str) -> StashApiResult<T> {
    serde_json::from_str(body).map_err(|source| StashApiError::Parse { what, source })
}

/// Strips `refs/` and then `heads/` from a ref id.
pub(crate) fn branch_from_ref_id(id: &str) -> &str {
    let id = id.strip_prefix("refs/").unwrap_or(id);
    id.strip_prefix("heads/").unwrap_or(id)
}

/// Paged list envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashPage<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    is_last_page: bool,
    #[serde(default)]
    next_page_start: Option<u64>,
}

/// Pull request response (subset).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashPullRequest {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    version: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    from_ref: StashRef,
    #[serde(default)]
    to_ref: StashRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashRef {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    display_id: Option<String>,
    #[serde(default)]
    latest_commit: Option<String>,
    #[serde(default)]
    latest_changeset: Option<String>,
    #[serde(default)]
    repository: StashRepository,
}

#[derive(Debug, Default, Deserialize)]
struct StashRepository {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    project: Option<StashProject>,
}

#[derive(Debug, Deserialize)]
struct StashProject {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StashActivity {
    #[serde(default)]
    comment: Option<StashComment>,
}

#[derive(Debug, Deserialize)]
struct StashComment {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    comments: Vec<StashComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashMergeStatus {
    #[serde(default)]
    can_merge: bool,
    #[serde(default)]
    conflicted: bool,
    #[serde(default)]
    vetoes: Vec<StashVeto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashVeto {
    #[serde(default)]
    summary_message: Option<String>,
    #[serde(default)]
    detailed_message: Option<String>,
}

/// Comment creation payload.
#[derive(Debug, Serialize)]
struct StashCommentCreate<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<StashCommentParent>,
}

#[derive(Debug, Serialize)]
struct StashCommentParent {
    id: i64,
}

impl From<StashPullRequest> for PullRequest {
    fn from(raw: StashPullRequest) -> Self {
        Self {
            id: raw.id,
            state: PullRequestState::parse(raw.state.as_deref()),
            title: raw.title.unwrap_or_default(),
            version: raw.version.unwrap_or_default(),
            source: raw.from_ref.into(),
            destination: raw.to_ref.into(),
        }
    }
}

impl From<StashRef> for Ref {
    fn from(raw: StashRef) -> Self {
        let branch = match (raw.id.as_deref(), raw.display_id) {
            (Some(id), _) if !id.is_empty() => branch_from_ref_id(id).to_string(),
            (_, Some(display)) => display,
            _ => String::new(),
        };
        Self {
            branch,
            latest_commit: raw
                .latest_changeset
                .or(raw.latest_commit)
                .unwrap_or_default(),
            repository: RepositoryRef {
                project_key: raw
                    .repository
                    .project
                    .and_then(|p| p.key)
                    .unwrap_or_default(),
                slug: raw.repository.slug.unwrap_or_default(),
            },
        }
    }
}

impl From<StashComment> for Comment {
    fn from(raw: StashComment) -> Self {
        Self {
            id: raw.id,
            text: raw.text.unwrap_or_default(),
            replies: raw.comments.into_iter().map(Comment::from).collect(),
        }
    }
}

impl From<StashMergeStatus> for MergeStatus {
    fn from(raw: StashMergeStatus) -> Self {
        Self {
            can_merge: raw.can_merge,
            conflicted: raw.conflicted,
            vetoes: raw
                .vetoes
                .into_iter()
                .filter_map(|v| v.detailed_message.or(v.summary_message))
                .collect(),
        }
    }
}

/// Accepts ids and versions sent either as JSON numbers or strings.
fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    opt_string_or_number(de)?.ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

fn opt_string_or_number<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
