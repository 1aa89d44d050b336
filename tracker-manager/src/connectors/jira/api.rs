use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::JiraFlavor;

/// Issues requested per search page.
const PAGE_SIZE: u64 = 100;

/// Projects requested per page on Cloud.
const PROJECT_PAGE_SIZE: u64 = 50;

/// How the client authenticates.
pub enum JiraAuth {
    /// User name (or e-mail) with password or API token.
    Basic { user: String, password: String },
    /// Personal access token.
    Bearer(String),
}

/// Authenticated user returned by `/myself`.
#[derive(Debug, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
}

/// Response to issue creation.
#[derive(Debug, Deserialize)]
pub struct CreatedIssue {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueStatus {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub status: Option<IssueStatus>,
}

/// Issue with only the fields requested.
#[derive(Debug, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    #[serde(default)]
    pub fields: Option<IssueFields>,
}

impl JiraIssue {
    pub fn status_name(&self) -> Option<&str> {
        self.fields
            .as_ref()
            .and_then(|f| f.status.as_ref())
            .map(|s| s.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

/// Page of the Cloud `/rest/api/3/search/jql` endpoint.
#[derive(Debug, Deserialize)]
struct JqlPage {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
    #[serde(rename = "isLast", default)]
    is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MetaIssueType {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MetaProject {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default, alias = "issueTypes")]
    pub issuetypes: Vec<MetaIssueType>,
}

/// Issue creation metadata: projects and their issue types.
#[derive(Debug, Deserialize)]
struct CreateMeta {
    #[serde(default)]
    projects: Vec<MetaProject>,
}

/// Page of the Cloud `/rest/api/2/project/search` endpoint.
#[derive(Debug, Deserialize)]
struct ProjectPage {
    #[serde(default)]
    values: Vec<MetaProject>,
    #[serde(rename = "isLast", default)]
    is_last: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorMessages", default)]
    error_messages: Vec<String>,
    #[serde(default)]
    errors: Map<String, Value>,
}

/// HTTP client for the Jira REST API.
///
/// Server and Data Center use the v2 search and createmeta endpoints. Cloud
/// searches with `/rest/api/3/search/jql` and lists projects with
/// `/rest/api/2/project/search`.
pub struct JiraClient {
    http_client: Client,
    base_url: String,
    auth: JiraAuth,
    flavor: JiraFlavor,
}

impl JiraClient {
    pub fn new(
        base_url: &str,
        auth: JiraAuth,
        flavor: JiraFlavor,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("hub-tracker-manager/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            flavor,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/json");
        match &self.auth {
            JiraAuth::Basic { user, password } => builder.basic_auth(user, Some(password)),
            JiraAuth::Bearer(token) => builder.bearer_auth(token),
        }
    }

    /// Fetch the authenticated user. Succeeds only with valid credentials.
    pub async fn myself(&self) -> Result<JiraUser> {
        let response = self
            .request(Method::GET, "/rest/api/2/myself")
            .send()
            .await
            .context("Failed to send myself request")?;

        check_response(response)
            .await?
            .json::<JiraUser>()
            .await
            .context("Failed to parse myself response")
    }

    /// Create an issue from a complete `fields` object.
    pub async fn create_issue(&self, fields: Map<String, Value>) -> Result<CreatedIssue> {
        let response = self
            .request(Method::POST, "/rest/api/2/issue")
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .context("Failed to send create issue request")?;

        check_response(response)
            .await?
            .json::<CreatedIssue>()
            .await
            .context("Failed to parse create issue response")
    }

    /// Fetch one issue's status.
    pub async fn get_issue(&self, key: &str) -> Result<JiraIssue> {
        self.find_issue(key)
            .await?
            .ok_or_else(|| anyhow!("Jira resource not found: issue {}", key))
    }

    /// Fetch one issue's status, `None` when Jira answers 404.
    ///
    /// Jira resolves a moved issue's old key here and returns it under its
    /// current key.
    pub async fn find_issue(&self, key: &str) -> Result<Option<JiraIssue>> {
        let path = format!("/rest/api/2/issue/{}?fields=status", key);
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .context("Failed to send get issue request")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        check_response(response)
            .await?
            .json::<JiraIssue>()
            .await
            .map(Some)
            .context("Failed to parse issue response")
    }

    /// Fetch the status of every issue in `keys` with one JQL query.
    ///
    /// Keys that no longer exist are simply absent from the result. An issue
    /// moved to another project comes back under its new key.
    pub async fn search_keys(&self, keys: &[String]) -> Result<Vec<JiraIssue>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let jql = key_in_jql(keys);
        match self.flavor {
            JiraFlavor::Cloud => self.search_jql(&jql).await,
            JiraFlavor::Server => self.search_paged(&jql).await,
        }
    }

    /// Cloud search, paged by `nextPageToken`.
    async fn search_jql(&self, jql: &str) -> Result<Vec<JiraIssue>> {
        let mut issues = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut body = json!({
                "jql": jql,
                "maxResults": PAGE_SIZE,
                "fields": ["status"],
            });
            if let Some(token) = &page_token {
                body["nextPageToken"] = json!(token);
            }

            let response = self
                .request(Method::POST, "/rest/api/3/search/jql")
                .json(&body)
                .send()
                .await
                .context("Failed to send search request")?;

            let page = check_response(response)
                .await?
                .json::<JqlPage>()
                .await
                .context("Failed to parse search response")?;

            let received = page.issues.len();
            issues.extend(page.issues);

            match page.next_page_token {
                Some(token) if received > 0 && page.is_last != Some(true) => {
                    page_token = Some(token)
                }
                _ => break,
            }
        }

        Ok(issues)
    }

    /// Server search, paged by `startAt`. The query is validated in warn
    /// mode so unknown keys do not fail it.
    async fn search_paged(&self, jql: &str) -> Result<Vec<JiraIssue>> {
        let mut issues = Vec::new();
        let mut start_at: u64 = 0;

        loop {
            let response = self
                .request(Method::POST, "/rest/api/2/search")
                .json(&json!({
                    "jql": jql,
                    "startAt": start_at,
                    "maxResults": PAGE_SIZE,
                    "fields": ["status"],
                    "validateQuery": "warn",
                }))
                .send()
                .await
                .context("Failed to send search request")?;

            let page = check_response(response)
                .await?
                .json::<SearchPage>()
                .await
                .context("Failed to parse search response")?;

            let received = page.issues.len() as u64;
            issues.extend(page.issues);
            start_at += received;

            if received == 0 || start_at >= page.total {
                break;
            }
        }

        Ok(issues)
    }

    /// Fetch projects and the issue types each one offers.
    pub async fn projects(&self) -> Result<Vec<MetaProject>> {
        match self.flavor {
            JiraFlavor::Cloud => self.project_search().await,
            JiraFlavor::Server => self.create_meta().await,
        }
    }

    async fn create_meta(&self) -> Result<Vec<MetaProject>> {
        let response = self
            .request(Method::GET, "/rest/api/2/issue/createmeta")
            .send()
            .await
            .context("Failed to send createmeta request")?;

        let meta = check_response(response)
            .await?
            .json::<CreateMeta>()
            .await
            .context("Failed to parse createmeta response")?;
        Ok(meta.projects)
    }

    async fn project_search(&self) -> Result<Vec<MetaProject>> {
        let mut projects = Vec::new();
        let mut start_at: u64 = 0;

        loop {
            let path = format!(
                "/rest/api/2/project/search?expand=issueTypes&startAt={}&maxResults={}",
                start_at, PROJECT_PAGE_SIZE
            );
            let response = self
                .request(Method::GET, &path)
                .send()
                .await
                .context("Failed to send project search request")?;

            let page = check_response(response)
                .await?
                .json::<ProjectPage>()
                .await
                .context("Failed to parse project search response")?;

            let received = page.values.len() as u64;
            projects.extend(page.values);
            start_at += received;

            if received == 0 || page.is_last {
                break;
            }
        }

        Ok(projects)
    }
}

/// Builds `key in ("A-1","B-2")` with each key quoted.
fn key_in_jql(keys: &[String]) -> String {
    let quoted: Vec<String> = keys
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("key in ({})", quoted.join(","))
}

/// Maps non-2xx responses to descriptive errors.
///
/// - 401/403 → auth error
/// - 404 → not found
/// - 429 → rate limit (reports Retry-After)
/// - Other non-2xx → generic API error
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(anyhow!("Jira auth error ({}): {}", status, detail))
        }
        StatusCode::NOT_FOUND => Err(anyhow!("Jira resource not found: {}", detail)),
        StatusCode::TOO_MANY_REQUESTS => Err(anyhow!(
            "Jira rate limit exceeded (Retry-After: {})",
            retry_after
        )),
        _ => Err(anyhow!("Jira API error ({}): {}", status, detail)),
    }
}

/// Flattens Jira's `{"errorMessages": [...], "errors": {...}}` body.
fn error_detail(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let mut parts = parsed.error_messages;
    for (field, message) in parsed.errors {
        match message {
            Value::String(m) => parts.push(format!("{}: {}", field, m)),
            other => parts.push(format!("{}: {}", field, other)),
        }
    }
    if !parts.is_empty() {
        return parts.join("; ");
    }
    let body = body.trim();
    if body.is_empty() {
        "no details".to_string()
    } else {
        body.chars().take(200).collect()
    }
}
