//! Content-store contract and the blocking MediaWiki API client.
//!
//! Everything the pipeline knows about live wiki state flows through the
//! [`PageStore`] trait so that parsing, validation, and execution can be
//! exercised against an in-memory store in tests.

use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::title::{Category, NS_CATEGORY, Title};
use crate::wikicode::Wikicode;

/// Template names (without `Template:`) that mark a category page as a
/// soft redirect to another category.
pub const CATEGORY_REDIRECT_TEMPLATES: &[&str] = &[
    "Category redirect",
    "Cat redirect",
    "Catredirect",
    "Cat redir",
    "Seecat",
];

#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub exists: bool,
    pub namespace: i32,
    pub is_redirect: bool,
    pub redirect_target: Option<String>,
    pub is_disambiguation: bool,
    /// Protection level of the `edit` action, e.g. `"sysop"`.
    pub edit_protection: Option<String>,
}

/// Read/write access to wiki pages and the category-membership index.
pub trait PageStore {
    fn page_info(&mut self, title: &Title) -> Result<PageInfo>;
    /// Current page text; empty string when the page does not exist.
    fn get_text(&mut self, title: &Title) -> Result<String>;
    fn save_text(
        &mut self,
        title: &Title,
        text: &str,
        summary: &str,
        minor: bool,
        nocreate: bool,
    ) -> Result<()>;
    fn delete_page(&mut self, title: &Title, reason: &str, delete_talk: bool) -> Result<()>;
    fn move_page(&mut self, from: &Title, to: &Title, reason: &str, noredirect: bool)
    -> Result<()>;
    /// Force a link-table refresh without editing.
    fn purge(&mut self, title: &Title) -> Result<()>;
    /// Direct members: pages, subcategories, and files.
    fn category_members(&mut self, category: &Category) -> Result<Vec<Title>>;
    fn backlinks(&mut self, title: &Title, namespaces: &[i32]) -> Result<Vec<Title>>;
    /// Redirect pages whose target is `title`.
    fn redirects_to(&mut self, title: &Title) -> Result<Vec<Title>>;
    fn is_empty_category(&mut self, category: &Category) -> Result<bool>;
    fn list_prefix(&mut self, namespace: i32, prefix: &str) -> Result<Vec<Title>>;

    fn exists(&mut self, title: &Title) -> Result<bool> {
        Ok(self.page_info(title)?.exists)
    }

    /// Whether a category page carries a category-redirect template. The
    /// page may exist and hold members while still being a soft redirect.
    fn is_category_redirect(&mut self, title: &Title) -> Result<bool> {
        if title.namespace() != NS_CATEGORY {
            return Ok(false);
        }
        let info = self.page_info(title)?;
        if !info.exists {
            return Ok(false);
        }
        let text = self.get_text(title)?;
        let code = Wikicode::parse(&text);
        for (_, template) in code.templates() {
            let name = template.name.trim();
            if CATEGORY_REDIRECT_TEMPLATES
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::CfdwConfig) -> Self {
        Self {
            api_url: config.api_url().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiStore {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiStore {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki API URL is not configured (set [wiki] api_url or WIKI_API_URL)");
        }
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_payload = self.request_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let login_token = token_payload
            .pointer("/query/tokens/logintoken")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let payload = self.request_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        match payload.pointer("/login/result").and_then(Value::as_str) {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                payload
                    .pointer("/login/reason")
                    .and_then(Value::as_str)
                    .or(other)
                    .unwrap_or("unknown error")
            ),
        }
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let payload = self.request_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let token = payload
            .pointer("/query/tokens/csrftoken")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn request_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        self.request(params, false)
    }

    fn request_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        self.request(params, true)
    }

    fn request(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(is_write);
            let request = if is_write {
                self.client
                    .post(&self.config.api_url)
                    .header("User-Agent", self.config.user_agent.clone())
                    .form(&pairs)
            } else {
                self.client
                    .get(&self.config.api_url)
                    .header("User-Agent", self.config.user_agent.clone())
                    .query(&pairs)
            };

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries
                        && (error.is_timeout() || error.is_connect())
                    {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn query_list(
        &mut self,
        base_params: Vec<(&'static str, String)>,
        list_pointer: &str,
        continue_key: &str,
    ) -> Result<Vec<Title>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut params = base_params.clone();
            if let Some(token) = &continue_token {
                params.push((continuation_param(continue_key), token.clone()));
            }
            let payload = self.request_get(&params)?;
            if let Some(items) = payload.pointer(list_pointer).and_then(Value::as_array) {
                for item in items {
                    if let Some(raw) = item.get("title").and_then(Value::as_str)
                        && let Ok(title) = Title::parse(raw, 0)
                    {
                        titles.push(title);
                    }
                }
            }
            continue_token = payload
                .pointer(&format!("/continue/{continue_key}"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            if continue_token.is_none() {
                break;
            }
        }
        Ok(titles)
    }
}

fn continuation_param(continue_key: &str) -> &'static str {
    match continue_key {
        "cmcontinue" => "cmcontinue",
        "blcontinue" => "blcontinue",
        "apcontinue" => "apcontinue",
        "rdcontinue" => "rdcontinue",
        _ => "continue",
    }
}

impl PageStore for MediaWikiStore {
    fn page_info(&mut self, title: &Title) -> Result<PageInfo> {
        let payload = self.request_get(&[
            ("action", "query".to_string()),
            ("titles", title.full_name()),
            ("prop", "info|pageprops".to_string()),
            ("inprop", "protection".to_string()),
        ])?;
        let page = payload
            .pointer("/query/pages/0")
            .ok_or_else(|| anyhow::anyhow!("invalid page info response for {title}"))?;

        let exists = page.get("missing").is_none() && page.get("invalid").is_none();
        let namespace = page
            .get("ns")
            .and_then(Value::as_i64)
            .map(|value| value as i32)
            .unwrap_or(title.namespace());
        let is_redirect = page.get("redirect").is_some_and(|value| {
            value.as_bool().unwrap_or(true)
        });
        let is_disambiguation = page
            .pointer("/pageprops/disambiguation")
            .is_some();
        let edit_protection = page
            .get("protection")
            .and_then(Value::as_array)
            .and_then(|entries| {
                entries.iter().find(|entry| {
                    entry.get("type").and_then(Value::as_str) == Some("edit")
                })
            })
            .and_then(|entry| entry.get("level").and_then(Value::as_str))
            .map(ToString::to_string);

        let redirect_target = if is_redirect {
            let resolved = self.request_get(&[
                ("action", "query".to_string()),
                ("titles", title.full_name()),
                ("redirects", "1".to_string()),
            ])?;
            resolved
                .pointer("/query/redirects/0/to")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        } else {
            None
        };

        Ok(PageInfo {
            exists,
            namespace,
            is_redirect,
            redirect_target,
            is_disambiguation,
            edit_protection,
        })
    }

    fn get_text(&mut self, title: &Title) -> Result<String> {
        let payload = self.request_get(&[
            ("action", "query".to_string()),
            ("titles", title.full_name()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        Ok(payload
            .pointer("/query/pages/0/revisions/0/slots/main/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    fn save_text(
        &mut self,
        title: &Title,
        text: &str,
        summary: &str,
        minor: bool,
        nocreate: bool,
    ) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", title.full_name()),
            ("text", text.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ];
        if minor {
            params.push(("minor", "1".to_string()));
        } else {
            params.push(("notminor", "1".to_string()));
        }
        if nocreate {
            params.push(("nocreate", "1".to_string()));
        }
        let payload = self.request_post(&params)?;
        match payload.pointer("/edit/result").and_then(Value::as_str) {
            Some("Success") => Ok(()),
            other => bail!(
                "MediaWiki edit failed for {title}: {}",
                other.unwrap_or("unknown")
            ),
        }
    }

    fn delete_page(&mut self, title: &Title, reason: &str, delete_talk: bool) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "delete".to_string()),
            ("title", title.full_name()),
            ("reason", reason.to_string()),
            ("token", token),
        ];
        if delete_talk {
            params.push(("deletetalk", "1".to_string()));
        }
        match self.request_post(&params) {
            Ok(_) => Ok(()),
            // Deleting an already-missing page is a no-op, not a failure.
            Err(error) if error.to_string().contains("missingtitle") => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn move_page(
        &mut self,
        from: &Title,
        to: &Title,
        reason: &str,
        noredirect: bool,
    ) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "move".to_string()),
            ("from", from.full_name()),
            ("to", to.full_name()),
            ("reason", reason.to_string()),
            ("token", token),
        ];
        if noredirect {
            params.push(("noredirect", "1".to_string()));
        }
        self.request_post(&params).map(|_| ())
    }

    fn purge(&mut self, title: &Title) -> Result<()> {
        self.request_post(&[
            ("action", "purge".to_string()),
            ("titles", title.full_name()),
            ("forcelinkupdate", "1".to_string()),
        ])
        .map(|_| ())
    }

    fn category_members(&mut self, category: &Category) -> Result<Vec<Title>> {
        self.query_list(
            vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category.full_name()),
                ("cmtype", "page|subcat|file".to_string()),
                ("cmlimit", "500".to_string()),
            ],
            "/query/categorymembers",
            "cmcontinue",
        )
    }

    fn backlinks(&mut self, title: &Title, namespaces: &[i32]) -> Result<Vec<Title>> {
        let namespace_filter = namespaces
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        self.query_list(
            vec![
                ("action", "query".to_string()),
                ("list", "backlinks".to_string()),
                ("bltitle", title.full_name()),
                ("blnamespace", namespace_filter),
                ("bllimit", "500".to_string()),
            ],
            "/query/backlinks",
            "blcontinue",
        )
    }

    fn redirects_to(&mut self, title: &Title) -> Result<Vec<Title>> {
        self.query_list(
            vec![
                ("action", "query".to_string()),
                ("titles", title.full_name()),
                ("prop", "redirects".to_string()),
                ("rdlimit", "500".to_string()),
            ],
            "/query/pages/0/redirects",
            "rdcontinue",
        )
    }

    fn is_empty_category(&mut self, category: &Category) -> Result<bool> {
        let payload = self.request_get(&[
            ("action", "query".to_string()),
            ("titles", category.full_name()),
            ("prop", "categoryinfo".to_string()),
        ])?;
        let size = payload
            .pointer("/query/pages/0/categoryinfo/size")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(size == 0)
    }

    fn list_prefix(&mut self, namespace: i32, prefix: &str) -> Result<Vec<Title>> {
        self.query_list(
            vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("apprefix", prefix.to_string()),
                ("aplimit", "500".to_string()),
            ],
            "/query/allpages",
            "apcontinue",
        )
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::PageStore;
    use crate::fixtures::MemoryStore;
    use crate::title::{NS_CATEGORY, Title};

    #[test]
    fn category_redirect_detection_reads_page_templates() {
        let mut store = MemoryStore::default();
        store.put("Category:Old name", "{{Category redirect|New name|keep=yes}}");
        store.put("Category:Plain", "A normal category.");

        let old = Title::parse("Category:Old name", NS_CATEGORY).expect("title");
        let plain = Title::parse("Category:Plain", NS_CATEGORY).expect("title");
        let missing = Title::parse("Category:Missing", NS_CATEGORY).expect("title");

        assert!(store.is_category_redirect(&old).expect("check"));
        assert!(!store.is_category_redirect(&plain).expect("check"));
        assert!(!store.is_category_redirect(&missing).expect("check"));
    }

    #[test]
    fn non_category_titles_are_never_category_redirects() {
        let mut store = MemoryStore::default();
        store.put("Template:Old", "{{Category redirect|X}}");
        let title = Title::parse("Template:Old", 0).expect("title");
        assert!(!store.is_category_redirect(&title).expect("check"));
    }
}
