//! List parameters, page size clamping and opaque continuation tokens.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::repository::{Repository, RepositoryError};
use crate::resource::{Object, ObjectKey, Scope};

pub const DEFAULT_LIMIT: usize = 1000;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 10000;

/// Opaque pagination cursor. Pass it back unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipToken(String);

impl SkipToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encodes "continue after this key".
    pub(crate) fn after(key: &ObjectKey) -> Result<Self, RepositoryError> {
        let json = serde_json::to_vec(key)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(json)))
    }

    /// Decodes the key this token continues after.
    pub(crate) fn cursor(&self) -> Result<ObjectKey, RepositoryError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|e| RepositoryError::InvalidSkipToken(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RepositoryError::InvalidSkipToken(e.to_string()))
    }
}

impl fmt::Display for SkipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Global scope lists across all namespaces.
    pub scope: Scope,
    /// Requested page size. Clamped to `[MIN_LIMIT, MAX_LIMIT]`.
    pub limit: Option<i64>,
    pub skip_token: Option<SkipToken>,
    pub selector: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn skip_token(mut self, token: Option<SkipToken>) -> Self {
        self.skip_token = token;
        self
    }

    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None => DEFAULT_LIMIT,
            Some(limit) if limit < MIN_LIMIT as i64 => MIN_LIMIT,
            Some(limit) => (limit as u64).min(MAX_LIMIT as u64) as usize,
        }
    }
}

/// One page of a list result. `next == None` marks the final page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<SkipToken>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Follows skip tokens from page to page.
pub struct Paginator<'a, T: Object> {
    repo: &'a dyn Repository<T>,
    params: ListParams,
    finished: bool,
}

impl<'a, T: Object> Paginator<'a, T> {
    pub fn new(repo: &'a dyn Repository<T>, params: ListParams) -> Self {
        Self {
            repo,
            params,
            finished: false,
        }
    }

    /// Fetches the next page, or `None` once the final page was returned.
    pub async fn next_page(&mut self, ctx: &Context) -> Result<Option<Vec<T>>, RepositoryError> {
        if self.finished {
            return Ok(None);
        }
        let page = self.repo.list(ctx, &self.params).await?;
        self.finished = page.next.is_none();
        self.params.skip_token = page.next;
        Ok(Some(page.items))
    }

    pub async fn collect_all(mut self, ctx: &Context) -> Result<Vec<T>, RepositoryError> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page(ctx).await? {
            all.extend(items);
        }
        Ok(all)
    }
}
