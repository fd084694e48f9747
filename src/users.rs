use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::engine::StoreError;
use crate::model::UserInfo;

/// Read-only user reference data, keyed by canonical id and by extension.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserInfo>, StoreError>;
    async fn find_by_extension(&self, extension: &str) -> Result<Option<UserInfo>, StoreError>;
}

/// Directory loaded once from a JSON array of user records.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    by_id: HashMap<String, UserInfo>,
    by_extension: HashMap<String, UserInfo>,
}

impl StaticDirectory {
    pub fn from_users(users: impl IntoIterator<Item = UserInfo>) -> Self {
        let mut dir = Self::default();
        for user in users {
            if !user.extension.is_empty() {
                dir.by_extension
                    .entry(user.extension.clone())
                    .or_insert_with(|| user.clone());
            }
            dir.by_id.insert(user.id.clone(), user);
        }
        dir
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let users: Vec<UserInfo> = serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_users(users))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserInfo>, StoreError> {
        Ok(self.by_id.get(id).cloned())
    }

    async fn find_by_extension(&self, extension: &str) -> Result<Option<UserInfo>, StoreError> {
        Ok(self.by_extension.get(extension).cloned())
    }
}

/// Numeric tokens of 4–6 digits, in input order. Longer digit runs are cut
/// greedily into 6-digit chunks; a remainder shorter than 4 is dropped.
pub fn candidate_numbers(raw: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let mut pos = run_start;
        while i - pos >= 4 {
            let take = (i - pos).min(6);
            out.push(&raw[pos..pos + take]);
            pos += take;
        }
    }
    out
}

fn pad6(digits: &str) -> String {
    format!("{digits:0>6}")
}

/// Map a free-text identifier ("John 12345", "#5678 Mei") to a directory user.
///
/// Every candidate is tried as a zero-padded id (plus, for 5-digit tokens, the
/// padded 4-digit prefix); only when no id matches are the candidates retried
/// as extensions. First hit wins.
pub async fn resolve(
    directory: &dyn UserDirectory,
    raw: &str,
) -> Result<Option<UserInfo>, StoreError> {
    let candidates = candidate_numbers(raw);
    let mut tried: Vec<String> = Vec::new();

    for num in &candidates {
        let mut ids = vec![pad6(num)];
        if num.len() == 5 {
            ids.push(pad6(&num[..4]));
        }
        for id in ids {
            if tried.contains(&id) {
                continue;
            }
            if let Some(user) = directory.find_by_id(&id).await? {
                return Ok(Some(user));
            }
            tried.push(id);
        }
    }

    let mut tried_ext: Vec<&str> = Vec::new();
    for num in candidates {
        if tried_ext.contains(&num) {
            continue;
        }
        if let Some(user) = directory.find_by_extension(num).await? {
            return Ok(Some(user));
        }
        tried_ext.push(num);
    }
    Ok(None)
}
