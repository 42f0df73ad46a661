//! Captcha answer store
//!
//! Keeps the expected answer for each issued captcha until it is verified or
//! expires. Image rendering is the caller's concern.

use crate::config::CaptchaConfig;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Captcha answer storage
pub trait CaptchaStore: Send + Sync {
    /// Remember `value` as the answer for captcha `id`
    fn set(&self, id: &str, value: &str);

    /// Fetch the answer stored under the full `key`, removing it when `clear`
    fn get(&self, key: &str, clear: bool) -> Option<String>;

    /// Compare `answer` with the stored answer for captcha `id`
    fn verify(&self, id: &str, answer: &str, clear: bool) -> bool;
}

/// In-process [`CaptchaStore`]
#[derive(Debug)]
pub struct MemoryCaptchaStore {
    prefix: String,
    expiration: Duration,
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCaptchaStore {
    pub fn new(config: &CaptchaConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            expiration: Duration::from_secs(config.expiration_secs),
            entries: DashMap::new(),
        }
    }

    /// Full storage key for captcha `id`
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CaptchaStore for MemoryCaptchaStore {
    fn set(&self, id: &str, value: &str) {
        let expires_at = Instant::now() + self.expiration;
        self.entries
            .insert(self.key(id), (value.to_string(), expires_at));
    }

    fn get(&self, key: &str, clear: bool) -> Option<String> {
        let (value, expires_at) = if clear {
            self.entries.remove(key).map(|(_, entry)| entry)?
        } else {
            self.entries.get(key).map(|entry| entry.value().clone())?
        };

        if expires_at <= Instant::now() {
            tracing::debug!(key = %key, "Captcha expired");
            self.entries.remove(key);
            return None;
        }
        Some(value)
    }

    fn verify(&self, id: &str, answer: &str, clear: bool) -> bool {
        match self.get(&self.key(id), clear) {
            Some(expected) => expected == answer,
            None => false,
        }
    }
}
