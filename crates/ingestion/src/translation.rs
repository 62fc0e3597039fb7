//! Translation Cache Gateway
//!
//! Keyword translations keyed by normalized keyword. The external translator
//! is only called on a miss, and only a successful, non-empty answer is
//! cached. A failed or timed-out call leaves the cache untouched so the next
//! pass tries again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use tenderwatch_common::ai::Translator;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::metrics::{self, ExternalCallTimer};
use tenderwatch_common::model::{normalize_keyword, Provenance, TranslationEntry};
use tenderwatch_common::retry::{with_retry, RetryPolicy};

#[derive(Clone)]
pub struct TranslationGateway {
    store: Arc<dyn Store>,
    translator: Arc<dyn Translator>,
    languages: Vec<String>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl TranslationGateway {
    pub fn new(
        store: Arc<dyn Store>,
        translator: Arc<dyn Translator>,
        languages: Vec<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            translator,
            languages,
            retry,
            timeout,
        }
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Cached entry for `keyword`, fetching and caching it on a miss.
    /// `None` when the translator failed or had nothing to offer.
    pub async fn lookup(&self, keyword: &str) -> Result<Option<TranslationEntry>> {
        let key = normalize_keyword(keyword);
        if key.is_empty() {
            return Ok(None);
        }

        if let Some(entry) = self.store.find_translation(&key).await? {
            metrics::record_translation_cache(true);
            return Ok(Some(entry));
        }
        metrics::record_translation_cache(false);

        let translated = match self.fetch(&key).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!(keyword = %key, error = %e, "Translation unavailable, keyword treated as unmatched");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let mut entry = TranslationEntry {
            key: key.clone(),
            fr: None,
            nl: None,
            en: None,
            provenance: Provenance::Ai,
            created_at: now,
            updated_at: now,
        };
        for (lang, text) in translated {
            let text = text.trim();
            if !text.is_empty() {
                entry.set(&lang, text.to_string());
            }
        }

        if entry.fr.is_none() && entry.nl.is_none() && entry.en.is_none() {
            debug!(keyword = %key, "Translator returned nothing, not caching");
            return Ok(None);
        }

        if self.store.insert_translation_if_absent(&entry).await? {
            debug!(keyword = %key, "Translation cached");
            return Ok(Some(entry));
        }

        // Someone else filled the key meanwhile; theirs wins.
        self.store.find_translation(&key).await
    }

    /// Translation of `keyword` into `lang`, if one is known or obtainable.
    pub async fn translation_for(&self, keyword: &str, lang: &str) -> Result<Option<String>> {
        if !self.languages.iter().any(|l| l == lang) {
            return Ok(None);
        }

        Ok(self
            .lookup(keyword)
            .await?
            .and_then(|entry| entry.get(lang).map(str::to_string)))
    }

    /// Store a human-curated entry, replacing whatever is cached.
    pub async fn put_curated(
        &self,
        keyword: &str,
        fr: Option<String>,
        nl: Option<String>,
        en: Option<String>,
    ) -> Result<TranslationEntry> {
        let key = normalize_keyword(keyword);
        if key.is_empty() {
            return Err(AppError::validation("keyword is empty", Some("key")));
        }

        let now = Utc::now();
        let entry = TranslationEntry {
            key,
            fr,
            nl,
            en,
            provenance: Provenance::Curated,
            created_at: now,
            updated_at: now,
        };
        self.store.put_curated_translation(&entry).await?;
        Ok(entry)
    }

    async fn fetch(&self, key: &str) -> Result<std::collections::HashMap<String, String>> {
        let timer = ExternalCallTimer::start("translate");
        let result = with_retry(&self.retry, "translate", self.timeout, || {
            self.translator.translate(key, &self.languages)
        })
        .await;
        timer.finish(result.is_ok());
        result
    }
}
