//! Persistence collaborator. The engine only hands over `ContentItem`s; where
//! they end up is decided by whichever `ContentStore` the caller wires in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::postgres::{PgExecutor, PgPool};
use sqlx::Row;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Result, ScrapeError};
use crate::models::ContentItem;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Analysis {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PersistedContent {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub item: ContentItem,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create_analysis(&self, url: &str) -> Result<Analysis>;

    async fn create_competitor_content(&self, analysis_id: Uuid, item: &ContentItem) -> Result<PersistedContent>;

    async fn create_keyword(&self, content_id: Uuid, word: &str) -> Result<()>;

    /// Writes an analysis with all of its items and keywords. Stores that can
    /// roll back override this so a failure leaves no partial analysis.
    async fn persist_analysis(&self, url: &str, items: &[ContentItem]) -> Result<Analysis> {
        let analysis = self.create_analysis(url).await?;
        for item in items {
            let content = self.create_competitor_content(analysis.id, item).await?;
            for word in &item.keywords {
                self.create_keyword(content.id, word).await?;
            }
        }
        Ok(analysis)
    }
}

/// Stores one analysis with all of its items and their keywords.
pub async fn persist_items(store: &dyn ContentStore, url: &str, items: &[ContentItem]) -> Result<Analysis> {
    let analysis = store.persist_analysis(url, items).await?;
    info!(analysis = %analysis.id, items = items.len(), "💾 analysis persisted");
    Ok(analysis)
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id UUID PRIMARY KEY,
                url VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS competitor_content (
                id UUID PRIMARY KEY,
                analysis_id UUID NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                domain VARCHAR NOT NULL,
                description TEXT,
                traffic_level VARCHAR NOT NULL,
                traffic_score INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (analysis_id, url)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_keywords (
                content_id UUID NOT NULL REFERENCES competitor_content(id) ON DELETE CASCADE,
                word VARCHAR NOT NULL,
                PRIMARY KEY (content_id, word)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_analysis<'e, E: PgExecutor<'e>>(db: E, url: &str) -> Result<Analysis> {
    let id = Uuid::new_v4();
    let row = sqlx::query("INSERT INTO analyses (id, url) VALUES ($1, $2) RETURNING created_at")
        .bind(id)
        .bind(url)
        .fetch_one(db)
        .await?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(Analysis {
        id,
        url: url.to_string(),
        created_at,
    })
}

async fn insert_content<'e, E: PgExecutor<'e>>(db: E, analysis_id: Uuid, item: &ContentItem) -> Result<PersistedContent> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO competitor_content (id, analysis_id, title, url, domain, description, traffic_level, traffic_score) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id)
    .bind(analysis_id)
    .bind(&item.title)
    .bind(&item.url)
    .bind(&item.domain)
    .bind(&item.description)
    .bind(item.traffic_level.as_str())
    .bind(item.traffic_score as i32)
    .execute(db)
    .await?;
    debug!(content = %id, url = %item.url, "content row written");
    Ok(PersistedContent {
        id,
        analysis_id,
        item: item.clone(),
    })
}

async fn insert_keyword<'e, E: PgExecutor<'e>>(db: E, content_id: Uuid, word: &str) -> Result<()> {
    sqlx::query("INSERT INTO content_keywords (content_id, word) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(content_id)
        .bind(word)
        .execute(db)
        .await?;
    Ok(())
}

#[async_trait]
impl ContentStore for PgStore {
    async fn create_analysis(&self, url: &str) -> Result<Analysis> {
        insert_analysis(&self.pool, url).await
    }

    async fn create_competitor_content(&self, analysis_id: Uuid, item: &ContentItem) -> Result<PersistedContent> {
        insert_content(&self.pool, analysis_id, item).await
    }

    async fn create_keyword(&self, content_id: Uuid, word: &str) -> Result<()> {
        insert_keyword(&self.pool, content_id, word).await
    }

    async fn persist_analysis(&self, url: &str, items: &[ContentItem]) -> Result<Analysis> {
        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;
        let analysis = insert_analysis(&mut *tx, url).await?;
        for item in items {
            let content = insert_content(&mut *tx, analysis.id, item).await?;
            for word in &item.keywords {
                insert_keyword(&mut *tx, content.id, word).await?;
            }
        }
        tx.commit().await?;
        Ok(analysis)
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Mirrors the `UNIQUE (analysis_id, url)` constraint of the Postgres schema.
fn ensure_unique_url<'a>(
    mut existing: impl Iterator<Item = &'a PersistedContent>,
    analysis_id: Uuid,
    url: &str,
) -> Result<()> {
    if existing.any(|c| c.analysis_id == analysis_id && c.item.url == url) {
        return Err(ScrapeError::Store(format!("duplicate content url {} in analysis {}", url, analysis_id)));
    }
    Ok(())
}

/// Process-local store. `persist_analysis` stages every row and publishes
/// them together, so a rejected item leaves nothing behind.
#[derive(Default)]
pub struct MemoryStore {
    analyses: Mutex<Vec<Analysis>>,
    contents: Mutex<Vec<PersistedContent>>,
    keywords: Mutex<Vec<(Uuid, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyses(&self) -> Vec<Analysis> {
        self.analyses.lock().clone()
    }

    pub fn contents(&self) -> Vec<PersistedContent> {
        self.contents.lock().clone()
    }

    pub fn keywords_of(&self, content_id: Uuid) -> Vec<String> {
        self.keywords
            .lock()
            .iter()
            .filter(|(id, _)| *id == content_id)
            .map(|(_, word)| word.clone())
            .collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create_analysis(&self, url: &str) -> Result<Analysis> {
        let analysis = Analysis {
            id: Uuid::new_v4(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        self.analyses.lock().push(analysis.clone());
        Ok(analysis)
    }

    async fn create_competitor_content(&self, analysis_id: Uuid, item: &ContentItem) -> Result<PersistedContent> {
        let mut contents = self.contents.lock();
        ensure_unique_url(contents.iter(), analysis_id, &item.url)?;
        let content = PersistedContent {
            id: Uuid::new_v4(),
            analysis_id,
            item: item.clone(),
        };
        contents.push(content.clone());
        Ok(content)
    }

    async fn create_keyword(&self, content_id: Uuid, word: &str) -> Result<()> {
        let mut keywords = self.keywords.lock();
        if !keywords.iter().any(|(id, w)| *id == content_id && w == word) {
            keywords.push((content_id, word.to_string()));
        }
        Ok(())
    }

    async fn persist_analysis(&self, url: &str, items: &[ContentItem]) -> Result<Analysis> {
        let analysis = Analysis {
            id: Uuid::new_v4(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        let mut staged: Vec<PersistedContent> = Vec::with_capacity(items.len());
        let mut words: Vec<(Uuid, String)> = Vec::new();
        for item in items {
            ensure_unique_url(staged.iter(), analysis.id, &item.url)?;
            let content = PersistedContent {
                id: Uuid::new_v4(),
                analysis_id: analysis.id,
                item: item.clone(),
            };
            for word in &item.keywords {
                if !words.iter().any(|(id, w)| *id == content.id && w == word) {
                    words.push((content.id, word.clone()));
                }
            }
            staged.push(content);
        }

        self.analyses.lock().push(analysis.clone());
        self.contents.lock().extend(staged);
        self.keywords.lock().extend(words);
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrafficLevel;
    use pretty_assertions::assert_eq;

    fn item(url: &str, keywords: &[&str]) -> ContentItem {
        ContentItem {
            title: "Guide".to_string(),
            url: url.to_string(),
            domain: "rival.io".to_string(),
            description: "A guide".to_string(),
            traffic_level: TrafficLevel::High,
            traffic_score: 25,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn persists_analysis_items_and_keywords() {
        let store = MemoryStore::new();
        let items = vec![
            item("https://rival.io/blog/a", &["pricing", "saas"]),
            item("https://rival.io/blog/b", &["seo"]),
        ];
        let analysis = persist_items(&store, "https://example.com", &items).await.unwrap();

        assert_eq!(store.analyses(), vec![analysis.clone()]);
        let contents = store.contents();
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c.analysis_id == analysis.id));
        assert_eq!(store.keywords_of(contents[0].id), vec!["pricing", "saas"]);
        assert_eq!(store.keywords_of(contents[1].id), vec!["seo"]);
    }

    #[tokio::test]
    async fn repeated_keyword_is_stored_once() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_keyword(id, "seo").await.unwrap();
        store.create_keyword(id, "seo").await.unwrap();
        assert_eq!(store.keywords_of(id), vec!["seo"]);
    }

    #[tokio::test]
    async fn rejected_item_leaves_no_partial_analysis() {
        let store = MemoryStore::new();
        let items = vec![
            item("https://rival.io/blog/a", &["pricing"]),
            item("https://rival.io/blog/b", &["seo"]),
            item("https://rival.io/blog/a", &["again"]),
        ];
        let err = persist_items(&store, "https://example.com", &items).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Store(_)));
        assert!(store.analyses().is_empty());
        assert!(store.contents().is_empty());
    }

    #[tokio::test]
    async fn row_writes_enforce_unique_urls_per_analysis() {
        let store = MemoryStore::new();
        let analysis = store.create_analysis("https://example.com").await.unwrap();
        let first = item("https://rival.io/blog/a", &[]);
        store.create_competitor_content(analysis.id, &first).await.unwrap();
        assert!(store.create_competitor_content(analysis.id, &first).await.is_err());
        assert!(store.create_competitor_content(Uuid::new_v4(), &first).await.is_ok());
    }
}
