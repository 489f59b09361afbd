// src/store/sqlite.rs
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;

use super::{stored_ts, Article, ArticleGroup, NewArticle, RandomPick, Store};
use crate::errors::RelayError;
use crate::stats::{CountMap, DeliveryStats};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        link TEXT NOT NULL UNIQUE,
        source TEXT NOT NULL,
        category TEXT NOT NULL,
        sentiment REAL NOT NULL DEFAULT 0,
        published_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        image_url TEXT,
        delivered INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_pending ON articles (delivered, published_at)",
    r#"
    CREATE TABLE IF NOT EXISTS subscribers (
        user_id INTEGER PRIMARY KEY,
        subscribed_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stats (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        start_time TEXT NOT NULL,
        total_articles INTEGER NOT NULL,
        last_update TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stat_counts (
        dimension TEXT NOT NULL,
        key TEXT NOT NULL,
        count INTEGER NOT NULL,
        PRIMARY KEY (dimension, key)
    )
    "#,
];

const ARTICLE_COLUMNS: &str =
    "id, title, link, source, category, sentiment, published_at, created_at, summary, image_url, delivered";

/// SQLite-backed store (sqlx). One connection keeps writes serialized and
/// lets `sqlite::memory:` URLs behave like a single database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .with_context(|| format!("opening {url}"))?;
        let store = Self { pool };
        store.migrate().await.context("creating schema")?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), RelayError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn counts(&self, dimension: &str) -> Result<CountMap, RelayError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT key, count FROM stat_counts WHERE dimension = ?")
                .bind(dimension)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(k, n)| (k, n.max(0) as u64)).collect())
    }
}

/// Window, sentiment and exclusion filters shared by both random-pick queries.
fn random_pick_query(pick: &RandomPick) -> QueryBuilder<'_, Sqlite> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE delivered = 0 AND published_at >= "
    ));
    qb.push_bind(stored_ts(pick.since))
        .push(" AND sentiment > ")
        .push_bind(pick.min_sentiment);
    if !pick.exclude_ids.is_empty() {
        qb.push(" AND id NOT IN (");
        let mut sep = qb.separated(", ");
        for id in &pick.exclude_ids {
            sep.push_bind(*id);
        }
        qb.push(")");
    }
    qb
}

#[async_trait]
impl Store for SqliteStore {
    async fn link_exists(&self, link: &str) -> Result<bool, RelayError> {
        let hit: Option<i64> = sqlx::query_scalar("SELECT 1 FROM articles WHERE link = ? LIMIT 1")
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }

    async fn insert_article(&self, a: NewArticle) -> Result<Option<Article>, RelayError> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
                (title, link, source, category, sentiment, published_at, created_at, summary, image_url, delivered)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&a.title)
        .bind(&a.link)
        .bind(&a.source)
        .bind(&a.category)
        .bind(a.sentiment)
        .bind(stored_ts(a.published_at))
        .bind(stored_ts(Utc::now()))
        .bind(&a.summary)
        .bind(&a.image_url)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_article(res.last_insert_rowid()).await
    }

    async fn get_article(&self, id: i64) -> Result<Option<Article>, RelayError> {
        let q = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
        Ok(sqlx::query_as::<_, Article>(&q)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool, RelayError> {
        let res = sqlx::query("UPDATE articles SET delivered = 1 WHERE id = ? AND delivered = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn undelivered_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>, RelayError> {
        let q = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE delivered = 0 AND published_at >= ? ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Article>(&q)
            .bind(stored_ts(since))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn random_undelivered(&self, pick: &RandomPick) -> Result<Option<Article>, RelayError> {
        if !pick.preferred_sources.is_empty() {
            let mut qb = random_pick_query(pick);
            qb.push(" AND source IN (");
            let mut sep = qb.separated(", ");
            for s in &pick.preferred_sources {
                sep.push_bind(s.as_str());
            }
            qb.push(") ORDER BY RANDOM() LIMIT 1");

            let hit = qb.build_query_as::<Article>().fetch_optional(&self.pool).await?;
            if hit.is_some() {
                return Ok(hit);
            }
        }

        let mut qb = random_pick_query(pick);
        qb.push(" ORDER BY RANDOM() LIMIT 1");
        Ok(qb.build_query_as::<Article>().fetch_optional(&self.pool).await?)
    }

    async fn backfill_candidates(
        &self,
        since: DateTime<Utc>,
        min_sentiment: f64,
        limit: usize,
    ) -> Result<Vec<Article>, RelayError> {
        let q = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE delivered = 0 AND published_at >= ? AND sentiment > ? \
             ORDER BY sentiment DESC, published_at DESC LIMIT ?"
        );
        Ok(sqlx::query_as::<_, Article>(&q)
            .bind(stored_ts(since))
            .bind(min_sentiment)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count_by(&self, group: ArticleGroup) -> Result<CountMap, RelayError> {
        let q = match group {
            ArticleGroup::Source => "SELECT source, COUNT(*) FROM articles GROUP BY source",
            ArticleGroup::Category => "SELECT category, COUNT(*) FROM articles GROUP BY category",
            ArticleGroup::DeliveryState => {
                "SELECT CASE WHEN delivered = 1 THEN 'delivered' ELSE 'pending' END AS state, COUNT(*) \
                 FROM articles GROUP BY state"
            }
        };
        let rows: Vec<(String, i64)> = sqlx::query_as(q).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(k, n)| (k, n.max(0) as u64)).collect())
    }

    async fn article_count(&self) -> Result<u64, RelayError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn add_subscriber(&self, user_id: i64) -> Result<bool, RelayError> {
        let res = sqlx::query("INSERT OR IGNORE INTO subscribers (user_id, subscribed_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn remove_subscriber(&self, user_id: i64) -> Result<bool, RelayError> {
        let res = sqlx::query("DELETE FROM subscribers WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn subscriber_ids(&self) -> Result<Vec<i64>, RelayError> {
        Ok(sqlx::query_scalar("SELECT user_id FROM subscribers ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn subscriber_count(&self) -> Result<u64, RelayError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn load_stats(&self) -> Result<Option<DeliveryStats>, RelayError> {
        let row: Option<(DateTime<Utc>, i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT start_time, total_articles, last_update FROM stats WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        let Some((start_time, total, last_update)) = row else {
            return Ok(None);
        };
        Ok(Some(DeliveryStats {
            start_time,
            total_articles: total.max(0) as u64,
            by_source: self.counts("source").await?,
            by_category: self.counts("category").await?,
            last_update,
        }))
    }

    async fn save_stats(&self, stats: &DeliveryStats) -> Result<(), RelayError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO stats (id, start_time, total_articles, last_update) VALUES (1, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                start_time = excluded.start_time,
                total_articles = excluded.total_articles,
                last_update = excluded.last_update
            "#,
        )
        .bind(stats.start_time)
        .bind(stats.total_articles as i64)
        .bind(stats.last_update)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM stat_counts").execute(&mut *tx).await?;
        for (dimension, map) in [("source", &stats.by_source), ("category", &stats.by_category)] {
            for (key, count) in map.iter() {
                sqlx::query("INSERT INTO stat_counts (dimension, key, count) VALUES (?, ?, ?)")
                    .bind(dimension)
                    .bind(key)
                    .bind(*count as i64)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
