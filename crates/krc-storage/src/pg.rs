use async_trait::async_trait;
use chrono::{DateTime, Utc};
use krc_core::{Article, Category, CategoryState, Fingerprint};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::{ArticleStore, InsertOutcome, StorageError};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ARTICLE_COLUMNS: &str =
    "category, article_id, title, description, image_url, created_at, modified_at";
const STATE_COLUMNS: &str = "category, representative_id, fingerprint, observed_at";

/// Postgres-backed [`ArticleStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn category_from_row(row: &PgRow) -> Result<Category, StorageError> {
    let code: i16 = row.try_get("category")?;
    Category::from_code(code).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn article_from_row(row: &PgRow) -> Result<Article, StorageError> {
    Ok(Article {
        category: category_from_row(row)?,
        id: row.try_get("article_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        modified_at: row.try_get::<DateTime<Utc>, _>("modified_at")?,
    })
}

fn state_from_row(row: &PgRow) -> Result<CategoryState, StorageError> {
    let fingerprint: String = row.try_get("fingerprint")?;
    Ok(CategoryState {
        category: category_from_row(row)?,
        representative_id: row.try_get("representative_id")?,
        fingerprint: Fingerprint::from_hex(fingerprint),
        observed_at: row.try_get::<DateTime<Utc>, _>("observed_at")?,
    })
}

#[async_trait]
impl ArticleStore for PgStore {
    async fn get_article(
        &self,
        category: Category,
        id: i64,
    ) -> Result<Option<Article>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE category = $1 AND article_id = $2"
        ))
        .bind(category.code())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(article_from_row).transpose()
    }

    async fn insert_article_if_absent(
        &self,
        article: &Article,
    ) -> Result<InsertOutcome, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles
                (category, article_id, title, description, image_url, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (category, article_id) DO NOTHING
            "#,
        )
        .bind(article.category.code())
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image_url)
        .bind(article.created_at)
        .bind(article.modified_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Conflict)
        }
    }

    async fn put_article(&self, article: &Article) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO articles
                (category, article_id, title, description, image_url, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (category, article_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                image_url = excluded.image_url,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(article.category.code())
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image_url)
        .bind(article.created_at)
        .bind(article.modified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_category_state(
        &self,
        category: Category,
    ) -> Result<Option<CategoryState>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM category_states WHERE category = $1"
        ))
        .bind(category.code())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(state_from_row).transpose()
    }

    async fn put_category_state(&self, state: &CategoryState) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO category_states (category, representative_id, fingerprint, observed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (category) DO UPDATE SET
                representative_id = excluded.representative_id,
                fingerprint = excluded.fingerprint,
                observed_at = excluded.observed_at
            "#,
        )
        .bind(state.category.code())
        .bind(state.representative_id)
        .bind(state.fingerprint.as_str())
        .bind(state.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_articles(&self) -> Result<Vec<Article>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY category, article_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(article_from_row).collect()
    }

    async fn list_articles_by_category(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<Vec<Article>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE category = $1 \
             ORDER BY article_id DESC LIMIT $2"
        ))
        .bind(category.code())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(article_from_row).collect()
    }

    async fn latest_category_state(&self) -> Result<Option<CategoryState>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM category_states ORDER BY representative_id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(state_from_row).transpose()
    }
}
