use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use shared_database::{encode_timestamp, get_timestamp, now_timestamp, AppState, Database};
use shared_utils::validation::{is_valid_slug, require_text};

use crate::models::{ContentError, LegalPage, LegalPageSummary, UpsertLegalPageRequest};

/// Privacy policy, terms, cookie policy and similar pages, keyed by slug.
pub struct LegalService {
    db: Database,
}

impl LegalService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    pub fn list_pages(&self) -> Result<Vec<LegalPageSummary>, ContentError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT slug, title, updated_at FROM legal_pages ORDER BY slug")?;
            let pages = stmt
                .query_map([], |row| {
                    Ok(LegalPageSummary {
                        slug: row.get("slug")?,
                        title: row.get("title")?,
                        updated_at: get_timestamp(row, "updated_at")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pages)
        })
    }

    pub fn get_page(&self, slug: &str) -> Result<LegalPage, ContentError> {
        self.db
            .with_conn(|conn| find_page(conn, slug))?
            .ok_or(ContentError::NotFound("Legal page"))
    }

    /// Create or replace the page at `slug`.
    pub fn upsert_page(&self, slug: &str, request: UpsertLegalPageRequest) -> Result<LegalPage, ContentError> {
        if !is_valid_slug(slug) {
            return Err(ContentError::Validation(format!(
                "slug '{}' must be lowercase letters, digits and dashes",
                slug
            )));
        }
        let title = require_text("title", &request.title).map_err(ContentError::Validation)?;
        let body = require_text("body", &request.body).map_err(ContentError::Validation)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO legal_pages (slug, title, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (slug) DO UPDATE SET title = excluded.title, body = excluded.body,
                                                  updated_at = excluded.updated_at",
                params![slug, title, body, encode_timestamp(&now_timestamp())],
            )?;

            info!("Saved legal page {}", slug);
            find_page(conn, slug)?.ok_or(ContentError::NotFound("Legal page"))
        })
    }
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<LegalPage> {
    Ok(LegalPage {
        slug: row.get("slug")?,
        title: row.get("title")?,
        body: row.get("body")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn find_page(conn: &Connection, slug: &str) -> Result<Option<LegalPage>, ContentError> {
    Ok(conn
        .query_row(
            "SELECT slug, title, body, updated_at FROM legal_pages WHERE slug = ?1",
            [slug],
            page_from_row,
        )
        .optional()?)
}
