use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{
    encode_timestamp, get_opt_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database, DatabaseError,
};
use shared_utils::validation::require_text;

use crate::models::{BlogPost, ContentError, CreateBlogPostRequest, UpdateBlogPostRequest};
use crate::services::{optional_text, resolve_slug, slug_conflict};

const POST_COLUMNS: &str = "id, title, slug, excerpt, body, cover_image_url, author, is_published, published_at, \
     created_at, updated_at";

pub struct BlogService {
    db: Database,
}

impl BlogService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    /// Published posts, newest first.
    pub fn list_published(&self) -> Result<Vec<BlogPost>, ContentError> {
        self.list("WHERE is_published = 1 ORDER BY published_at DESC, created_at DESC")
    }

    /// Every post including drafts, most recently edited first.
    pub fn list_all(&self) -> Result<Vec<BlogPost>, ContentError> {
        self.list("ORDER BY updated_at DESC, created_at DESC")
    }

    fn list(&self, tail: &str) -> Result<Vec<BlogPost>, ContentError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM blog_posts {}", POST_COLUMNS, tail);
            let mut stmt = conn.prepare(&sql)?;
            let posts = stmt
                .query_map([], post_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
    }

    pub fn get_published(&self, key: &str) -> Result<BlogPost, ContentError> {
        self.db
            .with_conn(|conn| find_by_key(conn, key))?
            .filter(|post| post.is_published)
            .ok_or(ContentError::NotFound("Blog post"))
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    pub fn create_post(&self, request: CreateBlogPostRequest) -> Result<BlogPost, ContentError> {
        let title = require_text("title", &request.title).map_err(ContentError::Validation)?;
        let body = require_text("body", &request.body).map_err(ContentError::Validation)?;
        let slug = resolve_slug(request.slug.as_deref(), &title)?;

        let id = Uuid::new_v4();
        let now = encode_timestamp(&now_timestamp());
        let published_at = request.is_published.then(|| now.clone());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO blog_posts (id, title, slug, excerpt, body, cover_image_url, author, is_published,
                                         published_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id.to_string(),
                    title,
                    slug,
                    optional_text(request.excerpt),
                    body,
                    optional_text(request.cover_image_url),
                    optional_text(request.author),
                    request.is_published,
                    published_at,
                    now
                ],
            )
            .map_err(|e| slug_conflict(DatabaseError::from(e), &slug))?;

            info!("Created blog post {} ({})", slug, id);
            find_post(conn, id)?.ok_or(ContentError::NotFound("Blog post"))
        })
    }

    /// `published_at` is stamped the first time a post goes live and kept afterwards.
    #[instrument(skip(self, request))]
    pub fn update_post(&self, post_id: Uuid, request: UpdateBlogPostRequest) -> Result<BlogPost, ContentError> {
        self.db.transaction(|tx| {
            let current = find_post(tx, post_id)?.ok_or(ContentError::NotFound("Blog post"))?;
            let now = now_timestamp();

            let title = match request.title {
                Some(value) => require_text("title", &value).map_err(ContentError::Validation)?,
                None => current.title,
            };
            let body = match request.body {
                Some(value) => require_text("body", &value).map_err(ContentError::Validation)?,
                None => current.body,
            };
            let slug = match request.slug {
                Some(value) => resolve_slug(Some(&value), &title)?,
                None => current.slug,
            };
            let is_published = request.is_published.unwrap_or(current.is_published);
            let published_at = match current.published_at {
                Some(at) => Some(at),
                None if is_published => Some(now),
                None => None,
            };

            tx.execute(
                "UPDATE blog_posts
                 SET title = ?2, slug = ?3, excerpt = ?4, body = ?5, cover_image_url = ?6, author = ?7,
                     is_published = ?8, published_at = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    post_id.to_string(),
                    title,
                    slug,
                    request.excerpt.map_or(current.excerpt, |v| optional_text(Some(v))),
                    body,
                    request.cover_image_url.map_or(current.cover_image_url, |v| optional_text(Some(v))),
                    request.author.map_or(current.author, |v| optional_text(Some(v))),
                    is_published,
                    published_at.map(|at| encode_timestamp(&at)),
                    encode_timestamp(&now)
                ],
            )
            .map_err(|e| slug_conflict(DatabaseError::from(e), &slug))?;

            find_post(tx, post_id)?.ok_or(ContentError::NotFound("Blog post"))
        })
    }

    pub fn delete_post(&self, post_id: Uuid) -> Result<(), ContentError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM blog_posts WHERE id = ?1", [post_id.to_string()])
                .map_err(ContentError::from)
        })?;

        if deleted == 0 {
            return Err(ContentError::NotFound("Blog post"));
        }
        info!("Deleted blog post {}", post_id);
        Ok(())
    }
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<BlogPost> {
    Ok(BlogPost {
        id: get_uuid(row, "id")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        excerpt: row.get("excerpt")?,
        body: row.get("body")?,
        cover_image_url: row.get("cover_image_url")?,
        author: row.get("author")?,
        is_published: row.get("is_published")?,
        published_at: get_opt_timestamp(row, "published_at")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn find_post(conn: &Connection, post_id: Uuid) -> Result<Option<BlogPost>, ContentError> {
    let sql = format!("SELECT {} FROM blog_posts WHERE id = ?1", POST_COLUMNS);
    Ok(conn.query_row(&sql, [post_id.to_string()], post_from_row).optional()?)
}

fn find_by_key(conn: &Connection, key: &str) -> Result<Option<BlogPost>, ContentError> {
    if let Ok(id) = Uuid::parse_str(key) {
        return find_post(conn, id);
    }
    let sql = format!("SELECT {} FROM blog_posts WHERE slug = ?1", POST_COLUMNS);
    Ok(conn.query_row(&sql, [key], post_from_row).optional()?)
}
