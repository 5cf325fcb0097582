use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database};
use shared_utils::validation::require_text;

use crate::models::{ContentError, CreateTestimonialRequest, Testimonial, UpdateTestimonialRequest};

const TESTIMONIAL_COLUMNS: &str = "id, author_name, content, rating, is_published, created_at";

pub struct TestimonialService {
    db: Database,
}

impl TestimonialService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    pub fn list_published(&self) -> Result<Vec<Testimonial>, ContentError> {
        self.list(true)
    }

    pub fn list_all(&self) -> Result<Vec<Testimonial>, ContentError> {
        self.list(false)
    }

    fn list(&self, published_only: bool) -> Result<Vec<Testimonial>, ContentError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM testimonials WHERE (?1 = 0 OR is_published = 1) ORDER BY created_at DESC",
                TESTIMONIAL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let testimonials = stmt
                .query_map([published_only], testimonial_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(testimonials)
        })
    }

    pub fn get_published(&self, testimonial_id: Uuid) -> Result<Testimonial, ContentError> {
        self.db
            .with_conn(|conn| find_testimonial(conn, testimonial_id))?
            .filter(|t| t.is_published)
            .ok_or(ContentError::NotFound("Testimonial"))
    }

    pub fn create_testimonial(&self, request: CreateTestimonialRequest) -> Result<Testimonial, ContentError> {
        let author_name = require_text("author_name", &request.author_name).map_err(ContentError::Validation)?;
        let content = require_text("content", &request.content).map_err(ContentError::Validation)?;
        validate_rating(request.rating)?;

        let id = Uuid::new_v4();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO testimonials (id, author_name, content, rating, is_published, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    author_name,
                    content,
                    request.rating,
                    request.is_published,
                    encode_timestamp(&now_timestamp())
                ],
            )?;

            info!("Created testimonial {}", id);
            find_testimonial(conn, id)?.ok_or(ContentError::NotFound("Testimonial"))
        })
    }

    pub fn update_testimonial(
        &self,
        testimonial_id: Uuid,
        request: UpdateTestimonialRequest,
    ) -> Result<Testimonial, ContentError> {
        self.db.transaction(|tx| {
            let current = find_testimonial(tx, testimonial_id)?.ok_or(ContentError::NotFound("Testimonial"))?;

            let author_name = match request.author_name {
                Some(value) => require_text("author_name", &value).map_err(ContentError::Validation)?,
                None => current.author_name,
            };
            let content = match request.content {
                Some(value) => require_text("content", &value).map_err(ContentError::Validation)?,
                None => current.content,
            };
            let rating = request.rating.unwrap_or(current.rating);
            validate_rating(rating)?;

            tx.execute(
                "UPDATE testimonials SET author_name = ?2, content = ?3, rating = ?4, is_published = ?5 WHERE id = ?1",
                params![
                    testimonial_id.to_string(),
                    author_name,
                    content,
                    rating,
                    request.is_published.unwrap_or(current.is_published)
                ],
            )?;

            find_testimonial(tx, testimonial_id)?.ok_or(ContentError::NotFound("Testimonial"))
        })
    }

    pub fn delete_testimonial(&self, testimonial_id: Uuid) -> Result<(), ContentError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM testimonials WHERE id = ?1", [testimonial_id.to_string()])
                .map_err(ContentError::from)
        })?;

        if deleted == 0 {
            return Err(ContentError::NotFound("Testimonial"));
        }
        Ok(())
    }
}

fn validate_rating(rating: u8) -> Result<(), ContentError> {
    if !(1..=5).contains(&rating) {
        return Err(ContentError::Validation("rating must be between 1 and 5".to_string()));
    }
    Ok(())
}

fn testimonial_from_row(row: &Row<'_>) -> rusqlite::Result<Testimonial> {
    Ok(Testimonial {
        id: get_uuid(row, "id")?,
        author_name: row.get("author_name")?,
        content: row.get("content")?,
        rating: row.get("rating")?,
        is_published: row.get("is_published")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn find_testimonial(conn: &Connection, testimonial_id: Uuid) -> Result<Option<Testimonial>, ContentError> {
    let sql = format!("SELECT {} FROM testimonials WHERE id = ?1", TESTIMONIAL_COLUMNS);
    Ok(conn
        .query_row(&sql, [testimonial_id.to_string()], testimonial_from_row)
        .optional()?)
}
