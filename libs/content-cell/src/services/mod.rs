pub mod blog;
pub mod contact;
pub mod legal;
pub mod product;
pub mod testimonial;

pub use blog::BlogService;
pub use contact::ContactService;
pub use legal::LegalService;
pub use product::ProductService;
pub use testimonial::TestimonialService;

use shared_database::DatabaseError;
use shared_utils::validation::{is_valid_slug, slugify};

use crate::models::ContentError;

/// Explicit slug if given, otherwise derived from `title`.
pub(crate) fn resolve_slug(explicit: Option<&str>, title: &str) -> Result<String, ContentError> {
    let slug = match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => slugify(title),
    };

    if !is_valid_slug(&slug) {
        return Err(ContentError::Validation(format!(
            "slug '{}' must be lowercase letters, digits and dashes",
            slug
        )));
    }
    Ok(slug)
}

/// Blank optional text is stored as NULL.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turn a UNIQUE violation on `slug` into a 409.
pub(crate) fn slug_conflict(err: DatabaseError, slug: &str) -> ContentError {
    if err.is_unique_violation() {
        ContentError::DuplicateSlug(slug.to_string())
    } else {
        ContentError::Database(err)
    }
}
