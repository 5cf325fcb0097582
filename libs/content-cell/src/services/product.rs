use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database, DatabaseError};
use shared_utils::validation::require_text;

use crate::models::{ContentError, CreateProductRequest, Product, UpdateProductRequest};
use crate::services::{optional_text, resolve_slug, slug_conflict};

const PRODUCT_COLUMNS: &str =
    "id, name, slug, description, category, price_cents, image_url, is_published, created_at, updated_at";

pub struct ProductService {
    db: Database,
}

impl ProductService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    /// Storefront listing, optionally narrowed to one category.
    pub fn list_published(&self, category: Option<&str>) -> Result<Vec<Product>, ContentError> {
        self.list(true, category)
    }

    pub fn list_all(&self) -> Result<Vec<Product>, ContentError> {
        self.list(false, None)
    }

    fn list(&self, published_only: bool, category: Option<&str>) -> Result<Vec<Product>, ContentError> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM products
                 WHERE (?1 = 0 OR is_published = 1)
                   AND (?2 IS NULL OR category = ?2 COLLATE NOCASE)
                 ORDER BY name COLLATE NOCASE",
                PRODUCT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let products = stmt
                .query_map(params![published_only, category], product_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(products)
        })
    }

    /// Published product by slug or id.
    pub fn get_published(&self, key: &str) -> Result<Product, ContentError> {
        self.db
            .with_conn(|conn| find_by_key(conn, key))?
            .filter(|product| product.is_published)
            .ok_or(ContentError::NotFound("Product"))
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn create_product(&self, request: CreateProductRequest) -> Result<Product, ContentError> {
        let name = require_text("name", &request.name).map_err(ContentError::Validation)?;
        let slug = resolve_slug(request.slug.as_deref(), &name)?;
        validate_price(request.price_cents)?;

        let id = Uuid::new_v4();
        let now = encode_timestamp(&now_timestamp());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (id, name, slug, description, category, price_cents, image_url,
                                       is_published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id.to_string(),
                    name,
                    slug,
                    optional_text(request.description),
                    optional_text(request.category),
                    request.price_cents,
                    optional_text(request.image_url),
                    request.is_published,
                    now
                ],
            )
            .map_err(|e| slug_conflict(DatabaseError::from(e), &slug))?;

            info!("Created product {} ({})", slug, id);
            find_product(conn, id)?.ok_or(ContentError::NotFound("Product"))
        })
    }

    #[instrument(skip(self, request))]
    pub fn update_product(&self, product_id: Uuid, request: UpdateProductRequest) -> Result<Product, ContentError> {
        self.db.transaction(|tx| {
            let current = find_product(tx, product_id)?.ok_or(ContentError::NotFound("Product"))?;

            let name = match request.name {
                Some(value) => require_text("name", &value).map_err(ContentError::Validation)?,
                None => current.name,
            };
            let slug = match request.slug {
                Some(value) => resolve_slug(Some(&value), &name)?,
                None => current.slug,
            };
            let price_cents = request.price_cents.unwrap_or(current.price_cents);
            validate_price(price_cents)?;

            tx.execute(
                "UPDATE products
                 SET name = ?2, slug = ?3, description = ?4, category = ?5, price_cents = ?6,
                     image_url = ?7, is_published = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    product_id.to_string(),
                    name,
                    slug,
                    request.description.map_or(current.description, |v| optional_text(Some(v))),
                    request.category.map_or(current.category, |v| optional_text(Some(v))),
                    price_cents,
                    request.image_url.map_or(current.image_url, |v| optional_text(Some(v))),
                    request.is_published.unwrap_or(current.is_published),
                    encode_timestamp(&now_timestamp())
                ],
            )
            .map_err(|e| slug_conflict(DatabaseError::from(e), &slug))?;

            find_product(tx, product_id)?.ok_or(ContentError::NotFound("Product"))
        })
    }

    pub fn delete_product(&self, product_id: Uuid) -> Result<(), ContentError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM products WHERE id = ?1", [product_id.to_string()])
                .map_err(ContentError::from)
        })?;

        if deleted == 0 {
            return Err(ContentError::NotFound("Product"));
        }
        info!("Deleted product {}", product_id);
        Ok(())
    }
}

fn validate_price(price_cents: i64) -> Result<(), ContentError> {
    if price_cents < 0 {
        return Err(ContentError::Validation("price_cents must not be negative".to_string()));
    }
    Ok(())
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        description: row.get("description")?,
        category: row.get("category")?,
        price_cents: row.get("price_cents")?,
        image_url: row.get("image_url")?,
        is_published: row.get("is_published")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

fn find_product(conn: &Connection, product_id: Uuid) -> Result<Option<Product>, ContentError> {
    let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
    Ok(conn
        .query_row(&sql, [product_id.to_string()], product_from_row)
        .optional()?)
}

fn find_by_key(conn: &Connection, key: &str) -> Result<Option<Product>, ContentError> {
    if let Ok(id) = Uuid::parse_str(key) {
        return find_product(conn, id);
    }
    let sql = format!("SELECT {} FROM products WHERE slug = ?1", PRODUCT_COLUMNS);
    Ok(conn.query_row(&sql, [key], product_from_row).optional()?)
}
