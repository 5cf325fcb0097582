use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{encode_timestamp, get_timestamp, get_uuid, now_timestamp, AppState, Database};
use shared_utils::validation::{is_valid_email, is_valid_phone, require_text};

use crate::models::{ContactMessage, ContentError, CreateContactMessageRequest};
use crate::services::optional_text;

const MESSAGE_COLUMNS: &str = "id, name, email, phone, subject, message, is_read, created_at";
const MAX_MESSAGE_LENGTH: usize = 5000;

pub struct ContactService {
    db: Database,
}

impl ContactService {
    pub fn new(state: &AppState) -> Self {
        Self { db: state.db.clone() }
    }

    /// Contact form submission from the public site.
    #[instrument(skip(self, request))]
    pub fn submit(&self, request: CreateContactMessageRequest) -> Result<ContactMessage, ContentError> {
        let name = require_text("name", &request.name).map_err(ContentError::Validation)?;
        let message = require_text("message", &request.message).map_err(ContentError::Validation)?;
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ContentError::Validation(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }

        let email = request.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ContentError::Validation("Invalid email address".to_string()));
        }

        let phone = optional_text(request.phone);
        if let Some(phone) = &phone {
            if !is_valid_phone(phone) {
                return Err(ContentError::Validation("Invalid phone number".to_string()));
            }
        }

        let id = Uuid::new_v4();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contact_messages (id, name, email, phone, subject, message, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    id.to_string(),
                    name,
                    email,
                    phone,
                    optional_text(request.subject),
                    message,
                    encode_timestamp(&now_timestamp())
                ],
            )?;

            info!("Contact message {} received", id);
            find_message(conn, id)?.ok_or(ContentError::NotFound("Contact message"))
        })
    }

    /// Inbox, newest first.
    pub fn list_messages(&self, unread_only: bool) -> Result<Vec<ContactMessage>, ContentError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM contact_messages WHERE (?1 = 0 OR is_read = 0) ORDER BY created_at DESC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map([unread_only], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    pub fn mark_read(&self, message_id: Uuid, is_read: bool) -> Result<ContactMessage, ContentError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE contact_messages SET is_read = ?2 WHERE id = ?1",
                params![message_id.to_string(), is_read],
            )?;
            if updated == 0 {
                return Err(ContentError::NotFound("Contact message"));
            }
            find_message(conn, message_id)?.ok_or(ContentError::NotFound("Contact message"))
        })
    }

    pub fn delete_message(&self, message_id: Uuid) -> Result<(), ContentError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM contact_messages WHERE id = ?1", [message_id.to_string()])
                .map_err(ContentError::from)
        })?;

        if deleted == 0 {
            return Err(ContentError::NotFound("Contact message"));
        }
        Ok(())
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ContactMessage> {
    Ok(ContactMessage {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        subject: row.get("subject")?,
        message: row.get("message")?,
        is_read: row.get("is_read")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn find_message(conn: &Connection, message_id: Uuid) -> Result<Option<ContactMessage>, ContentError> {
    let sql = format!("SELECT {} FROM contact_messages WHERE id = ?1", MESSAGE_COLUMNS);
    Ok(conn
        .query_row(&sql, [message_id.to_string()], message_from_row)
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::TestContext;

    fn request(email: &str, message: &str) -> CreateContactMessageRequest {
        CreateContactMessageRequest {
            name: "Pablo Gil".into(),
            email: email.into(),
            phone: Some("+34 600 111 222".into()),
            subject: Some("Opening hours".into()),
            message: message.into(),
        }
    }

    #[test]
    fn submissions_are_validated() {
        let ctx = TestContext::new();
        let service = ContactService::new(&ctx.state);

        assert_matches!(service.submit(request("not-an-email", "Hello")), Err(ContentError::Validation(_)));
        assert_matches!(service.submit(request("pablo@example.com", "  ")), Err(ContentError::Validation(_)));

        let mut bad_phone = request("pablo@example.com", "Hello");
        bad_phone.phone = Some("call me".into());
        assert_matches!(service.submit(bad_phone), Err(ContentError::Validation(_)));

        let saved = service.submit(request("Pablo@Example.com", "Are you open on Sunday?")).unwrap();
        assert_eq!(saved.email, "pablo@example.com");
        assert!(!saved.is_read);
    }

    #[test]
    fn triage_flow() {
        let ctx = TestContext::new();
        let service = ContactService::new(&ctx.state);
        let first = service.submit(request("a@example.com", "First")).unwrap();
        service.submit(request("b@example.com", "Second")).unwrap();

        service.mark_read(first.id, true).unwrap();
        assert_eq!(service.list_messages(true).unwrap().len(), 1);
        assert_eq!(service.list_messages(false).unwrap().len(), 2);

        service.delete_message(first.id).unwrap();
        assert_matches!(service.mark_read(first.id, true), Err(ContentError::NotFound(_)));
        assert_matches!(service.delete_message(first.id), Err(ContentError::NotFound(_)));
    }
}
