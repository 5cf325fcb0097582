use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use tracing::{info, instrument};

use shared_config::AppConfig;
use shared_database::{encode_timestamp, get_opt_timestamp, get_timestamp, now_timestamp, AppState, Database};
use shared_models::auth::{User, UserRole};

use crate::models::{AuthError, UserAccount};

const USER_COLUMNS: &str = "id, email, role, approved, approved_at, created_at";

pub struct UserService {
    db: Database,
    config: AppConfig,
}

impl UserService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            config: state.config.clone(),
        }
    }

    /// Record the session user on first sight. New accounts wait for approval,
    /// except bootstrap administrators which are approved immediately.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn register(&self, user: &User) -> Result<UserAccount, AuthError> {
        let email = user.email.as_deref().unwrap_or_default().trim().to_lowercase();

        self.db.transaction(|tx| {
            if let Some(existing) = find_user(tx, &user.id)? {
                if existing.email != email && !email.is_empty() {
                    tx.execute("UPDATE users SET email = ?2 WHERE id = ?1", params![user.id, email])?;
                    return find_user(tx, &user.id)?.ok_or_else(|| AuthError::UserNotFound(user.id.clone()));
                }
                return Ok(existing);
            }

            let now = encode_timestamp(&now_timestamp());
            let bootstrap = !email.is_empty() && self.config.is_bootstrap_admin(&email);
            let role = if bootstrap { UserRole::Admin } else { UserRole::Patient };

            tx.execute(
                "INSERT INTO users (id, email, role, approved, approved_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    email,
                    role.as_str(),
                    bootstrap,
                    bootstrap.then(|| now.clone()),
                    now
                ],
            )?;

            if bootstrap {
                info!("Bootstrapped administrator {}", email);
            } else {
                info!("Registered user {} pending approval", user.id);
            }
            find_user(tx, &user.id)?.ok_or_else(|| AuthError::UserNotFound(user.id.clone()))
        })
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserAccount, AuthError> {
        self.db
            .with_conn(|conn| find_user(conn, user_id))?
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
    }

    /// Accounts ordered by registration, optionally only those awaiting approval.
    pub fn list_users(&self, pending_only: bool) -> Result<Vec<UserAccount>, AuthError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE (?1 = 0 OR approved = 0) ORDER BY created_at, email",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map([pending_only], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    #[instrument(skip(self))]
    pub fn approve(&self, user_id: &str, role: UserRole) -> Result<UserAccount, AuthError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET role = ?2, approved = 1, approved_at = ?3 WHERE id = ?1",
                params![user_id, role.as_str(), encode_timestamp(&now_timestamp())],
            )?;
            if updated == 0 {
                return Err(AuthError::UserNotFound(user_id.to_string()));
            }

            info!("Approved user {} as {}", user_id, role);
            find_user(conn, user_id)?.ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
        })
    }

    /// Withdraw back-office access. The acting administrator cannot revoke themselves.
    #[instrument(skip(self))]
    pub fn revoke(&self, user_id: &str, acting_user_id: &str) -> Result<UserAccount, AuthError> {
        if user_id == acting_user_id {
            return Err(AuthError::Validation("You cannot revoke your own access".to_string()));
        }

        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET approved = 0, approved_at = NULL WHERE id = ?1",
                [user_id],
            )?;
            if updated == 0 {
                return Err(AuthError::UserNotFound(user_id.to_string()));
            }

            info!("Revoked access for user {}", user_id);
            find_user(conn, user_id)?.ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    let role: String = row.get("role")?;
    let role = UserRole::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown role '{}'", role).into())
    })?;

    Ok(UserAccount {
        id: row.get("id")?,
        email: row.get("email")?,
        role,
        approved: row.get("approved")?,
        approved_at: get_opt_timestamp(row, "approved_at")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserAccount>, AuthError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [user_id], user_from_row).optional()?)
}
