use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub session_jwt_secret: String,
    pub bind_address: String,
    pub clinic_timezone: String,
    pub ical_fetch_timeout_seconds: u64,
    pub ical_default_event_minutes: i64,
    pub ical_uid_domain: String,
    pub admin_bootstrap_emails: Vec<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "data/clinic.db".to_string(),
            session_jwt_secret: String::new(),
            bind_address: "0.0.0.0:3000".to_string(),
            clinic_timezone: "UTC".to_string(),
            ical_fetch_timeout_seconds: 20,
            ical_default_event_minutes: 30,
            ical_uid_domain: "clinic.local".to_string(),
            admin_bootstrap_emails: Vec::new(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_PATH not set, using {}", defaults.database_path);
                    defaults.database_path.clone()
                }),
            session_jwt_secret: env::var("SESSION_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SESSION_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| defaults.bind_address.clone()),
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_TIMEZONE not set, using UTC");
                    defaults.clinic_timezone.clone()
                }),
            ical_fetch_timeout_seconds: parse_or("ICAL_FETCH_TIMEOUT_SECONDS", defaults.ical_fetch_timeout_seconds),
            ical_default_event_minutes: parse_or("ICAL_DEFAULT_EVENT_MINUTES", defaults.ical_default_event_minutes),
            ical_uid_domain: env::var("ICAL_UID_DOMAIN")
                .unwrap_or_else(|_| defaults.ical_uid_domain.clone()),
            admin_bootstrap_emails: split_list(&env::var("ADMIN_BOOTSTRAP_EMAILS").unwrap_or_default())
                .into_iter()
                .map(|email| email.to_lowercase())
                .collect(),
            cors_allowed_origins: split_list(&env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_path.is_empty()
            && !self.session_jwt_secret.is_empty()
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_bootstrap_emails.iter().any(|candidate| *candidate == email)
    }
}

fn parse_or<T: FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_ignores_blank_entries() {
        assert_eq!(split_list(" a@x.com, ,b@y.com,"), vec!["a@x.com", "b@y.com"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn bootstrap_admin_match_is_case_insensitive() {
        let config = AppConfig {
            admin_bootstrap_emails: vec!["owner@clinic.test".to_string()],
            ..AppConfig::default()
        };

        assert!(config.is_bootstrap_admin("Owner@Clinic.test "));
        assert!(!config.is_bootstrap_admin("someone@clinic.test"));
    }

    #[test]
    fn default_config_is_not_configured_without_secret() {
        assert!(!AppConfig::default().is_configured());
    }
}
