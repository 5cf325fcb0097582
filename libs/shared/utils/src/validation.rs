use std::sync::OnceLock;

use regex::Regex;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
    })
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^\+?[0-9 ()\-]{6,20}$").expect("valid phone regex"))
}

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"))
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && email_regex().is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone_regex().is_match(phone)
}

pub fn is_valid_slug(slug: &str) -> bool {
    slug.len() <= 120 && slug_regex().is_match(slug)
}

/// Trimmed value, or an error naming the empty field.
pub fn require_text(field: &str, value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(trimmed.to_string())
}

/// Lowercase ASCII slug built from a title ("Vitamin D3 1000 IU" -> "vitamin-d3-1000-iu").
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("maria.lopez@clinic.es"));
        assert!(!is_valid_email("maria.lopez@clinic"));
        assert!(!is_valid_email("not an email"));
    }

    #[test]
    fn phone_validation() {
        assert!(is_valid_phone("+34 600 123 456"));
        assert!(is_valid_phone("(01) 555-0100"));
        assert!(!is_valid_phone("call me"));
    }

    #[test]
    fn slug_rules() {
        assert!(is_valid_slug("privacy-policy"));
        assert!(!is_valid_slug("Privacy Policy"));
        assert!(!is_valid_slug("-leading"));
        assert_eq!(slugify("Vitamin D3 (1000 IU)!"), "vitamin-d3-1000-iu");
        assert_eq!(slugify("  Hello   World "), "hello-world");
    }

    #[test]
    fn require_text_trims() {
        assert_eq!(require_text("name", "  Ana ").unwrap(), "Ana");
        assert_eq!(require_text("name", "   ").unwrap_err(), "name must not be empty");
    }
}
