use lazy_static::lazy_static;
use regex::Regex;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};

use crate::{errors::AppError, users::model::Gender};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9]{6,15}$").unwrap();
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trims, lowercases and checks the address shape.
pub(crate) fn email(raw: &str) -> Result<String, AppError> {
    let email = normalize_email(raw);
    if email.is_empty() {
        return Err(AppError::required("email"));
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(AppError::validation("email", "Invalid email"));
    }
    Ok(email)
}

/// Strips common separators and requires 6 to 15 digits with an optional `+`.
pub(crate) fn phone(raw: &str) -> Result<String, AppError> {
    let phone: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if phone.is_empty() {
        return Err(AppError::required("phone"));
    }
    if !PHONE_RE.is_match(&phone) {
        return Err(AppError::validation("phone", "Invalid phone number"));
    }
    Ok(phone)
}

pub(crate) fn gender(raw: &str) -> Result<Gender, AppError> {
    raw.parse()
        .map_err(|_| AppError::validation("gender", "Gender must be Male, Female or Other"))
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 instant.
pub(crate) fn dob(raw: &str) -> Result<Date, AppError> {
    let raw = raw.trim();
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339).map(|dt| dt.date()))
        .map_err(|_| AppError::validation("dob", "Date of birth must be YYYY-MM-DD"))
}

/// Non-empty trimmed text, or `None` for blank input.
pub(crate) fn text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub(crate) fn required_text(raw: Option<String>, field: &'static str) -> Result<String, AppError> {
    text(raw).ok_or_else(|| AppError::required(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn email_is_normalized() {
        assert_eq!(email("  A@X.com ").unwrap(), "a@x.com");
    }

    #[test]
    fn email_rejects_bad_shapes() {
        for bad in ["", "   ", "no-at-sign", "a@b", "a b@c.d"] {
            let err = email(bad).unwrap_err();
            assert_eq!(err.code(), "validation_error", "{bad:?}");
        }
    }

    #[test]
    fn phone_strips_separators() {
        assert_eq!(phone("+1 (555) 010-2030").unwrap(), "+15550102030");
        assert_eq!(phone("9876543210").unwrap(), "9876543210");
    }

    #[test]
    fn phone_rejects_letters_and_short_numbers() {
        assert!(phone("12345").is_err());
        assert!(phone("555-CALL-NOW").is_err());
        assert!(phone("").is_err());
    }

    #[test]
    fn dob_accepts_date_and_instant() {
        assert_eq!(dob("2000-02-29").unwrap(), date!(2000-02-29));
        assert_eq!(dob("2000-02-29T10:00:00Z").unwrap(), date!(2000-02-29));
        assert!(dob("29/02/2000").is_err());
    }

    #[test]
    fn blank_text_is_none() {
        assert_eq!(text(Some("  ".into())), None);
        assert_eq!(text(Some(" Bob ".into())).as_deref(), Some("Bob"));
        assert!(required_text(None, "firstName").is_err());
    }
}
