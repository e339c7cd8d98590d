use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    #[default]
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender {other:?}")),
        }
    }
}

impl TryFrom<String> for Gender {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A user as persisted by a `CredentialStore`.
///
/// This is the storage shape: it carries the password hash and is what the
/// file backend writes to disk. Anything leaving the process goes through
/// [`PublicUser`] instead.
#[derive(Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    #[serde(default)]
    #[sqlx(try_from = "String")]
    pub gender: Gender,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub dob: Option<Date>,
    pub qualification: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password_hash", &"<redacted>")
            .field("gender", &self.gender)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Everything needed to create a record; the store assigns id and timestamps.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub gender: Gender,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub dob: Option<Date>,
    pub qualification: Option<String>,
}

impl NewUser {
    pub(crate) fn into_record(self, id: Uuid, now: OffsetDateTime) -> UserRecord {
        UserRecord {
            id,
            email: self.email,
            phone: self.phone,
            password_hash: self.password_hash,
            gender: self.gender,
            first_name: self.first_name,
            last_name: self.last_name,
            address: self.address,
            dob: self.dob,
            qualification: self.qualification,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A partial mutation of one record. `None` leaves the field untouched.
///
/// Email is deliberately absent: it is the login identity and never changes
/// after creation.
#[derive(Clone, Default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub dob: Option<Date>,
    pub qualification: Option<String>,
    pub password_hash: Option<String>,
}

impl UserUpdate {
    pub fn password(hash: String) -> Self {
        Self {
            password_hash: Some(hash),
            ..Default::default()
        }
    }

    /// Phone value this update would write, if it differs from `current`.
    pub fn new_phone<'a>(&'a self, current: &UserRecord) -> Option<&'a str> {
        self.phone
            .as_deref()
            .filter(|p| current.phone.as_deref() != Some(*p))
    }

    /// Applies the update in place and bumps `updated_at`.
    pub fn apply(self, record: &mut UserRecord, now: OffsetDateTime) {
        if let Some(v) = self.first_name {
            record.first_name = Some(v);
        }
        if let Some(v) = self.last_name {
            record.last_name = Some(v);
        }
        if let Some(v) = self.phone {
            record.phone = Some(v);
        }
        if let Some(v) = self.gender {
            record.gender = v;
        }
        if let Some(v) = self.address {
            record.address = Some(v);
        }
        if let Some(v) = self.dob {
            record.dob = Some(v);
        }
        if let Some(v) = self.qualification {
            record.qualification = Some(v);
        }
        if let Some(v) = self.password_hash {
            record.password_hash = v;
        }
        record.updated_at = now;
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub gender: Gender,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub dob: Option<Date>,
    pub qualification: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&UserRecord> for PublicUser {
    fn from(r: &UserRecord) -> Self {
        Self {
            id: r.id,
            email: r.email.clone(),
            phone: r.phone.clone(),
            gender: r.gender,
            first_name: r.first_name.clone(),
            last_name: r.last_name.clone(),
            address: r.address.clone(),
            dob: r.dob,
            qualification: r.qualification.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<UserRecord> for PublicUser {
    fn from(r: UserRecord) -> Self {
        Self::from(&r)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn record() -> UserRecord {
        fixtures::new_user("ada@example.com", Some("5550001"))
            .into_record(Uuid::new_v4(), datetime!(2024-01-01 0:00 UTC))
    }

    #[test]
    fn public_user_never_contains_password_hash() {
        let user = PublicUser::from(&record());
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"firstName\":\"Ada\""));
        assert!(json.contains("\"dob\":\"1990-12-10\""));
    }

    #[test]
    fn debug_redacts_password_hash() {
        let dbg = format!("{:?}", record());
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("argon2"));
    }

    #[test]
    fn stored_shape_uses_camel_case_and_keeps_hash() {
        let json = serde_json::to_value(record()).unwrap();
        assert!(json.get("passwordHash").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["gender"], "Female");
    }

    #[test]
    fn stored_record_without_gender_defaults_to_other() {
        let mut json = serde_json::to_value(record()).unwrap();
        json.as_object_mut().unwrap().remove("gender");
        json.as_object_mut().unwrap().remove("dob");
        let back: UserRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.gender, Gender::Other);
        assert_eq!(back.dob, None);
    }

    #[test]
    fn update_touches_only_supplied_fields() {
        let mut r = record();
        let created = r.created_at;
        let later = datetime!(2024-06-01 12:00 UTC);
        UserUpdate {
            address: Some("12 St James's Square".into()),
            dob: Some(date!(1815-12-10)),
            ..Default::default()
        }
        .apply(&mut r, later);

        assert_eq!(r.address.as_deref(), Some("12 St James's Square"));
        assert_eq!(r.first_name.as_deref(), Some("Ada"));
        assert_eq!(r.phone.as_deref(), Some("5550001"));
        assert_eq!(r.created_at, created);
        assert_eq!(r.updated_at, later);
    }

    #[test]
    fn new_phone_ignores_unchanged_value() {
        let r = record();
        let same = UserUpdate {
            phone: Some("5550001".into()),
            ..Default::default()
        };
        assert_eq!(same.new_phone(&r), None);
        let changed = UserUpdate {
            phone: Some("5550002".into()),
            ..Default::default()
        };
        assert_eq!(changed.new_phone(&r), Some("5550002"));
    }

    #[test]
    fn gender_parses_case_insensitively() {
        assert_eq!("male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!(" FEMALE ".parse::<Gender>().unwrap(), Gender::Female);
        assert!("robot".parse::<Gender>().is_err());
    }
}
