use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::users::repo_types::User;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const EMAIL_MAX: usize = 255;
pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 128;
pub const PHONE_MAX: usize = 20;

/// Request body for `POST /users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Request body for `PUT /users/:id`. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: String,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            phone: u.phone,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub message: String,
    pub id: i64,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Postgres text columns cannot store NUL.
fn reject_nul(field: &str, value: &str) -> Result<(), String> {
    if value.contains('\0') {
        return Err(format!("{field} must not contain NUL characters"));
    }
    Ok(())
}

pub(crate) fn validate_username(username: &str) -> Result<(), String> {
    reject_nul("username", username)?;
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), String> {
    reject_nul("email", email)?;
    if email.chars().count() > EMAIL_MAX {
        return Err(format!("email must be at most {EMAIL_MAX} characters"));
    }
    if !is_valid_email(email) {
        return Err("email must be a valid email address".into());
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(format!(
            "password must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters"
        ));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: &str) -> Result<(), String> {
    reject_nul("phone", phone)?;
    if phone.chars().count() > PHONE_MAX {
        return Err(format!("phone must be at most {PHONE_MAX} characters"));
    }
    Ok(())
}

impl CreateUserRequest {
    /// Trims identity fields and checks every constraint.
    pub fn normalize(mut self) -> Result<Self, String> {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_string();
        self.phone = self.phone.map(|p| p.trim().to_string());

        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(self)
    }
}

impl UpdateUserRequest {
    /// Same as [`CreateUserRequest::normalize`], for supplied fields only.
    pub fn normalize(mut self) -> Result<Self, String> {
        self.username = self.username.map(|u| u.trim().to_string());
        self.email = self.email.map(|e| e.trim().to_string());
        self.phone = self.phone.map(|p| p.trim().to_string());

        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(self)
    }
}
