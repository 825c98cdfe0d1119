use crate::db::user_repository::{User, UserRepository};
use crate::error::AppError;

use super::password::{hash_password, verify_password};

/// Registration and login shared by both HTTP variants.
#[derive(Clone, Debug)]
pub struct AuthService {
    users: UserRepository,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl AuthService {
    pub fn new(users: UserRepository) -> Self {
        Self { users }
    }

    pub async fn register(
        &self,
        email: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<User, AppError> {
        let (Some(email), Some(username), Some(password)) =
            (present(email), present(username), password.filter(|p| !p.is_empty()))
        else {
            return Err(AppError::Validation("Missing required fields".to_string()));
        };

        let user = self
            .users
            .create_user(email, username, &hash_password(password))
            .await?;
        log::info!("Registered user {} ({})", user.id, username);
        Ok(user)
    }

    /// Wrong email and wrong password produce the same error.
    pub async fn login(&self, email: Option<&str>, password: Option<&str>) -> Result<User, AppError> {
        let (Some(email), Some(password)) = (present(email), password.filter(|p| !p.is_empty()))
        else {
            return Err(AppError::Validation("Missing email or password".to_string()));
        };

        match self.users.find_by_email(email).await? {
            Some(user) if verify_password(password, &user.password) => {
                log::info!("User {} logged in", user.id);
                Ok(user)
            }
            _ => {
                log::warn!("Failed login attempt");
                Err(AppError::Unauthorized("Invalid credentials".to_string()))
            }
        }
    }
}
