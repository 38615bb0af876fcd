use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Credentials of the single user allowed to call the authenticated API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: SerializableSecretString,
}

impl BasicAuthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.is_empty() {
            return Err(ValidationError::BasicAuthUsernameEmpty);
        }

        if self.password.expose_secret().is_empty() {
            return Err(ValidationError::BasicAuthPasswordEmpty);
        }

        Ok(())
    }
}
