//! Password hashing scheme selection
//!
//! Validates the configured hashing algorithm and its parameters. Hashing
//! itself is left to whatever consumes the selected scheme.

use crate::config::PasswordHashingSettings;
use crate::error::{AuthzError, Result};
use argon2::Params;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

pub const BCRYPT: &str = "bcrypt";
pub const PBKDF2: &str = "pbkdf2";
pub const ARGON2: &str = "argon2";

const BCRYPT_MINORS: [&str; 3] = ["A", "B", "Y"];

lazy_static! {
    static ref PBKDF2_FUNCTION: Regex = Regex::new("^SHA(1|224|256|384|512)$").unwrap();
}

/// Validated Argon2 parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argon2Scheme {
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub length: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
}

/// A password hashing algorithm with validated parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum PasswordHashingScheme {
    Bcrypt { rounds: u32, minor: String },
    Pbkdf2 { function: String, iterations: u32, length: u32 },
    Argon2(Argon2Scheme),
}

impl PasswordHashingScheme {
    pub fn algorithm(&self) -> &'static str {
        match self {
            PasswordHashingScheme::Bcrypt { .. } => BCRYPT,
            PasswordHashingScheme::Pbkdf2 { .. } => PBKDF2,
            PasswordHashingScheme::Argon2(_) => ARGON2,
        }
    }
}

/// Builds a [`PasswordHashingScheme`] from settings.
pub struct PasswordHasherFactory;

impl PasswordHasherFactory {
    /// Select and validate the configured algorithm (case-insensitive).
    pub fn create(settings: &PasswordHashingSettings) -> Result<PasswordHashingScheme> {
        match settings.algorithm.to_lowercase().as_str() {
            BCRYPT => Self::bcrypt(settings),
            PBKDF2 => Self::pbkdf2(settings),
            ARGON2 => Self::argon2(settings),
            _ => Err(AuthzError::Validation(format!(
                "Password hashing algorithm '{}' not supported.",
                settings.algorithm
            ))),
        }
    }

    fn bcrypt(settings: &PasswordHashingSettings) -> Result<PasswordHashingScheme> {
        let rounds = settings.bcrypt.rounds;
        let minor = settings.bcrypt.minor.to_uppercase();

        if !(4..=31).contains(&rounds) {
            return Err(invalid(format!(
                "BCrypt rounds must be between 4 and 31. Got: {}",
                rounds
            )));
        }
        if !BCRYPT_MINORS.contains(&minor.as_str()) {
            return Err(invalid(format!(
                "BCrypt minor must be 'A', 'B', or 'Y'. Got: {}",
                minor
            )));
        }

        Ok(PasswordHashingScheme::Bcrypt {
            rounds: rounds as u32,
            minor,
        })
    }

    fn pbkdf2(settings: &PasswordHashingSettings) -> Result<PasswordHashingScheme> {
        let pbkdf2 = &settings.pbkdf2;
        let function = pbkdf2.function.to_uppercase();

        if !PBKDF2_FUNCTION.is_match(&function) {
            return Err(invalid(format!(
                "PBKDF2 function must be one of SHA1, SHA224, SHA256, SHA384, or SHA512. Got: {}",
                function
            )));
        }

        Ok(PasswordHashingScheme::Pbkdf2 {
            function,
            iterations: positive("PBKDF2 iterations", pbkdf2.iterations)?,
            length: positive("PBKDF2 length", pbkdf2.length)?,
        })
    }

    fn argon2(settings: &PasswordHashingSettings) -> Result<PasswordHashingScheme> {
        let argon2 = &settings.argon2;

        let memory = positive("Argon2 memory", argon2.memory)?;
        let iterations = positive("Argon2 iterations", argon2.iterations)?;
        let parallelism = positive("Argon2 parallelism", argon2.parallelism)?;
        let length = positive("Argon2 length", argon2.length)?;

        let kind = argon2.kind.to_lowercase();
        if !matches!(kind.as_str(), "argon2id" | "argon2i" | "argon2d") {
            return Err(invalid(format!(
                "Argon2 type must be one of argon2id, argon2i, or argon2d. Got: {}",
                argon2.kind
            )));
        }
        if argon2.version != 16 && argon2.version != 19 {
            return Err(invalid(format!(
                "Argon2 version must be either 16 or 19. Got: {}",
                argon2.version
            )));
        }
        Params::new(memory, iterations, parallelism, Some(length as usize))
            .map_err(|e| invalid(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(PasswordHashingScheme::Argon2(Argon2Scheme {
            memory,
            iterations,
            parallelism,
            length,
            kind,
            version: argon2.version as u32,
        }))
    }
}

fn invalid(message: String) -> AuthzError {
    AuthzError::Validation(message)
}

fn positive(name: &str, value: i64) -> Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid(format!(
            "{} must be a positive integer. Got: {}",
            name, value
        ))),
    }
}
