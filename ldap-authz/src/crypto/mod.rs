//! Password hashing configuration

pub mod hashing;

pub use hashing::{Argon2Scheme, PasswordHasherFactory, PasswordHashingScheme};
