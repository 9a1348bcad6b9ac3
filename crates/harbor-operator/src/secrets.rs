//! Generated credentials
//!
//! Passwords and keys produced while composing an owner. They follow a
//! character budget and are written as immutable secrets, so the value
//! generated on the first pass is the one that sticks.

use crate::config::PasswordBudget;
use crate::error::{OperatorError, Result};
use rand::seq::SliceRandom;
use rand::Rng;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIALS: &[u8] = b"~!@#%^&*()_+-={}[]:<>?,./";

/// Length of encryption keys Harbor core accepts
pub const ENCRYPTION_KEY_LENGTH: usize = 16;

/// Key of the password entry in generated secrets
pub const SECRET_PASSWORD_KEY: &str = "password";
/// Key of the htpasswd entry in registry basic-auth secrets
pub const SECRET_HTPASSWD_KEY: &str = "htpasswd";
/// Key of the encryption key entry
pub const SECRET_KEY_KEY: &str = "secretKey";
/// Key of the username entry
pub const SECRET_USERNAME_KEY: &str = "username";

/// Generate a random string honouring the budget
pub fn generate(budget: PasswordBudget) -> Result<String> {
    if budget.digits + budget.specials > budget.length {
        return Err(OperatorError::InvalidConfig(format!(
            "password budget of {} characters cannot hold {} digits and {} specials",
            budget.length, budget.digits, budget.specials
        )));
    }

    let mut rng = rand::thread_rng();
    let letters: Vec<u8> = LOWER.iter().chain(UPPER.iter()).copied().collect();
    let mut chars: Vec<u8> = Vec::with_capacity(budget.length);

    for _ in 0..budget.digits {
        chars.push(DIGITS[rng.gen_range(0..DIGITS.len())]);
    }
    for _ in 0..budget.specials {
        chars.push(SPECIALS[rng.gen_range(0..SPECIALS.len())]);
    }
    while chars.len() < budget.length {
        chars.push(letters[rng.gen_range(0..letters.len())]);
    }
    chars.shuffle(&mut rng);

    Ok(chars.into_iter().map(char::from).collect())
}

/// 16 character alphanumeric key for Harbor's secret encryption
pub fn generate_encryption_key() -> Result<String> {
    generate(PasswordBudget::new(ENCRYPTION_KEY_LENGTH, 4, 0))
}

/// `user:bcrypt(password)` line for the registry htpasswd file
pub fn htpasswd(username: &str, password: &str, cost: u32) -> Result<String> {
    let hash = bcrypt::hash(password, cost)
        .map_err(|e| OperatorError::Internal(format!("cannot hash password: {}", e)))?;
    Ok(format!("{}:{}", username, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_respects_budget() {
        let budget = PasswordBudget::new(24, 5, 3);
        let password = generate(budget).unwrap();
        assert_eq!(password.len(), 24);
        assert!(password.chars().filter(|c| c.is_ascii_digit()).count() >= 5);
        assert!(
            password
                .bytes()
                .filter(|b| SPECIALS.contains(b))
                .count()
                >= 3
        );
    }

    #[test]
    fn test_generate_rejects_impossible_budget() {
        assert!(generate(PasswordBudget::new(4, 3, 3)).is_err());
    }

    #[test]
    fn test_generated_values_differ() {
        let budget = PasswordBudget::new(16, 2, 0);
        assert_ne!(generate(budget).unwrap(), generate(budget).unwrap());
    }

    #[test]
    fn test_encryption_key_length() {
        let key = generate_encryption_key().unwrap();
        assert_eq!(key.len(), ENCRYPTION_KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_htpasswd_verifies() {
        let line = htpasswd("harbor_registry_user", "s3cret", 4).unwrap();
        let (user, hash) = line.split_once(':').unwrap();
        assert_eq!(user, "harbor_registry_user");
        assert!(bcrypt::verify("s3cret", hash).unwrap());
    }
}
