use std::collections::BTreeMap;

use crate::model::{Id, User};

/// Credential check against the provisioned user table. Passwords are
/// compared verbatim — hashing lives outside this service's boundary.
pub fn verify_credentials<'a>(
    users: &'a BTreeMap<Id, User>,
    email: &str,
    password: &str,
) -> Option<&'a User> {
    users
        .values()
        .find(|u| u.email == email && u.password == password)
}
