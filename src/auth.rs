use crate::model::Role;

/// Shared-secret check for the connection handshake.
///
/// Admin sessions may carry their own secret; when none is configured
/// both roles authenticate against the same one.
#[derive(Debug)]
pub struct Verifier {
    password: String,
    admin_password: String,
}

impl Verifier {
    pub fn new(password: String, admin_password: Option<String>) -> Self {
        let admin_password = admin_password.unwrap_or_else(|| password.clone());
        Self {
            password,
            admin_password,
        }
    }

    pub fn verify(&self, role: Role, offered: &str) -> bool {
        let expected = match role {
            Role::Client => &self.password,
            Role::Admin => &self.admin_password,
        };
        expected == offered
    }
}
