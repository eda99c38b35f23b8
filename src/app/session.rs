//! Auth Context
//!
//! Who is signed in on this device. Built once at start-up and handed to
//! every API call that needs a bearer token; signing out clears it.

use tracing::info;

/// A signed-in principal
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User or vendor id
    pub subject_id: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("subject_id", &self.subject_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Vendor,
}

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    user: Option<Credentials>,
    vendor: Option<Credentials>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, subject_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.user = Some(Credentials {
            subject_id: subject_id.into(),
            token: token.into(),
        });
        self
    }

    pub fn with_vendor(mut self, subject_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.vendor = Some(Credentials {
            subject_id: subject_id.into(),
            token: token.into(),
        });
        self
    }

    pub fn credentials(&self, role: Role) -> Option<&Credentials> {
        match role {
            Role::User => self.user.as_ref(),
            Role::Vendor => self.vendor.as_ref(),
        }
    }

    pub fn bearer(&self, role: Role) -> Option<&str> {
        self.credentials(role).map(|c| c.token.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|c| c.subject_id.as_str())
    }

    pub fn is_signed_in(&self, role: Role) -> bool {
        self.credentials(role).is_some()
    }

    pub fn sign_out(&mut self, role: Role) {
        let slot = match role {
            Role::User => &mut self.user,
            Role::Vendor => &mut self.vendor,
        };
        if slot.take().is_some() {
            info!("Signed out {:?}", role);
        }
    }

    pub fn sign_out_all(&mut self) {
        self.sign_out(Role::User);
        self.sign_out(Role::Vendor);
    }
}
