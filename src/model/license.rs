//! License record gating enterprise features.

use serde::{Deserialize, Serialize};

use crate::model::now_millis;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseFeatures {
    pub ldap_groups: bool,
    pub guest_accounts: bool,
    pub cluster: bool,
    pub custom_permissions_schemes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub issued_at: i64,
    pub starts_at: i64,
    pub expires_at: i64,
    pub customer_name: String,
    pub users: i64,
    pub features: LicenseFeatures,
}

impl License {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= now_millis()
    }

    pub fn is_started(&self) -> bool {
        self.starts_at <= now_millis()
    }

    /// Inside its term: started and not yet expired. Feature gates only
    /// honor active licenses.
    pub fn is_active(&self) -> bool {
        self.is_started() && !self.is_expired()
    }
}
