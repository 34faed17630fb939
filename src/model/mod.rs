//! Domain model types.
//!
//! Entities are plain structs with epoch-millisecond timestamps and string
//! ids; validation lives next to the type it guards and reports
//! [`AppError`](crate::error::AppError) with stable ids.

mod analytics;
mod bot;
mod channel;
mod file_info;
mod group;
mod license;
mod member;
mod post;
mod preference;
mod role;
mod session;
mod sidebar;
mod status;
mod system;
mod team;
mod user;
mod webhook;

pub use analytics::AnalyticsRow;
pub use bot::{Bot, BotPatch};
pub use channel::{
    Channel, ChannelType, DEFAULT_CHANNEL_NAME, GROUP_CHANNEL_MAX_USERS, GROUP_CHANNEL_MIN_USERS,
    OFF_TOPIC_CHANNEL_NAME, group_channel_name, direct_channel_name,
};
pub use file_info::FileInfo;
pub use group::{
    GROUP_SOURCE_CUSTOM, GROUP_SOURCE_LDAP, Group, GroupSyncable, GroupSyncableType,
};
pub use license::{License, LicenseFeatures};
pub use member::{ChannelMember, ChannelMemberHistory, ChannelUnread};
pub use post::{Post, PostType};
pub use preference::{CATEGORY_CUSTOM_STATUS, NAME_RECENT_CUSTOM_STATUSES, Preference};
pub use role::{
    CHANNEL_ADMIN_ROLE_ID, CHANNEL_GUEST_ROLE_ID, CHANNEL_MODERATED_PERMISSIONS,
    CHANNEL_USER_ROLE_ID, Role, Scheme, SchemeScope, is_built_in_channel_role,
};
pub use session::{
    SESSION_ACTIVITY_TIMEOUT_MILLIS, SESSION_CLEANUP_BATCH_SIZE, Session,
};
pub use sidebar::{SidebarCategory, SidebarCategoryType, default_categories};
pub use status::{
    CustomStatus, MAX_RECENT_CUSTOM_STATUSES, STATUS_MIN_UPDATE_TIME, Status, StatusState,
};
pub use system::{
    SYSTEM_ACTIVE_LICENSE, SYSTEM_ASYMMETRIC_SIGNING_KEY, SYSTEM_DIAGNOSTIC_ID,
    SYSTEM_FIRST_SERVER_RUN_TIMESTAMP, SYSTEM_INSTALLATION_DATE, SYSTEM_LAST_SECURITY_TIME,
    SYSTEM_POST_ACTION_COOKIE_SECRET, SystemRow, WARN_METRIC_PREFIX, WARN_METRIC_STATUS_ACK,
    WARN_METRIC_STATUS_LIMIT_REACHED, WARN_METRIC_STATUS_RUNONCE, WarnMetric, warn_metrics,
};
pub use team::{Team, TeamMember};
pub use user::{SYSTEM_ADMIN_ROLE_ID, SYSTEM_GUEST_ROLE_ID, SYSTEM_USER_ROLE_ID, User};
pub use webhook::{
    COMMAND_WEBHOOK_LIFETIME_MILLIS, COMMAND_WEBHOOK_MAX_USES, CommandWebhook, IncomingWebhook,
    OutgoingWebhook,
};

/// Generate a new 32-character entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time in epoch milliseconds, the timestamp unit used
/// by every entity and wire event.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Id length accepted anywhere an entity id is an input.
pub const ID_LENGTH: usize = 32;

/// Quick structural check for externally supplied ids.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}
