//! Names of the events the server pushes over websockets.

pub const EVENT_HELLO: &str = "hello";
pub const EVENT_POSTED: &str = "posted";
pub const EVENT_TYPING: &str = "typing";

pub const EVENT_USER_ADDED: &str = "user_added";
pub const EVENT_USER_REMOVED: &str = "user_removed";
pub const EVENT_USER_UPDATED: &str = "user_updated";

pub const EVENT_CHANNEL_CREATED: &str = "channel_created";
pub const EVENT_CHANNEL_DELETED: &str = "channel_deleted";
pub const EVENT_CHANNEL_UPDATED: &str = "channel_updated";
pub const EVENT_CHANNEL_RESTORED: &str = "channel_restored";
pub const EVENT_CHANNEL_CONVERTED: &str = "channel_converted";
pub const EVENT_CHANNEL_SCHEME_UPDATED: &str = "channel_scheme_updated";
pub const EVENT_CHANNEL_VIEWED: &str = "channel_viewed";
pub const EVENT_CHANNEL_MEMBER_UPDATED: &str = "channel_member_updated";

pub const EVENT_DIRECT_ADDED: &str = "direct_added";
pub const EVENT_GROUP_ADDED: &str = "group_added";

pub const EVENT_STATUS_CHANGE: &str = "status_change";
pub const EVENT_POST_UNREAD: &str = "post_unread";
pub const EVENT_ROLE_UPDATED: &str = "role_updated";
pub const EVENT_MEMBERROLE_UPDATED: &str = "memberrole_updated";

pub const EVENT_WARN_METRIC_STATUS_RECEIVED: &str = "warn_metric_status_received";
pub const EVENT_WARN_METRIC_STATUS_REMOVED: &str = "warn_metric_status_removed";

pub const EVENT_CONFIG_CHANGED: &str = "config_changed";
pub const EVENT_LICENSE_CHANGED: &str = "license_changed";

pub const EVENT_RECEIVED_GROUP: &str = "received_group";
pub const EVENT_RECEIVED_GROUP_ASSOCIATED_TO_TEAM: &str = "received_group_associated_to_team";
pub const EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_TEAM: &str =
    "received_group_not_associated_to_team";
pub const EVENT_RECEIVED_GROUP_ASSOCIATED_TO_CHANNEL: &str = "received_group_associated_to_channel";
pub const EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_CHANNEL: &str =
    "received_group_not_associated_to_channel";

pub const EVENT_SIDEBAR_CATEGORY_CREATED: &str = "sidebar_category_created";
pub const EVENT_SIDEBAR_CATEGORY_UPDATED: &str = "sidebar_category_updated";
pub const EVENT_SIDEBAR_CATEGORY_ORDER_UPDATED: &str = "sidebar_category_order_updated";
pub const EVENT_SIDEBAR_CATEGORY_DELETED: &str = "sidebar_category_deleted";
