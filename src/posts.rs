//! Post creation.
//!
//! The full message pipeline (mentions, notifications, search indexing)
//! lives elsewhere; what the channel lifecycle needs from posts is a
//! durable row, a channel-counter bump, the `posted` event, and retry
//! dedup through the pending-post cache.

use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::model::{Post, PostType};
use crate::server::App;
use crate::ws::events::EVENT_POSTED;
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    /// Persists a post and announces it to the channel.
    ///
    /// A repeated `pending_post_id` inside the dedup window returns the
    /// already-created post instead of writing a second row, which is what
    /// makes client retries safe.
    pub async fn create_post(&self, post: Post) -> AppResult<Post> {
        if !post.pending_post_id.is_empty()
            && let Some(existing) = self.srv().pending_post_cache().get(&post.pending_post_id)
        {
            debug!(
                pending_post_id = %post.pending_post_id,
                post_id = %existing,
                "deduplicated retried post create"
            );
            return Ok(self.store().posts().get(&existing).await?);
        }

        if !post.is_valid() {
            return Err(AppError::invalid_input(
                "app.post.create_post.invalid.app_error",
                "invalid post",
            ));
        }

        self.store().posts().save(&post).await?;
        if !post.pending_post_id.is_empty() {
            self.srv()
                .pending_post_cache()
                .insert(post.pending_post_id.clone(), post.id.clone());
        }

        if let Err(err) = self
            .store()
            .channels()
            .increment_msg_count(&post.channel_id, post.create_at)
            .await
        {
            warn!(channel_id = %post.channel_id, error = %err, "post counter bump failed");
        }

        let event = WebSocketEvent::new(EVENT_POSTED, Broadcast::to_channel(&post.channel_id))
            .add("post", json!(post))
            .add("channel_id", post.channel_id.as_str());
        self.publish(event).await;

        Ok(post)
    }

    /// Best-effort system message (joins, leaves, archives and the rest of
    /// the channel lifecycle). Callers decide whether a failure matters.
    pub async fn post_system_message(
        &self,
        post_type: PostType,
        user_id: &str,
        channel_id: &str,
        message: &str,
    ) -> AppResult<Post> {
        self.create_post(Post::system(post_type, user_id, channel_id, message))
            .await
    }
}
