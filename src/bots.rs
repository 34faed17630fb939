//! Bot account lifecycle.
//!
//! A bot is a user row with `is_bot` set plus an ownership row. Creation
//! spans both: the user is written first, and a failure on the ownership
//! row removes the user again so no half-created bot survives. Icons are
//! SVG only and live at one fixed path per bot.

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::files::looks_like_svg;
use crate::model::{Bot, BotPatch, User, new_id, now_millis};
use crate::server::App;
use crate::store::StoreError;

fn bot_icon_path(bot_user_id: &str) -> String {
    format!("bots/{bot_user_id}/icon.svg")
}

fn bot_not_found(bot_user_id: &str) -> AppError {
    AppError::not_found("app.bot.get.missing.app_error", "bot not found")
        .with_detail(format!("bot_user_id={bot_user_id}"))
}

impl App {
    /// Creates a bot and its backing user as one operation.
    pub async fn create_bot(&self, mut bot: Bot) -> AppResult<Bot> {
        if !self.config().service.enable_bot_accounts {
            return Err(AppError::forbidden(
                "app.bot.create.disabled.app_error",
                "bot accounts are disabled",
            ));
        }
        bot.is_valid()?;

        // Bots get a synthetic unroutable address; nothing emails them.
        let mut user = User::new(&bot.username, &format!("{}@localhost", new_id()));
        user.is_bot = true;
        user.pre_save();
        user.is_valid()?;
        self.store()
            .users()
            .save(&user)
            .await
            .map_err(|err| match err {
                StoreError::Conflict { .. } => AppError::conflict(
                    "app.bot.create.username_taken.app_error",
                    "a user with that username already exists",
                ),
                other => other.into(),
            })?;

        bot.user_id = user.id.clone();
        bot.username = user.username.clone();
        if let Err(err) = self.store().bots().save(&bot).await {
            // The user row must not outlive a failed ownership insert.
            if let Err(rollback) = self.store().users().permanent_delete(&user.id).await {
                warn!(user_id = %user.id, error = %rollback, "bot user rollback failed");
            }
            return Err(err.into());
        }

        info!(bot_user_id = %bot.user_id, owner_id = %bot.owner_id, "bot created");
        Ok(bot)
    }

    pub async fn get_bot(&self, bot_user_id: &str, include_deleted: bool) -> AppResult<Bot> {
        let bot = self
            .store()
            .bots()
            .get(bot_user_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => bot_not_found(bot_user_id),
                other => other.into(),
            })?;
        if bot.is_deleted() && !include_deleted {
            return Err(bot_not_found(bot_user_id));
        }
        Ok(bot)
    }

    pub async fn get_bots_by_owner(&self, owner_id: &str) -> AppResult<Vec<Bot>> {
        Ok(self.store().bots().get_by_owner(owner_id).await?)
    }

    /// Applies a partial update. A username change renames the backing
    /// user row too so the two never drift apart.
    pub async fn patch_bot(&self, bot_user_id: &str, patch: &BotPatch) -> AppResult<Bot> {
        let mut bot = self.get_bot(bot_user_id, false).await?;
        bot.patch(patch);
        bot.pre_update();
        bot.is_valid()?;

        if patch.username.is_some() {
            let mut user = self.get_user(bot_user_id).await?;
            user.username = bot.username.clone();
            user.pre_update();
            self.store().users().update(&user).await?;
            self.invalidate_cache_for_user(bot_user_id).await;
        }
        self.store().bots().update(&bot).await?;
        Ok(bot)
    }

    /// Replaces the bot's icon, which must be SVG.
    pub async fn set_bot_icon_image(&self, bot_user_id: &str, icon: &[u8]) -> AppResult<()> {
        let bot = self.get_bot(bot_user_id, true).await?;
        if !looks_like_svg(icon) {
            return Err(AppError::invalid_input(
                "app.bot.set_icon.not_svg.app_error",
                "bot icons must be SVG",
            ));
        }
        let mut reader = icon;
        self.srv()
            .file_backend()
            .write_file(&mut reader, &bot_icon_path(&bot.user_id))
            .await?;
        self.store()
            .users()
            .update_last_picture_update(&bot.user_id, now_millis())
            .await?;
        Ok(())
    }

    pub async fn get_bot_icon_image(&self, bot_user_id: &str) -> AppResult<Vec<u8>> {
        let bot = self.get_bot(bot_user_id, true).await?;
        self.srv()
            .file_backend()
            .read_file(&bot_icon_path(&bot.user_id))
            .await
    }

    pub async fn delete_bot_icon_image(&self, bot_user_id: &str) -> AppResult<()> {
        let bot = self.get_bot(bot_user_id, true).await?;
        self.srv()
            .file_backend()
            .remove_file(&bot_icon_path(&bot.user_id))
            .await?;
        self.store()
            .users()
            .update_last_picture_update(&bot.user_id, now_millis())
            .await?;
        Ok(())
    }
}
