//! Distraction blocking while a focus session is active.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_storage::{BlockingMode, Database, FocusSettings};

use crate::error::{EngineError, EngineResult};
use crate::sample::ActivitySample;

/// Source of the user's blocking preferences, read fresh on every pass
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn focus_settings(&self) -> Result<FocusSettings>;
}

#[async_trait]
impl SettingsSource for Database {
    async fn focus_settings(&self) -> Result<FocusSettings> {
        self.get_focus_settings()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    App,
    Website,
}

impl ItemType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Website => "website",
        }
    }
}

/// Check `item` against the block list for `item_type`.
///
/// Matching is case-insensitive and mutual: the item contains a list entry,
/// or a list entry contains the item. Allow-listed items never match.
#[must_use]
pub fn classify(settings: &FocusSettings, item: &str, item_type: ItemType) -> bool {
    let item = item.trim().to_lowercase();
    if item.is_empty() {
        return false;
    }

    let (blocked, allowed) = match item_type {
        ItemType::App => (&settings.default_blocked_apps, &settings.allowed_apps),
        ItemType::Website => (
            &settings.default_blocked_websites,
            &settings.allowed_websites,
        ),
    };

    let is_allowed = entries(allowed).any(|entry| item.contains(&entry));
    if is_allowed {
        return false;
    }
    entries(blocked).any(|entry| item.contains(&entry) || entry.contains(&item))
}

fn entries(list: &[String]) -> impl Iterator<Item = String> + '_ {
    list.iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
}

/// A block raised against one foreground item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDecision {
    pub id: Uuid,
    pub item: String,
    pub item_type: ItemType,
    pub mode: BlockingMode,
    pub focus_session_id: Option<Uuid>,
    pub decided_at: DateTime<Utc>,
}

impl BlockDecision {
    #[must_use]
    pub const fn can_bypass(&self) -> bool {
        self.mode.can_bypass()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockResolution {
    Bypassed,
    StayedFocused,
    Dismissed,
}

/// How an active block was closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassEvent {
    pub block_id: Uuid,
    pub item: String,
    pub item_type: ItemType,
    pub mode: BlockingMode,
    pub resolution: BlockResolution,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BypassOutcome {
    Bypassed(BypassEvent),
    /// Strict mode. The block stays in place.
    Denied,
}

#[derive(Debug, Default)]
pub struct DistractionPolicy {
    active_block: Option<BlockDecision>,
    last_item: Option<(ItemType, String)>,
}

impl DistractionPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn active_block(&self) -> Option<&BlockDecision> {
        self.active_block.as_ref()
    }

    /// Run one classification pass over the latest sample. The foreground
    /// app is checked before the URL and at most one block is raised.
    pub fn evaluate(
        &mut self,
        sample: &ActivitySample,
        settings: &FocusSettings,
        focus_session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Option<BlockDecision> {
        let candidates = [
            Some((ItemType::App, sample.foreground_app.as_str())),
            sample.url.as_deref().map(|url| (ItemType::Website, url)),
        ];

        let hit = candidates
            .into_iter()
            .flatten()
            .find(|(item_type, item)| classify(settings, item, *item_type));

        match hit {
            Some((item_type, item)) => self.trigger_block(
                item,
                item_type,
                settings.blocking_mode,
                focus_session_id,
                now,
            ),
            None => {
                self.last_item = None;
                None
            }
        }
    }

    /// Raise a block for `item` unless it is the item already blocked
    pub fn trigger_block(
        &mut self,
        item: &str,
        item_type: ItemType,
        mode: BlockingMode,
        focus_session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Option<BlockDecision> {
        if self
            .last_item
            .as_ref()
            .is_some_and(|(last_type, last)| *last_type == item_type && last == item)
        {
            return None;
        }

        let decision = BlockDecision {
            id: Uuid::new_v4(),
            item: item.to_string(),
            item_type,
            mode,
            focus_session_id,
            decided_at: now,
        };
        log::info!(
            "Blocking {} '{}' ({} mode)",
            item_type.as_str(),
            decision.item,
            mode
        );
        self.last_item = Some((item_type, item.to_string()));
        self.active_block = Some(decision.clone());
        Some(decision)
    }

    /// Request a bypass of the active block under `mode`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no block is active
    pub fn apply_mode(
        &mut self,
        mode: BlockingMode,
        now: DateTime<Utc>,
    ) -> EngineResult<BypassOutcome> {
        if self.active_block.is_none() {
            return Err(EngineError::NotFound("no active block".to_string()));
        }
        if !mode.can_bypass() {
            log::info!("Bypass denied in {mode} mode");
            return Ok(BypassOutcome::Denied);
        }
        self.resolve(BlockResolution::Bypassed, mode, now)
            .map(BypassOutcome::Bypassed)
    }

    /// Close the active block because the user chose to stay focused
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no block is active
    pub fn handle_stay_focused(&mut self, now: DateTime<Utc>) -> EngineResult<BypassEvent> {
        let mode = self.active_mode()?;
        self.resolve(BlockResolution::StayedFocused, mode, now)
    }

    /// Close the active block without a decision
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no block is active
    pub fn dismiss_block(&mut self, now: DateTime<Utc>) -> EngineResult<BypassEvent> {
        let mode = self.active_mode()?;
        self.resolve(BlockResolution::Dismissed, mode, now)
    }

    /// Forget the remembered item and any open block
    pub fn reset(&mut self) {
        if self.active_block.take().is_some() {
            log::debug!("Cleared active block, blocking no longer enforced");
        }
        self.last_item = None;
    }

    fn active_mode(&self) -> EngineResult<BlockingMode> {
        self.active_block
            .as_ref()
            .map(|block| block.mode)
            .ok_or_else(|| EngineError::NotFound("no active block".to_string()))
    }

    fn resolve(
        &mut self,
        resolution: BlockResolution,
        mode: BlockingMode,
        now: DateTime<Utc>,
    ) -> EngineResult<BypassEvent> {
        let block = self
            .active_block
            .take()
            .ok_or_else(|| EngineError::NotFound("no active block".to_string()))?;
        log::info!("Block on '{}' closed: {resolution:?}", block.item);
        Ok(BypassEvent {
            block_id: block.id,
            item: block.item,
            item_type: block.item_type,
            mode,
            resolution,
            resolved_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn settings(mode: BlockingMode) -> FocusSettings {
        FocusSettings {
            blocking_mode: mode,
            ..FocusSettings::default_settings()
        }
    }

    #[test]
    fn test_classify_mutual_substring() {
        let settings = settings(BlockingMode::Soft);
        assert!(classify(&settings, "Slack", ItemType::App));
        assert!(classify(&settings, "slack helper", ItemType::App));
        // Entry contains the item
        assert!(classify(&settings, "whats", ItemType::App));
        assert!(classify(&settings, "https://www.reddit.com/r/rust", ItemType::Website));
        assert!(!classify(&settings, "Visual Studio Code", ItemType::App));
        assert!(!classify(&settings, "docs.rs", ItemType::Website));
    }

    #[test]
    fn test_classify_uses_list_for_type() {
        let settings = settings(BlockingMode::Soft);
        assert!(!classify(&settings, "reddit.com", ItemType::App));
        assert!(!classify(&settings, "Slack", ItemType::Website));
    }

    #[test]
    fn test_blank_items_never_match() {
        let mut settings = settings(BlockingMode::Soft);
        settings.default_blocked_apps.push("  ".to_string());
        assert!(!classify(&settings, "", ItemType::App));
        assert!(!classify(&settings, "   ", ItemType::App));
        assert!(!classify(&settings, "Terminal", ItemType::App));
    }

    #[test]
    fn test_allow_list_wins() {
        let mut settings = settings(BlockingMode::Soft);
        settings.allowed_websites.push("youtube.com/watch?v=rust".to_string());
        assert!(!classify(
            &settings,
            "https://youtube.com/watch?v=rust-talk",
            ItemType::Website
        ));
        assert!(classify(&settings, "https://youtube.com/shorts", ItemType::Website));
    }

    #[test]
    fn test_trigger_block_idempotent_per_item() {
        let mut policy = DistractionPolicy::new();
        let settings = settings(BlockingMode::Normal);
        let sample = ActivitySample::new(at(0), "Slack", true);

        assert!(policy.evaluate(&sample, &settings, None, at(0)).is_some());
        assert!(policy.evaluate(&sample, &settings, None, at(1)).is_none());
        assert!(policy.evaluate(&sample, &settings, None, at(2)).is_none());

        // Leaving and returning blocks again
        let code = ActivitySample::new(at(3), "Code", true);
        assert!(policy.evaluate(&code, &settings, None, at(3)).is_none());
        assert!(policy.evaluate(&sample, &settings, None, at(4)).is_some());
    }

    #[test]
    fn test_app_checked_before_url() {
        let mut policy = DistractionPolicy::new();
        let settings = settings(BlockingMode::Soft);
        let sample = ActivitySample::new(at(0), "Discord", true).with_url("https://reddit.com");

        let decision = policy.evaluate(&sample, &settings, None, at(0)).unwrap();
        assert_eq!(decision.item_type, ItemType::App);
        assert_eq!(decision.item, "Discord");
    }

    #[test]
    fn test_url_blocked_in_browser() {
        let mut policy = DistractionPolicy::new();
        let settings = settings(BlockingMode::Soft);
        let sample = ActivitySample::new(at(0), "Firefox", true).with_url("https://x.com/home");

        let decision = policy.evaluate(&sample, &settings, None, at(0)).unwrap();
        assert_eq!(decision.item_type, ItemType::Website);
    }

    #[test]
    fn test_strict_bypass_denied_but_stay_focused_allowed() {
        let mut policy = DistractionPolicy::new();
        policy.trigger_block("Slack", ItemType::App, BlockingMode::Strict, None, at(0));

        let outcome = policy.apply_mode(BlockingMode::Strict, at(1)).unwrap();
        assert_eq!(outcome, BypassOutcome::Denied);
        assert!(policy.active_block().is_some());

        let event = policy.handle_stay_focused(at(2)).unwrap();
        assert_eq!(event.resolution, BlockResolution::StayedFocused);
        assert!(policy.active_block().is_none());
    }

    #[test]
    fn test_soft_and_normal_bypass_closes_block() {
        for mode in [BlockingMode::Soft, BlockingMode::Normal] {
            let mut policy = DistractionPolicy::new();
            policy.trigger_block("Slack", ItemType::App, mode, None, at(0));
            match policy.apply_mode(mode, at(1)).unwrap() {
                BypassOutcome::Bypassed(event) => {
                    assert_eq!(event.resolution, BlockResolution::Bypassed);
                    assert_eq!(event.item, "Slack");
                }
                BypassOutcome::Denied => panic!("{mode} must allow bypass"),
            }
            assert!(policy.active_block().is_none());
        }
    }

    #[test]
    fn test_resolution_without_block_not_found() {
        let mut policy = DistractionPolicy::new();
        assert!(matches!(
            policy.apply_mode(BlockingMode::Soft, at(0)).unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(policy.dismiss_block(at(0)).is_err());
        assert!(policy.handle_stay_focused(at(0)).is_err());
    }

    #[test]
    fn test_reset_forgets_item() {
        let mut policy = DistractionPolicy::new();
        policy.trigger_block("Slack", ItemType::App, BlockingMode::Soft, None, at(0));
        policy.reset();
        assert!(policy.active_block().is_none());
        assert!(policy
            .trigger_block("Slack", ItemType::App, BlockingMode::Soft, None, at(1))
            .is_some());
    }

    #[tokio::test]
    async fn test_database_settings_source() {
        let db = Database::open_in_memory().unwrap();
        let settings = db.focus_settings().await.unwrap();
        assert_eq!(settings.blocking_mode, BlockingMode::Soft);
    }
}
