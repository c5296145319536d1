//! Authoritative in-memory channel state.
//!
//! One reader-writer lock guards everything the reconciler, webhooks and
//! admin API share: per-ingress health histories, the active source map,
//! manual loop overrides and takeover cooldowns. Ticks snapshot what they
//! need under the read lock, decide lock-free, then take the write lock
//! for the single mutation they make.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use onair_common::models::Source;

/// Key for one ingress health history: `{slug}_loop` or `{slug}_primary`.
pub fn health_key(slug: &str, ingress: &str) -> String {
    format!("{slug}_{ingress}")
}

pub struct Controller {
    stability_window: usize,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    health_history: HashMap<String, VecDeque<bool>>,
    active_source: HashMap<String, Source>,
    manual_loop_override: HashSet<String>,
    takeover_cooldown: HashMap<String, Instant>,
    /// Channels already warned about a stale PRIMARY logical source, so
    /// the watchdog fires once per episode.
    watchdog_warned: HashSet<String>,
}

impl Controller {
    pub fn new(stability_window: usize) -> Self {
        Self {
            stability_window: stability_window.max(1),
            state: RwLock::new(State::default()),
        }
    }

    // ── Health history ──────────────────────────────────────────────

    pub fn push_health(&self, key: &str, healthy: bool) {
        let mut state = self.state.write().expect("controller lock poisoned");
        let history = state.health_history.entry(key.to_string()).or_default();
        history.push_back(healthy);
        while history.len() > self.stability_window {
            history.pop_front();
        }
    }

    /// An ingress is stable in `expected` iff its history is full and
    /// every sample agrees.
    pub fn is_stable(&self, key: &str, expected: bool) -> bool {
        let state = self.state.read().expect("controller lock poisoned");
        match state.health_history.get(key) {
            Some(history) if history.len() >= self.stability_window => {
                history.iter().all(|&h| h == expected)
            }
            _ => false,
        }
    }

    pub fn history_len(&self, key: &str) -> usize {
        let state = self.state.read().expect("controller lock poisoned");
        state.health_history.get(key).map_or(0, |h| h.len())
    }

    // ── Active source map ───────────────────────────────────────────

    pub fn active_source(&self, slug: &str) -> Source {
        let state = self.state.read().expect("controller lock poisoned");
        state
            .active_source
            .get(slug)
            .copied()
            .unwrap_or(Source::Loop)
    }

    pub fn set_active_source(&self, slug: &str, source: Source) {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.active_source.insert(slug.to_string(), source);
    }

    pub fn all_active_sources(&self) -> HashMap<String, Source> {
        let state = self.state.read().expect("controller lock poisoned");
        state.active_source.clone()
    }

    // ── Manual loop override ────────────────────────────────────────

    pub fn set_manual_override(&self, slug: &str) {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.manual_loop_override.insert(slug.to_string());
    }

    pub fn clear_manual_override(&self, slug: &str) -> bool {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.manual_loop_override.remove(slug)
    }

    pub fn has_manual_override(&self, slug: &str) -> bool {
        let state = self.state.read().expect("controller lock poisoned");
        state.manual_loop_override.contains(slug)
    }

    // ── Takeover cooldown ───────────────────────────────────────────

    pub fn install_cooldown(&self, slug: &str) {
        let mut state = self.state.write().expect("controller lock poisoned");
        state
            .takeover_cooldown
            .insert(slug.to_string(), Instant::now());
    }

    pub fn clear_cooldown(&self, slug: &str) {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.takeover_cooldown.remove(slug);
    }

    /// Whether the loop child must stay stopped. Expired entries are
    /// removed as a side effect.
    pub fn in_cooldown(&self, slug: &str, timeout: Duration) -> bool {
        {
            let state = self.state.read().expect("controller lock poisoned");
            match state.takeover_cooldown.get(slug) {
                None => return false,
                Some(at) if at.elapsed() < timeout => return true,
                Some(_) => {}
            }
        }
        self.clear_cooldown(slug);
        false
    }

    // ── Primary watchdog ────────────────────────────────────────────

    /// Returns true exactly once per stale-PRIMARY episode.
    pub fn watchdog_should_warn(&self, slug: &str) -> bool {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.watchdog_warned.insert(slug.to_string())
    }

    pub fn watchdog_reset(&self, slug: &str) {
        let mut state = self.state.write().expect("controller lock poisoned");
        state.watchdog_warned.remove(slug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Health History ─────────────────────────────────────────────

    #[test]
    fn history_is_bounded_by_stability_window() {
        let ctrl = Controller::new(3);
        let key = health_key("alpha", "loop");
        for _ in 0..10 {
            ctrl.push_health(&key, true);
        }
        assert_eq!(ctrl.history_len(&key), 3);
    }

    #[test]
    fn stability_requires_full_agreeing_history() {
        let ctrl = Controller::new(3);
        let key = health_key("alpha", "primary");

        ctrl.push_health(&key, true);
        ctrl.push_health(&key, true);
        assert!(!ctrl.is_stable(&key, true), "history not full yet");

        ctrl.push_health(&key, true);
        assert!(ctrl.is_stable(&key, true));
        assert!(!ctrl.is_stable(&key, false));

        ctrl.push_health(&key, false);
        assert!(!ctrl.is_stable(&key, true), "one dissenting sample");
    }

    #[test]
    fn window_of_one_reduces_to_single_sample() {
        let ctrl = Controller::new(1);
        let key = health_key("alpha", "loop");
        ctrl.push_health(&key, false);
        assert!(ctrl.is_stable(&key, false));
        ctrl.push_health(&key, true);
        assert!(ctrl.is_stable(&key, true));
    }

    // ─── Active Source ──────────────────────────────────────────────

    #[test]
    fn unknown_channel_defaults_to_loop() {
        let ctrl = Controller::new(3);
        assert_eq!(ctrl.active_source("ghost"), Source::Loop);
    }

    #[test]
    fn active_source_round_trip() {
        let ctrl = Controller::new(3);
        ctrl.set_active_source("alpha", Source::Primary);
        assert_eq!(ctrl.active_source("alpha"), Source::Primary);
        assert_eq!(ctrl.all_active_sources().len(), 1);
    }

    // ─── Manual Override ────────────────────────────────────────────

    #[test]
    fn manual_override_set_and_clear() {
        let ctrl = Controller::new(3);
        assert!(!ctrl.has_manual_override("alpha"));
        ctrl.set_manual_override("alpha");
        assert!(ctrl.has_manual_override("alpha"));
        assert!(ctrl.clear_manual_override("alpha"));
        assert!(!ctrl.has_manual_override("alpha"));
        assert!(!ctrl.clear_manual_override("alpha"), "already cleared");
    }

    // ─── Cooldown ───────────────────────────────────────────────────

    #[test]
    fn cooldown_holds_then_expires() {
        let ctrl = Controller::new(3);
        ctrl.install_cooldown("alpha");
        assert!(ctrl.in_cooldown("alpha", Duration::from_secs(60)));
        // A zero timeout is immediately expired and the entry is purged.
        assert!(!ctrl.in_cooldown("alpha", Duration::ZERO));
        assert!(!ctrl.in_cooldown("alpha", Duration::from_secs(60)));
    }

    #[test]
    fn clearing_cooldown_releases_immediately() {
        let ctrl = Controller::new(3);
        ctrl.install_cooldown("alpha");
        ctrl.clear_cooldown("alpha");
        assert!(!ctrl.in_cooldown("alpha", Duration::from_secs(60)));
    }

    // ─── Watchdog ───────────────────────────────────────────────────

    #[test]
    fn watchdog_warns_once_per_episode() {
        let ctrl = Controller::new(3);
        assert!(ctrl.watchdog_should_warn("alpha"));
        assert!(!ctrl.watchdog_should_warn("alpha"));
        ctrl.watchdog_reset("alpha");
        assert!(ctrl.watchdog_should_warn("alpha"));
    }
}
