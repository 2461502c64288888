//! Environment-driven configuration for the engine and the admin server.

use crate::engine::retry::RetryPolicy;
use crate::engine::reward::{RewardConfig, VotingBonusBasis};
use crate::types::{PhaseDurations, RoomSettings};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for match orchestration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub phase_durations: PhaseDurations,
    /// Settings given to rooms created without explicit ones
    pub room_defaults: RoomSettings,
    /// Votes a candidate needs in one round to earn a star
    pub star_threshold: u32,
    pub rewards: RewardConfig,
    pub retry: RetryPolicy,
    pub lease_ttl: Duration,
    /// Restarts of a failing match run before the room is dead-lettered
    pub max_run_attempts: u32,
    /// When set, phase checkpoints go to JSON files here instead of memory
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_durations: PhaseDurations::default(),
            room_defaults: RoomSettings::default(),
            star_threshold: 6,
            rewards: RewardConfig::default(),
            retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(60),
            max_run_attempts: 3,
            checkpoint_dir: None,
        }
    }
}

/// Retried store calls a round makes between two lease renewals: the voting
/// hook's reads and writes plus the next phase's publish and checkpoint
const STORE_CALLS_BETWEEN_RENEWALS: u32 = 9;

impl EngineConfig {
    /// Shortest lease that survives the longest gap between renewals: one
    /// timer tick plus every retried call of a phase boundary
    pub fn min_lease_ttl(&self) -> Duration {
        Duration::from_secs(5) + self.retry.worst_case_backoff() * STORE_CALLS_BETWEEN_RENEWALS
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let d = defaults.phase_durations;
        let r = defaults.rewards;

        let phase_durations = PhaseDurations {
            prompt_secs: env_parse("PHASE_PROMPT_SECS", d.prompt_secs),
            submission_secs: env_parse("PHASE_SUBMISSION_SECS", d.submission_secs),
            waiting_secs: env_parse("PHASE_WAITING_SECS", d.waiting_secs),
            voting_secs: env_parse("PHASE_VOTING_SECS", d.voting_secs),
            results_secs: env_parse("PHASE_RESULTS_SECS", d.results_secs),
        };

        let rewards = RewardConfig {
            participation_xp: env_parse("XP_PARTICIPATION", r.participation_xp),
            round_win_xp: env_parse("XP_ROUND_WIN", r.round_win_xp),
            star_xp: env_parse("XP_STAR", r.star_xp),
            voting_xp: env_parse("XP_VOTING", r.voting_xp),
            game_win_xp: env_parse("XP_GAME_WIN", r.game_win_xp),
            voting_bonus_basis: env_parse::<VotingBonusBasis>("VOTING_BONUS_BASIS", r.voting_bonus_basis),
        };

        let retry = RetryPolicy {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts).max(1),
            initial_delay: env_string("RETRY_INITIAL_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
            max_delay: env_string("RETRY_MAX_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };

        let mut config = Self {
            phase_durations,
            room_defaults: RoomSettings {
                win_threshold: env_parse("WIN_THRESHOLD", defaults.room_defaults.win_threshold),
                min_players: env_parse("MIN_PLAYERS", defaults.room_defaults.min_players),
            },
            star_threshold: env_parse("STAR_THRESHOLD", defaults.star_threshold),
            rewards,
            retry,
            lease_ttl: env_string("LEASE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            max_run_attempts: env_parse("MAX_RUN_ATTEMPTS", defaults.max_run_attempts).max(1),
            checkpoint_dir: env_string("CHECKPOINT_DIR").map(PathBuf::from),
        };

        let min_ttl = config.min_lease_ttl();
        if config.lease_ttl < min_ttl {
            tracing::warn!(
                "LEASE_TTL_SECS of {:?} is shorter than a phase boundary can take; using {:?}",
                config.lease_ttl,
                min_ttl
            );
            config.lease_ttl = min_ttl;
        }
        config
    }
}

/// Settings for the admin HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub prompts_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            prompts_file: PathBuf::from("config/prompts.json"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            prompts_file: env_string("PROMPTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_file),
        }
    }
}

/// Trimmed, non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Parse an environment variable, keeping the default when unset or malformed
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "PHASE_SUBMISSION_SECS",
        "WIN_THRESHOLD",
        "STAR_THRESHOLD",
        "VOTING_BONUS_BASIS",
        "RETRY_INITIAL_DELAY_MS",
        "MAX_RUN_ATTEMPTS",
        "CHECKPOINT_DIR",
        "LEASE_TTL_SECS",
        "RETRY_MAX_ATTEMPTS",
        "PORT",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.phase_durations, PhaseDurations::default());
        assert_eq!(config.room_defaults.win_threshold, 20);
        assert_eq!(config.room_defaults.min_players, 3);
        assert_eq!(config.star_threshold, 6);
        assert_eq!(config.rewards.voting_bonus_basis, VotingBonusBasis::ReceivedVote);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PHASE_SUBMISSION_SECS", "40");
        std::env::set_var("WIN_THRESHOLD", " 30 ");
        std::env::set_var("VOTING_BONUS_BASIS", "cast");
        std::env::set_var("RETRY_INITIAL_DELAY_MS", "50");
        std::env::set_var("CHECKPOINT_DIR", "/tmp/checkpoints");

        let config = EngineConfig::from_env();
        assert_eq!(config.phase_durations.submission_secs, 40);
        assert_eq!(config.phase_durations.voting_secs, 10);
        assert_eq!(config.room_defaults.win_threshold, 30);
        assert_eq!(config.rewards.voting_bonus_basis, VotingBonusBasis::CastVote);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
        assert_eq!(config.checkpoint_dir, Some(PathBuf::from("/tmp/checkpoints")));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("STAR_THRESHOLD", "lots");
        std::env::set_var("MAX_RUN_ATTEMPTS", "0");
        std::env::set_var("PORT", "");

        let config = EngineConfig::from_env();
        assert_eq!(config.star_threshold, 6);
        assert_eq!(config.max_run_attempts, 1);
        assert_eq!(ServerConfig::from_env().port, 7070);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_lease_ttl_covers_phase_boundary() {
        clear_env();
        std::env::set_var("LEASE_TTL_SECS", "2");

        let config = EngineConfig::from_env();
        assert_eq!(config.lease_ttl, config.min_lease_ttl());
        // 5s plus nine calls of 200ms + 400ms backoff
        assert_eq!(config.lease_ttl, Duration::from_millis(10_400));

        std::env::set_var("LEASE_TTL_SECS", "30");
        std::env::set_var("RETRY_MAX_ATTEMPTS", "1");
        let config = EngineConfig::from_env();
        assert_eq!(config.lease_ttl, Duration::from_secs(30));
        clear_env();
    }
}
