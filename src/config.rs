//! Configuration
//!
//! Plain structs with defaults, overridable from `RPS_*` environment
//! variables. Authentication keeps its own `AUTH_*` variables.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::game::session::{SessionRules, TiePolicy, DEFAULT_ROUND_CAP, DEFAULT_WINS_TO_CONCLUDE};
use crate::network::auth::AuthConfig;
use crate::network::server::ServerConfig;

/// Winner earnings multiplier in basis points (1.94x stake).
pub const DEFAULT_WINNER_PAYOUT_BPS: u32 = 19_400;

/// Game rule configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Round wins needed to conclude.
    pub wins_to_conclude: u32,
    /// Nominal round count used by the tie policy.
    pub round_cap: u32,
    /// Tie handling past the cap.
    pub tie_policy: TiePolicy,
    /// Failed reveals allowed per round. `None` = unlimited.
    pub max_reveal_attempts: Option<u32>,
    /// Verify result signatures against participant keys.
    pub verify_authorizations: bool,
    /// Earnings credited to the winner, in basis points of the stake.
    pub winner_payout_bps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wins_to_conclude: DEFAULT_WINS_TO_CONCLUDE,
            round_cap: DEFAULT_ROUND_CAP,
            tie_policy: TiePolicy::SuddenDeath,
            max_reveal_attempts: Some(3),
            verify_authorizations: true,
            winner_payout_bps: DEFAULT_WINNER_PAYOUT_BPS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wins_to_conclude: env_or("RPS_WINS_TO_CONCLUDE", defaults.wins_to_conclude).max(1),
            round_cap: env_or("RPS_ROUND_CAP", defaults.round_cap),
            tie_policy: match std::env::var("RPS_TIE_POLICY").as_deref() {
                Ok("forced_draw") => TiePolicy::ForcedDraw,
                Ok("sudden_death") | Err(_) => TiePolicy::SuddenDeath,
                Ok(other) => {
                    warn!("Unknown RPS_TIE_POLICY {:?}, using sudden_death", other);
                    TiePolicy::SuddenDeath
                }
            },
            // 0 means unlimited
            max_reveal_attempts: match env_or("RPS_MAX_REVEAL_ATTEMPTS", 3u32) {
                0 => None,
                n => Some(n),
            },
            verify_authorizations: env_flag("RPS_VERIFY_AUTHORIZATIONS", defaults.verify_authorizations),
            winner_payout_bps: env_or("RPS_WINNER_PAYOUT_BPS", defaults.winner_payout_bps),
        }
    }

    /// Rules handed to each session operation. At least one round win is
    /// always required.
    pub fn session_rules(&self) -> SessionRules {
        SessionRules {
            wins_to_conclude: self.wins_to_conclude.max(1),
            round_cap: self.round_cap,
            tie_policy: self.tie_policy,
            max_reveal_attempts: self.max_reveal_attempts,
            verify_authorizations: self.verify_authorizations,
        }
    }
}

/// Settlement batcher configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Run the background scheduler at all.
    pub enabled: bool,
    /// Time between runs.
    pub interval: Duration,
    /// Delay before the first run after start.
    pub initial_delay: Duration,
    /// Maximum sessions per transaction.
    pub max_batch_size: usize,
    /// How long to wait for ledger confirmation.
    pub confirmation_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(600),
            initial_delay: Duration::from_secs(5),
            max_batch_size: 20,
            confirmation_timeout: Duration::from_secs(120),
        }
    }
}

impl SettlementConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("RPS_SETTLEMENT_ENABLED", defaults.enabled),
            interval: Duration::from_secs(env_or(
                "RPS_SETTLEMENT_INTERVAL_SECS",
                defaults.interval.as_secs(),
            ).max(1)),
            initial_delay: Duration::from_secs(env_or(
                "RPS_SETTLEMENT_INITIAL_DELAY_SECS",
                defaults.initial_delay.as_secs(),
            )),
            max_batch_size: env_or("RPS_SETTLEMENT_BATCH_SIZE", defaults.max_batch_size).max(1),
            confirmation_timeout: Duration::from_secs(env_or(
                "RPS_SETTLEMENT_CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout.as_secs(),
            )),
        }
    }
}

/// Full process configuration.
#[derive(Clone, Debug, Default)]
pub struct ArenaConfig {
    /// Game rules.
    pub engine: EngineConfig,
    /// Settlement batcher.
    pub settlement: SettlementConfig,
    /// WebSocket server.
    pub server: ServerConfig,
    /// JWT validation.
    pub auth: AuthConfig,
}

impl ArenaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            settlement: SettlementConfig::from_env(),
            server: ServerConfig::from_env(),
            auth: AuthConfig::from_env(),
        }
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring malformed {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Boolean environment variable (`true`/`1` or `false`/`0`).
pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key).as_deref() {
        Ok("true") | Ok("1") => true,
        Ok("false") | Ok("0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.wins_to_conclude, 3);
        assert_eq!(engine.round_cap, 5);
        assert_eq!(engine.tie_policy, TiePolicy::SuddenDeath);
        assert_eq!(engine.winner_payout_bps, 19_400);
        assert_eq!(engine.session_rules(), SessionRules::default());

        let settlement = SettlementConfig::default();
        assert_eq!(settlement.interval, Duration::from_secs(600));
        assert_eq!(settlement.initial_delay, Duration::from_secs(5));
        assert_eq!(settlement.max_batch_size, 20);
    }

    #[test]
    fn test_zero_wins_to_conclude_clamped() {
        std::env::set_var("RPS_WINS_TO_CONCLUDE", "0");
        let from_env = EngineConfig::from_env();
        std::env::remove_var("RPS_WINS_TO_CONCLUDE");
        assert_eq!(from_env.wins_to_conclude, 1);

        let literal = EngineConfig { wins_to_conclude: 0, ..EngineConfig::default() };
        assert_eq!(literal.session_rules().wins_to_conclude, 1);
    }

    #[test]
    fn test_env_or_fallbacks() {
        std::env::set_var("RPS_TEST_ENV_OR_GOOD", "42");
        std::env::set_var("RPS_TEST_ENV_OR_BAD", "forty-two");
        assert_eq!(env_or("RPS_TEST_ENV_OR_GOOD", 7u32), 42);
        assert_eq!(env_or("RPS_TEST_ENV_OR_BAD", 7u32), 7);
        assert_eq!(env_or("RPS_TEST_ENV_OR_MISSING", 7u32), 7);
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("RPS_TEST_FLAG_ON", "1");
        std::env::set_var("RPS_TEST_FLAG_OFF", "false");
        assert!(env_flag("RPS_TEST_FLAG_ON", false));
        assert!(!env_flag("RPS_TEST_FLAG_OFF", true));
        assert!(env_flag("RPS_TEST_FLAG_MISSING", true));
    }
}
