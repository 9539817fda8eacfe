//! Configuration for labdesk
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::HttpBackendConfig;
use crate::cache::CacheConfig;
use crate::pipeline::{LegFailurePolicy, PipelineConfig};
use crate::types::{IdentityMode, LabId, Subject};

/// Upper bound for `TRANSPORT_RETRIES`
pub const MAX_TRANSPORT_RETRIES: u32 = 10;

/// labdesk - reservation composition for the lab booking marketplace
#[derive(Parser, Debug, Clone)]
#[command(name = "labdesk")]
#[command(about = "Resolve, enrich and summarize lab reservations for a user or lab")]
pub struct Args {
    /// Wallet address whose reservations to resolve
    #[arg(long, conflicts_with_all = ["session", "lab"])]
    pub wallet: Option<String>,

    /// Institutional session identifier whose reservations to resolve
    #[arg(long, env = "SESSION_ID", conflicts_with = "lab", hide_env_values = true)]
    pub session: Option<String>,

    /// Lab whose reservations to resolve
    #[arg(long)]
    pub lab: Option<LabId>,

    /// Read a lab through the institutional path instead of the wallet path
    #[arg(long, default_value = "false")]
    pub institutional: bool,

    /// Serve reads from a JSON fixture instead of the HTTP API
    #[arg(long, env = "FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Base URL of the marketplace read API
    #[arg(long, env = "API_URL", default_value = "http://localhost:3000")]
    pub api_url: String,

    /// Bearer token sent with every API request
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Session presented for lab reads on the institutional path
    #[arg(long, env = "SERVICE_SESSION", hide_env_values = true)]
    pub service_session: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Seconds before a cached read is refetched
    #[arg(long, env = "CACHE_STALE_SECS", default_value = "900")]
    pub cache_stale_secs: u64,

    /// Seconds without access before a cached read is dropped
    #[arg(long, env = "CACHE_IDLE_SECS", default_value = "3600")]
    pub cache_idle_secs: u64,

    /// Maximum cached reads per operation
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "10000")]
    pub cache_max_entries: usize,

    /// Retries for transient transport failures
    #[arg(long, env = "TRANSPORT_RETRIES", default_value = "1")]
    pub transport_retries: u32,

    /// Hard cap on key lookups per resolution
    #[arg(long, env = "FANOUT_CEILING", default_value = "100")]
    pub fanout_ceiling: u64,

    /// Default cap on key lookups below the ceiling
    #[arg(long, env = "FANOUT_LIMIT")]
    pub fanout_limit: Option<u64>,

    /// Lookups in flight at once per fan-out stage
    #[arg(long, env = "FANOUT_CONCURRENCY", default_value = "16")]
    pub fanout_concurrency: usize,

    /// Start-time tolerance for matching optimistic bookings, in seconds
    #[arg(long, env = "OPTIMISTIC_TOLERANCE_SECS", default_value = "60")]
    pub optimistic_tolerance_secs: u64,

    /// Lifetime of an unconfirmed optimistic booking, in seconds
    #[arg(long, env = "OPTIMISTIC_TTL_SECS", default_value = "600")]
    pub optimistic_ttl_secs: u64,

    /// Entries in the recent activity list
    #[arg(long, env = "RECENT_LIMIT", default_value = "5")]
    pub recent_limit: usize,

    /// Trailing window of the recent activity list, in days
    #[arg(long, env = "RECENT_WINDOW_DAYS", default_value = "30")]
    pub recent_window_days: u64,

    /// Skip lab enrichment
    #[arg(long, env = "SKIP_ENRICHMENT", default_value = "false")]
    pub skip_enrichment: bool,

    /// Fail a resolution when more than this share of fan-out legs failed
    #[arg(long, env = "MAX_FAILED_LEG_RATIO")]
    pub max_failed_leg_ratio: Option<f64>,

    /// Append one JSONL usage event per resolution to this file
    #[arg(long, env = "USAGE_LOG_PATH")]
    pub usage_log_path: Option<PathBuf>,
}

impl Args {
    /// Subject selected on the command line
    pub fn subject(&self) -> Result<Subject, String> {
        match (&self.wallet, &self.session, self.lab) {
            (Some(wallet), None, None) => Ok(Subject::wallet(wallet)),
            (None, Some(session), None) => Ok(Subject::institution(session.clone())),
            (None, None, Some(lab_id)) => {
                let mode = if self.institutional {
                    IdentityMode::Institutional
                } else {
                    IdentityMode::Wallet
                };
                Ok(Subject::lab(lab_id, mode))
            }
            (None, None, None) => Err("one of --wallet, --session or --lab is required".to_string()),
            _ => Err("--wallet, --session and --lab are mutually exclusive".to_string()),
        }
    }

    pub fn http_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.api_url.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            api_token: self.api_token.clone(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            stale_time: Duration::from_secs(self.cache_stale_secs),
            idle_timeout: Duration::from_secs(self.cache_idle_secs),
            max_entries: self.cache_max_entries,
            transport_retries: self.transport_retries,
            ..Default::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            fanout_ceiling: self.fanout_ceiling,
            fanout_limit: self.fanout_limit,
            fanout_concurrency: self.fanout_concurrency,
            optimistic_tolerance: Duration::from_secs(self.optimistic_tolerance_secs),
            optimistic_ttl: Duration::from_secs(self.optimistic_ttl_secs),
            recent_limit: self.recent_limit,
            recent_window: Duration::from_secs(self.recent_window_days * 24 * 60 * 60),
            skip_enrichment: self.skip_enrichment,
            failure_policy: match self.max_failed_leg_ratio {
                Some(max_ratio) => LegFailurePolicy::EscalateAbove { max_ratio },
                None => LegFailurePolicy::Tolerate,
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let subject = self.subject()?;
        if !subject.is_resolvable() {
            return Err(format!("{} is not a valid subject identifier", subject));
        }

        if self.institutional && self.lab.is_none() {
            return Err("--institutional only applies to --lab".to_string());
        }

        if self.fixture.is_none() && !self.api_url.starts_with("http") {
            return Err("API_URL must be an http(s) URL".to_string());
        }

        if self.fanout_ceiling == 0 {
            return Err("FANOUT_CEILING must be at least 1".to_string());
        }

        if self.fanout_concurrency == 0 {
            return Err("FANOUT_CONCURRENCY must be at least 1".to_string());
        }

        if self.transport_retries > MAX_TRANSPORT_RETRIES {
            return Err(format!(
                "TRANSPORT_RETRIES must be at most {}",
                MAX_TRANSPORT_RETRIES
            ));
        }

        if self.cache_idle_secs < self.cache_stale_secs {
            return Err("CACHE_IDLE_SECS must not be shorter than CACHE_STALE_SECS".to_string());
        }

        if let Some(ratio) = self.max_failed_leg_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err("MAX_FAILED_LEG_RATIO must be between 0 and 1".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x00000000000000000000000000000000000000AA";

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["labdesk"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_library_defaults() {
        let args = parse(&["--wallet", WALLET]);
        let cache = args.cache_config();
        let defaults = CacheConfig::default();
        assert_eq!(cache.stale_time, defaults.stale_time);
        assert_eq!(cache.idle_timeout, defaults.idle_timeout);

        let pipeline = args.pipeline_config();
        assert_eq!(pipeline.fanout_ceiling, 100);
        assert_eq!(pipeline.recent_limit, 5);
        assert_eq!(pipeline.failure_policy, LegFailurePolicy::Tolerate);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_wallet_subject_normalized() {
        let args = parse(&["--wallet", WALLET]);
        assert_eq!(args.subject().unwrap(), Subject::wallet(WALLET.to_lowercase()));
    }

    #[test]
    fn test_lab_subject_mode() {
        let args = parse(&["--lab", "12", "--institutional"]);
        assert_eq!(
            args.subject().unwrap(),
            Subject::lab(12, IdentityMode::Institutional)
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(parse(&["--wallet", "0x12"]).validate().is_err());
        assert!(parse(&["--wallet", WALLET, "--institutional"]).validate().is_err());
        assert!(parse(&["--wallet", WALLET, "--max-failed-leg-ratio", "1.5"])
            .validate()
            .is_err());
        assert!(parse(&["--wallet", WALLET, "--fanout-ceiling", "0"])
            .validate()
            .is_err());
        assert!(parse(&["--wallet", WALLET, "--transport-retries", "64"])
            .validate()
            .is_err());
        assert!(parse(&["--wallet", WALLET, "--transport-retries", "10"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_conflicting_subjects_rejected_by_parser() {
        assert!(Args::try_parse_from(["labdesk", "--wallet", WALLET, "--lab", "1"]).is_err());
    }

    #[test]
    fn test_escalation_policy_from_ratio() {
        let args = parse(&["--lab", "1", "--max-failed-leg-ratio", "0.5"]);
        assert_eq!(
            args.pipeline_config().failure_policy,
            LegFailurePolicy::EscalateAbove { max_ratio: 0.5 }
        );
    }
}
