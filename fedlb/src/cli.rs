//! Process configuration & CLI (C11): the positional `clusterNum` argument
//! plus the `-t/-q/-k` flags, and the two new overrides SPEC_FULL.md adds
//! for testable/containerized startup (`--topology`, `--self-addr`).

use std::path::PathBuf;

use clap::Parser;
use fedlb_core::error::StartupError;
use fedlb_core::Tunables;

#[derive(Debug, Parser)]
#[command(name = "fedlb", about = "Cluster-federation reverse proxy load balancer")]
pub struct Cli {
    /// Identifies which cluster this process is ("first-hop"/rendezvous
    /// leader is derived from this together with the own address).
    pub cluster_num: i64,

    /// C4 tick interval in milliseconds; also used as the per-call health
    /// probe deadline.
    #[arg(short = 't', long = "feedback-period-ms", default_value_t = 100)]
    pub feedback_period_ms: u64,

    /// Offload predicate selector (§4.6 step 2). Zero switches the
    /// predicate to "any peer has positive weight".
    #[arg(short = 'q', long = "threshold", default_value_t = 0)]
    pub threshold: i64,

    /// Diffusion coefficient, must lie in [0, 1].
    #[arg(short = 'k', long = "kappa", default_value_t = 0.0)]
    pub kappa: f64,

    /// Telemetry sampling interval in milliseconds.
    #[arg(long = "sampling-period-ms", default_value_t = 100)]
    pub sampling_period_ms: u64,

    /// Path to the federation topology JSON document.
    #[arg(long = "topology", default_value = "topology.json")]
    pub topology: PathBuf,

    /// Override self-address discovery (otherwise derived via `hostname -i`
    /// restricted to the private-address family, matching the original
    /// tool). Useful under test or in containers without that shape.
    #[arg(long = "self-addr")]
    pub self_addr: Option<String>,

    /// Coordination store (barrier KV + pub/sub) connection URL.
    #[arg(long = "coordinator-url", default_value = "redis://127.0.0.1:6379")]
    pub coordinator_url: String,

    #[arg(long = "http-port", default_value_t = 8001)]
    pub http_port: u16,
    #[arg(long = "drain-port", default_value_t = 8002)]
    pub drain_port: u16,
    #[arg(long = "backend-port", default_value_t = 80)]
    pub backend_port: u16,
    #[arg(long = "control-port", default_value_t = 50051)]
    pub control_port: u16,
    #[arg(long = "metrics-port", default_value_t = 9090)]
    pub metrics_port: u16,
}

impl Cli {
    pub fn validate(&self) -> Result<(), StartupError> {
        if !(0.0..=1.0).contains(&self.kappa) {
            return Err(StartupError::InvalidArg {
                name: "kappa",
                reason: format!("{} is outside the required [0, 1] range", self.kappa),
            });
        }
        // Both periods back a `tokio::time::interval`, which panics on a
        // zero duration; the probe deadline also degenerates to "fail
        // instantly" at zero. Reject rather than let the barrier release
        // into a panicking feedback task.
        if self.feedback_period_ms == 0 {
            return Err(StartupError::InvalidArg {
                name: "feedback-period-ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sampling_period_ms == 0 {
            return Err(StartupError::InvalidArg {
                name: "sampling-period-ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn tunables(&self) -> Tunables {
        Tunables {
            feedback_period: std::time::Duration::from_millis(self.feedback_period_ms),
            threshold: self.threshold,
            kappa: self.kappa,
            sampling_period: std::time::Duration::from_millis(self.sampling_period_ms),
            ..Tunables::default()
        }
        .with_ports(
            self.http_port,
            self.drain_port,
            self.backend_port,
            self.control_port,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kappa_out_of_range_is_rejected() {
        let cli = Cli::parse_from(["fedlb", "1", "-k", "1.5"]);
        assert!(matches!(
            cli.validate(),
            Err(StartupError::InvalidArg { name: "kappa", .. })
        ));
    }

    #[test]
    fn kappa_in_range_is_accepted() {
        let cli = Cli::parse_from(["fedlb", "1", "-k", "0.5"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn zero_feedback_period_is_rejected() {
        let cli = Cli::parse_from(["fedlb", "1", "-t", "0"]);
        assert!(matches!(
            cli.validate(),
            Err(StartupError::InvalidArg {
                name: "feedback-period-ms",
                ..
            })
        ));
    }

    #[test]
    fn zero_sampling_period_is_rejected() {
        let cli = Cli::parse_from(["fedlb", "1", "--sampling-period-ms", "0"]);
        assert!(matches!(
            cli.validate(),
            Err(StartupError::InvalidArg {
                name: "sampling-period-ms",
                ..
            })
        ));
    }

    #[test]
    fn defaults_match_fixed_ports() {
        let cli = Cli::parse_from(["fedlb", "3"]);
        let tunables = cli.tunables();
        assert_eq!(tunables.http_port, 8001);
        assert_eq!(tunables.drain_port, 8002);
        assert_eq!(tunables.backend_port, 80);
        assert_eq!(tunables.control_port, 50051);
    }
}
