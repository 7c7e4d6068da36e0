//! Named network throttling profiles for aggressive stealth mode.
//!
//! Coarse, realistic profiles rather than fully random values: latency is
//! sampled from a per-profile range so repeated contexts are varied but
//! plausible.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Named network condition profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkProfile {
    #[default]
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "dsl")]
    Dsl,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "fast_3g")]
    Fast3g,
    #[serde(rename = "slow_3g")]
    Slow3g,
}

/// Concrete throughput/latency caps for one browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConditions {
    pub latency_ms: u64,
    pub download_bps: u64,
    pub upload_bps: u64,
}

impl NetworkProfile {
    /// Sample conditions for this profile.
    pub fn conditions<R: Rng>(&self, rng: &mut R) -> NetworkConditions {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * 1024;
        match self {
            NetworkProfile::Wifi => NetworkConditions {
                latency_ms: rng.gen_range(2..=15),
                download_bps: 30 * MB,
                upload_bps: 10 * MB,
            },
            NetworkProfile::Dsl => NetworkConditions {
                latency_ms: rng.gen_range(25..=80),
                download_bps: 5 * MB,
                upload_bps: MB,
            },
            NetworkProfile::FourG => NetworkConditions {
                latency_ms: rng.gen_range(20..=80),
                download_bps: 10 * MB,
                upload_bps: 3 * MB,
            },
            NetworkProfile::Fast3g => NetworkConditions {
                latency_ms: rng.gen_range(80..=200),
                download_bps: 1600 * KB,
                upload_bps: 750 * KB,
            },
            NetworkProfile::Slow3g => NetworkConditions {
                latency_ms: rng.gen_range(150..=400),
                download_bps: 750 * KB,
                upload_bps: 250 * KB,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_profiles_are_ordered_by_speed() {
        let mut rng = StdRng::seed_from_u64(1);
        let wifi = NetworkProfile::Wifi.conditions(&mut rng);
        let slow = NetworkProfile::Slow3g.conditions(&mut rng);
        assert!(wifi.download_bps > slow.download_bps);
        assert!(wifi.latency_ms < slow.latency_ms);
    }

    #[test]
    fn test_latency_sampled_within_profile_range() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let c = NetworkProfile::Fast3g.conditions(&mut rng);
            assert!((80..=200).contains(&c.latency_ms));
        }
    }

    #[test]
    fn test_serde_names_match_cli_vocabulary() {
        assert_eq!(
            serde_json::to_string(&NetworkProfile::FourG).unwrap(),
            "\"4g\""
        );
        assert_eq!(
            serde_json::to_string(&NetworkProfile::Slow3g).unwrap(),
            "\"slow_3g\""
        );
        let parsed: NetworkProfile = serde_json::from_str("\"wifi\"").unwrap();
        assert_eq!(parsed, NetworkProfile::Wifi);
    }
}
