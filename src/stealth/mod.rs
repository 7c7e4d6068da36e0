//! Stealth layer: fingerprint masking, device-profile consistency, and
//! session persistence for browser contexts.
//!
//! Everything here is expressed as data handed to the browser engine:
//! init scripts that must run before any page script, context options
//! derived from a device profile, behavior plans, and network throttling
//! profiles. The engine decides how to deliver them; the contract is only
//! "scripts execute before any site code".

pub mod behavior;
pub mod network;
pub mod profiles;
pub mod scripts;
pub mod session;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use behavior::{BehaviorPlan, BehaviorProfile};
pub use network::NetworkProfile;
pub use profiles::{DeviceProfile, Region};
pub use session::{SessionState, SessionStore, StorageState};

/// Stealth intensity. Higher modes enable more invasive patches.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StealthMode {
    Minimal,
    #[default]
    Moderate,
    Aggressive,
}

impl StealthMode {
    pub fn at_least(&self, other: StealthMode) -> bool {
        *self >= other
    }
}

/// Configuration for stealth and anti-detection features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealthConfig {
    /// Master switch. When off, contexts are created with engine defaults.
    pub enabled: bool,
    pub mode: StealthMode,
    /// Hide `navigator.webdriver` and related automation flags.
    pub spoof_webdriver: bool,
    /// Normalize the navigator surface (languages, plugins, hardware hints).
    pub spoof_navigator: bool,
    /// Add humanized delays, mouse movement, and scrolling per page.
    pub simulate_human_behavior: bool,
    /// Abort image/font/media (and optionally stylesheet) requests.
    pub block_resources: bool,
    pub block_stylesheets: bool,
    /// Canvas, WebGL, and audio fingerprint patches.
    pub fingerprint_evasions: bool,
    /// Rewrite ICE candidate IPs and fill in a plausible device list.
    pub mask_webrtc: bool,
    /// Set a plausible geolocation consistent with the profile timezone.
    pub random_geolocation: bool,
    /// Apply small viewport offsets so contexts are not pixel-identical.
    pub viewport_jitter: bool,
    pub behavior_profile: BehaviorProfile,
    /// Network throttling applied in aggressive mode.
    pub network_profile: NetworkProfile,
    /// Preferred region for profile selection (set from proxy region).
    pub target_region: Option<Region>,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: StealthMode::Moderate,
            spoof_webdriver: true,
            spoof_navigator: true,
            simulate_human_behavior: true,
            block_resources: true,
            block_stylesheets: false,
            fingerprint_evasions: true,
            mask_webrtc: true,
            random_geolocation: false,
            viewport_jitter: true,
            behavior_profile: BehaviorProfile::Default,
            network_profile: NetworkProfile::Wifi,
            target_region: None,
        }
    }
}

impl StealthConfig {
    /// Whether fingerprint patches apply under the current mode.
    pub fn fingerprints_active(&self) -> bool {
        self.enabled && self.fingerprint_evasions && self.mode.at_least(StealthMode::Moderate)
    }

    /// Whether behavior emulation applies under the current mode.
    pub fn behavior_active(&self) -> bool {
        self.enabled && self.simulate_human_behavior && self.mode.at_least(StealthMode::Moderate)
    }

    /// Whether network throttling applies under the current mode.
    pub fn network_emulation_active(&self) -> bool {
        self.enabled && self.mode.at_least(StealthMode::Aggressive)
    }
}

/// Assemble the init-script bundle for one browsing context.
///
/// Scripts are ordered so automation-flag removal runs first. The canvas
/// patch is seeded per session: stable within a session, different across
/// sessions.
pub fn build_init_scripts(
    config: &StealthConfig,
    profile: &DeviceProfile,
    session_seed: u64,
) -> Vec<String> {
    let mut bundle = Vec::new();
    if !config.enabled {
        return bundle;
    }

    if config.spoof_webdriver {
        bundle.push(scripts::CORE_AUTOMATION_JS.to_string());
    }

    if config.spoof_navigator {
        bundle.push(scripts::navigator_patch(profile));
    }

    // The permissions patch is cheap and safe; it ships in every mode.
    bundle.push(scripts::PERMISSIONS_PATCH_JS.to_string());

    if config.fingerprints_active() {
        bundle.push(scripts::canvas_patch(session_seed));
        bundle.push(scripts::webgl_patch(profile));
        bundle.push(scripts::AUDIO_PATCH_JS.to_string());
    }

    if config.enabled && config.mask_webrtc && config.mode.at_least(StealthMode::Moderate) {
        bundle.push(scripts::WEBRTC_MASK_JS.to_string());
    }

    bundle
}
