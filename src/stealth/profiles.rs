//! Device profiles: coherent fingerprints applied to browser contexts.
//!
//! The goal is not perfect impersonation but internal consistency: a
//! macOS user agent must come with a macOS-plausible platform and a
//! renderer string no real Mac would ever report as SwiftShader.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::StealthConfig;

/// Coarse geographic region used to align profiles with proxy exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "APAC")]
    Apac,
}

/// A coherent fingerprint for one browsing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone_id: String,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub region: Option<Region>,
}

struct ProfileSeed {
    name: &'static str,
    user_agent: &'static str,
    viewport: (u32, u32),
    locale: &'static str,
    timezone_id: &'static str,
    webgl_vendor: &'static str,
    webgl_renderer: &'static str,
    platform: &'static str,
    hardware_concurrency: u32,
    device_memory: u32,
    region: Region,
}

const PROFILE_SEEDS: &[ProfileSeed] = &[
    ProfileSeed {
        name: "desktop_chrome_win11_us",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewport: (1920, 1080),
        locale: "en-US",
        timezone_id: "America/New_York",
        webgl_vendor: "Google Inc. (NVIDIA)",
        webgl_renderer: "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 SUPER Direct3D11 vs_5_0 ps_5_0, D3D11)",
        platform: "Win32",
        hardware_concurrency: 12,
        device_memory: 16,
        region: Region::Us,
    },
    ProfileSeed {
        name: "desktop_chrome_mac_us",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewport: (1440, 900),
        locale: "en-US",
        timezone_id: "America/Los_Angeles",
        webgl_vendor: "Google Inc. (Apple)",
        webgl_renderer: "ANGLE (Apple, Apple M2, OpenGL 4.1)",
        platform: "MacIntel",
        hardware_concurrency: 8,
        device_memory: 8,
        region: Region::Us,
    },
    ProfileSeed {
        name: "desktop_safari_mac_us",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        viewport: (1680, 1050),
        locale: "en-US",
        timezone_id: "America/Chicago",
        webgl_vendor: "Apple Inc.",
        webgl_renderer: "Apple GPU",
        platform: "MacIntel",
        hardware_concurrency: 10,
        device_memory: 16,
        region: Region::Us,
    },
    ProfileSeed {
        name: "desktop_firefox_win10_eu",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        viewport: (1366, 768),
        locale: "en-GB",
        timezone_id: "Europe/Berlin",
        webgl_vendor: "Google Inc. (Intel)",
        webgl_renderer: "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
        platform: "Win32",
        hardware_concurrency: 8,
        device_memory: 8,
        region: Region::Eu,
    },
    ProfileSeed {
        name: "desktop_chrome_linux_eu",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewport: (1920, 1080),
        locale: "en-GB",
        timezone_id: "Europe/Amsterdam",
        webgl_vendor: "Google Inc. (Intel)",
        webgl_renderer: "ANGLE (Intel, Mesa Intel(R) UHD Graphics 620 (KBL GT2), OpenGL 4.6)",
        platform: "Linux x86_64",
        hardware_concurrency: 8,
        device_memory: 16,
        region: Region::Eu,
    },
    ProfileSeed {
        name: "desktop_edge_win11_apac",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        viewport: (1536, 864),
        locale: "en-SG",
        timezone_id: "Asia/Singapore",
        webgl_vendor: "Google Inc. (AMD)",
        webgl_renderer: "ANGLE (AMD, AMD Radeon RX 6600 Direct3D11 vs_5_0 ps_5_0, D3D11)",
        platform: "Win32",
        hardware_concurrency: 12,
        device_memory: 16,
        region: Region::Apac,
    },
];

impl From<&ProfileSeed> for DeviceProfile {
    fn from(seed: &ProfileSeed) -> Self {
        DeviceProfile {
            name: seed.name.to_string(),
            user_agent: seed.user_agent.to_string(),
            viewport_width: seed.viewport.0,
            viewport_height: seed.viewport.1,
            locale: seed.locale.to_string(),
            timezone_id: seed.timezone_id.to_string(),
            webgl_vendor: seed.webgl_vendor.to_string(),
            webgl_renderer: seed.webgl_renderer.to_string(),
            platform: seed.platform.to_string(),
            hardware_concurrency: seed.hardware_concurrency,
            device_memory: seed.device_memory,
            region: Some(seed.region),
        }
    }
}

/// Operating system family implied by a user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaOs {
    Windows,
    MacOs,
    Linux,
}

pub fn os_of_user_agent(user_agent: &str) -> UaOs {
    if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        UaOs::MacOs
    } else if user_agent.contains("Windows") {
        UaOs::Windows
    } else {
        UaOs::Linux
    }
}

/// Pick a device profile, preferring the requested region when one is
/// known. Falls back to the full pool if no profile matches the region.
pub fn choose_profile(region: Option<Region>) -> DeviceProfile {
    let mut rng = rand::thread_rng();
    let pool: Vec<&ProfileSeed> = match region {
        Some(r) => {
            let matching: Vec<&ProfileSeed> =
                PROFILE_SEEDS.iter().filter(|s| s.region == r).collect();
            if matching.is_empty() {
                PROFILE_SEEDS.iter().collect()
            } else {
                matching
            }
        }
        None => PROFILE_SEEDS.iter().collect(),
    };
    let seed = pool
        .choose(&mut rng)
        .copied()
        .unwrap_or(&PROFILE_SEEDS[0]);
    DeviceProfile::from(seed)
}

/// Apply a small viewport offset so contexts are not pixel-identical.
/// The profile itself is unchanged; jitter applies per context.
pub fn jittered_viewport(profile: &DeviceProfile, config: &StealthConfig) -> (u32, u32) {
    if !(config.enabled && config.viewport_jitter && config.mode.at_least(super::StealthMode::Moderate))
    {
        return (profile.viewport_width, profile.viewport_height);
    }
    let mut rng = rand::thread_rng();
    let dw: i32 = rng.gen_range(-40..=40);
    let dh: i32 = rng.gen_range(-40..=40);
    let width = (profile.viewport_width as i32 + dw).max(800) as u32;
    let height = (profile.viewport_height as i32 + dh).max(600) as u32;
    (width, height)
}
