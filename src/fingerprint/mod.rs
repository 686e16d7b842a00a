//! Session fingerprint generation.
//!
//! One fingerprint is generated per browser session and supplied unchanged
//! to every injection call for that session. The user agent, viewport and
//! platform are drawn jointly so the OS token inside the UA string always
//! agrees with `navigator.platform` and the `Sec-CH-UA-Platform` header the
//! launcher emits. Re-randomizing any of these per page would produce an
//! inconsistent identity across same-session page loads, which is itself
//! detectable.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Chrome user agents keyed to Windows, paired with their major version.
const WINDOWS_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
];

/// Chrome user agents keyed to macOS.
const MAC_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
];

/// Real-world desktop resolutions.
const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1680, 1050),
    (1600, 900),
    (1536, 864),
    (1440, 900),
    (2560, 1440),
];

const HARDWARE_CONCURRENCY: &[u32] = &[4, 6, 8, 12, 16];
const DEVICE_MEMORY: &[u32] = &[4, 8, 16, 32];

/// Vendor/renderer pairs plausible for Windows machines. Drawn together so
/// the vendor string always names the GPU maker the renderer string does.
const WEBGL_PAIRS_WINDOWS: &[(&str, &str)] = &[
    (
        "Google Inc. (NVIDIA)",
        "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    (
        "Google Inc. (NVIDIA)",
        "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
    (
        "Google Inc. (AMD)",
        "ANGLE (AMD, AMD Radeon RX 6700 XT Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
];

/// Vendor/renderer pairs plausible for Macs.
const WEBGL_PAIRS_MAC: &[(&str, &str)] = &[
    ("Google Inc. (Apple)", "ANGLE (Apple, Apple M1, OpenGL 4.1)"),
    ("Google Inc. (Apple)", "ANGLE (Apple, Apple M2, OpenGL 4.1)"),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel(R) Iris(TM) Plus Graphics 655, OpenGL 4.1)",
    ),
];

/// The value `navigator.platform` reports, tied to the OS in the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Win32,
    MacIntel,
}

impl Platform {
    /// The string `navigator.platform` returns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Win32 => "Win32",
            Platform::MacIntel => "MacIntel",
        }
    }

    /// The `Sec-CH-UA-Platform` header value for this platform.
    pub fn sec_ch_ua_platform(&self) -> &'static str {
        match self {
            Platform::Win32 => "\"Windows\"",
            Platform::MacIntel => "\"macOS\"",
        }
    }
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A fixed geographic position matching the deployment's target locale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// One internally-consistent device identity, generated once per session.
///
/// Locale, timezone and geolocation are fixed to the deployment target
/// rather than randomized: a locale that disagrees with the egress IP's
/// geography is itself a detection signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub max_touch_points: u32,
    pub platform: Platform,
    pub locale: String,
    pub timezone_id: String,
    pub geolocation: Geolocation,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
}

impl SessionFingerprint {
    /// Generate a fresh fingerprint.
    ///
    /// The UA, platform and WebGL pair come from a joint draw so the OS
    /// markers agree everywhere they are introspectable. Hardware counts are
    /// drawn independently; real device variety is high enough that they
    /// carry no OS constraint.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let platform = if rng.gen_bool(0.5) {
            Platform::Win32
        } else {
            Platform::MacIntel
        };

        let (user_agent, (webgl_vendor, webgl_renderer)) = match platform {
            Platform::Win32 => (
                *WINDOWS_USER_AGENTS.choose(&mut rng).unwrap(),
                *WEBGL_PAIRS_WINDOWS.choose(&mut rng).unwrap(),
            ),
            Platform::MacIntel => (
                *MAC_USER_AGENTS.choose(&mut rng).unwrap(),
                *WEBGL_PAIRS_MAC.choose(&mut rng).unwrap(),
            ),
        };

        let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap();

        Self {
            user_agent: user_agent.to_string(),
            viewport: Viewport { width, height },
            hardware_concurrency: *HARDWARE_CONCURRENCY.choose(&mut rng).unwrap(),
            device_memory: *DEVICE_MEMORY.choose(&mut rng).unwrap(),
            max_touch_points: 0,
            platform,
            locale: "en-US".to_string(),
            timezone_id: "America/New_York".to_string(),
            geolocation: Geolocation {
                latitude: 40.7128,
                longitude: -74.0060,
            },
            webgl_vendor: webgl_vendor.to_string(),
            webgl_renderer: webgl_renderer.to_string(),
        }
    }

    /// Chrome major version parsed out of the user agent.
    pub fn major_version(&self) -> u32 {
        self.user_agent
            .split("Chrome/")
            .nth(1)
            .and_then(|rest| rest.split('.').next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(131)
    }

    /// `Accept-Language` header derived from the session locale.
    pub fn accept_language(&self) -> String {
        let base = self.locale.split('-').next().unwrap_or("en");
        format!("{},{};q=0.9", self.locale, base)
    }

    /// `navigator.languages` derived from the session locale.
    pub fn languages(&self) -> Vec<String> {
        let base = self.locale.split('-').next().unwrap_or("en");
        vec![self.locale.clone(), base.to_string()]
    }

    /// `Sec-CH-UA` header derived from the UA major version.
    pub fn sec_ch_ua(&self) -> String {
        let v = self.major_version();
        format!(
            "\"Google Chrome\";v=\"{v}\", \"Chromium\";v=\"{v}\", \"Not_A Brand\";v=\"24\""
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_matches_ua_os_token() {
        // Property check over many draws: the platform must always agree
        // with the OS embedded in the user agent.
        for _ in 0..200 {
            let fp = SessionFingerprint::generate();
            match fp.platform {
                Platform::Win32 => assert!(fp.user_agent.contains("Windows NT")),
                Platform::MacIntel => assert!(fp.user_agent.contains("Macintosh")),
            }
        }
    }

    #[test]
    fn test_pools_cover_only_known_values() {
        for _ in 0..50 {
            let fp = SessionFingerprint::generate();
            assert!(HARDWARE_CONCURRENCY.contains(&fp.hardware_concurrency));
            assert!(DEVICE_MEMORY.contains(&fp.device_memory));
            assert!(VIEWPORTS.contains(&(fp.viewport.width, fp.viewport.height)));
            assert_eq!(fp.max_touch_points, 0);
        }
    }

    #[test]
    fn test_webgl_pair_matches_platform() {
        for _ in 0..50 {
            let fp = SessionFingerprint::generate();
            let pair = (fp.webgl_vendor.as_str(), fp.webgl_renderer.as_str());
            match fp.platform {
                Platform::Win32 => assert!(WEBGL_PAIRS_WINDOWS.contains(&pair)),
                Platform::MacIntel => assert!(WEBGL_PAIRS_MAC.contains(&pair)),
            }
        }
    }

    #[test]
    fn test_derived_headers_come_from_same_fingerprint() {
        let fp = SessionFingerprint::generate();
        let v = fp.major_version();
        assert!(fp.user_agent.contains(&format!("Chrome/{v}.")));
        assert!(fp.sec_ch_ua().contains(&format!("v=\"{v}\"")));
        assert_eq!(fp.accept_language(), "en-US,en;q=0.9");
        assert_eq!(fp.languages(), vec!["en-US", "en"]);
    }

    #[test]
    fn test_major_version_parse() {
        let mut fp = SessionFingerprint::generate();
        fp.user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/132.0.0.0".into();
        assert_eq!(fp.major_version(), 132);
    }
}
