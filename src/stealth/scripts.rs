//! Browser-side init scripts, injected before any page script runs.
//!
//! Based on the puppeteer-extra-plugin-stealth family of techniques. Each
//! script swallows its own errors so a vendor change in the browser never
//! breaks the page. Profile- and session-specific values are substituted
//! into `__PLACEHOLDER__` slots at bundle-build time.

use super::profiles::DeviceProfile;

/// Remove `navigator.webdriver`, shim `window.chrome`, and drop the
/// leftover automation globals Chromium drivers leave behind.
pub const CORE_AUTOMATION_JS: &str = r#"
(() => {
    try {
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined,
            configurable: true
        });
    } catch (e) {}
    try {
        if (!window.chrome) {
            window.chrome = {
                runtime: {},
                loadTimes: function() {},
                csi: function() {},
                app: {}
            };
        }
    } catch (e) {}
    try {
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
        delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
    } catch (e) {}
})();
"#;

/// The permissions query for notifications must mirror the real
/// Notification permission instead of reporting 'denied'.
pub const PERMISSIONS_PATCH_JS: &str = r#"
(() => {
    try {
        const originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
        window.navigator.permissions.query = (parameters) => (
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    } catch (e) {}
})();
"#;

const NAVIGATOR_PATCH_TEMPLATE: &str = r#"
(() => {
    try {
        Object.defineProperty(navigator, 'languages', {
            get: () => __LANGUAGES__,
            configurable: true
        });
    } catch (e) {}
    try {
        Object.defineProperty(navigator, 'platform', {
            get: () => '__PLATFORM__',
            configurable: true
        });
    } catch (e) {}
    try {
        Object.defineProperty(navigator, 'plugins', {
            get: () => [
                { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
                { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
                { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
            ],
            configurable: true
        });
    } catch (e) {}
    try {
        Object.defineProperty(navigator, 'hardwareConcurrency', {
            get: () => __HARDWARE_CONCURRENCY__,
            configurable: true
        });
        Object.defineProperty(navigator, 'deviceMemory', {
            get: () => __DEVICE_MEMORY__,
            configurable: true
        });
    } catch (e) {}
})();
"#;

/// Navigator surface patch bound to a device profile.
pub fn navigator_patch(profile: &DeviceProfile) -> String {
    let primary = profile.locale.clone();
    let base = primary.split('-').next().unwrap_or("en").to_string();
    let languages = format!("['{primary}', '{base}']");

    NAVIGATOR_PATCH_TEMPLATE
        .replace("__LANGUAGES__", &languages)
        .replace("__PLATFORM__", &profile.platform)
        .replace(
            "__HARDWARE_CONCURRENCY__",
            &profile.hardware_concurrency.to_string(),
        )
        .replace("__DEVICE_MEMORY__", &profile.device_memory.to_string())
}

const CANVAS_PATCH_TEMPLATE: &str = r#"
(() => {
    try {
        const seed = __CANVAS_SEED__ >>> 0;
        // mulberry32: tiny deterministic PRNG so the perturbation is
        // stable within a session but differs across sessions.
        const mulberry32 = (a) => () => {
            a |= 0; a = (a + 0x6D2B79F5) | 0;
            let t = Math.imul(a ^ (a >>> 15), 1 | a);
            t = (t + Math.imul(t ^ (t >>> 7), 61 | t)) ^ t;
            return ((t ^ (t >>> 14)) >>> 0) / 4294967296;
        };
        const perturb = (imageData) => {
            const rand = mulberry32(seed);
            const data = imageData.data;
            for (let i = 0; i < data.length; i += 4096) {
                const delta = rand() < 0.5 ? -1 : 1;
                data[i] = Math.max(0, Math.min(255, data[i] + delta));
            }
            return imageData;
        };

        const origGetImageData = CanvasRenderingContext2D.prototype.getImageData;
        CanvasRenderingContext2D.prototype.getImageData = function(...args) {
            return perturb(origGetImageData.apply(this, args));
        };

        const withNoisyContext = (canvas, fn) => {
            const ctx = canvas.getContext && canvas.getContext('2d');
            if (ctx && canvas.width > 0 && canvas.height > 0) {
                const imageData = origGetImageData.call(ctx, 0, 0, canvas.width, canvas.height);
                ctx.putImageData(perturb(imageData), 0, 0);
            }
            return fn();
        };

        const origToDataURL = HTMLCanvasElement.prototype.toDataURL;
        HTMLCanvasElement.prototype.toDataURL = function(...args) {
            return withNoisyContext(this, () => origToDataURL.apply(this, args));
        };

        const origToBlob = HTMLCanvasElement.prototype.toBlob;
        HTMLCanvasElement.prototype.toBlob = function(...args) {
            return withNoisyContext(this, () => origToBlob.apply(this, args));
        };
    } catch (e) {}
})();
"#;

/// Canvas fingerprint perturbation seeded by the session.
pub fn canvas_patch(session_seed: u64) -> String {
    // The script only needs 32 bits; fold the session seed down.
    let seed32 = (session_seed ^ (session_seed >> 32)) as u32;
    CANVAS_PATCH_TEMPLATE.replace("__CANVAS_SEED__", &seed32.to_string())
}

const WEBGL_PATCH_TEMPLATE: &str = r#"
(() => {
    try {
        const VENDOR = '__WEBGL_VENDOR__';
        const RENDERER = '__WEBGL_RENDERER__';
        // 37445/37446 are the UNMASKED_VENDOR_WEBGL / UNMASKED_RENDERER_WEBGL
        // constants exposed by WEBGL_debug_renderer_info.
        const patch = (proto) => {
            const orig = proto.getParameter;
            proto.getParameter = function(parameter) {
                if (parameter === 37445) return VENDOR;
                if (parameter === 37446) return RENDERER;
                return orig.call(this, parameter);
            };
        };
        patch(WebGLRenderingContext.prototype);
        if (typeof WebGL2RenderingContext !== 'undefined') {
            patch(WebGL2RenderingContext.prototype);
        }
    } catch (e) {}
})();
"#;

/// WebGL vendor/renderer spoof bound to a device profile.
pub fn webgl_patch(profile: &DeviceProfile) -> String {
    WEBGL_PATCH_TEMPLATE
        .replace("__WEBGL_VENDOR__", &profile.webgl_vendor)
        .replace("__WEBGL_RENDERER__", &profile.webgl_renderer)
}

/// Soften the audio fingerprint with noise far below audibility.
pub const AUDIO_PATCH_JS: &str = r#"
(() => {
    try {
        const origGetChannelData = AudioBuffer.prototype.getChannelData;
        AudioBuffer.prototype.getChannelData = function(...args) {
            const data = origGetChannelData.apply(this, args);
            for (let i = 0; i < data.length; i += 100) {
                data[i] = data[i] + (Math.random() * 2e-7 - 1e-7);
            }
            return data;
        };
    } catch (e) {}
})();
"#;

/// Mask the WebRTC surface: local ICE candidate IPs are rewritten and an
/// empty device list is replaced by a plausible default set.
pub const WEBRTC_MASK_JS: &str = r#"
(() => {
    try {
        if (typeof RTCPeerConnection !== 'undefined') {
            const scrub = (candidate) =>
                candidate.replace(/(\d{1,3}\.){3}\d{1,3}/g, '0.0.0.0');
            const OrigRTC = RTCPeerConnection;
            const Patched = function(...args) {
                const pc = new OrigRTC(...args);
                const origAdd = pc.addEventListener.bind(pc);
                pc.addEventListener = (type, listener, ...rest) => {
                    if (type === 'icecandidate' && typeof listener === 'function') {
                        const wrapped = (event) => {
                            if (event && event.candidate && event.candidate.candidate) {
                                try {
                                    Object.defineProperty(event.candidate, 'candidate', {
                                        value: scrub(event.candidate.candidate)
                                    });
                                } catch (e) {}
                            }
                            return listener(event);
                        };
                        return origAdd(type, wrapped, ...rest);
                    }
                    return origAdd(type, listener, ...rest);
                };
                return pc;
            };
            Patched.prototype = OrigRTC.prototype;
            window.RTCPeerConnection = Patched;
        }
    } catch (e) {}
    try {
        if (navigator.mediaDevices && navigator.mediaDevices.enumerateDevices) {
            const origEnumerate = navigator.mediaDevices.enumerateDevices.bind(navigator.mediaDevices);
            navigator.mediaDevices.enumerateDevices = async () => {
                const devices = await origEnumerate();
                if (devices.length > 0) return devices;
                return [
                    { deviceId: 'default', kind: 'audioinput', label: '', groupId: 'default' },
                    { deviceId: 'default', kind: 'audiooutput', label: '', groupId: 'default' },
                    { deviceId: 'default', kind: 'videoinput', label: '', groupId: 'default' }
                ];
            };
        }
    } catch (e) {}
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::profiles;

    #[test]
    fn test_navigator_patch_substitutes_profile_values() {
        let profile = profiles::choose_profile(None);
        let script = navigator_patch(&profile);
        assert!(script.contains(&profile.platform));
        assert!(script.contains(&profile.locale));
        assert!(!script.contains("__PLATFORM__"));
        assert!(!script.contains("__LANGUAGES__"));
    }

    #[test]
    fn test_canvas_patch_is_deterministic_per_seed() {
        assert_eq!(canvas_patch(7), canvas_patch(7));
        assert_ne!(canvas_patch(7), canvas_patch(8));
        assert!(!canvas_patch(7).contains("__CANVAS_SEED__"));
    }

    #[test]
    fn test_webgl_patch_targets_both_contexts() {
        let profile = profiles::choose_profile(None);
        let script = webgl_patch(&profile);
        assert!(script.contains("WebGLRenderingContext.prototype"));
        assert!(script.contains("WebGL2RenderingContext"));
        assert!(script.contains(&profile.webgl_vendor));
        assert!(script.contains(&profile.webgl_renderer));
    }

    #[test]
    fn test_webrtc_mask_rewrites_ips() {
        assert!(WEBRTC_MASK_JS.contains("0.0.0.0"));
        assert!(WEBRTC_MASK_JS.contains("enumerateDevices"));
    }
}
