//! Evasion script assembly.
//!
//! Each evasion is one named snippet in an ordered table; the payload is the
//! table joined inside a single IIFE. The first entry installs the
//! `Function.prototype.toString` spoof and the `markNative`/`defineGetter`
//! helpers every later entry uses, so order matters. Every snippet guards
//! its own API probes, so a missing API is skipped rather than fatal, and every
//! property it installs is `configurable`, so the payload can run again
//! after a navigation recreates the document without throwing.

use crate::fingerprint::SessionFingerprint;

/// One named evasion in the ordered patch table.
pub struct Evasion {
    pub name: &'static str,
    build: fn(&SessionFingerprint) -> String,
}

impl Evasion {
    /// Render this evasion's snippet for the given fingerprint.
    pub fn render(&self, fingerprint: &SessionFingerprint) -> String {
        (self.build)(fingerprint)
    }
}

/// The ordered evasion table. `function-tostring` must stay first: it
/// defines the side-table that makes every later patch report native code.
pub const EVASIONS: &[Evasion] = &[
    Evasion { name: "function-tostring", build: tostring_prelude },
    Evasion { name: "webdriver", build: webdriver },
    Evasion { name: "navigator-props", build: navigator_props },
    Evasion { name: "plugins", build: plugins },
    Evasion { name: "chrome-runtime", build: chrome_runtime },
    Evasion { name: "automation-markers", build: automation_markers },
    Evasion { name: "permissions", build: permissions },
    Evasion { name: "iframe-contentwindow", build: iframe_content_window },
    Evasion { name: "webgl", build: webgl },
    Evasion { name: "network-battery", build: network_battery },
];

/// Build the complete init script for one session fingerprint.
///
/// The same fingerprint must be passed for every page of a session;
/// the launcher guarantees this by rendering the script once at launch.
pub fn build_init_script(fingerprint: &SessionFingerprint) -> String {
    let body: Vec<String> = EVASIONS.iter().map(|e| e.render(fingerprint)).collect();
    format!("(() => {{\n'use strict';\n{}\n}})();", body.join("\n"))
}

/// toString spoof + shared helpers. Functions registered through
/// `markNative` report `function name() { [native code] }` from a
/// side-table lookup; the override itself is registered too, so calling
/// `Function.prototype.toString.toString()` reveals nothing.
fn tostring_prelude(_fp: &SessionFingerprint) -> String {
    r#"
const nativeToString = Function.prototype.toString;
const fakeSources = new Map();
const markNative = (fn, name) => {
    fakeSources.set(fn, 'function ' + (name || fn.name || '') + '() { [native code] }');
    return fn;
};
const patchedToString = function toString() {
    if (fakeSources.has(this)) return fakeSources.get(this);
    return nativeToString.call(this);
};
markNative(patchedToString, 'toString');
try {
    Object.defineProperty(Function.prototype, 'toString', {
        value: patchedToString,
        writable: true,
        configurable: true
    });
} catch (e) {}
const defineGetter = (obj, prop, value) => {
    try {
        Object.defineProperty(obj, prop, {
            get: markNative(() => value, prop),
            configurable: true
        });
    } catch (e) {}
};
"#
    .to_string()
}

/// Remove the automation flag from the prototype chain and make instance
/// reads come back undefined. Detectors probe both.
fn webdriver(_fp: &SessionFingerprint) -> String {
    r#"
try {
    if (typeof Navigator !== 'undefined') {
        delete Navigator.prototype.webdriver;
    }
} catch (e) {}
try {
    if ('webdriver' in navigator) {
        defineGetter(Navigator.prototype, 'webdriver', undefined);
    }
} catch (e) {}
"#
    .to_string()
}

/// Hardware and language properties driven by the fingerprint, installed as
/// getters so repeated reads stay consistent and `typeof` checks pass.
fn navigator_props(fp: &SessionFingerprint) -> String {
    let languages = serde_json::to_string(&fp.languages()).unwrap_or_else(|_| "[\"en-US\"]".into());
    format!(
        r#"
try {{
    const proto = Object.getPrototypeOf(navigator);
    defineGetter(proto, 'hardwareConcurrency', {hw});
    defineGetter(proto, 'deviceMemory', {mem});
    defineGetter(proto, 'maxTouchPoints', {touch});
    defineGetter(proto, 'platform', '{platform}');
    defineGetter(proto, 'languages', Object.freeze({languages}));
    defineGetter(proto, 'language', {languages}[0]);
}} catch (e) {{}}
"#,
        hw = fp.hardware_concurrency,
        mem = fp.device_memory,
        touch = fp.max_touch_points,
        platform = fp.platform.as_str(),
        languages = languages,
    )
}

/// Synthesize the desktop PDF plugin set. An empty plugin list is one of
/// the strongest headless signals.
fn plugins(_fp: &SessionFingerprint) -> String {
    r#"
try {
    const pluginData = [
        { name: 'PDF Viewer', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'Chrome PDF Viewer', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'Chromium PDF Viewer', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'Microsoft Edge PDF Viewer', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'WebKit built-in PDF', filename: 'internal-pdf-viewer', description: 'Portable Document Format' }
    ];
    const mimeData = [
        { type: 'application/pdf', suffixes: 'pdf', description: 'Portable Document Format' },
        { type: 'text/pdf', suffixes: 'pdf', description: 'Portable Document Format' }
    ];

    const makeCollection = (items, nameKey) => {
        const collection = {};
        items.forEach((item, i) => {
            collection[i] = item;
            collection[item[nameKey]] = item;
        });
        Object.defineProperty(collection, 'length', { value: items.length });
        collection.item = markNative(i => collection[i] || null, 'item');
        collection.namedItem = markNative(n => collection[n] || null, 'namedItem');
        collection[Symbol.iterator] = function* () {
            for (let i = 0; i < items.length; i++) yield collection[i];
        };
        return collection;
    };

    const mimeTypes = makeCollection(mimeData, 'type');
    const pluginItems = pluginData.map(p => {
        const plugin = { ...p, length: mimeData.length };
        mimeData.forEach((m, i) => { plugin[i] = m; plugin[m.type] = m; });
        plugin.item = markNative(i => plugin[i] || null, 'item');
        plugin.namedItem = markNative(n => plugin[n] || null, 'namedItem');
        return plugin;
    });
    const pluginArray = makeCollection(pluginItems, 'name');
    pluginArray.refresh = markNative(() => {}, 'refresh');

    defineGetter(Object.getPrototypeOf(navigator), 'plugins', pluginArray);
    defineGetter(Object.getPrototypeOf(navigator), 'mimeTypes', mimeTypes);
} catch (e) {}
"#
    .to_string()
}

/// Populate `window.chrome` the way a real desktop Chrome does. Timings are
/// randomized per page load but bounded to plausible ranges.
fn chrome_runtime(_fp: &SessionFingerprint) -> String {
    r#"
try {
    if (!window.chrome) window.chrome = {};
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: markNative(() => ({
                onMessage: { addListener: () => {}, removeListener: () => {} },
                onDisconnect: { addListener: () => {} },
                postMessage: () => {},
                disconnect: () => {}
            }), 'connect'),
            sendMessage: markNative(() => {}, 'sendMessage'),
            id: undefined
        };
    }
    if (!window.chrome.loadTimes) {
        window.chrome.loadTimes = markNative(() => ({
            commitLoadTime: Date.now() / 1000 - Math.random() * 2,
            connectionInfo: 'h2',
            finishDocumentLoadTime: Date.now() / 1000 - Math.random(),
            finishLoadTime: Date.now() / 1000 - Math.random() * 0.5,
            firstPaintAfterLoadTime: 0,
            firstPaintTime: Date.now() / 1000 - Math.random() * 1.5,
            navigationType: 'Other',
            npnNegotiatedProtocol: 'h2',
            requestTime: Date.now() / 1000 - Math.random() * 3,
            startLoadTime: Date.now() / 1000 - Math.random() * 2.5,
            wasAlternateProtocolAvailable: false,
            wasFetchedViaSpdy: true,
            wasNpnNegotiated: true
        }), 'loadTimes');
    }
    if (!window.chrome.csi) {
        window.chrome.csi = markNative(() => ({
            onloadT: Date.now(),
            pageT: Math.random() * 1000 + 500,
            startE: Date.now() - Math.random() * 3000,
            tran: 15
        }), 'csi');
    }
    if (!window.chrome.app) {
        window.chrome.app = {
            isInstalled: false,
            InstallState: { DISABLED: 'disabled', INSTALLED: 'installed', NOT_INSTALLED: 'not_installed' },
            RunningState: { CANNOT_RUN: 'cannot_run', READY_TO_RUN: 'ready_to_run', RUNNING: 'running' }
        };
    }
} catch (e) {}
"#
    .to_string()
}

/// Delete global properties left behind by automation drivers.
fn automation_markers(_fp: &SessionFingerprint) -> String {
    r#"
try {
    const markerPattern = /^(cdc_|\$cdc_|\$wdc_|__webdriver|__driver|__selenium|__fxdriver|__nightmare|_phantom|callPhantom|domAutomation)/;
    for (const prop of Object.getOwnPropertyNames(window)) {
        if (markerPattern.test(prop)) {
            try { delete window[prop]; } catch (e) {}
        }
    }
    for (const prop of Object.getOwnPropertyNames(document)) {
        if (markerPattern.test(prop)) {
            try { delete document[prop]; } catch (e) {}
        }
    }
} catch (e) {}
"#
    .to_string()
}

/// Keep `permissions.query({name:'notifications'})` in agreement with the
/// live `Notification.permission` value; every other name falls through to
/// the original implementation.
fn permissions(_fp: &SessionFingerprint) -> String {
    r#"
try {
    if (navigator.permissions && navigator.permissions.query) {
        const originalQuery = navigator.permissions.query.bind(navigator.permissions);
        const patchedQuery = function query(parameters) {
            if (parameters && parameters.name === 'notifications' && typeof Notification !== 'undefined') {
                return Promise.resolve({ state: Notification.permission, onchange: null });
            }
            return originalQuery(parameters);
        };
        navigator.permissions.query = markNative(patchedQuery, 'query');
    }
} catch (e) {}
"#
    .to_string()
}

/// Carry the webdriver override into same-origin iframes. Detectors probe
/// `iframe.contentWindow.navigator` because top-level patches are common
/// and iframe patches are often forgotten.
fn iframe_content_window(_fp: &SessionFingerprint) -> String {
    r#"
try {
    const desc = Object.getOwnPropertyDescriptor(HTMLIFrameElement.prototype, 'contentWindow');
    if (desc && desc.get) {
        const originalGet = desc.get;
        const patchedGet = function contentWindow() {
            const win = originalGet.call(this);
            if (win) {
                try {
                    // Throws for cross-origin frames; those can't probe us either.
                    delete win.Navigator.prototype.webdriver;
                } catch (e) {}
            }
            return win;
        };
        Object.defineProperty(HTMLIFrameElement.prototype, 'contentWindow', {
            get: markNative(patchedGet, 'contentWindow'),
            configurable: true
        });
    }
} catch (e) {}
"#
    .to_string()
}

/// One vendor/renderer pair for the whole session, answered identically by
/// the WebGL and WebGL2 contexts.
fn webgl(fp: &SessionFingerprint) -> String {
    format!(
        r#"
try {{
    const spoofContext = (proto) => {{
        const originalGetParameter = proto.getParameter;
        const patched = function getParameter(parameter) {{
            if (parameter === 37445) return '{vendor}';
            if (parameter === 37446) return '{renderer}';
            return originalGetParameter.call(this, parameter);
        }};
        proto.getParameter = markNative(patched, 'getParameter');
    }};
    if (typeof WebGLRenderingContext !== 'undefined') spoofContext(WebGLRenderingContext.prototype);
    if (typeof WebGL2RenderingContext !== 'undefined') spoofContext(WebGL2RenderingContext.prototype);
}} catch (e) {{}}
"#,
        vendor = fp.webgl_vendor,
        renderer = fp.webgl_renderer,
    )
}

/// Plausible, static network and battery readings where the APIs exist.
fn network_battery(_fp: &SessionFingerprint) -> String {
    r#"
try {
    if (navigator.connection) {
        const conn = navigator.connection;
        defineGetter(Object.getPrototypeOf(conn), 'effectiveType', '4g');
        defineGetter(Object.getPrototypeOf(conn), 'rtt', 50);
        defineGetter(Object.getPrototypeOf(conn), 'downlink', 10);
        defineGetter(Object.getPrototypeOf(conn), 'saveData', false);
    }
} catch (e) {}
try {
    if (navigator.getBattery) {
        const patchedGetBattery = function getBattery() {
            return Promise.resolve({
                charging: true,
                chargingTime: 0,
                dischargingTime: Infinity,
                level: 0.92,
                onchargingchange: null,
                onchargingtimechange: null,
                ondischargingtimechange: null,
                onlevelchange: null,
                addEventListener: () => {},
                removeEventListener: () => {},
                dispatchEvent: () => true
            });
        };
        Object.defineProperty(Object.getPrototypeOf(navigator), 'getBattery', {
            value: markNative(patchedGetBattery, 'getBattery'),
            writable: true,
            configurable: true
        });
    }
} catch (e) {}
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::SessionFingerprint;

    #[test]
    fn test_table_order_starts_with_tostring_spoof() {
        // Later snippets call markNative/defineGetter, which only exist
        // once the first entry has run.
        assert_eq!(EVASIONS[0].name, "function-tostring");
        let names: Vec<&str> = EVASIONS.iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![
                "function-tostring",
                "webdriver",
                "navigator-props",
                "plugins",
                "chrome-runtime",
                "automation-markers",
                "permissions",
                "iframe-contentwindow",
                "webgl",
                "network-battery",
            ]
        );
    }

    #[test]
    fn test_script_contains_every_evasion() {
        let fp = SessionFingerprint::generate();
        let script = build_init_script(&fp);
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})();"));
        assert!(script.contains("Navigator.prototype.webdriver"));
        assert!(script.contains("hardwareConcurrency"));
        assert!(script.contains("PDF Viewer"));
        assert!(script.contains("loadTimes"));
        assert!(script.contains("markerPattern"));
        assert!(script.contains("Notification.permission"));
        assert!(script.contains("HTMLIFrameElement"));
        assert!(script.contains("WebGLRenderingContext"));
        assert!(script.contains("effectiveType"));
    }

    #[test]
    fn test_fingerprint_values_flow_into_script() {
        let fp = SessionFingerprint::generate();
        let script = build_init_script(&fp);
        assert!(script.contains(&format!("defineGetter(proto, 'hardwareConcurrency', {})", fp.hardware_concurrency)));
        assert!(script.contains(&format!("defineGetter(proto, 'deviceMemory', {})", fp.device_memory)));
        assert!(script.contains(&format!("'{}'", fp.platform.as_str())));
        assert!(script.contains(&fp.webgl_vendor));
        assert!(script.contains(&fp.webgl_renderer));
    }

    #[test]
    fn test_same_fingerprint_renders_identical_script() {
        // The launcher renders once per session; two renders of the same
        // fingerprint must agree so repeated injection stays consistent.
        let fp = SessionFingerprint::generate();
        assert_eq!(build_init_script(&fp), build_init_script(&fp));
    }

    #[test]
    fn test_tostring_spoof_shape() {
        let fp = SessionFingerprint::generate();
        let prelude = EVASIONS[0].render(&fp);
        // The fake source shape detectors expect from a native function.
        assert!(prelude.contains("() { [native code] }"));
        // The override registers itself in the side table.
        assert!(prelude.contains("markNative(patchedToString, 'toString')"));
    }

    #[test]
    fn test_every_snippet_guards_api_absence() {
        let fp = SessionFingerprint::generate();
        for evasion in EVASIONS.iter().skip(1) {
            let snippet = evasion.render(&fp);
            assert!(
                snippet.contains("catch (e)"),
                "evasion {} has no absence guard",
                evasion.name
            );
        }
    }
}
