//! Init script installed on every new document of the session page.
//!
//! The profile is long-lived and logged in, so the fingerprint must stay
//! stable across launches: canvas noise is seeded from the profile path
//! rather than drawn per launch.

use std::path::Path;

/// FNV-1a over the profile path. Same profile, same canvas noise.
pub fn profile_seed(profile_dir: &Path) -> u32 {
    profile_dir
        .to_string_lossy()
        .bytes()
        .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

/// Script registered with `Page.addScriptToEvaluateOnNewDocument`.
pub fn init_script(languages: &[&str], canvas_seed: u32) -> String {
    let langs = serde_json::to_string(languages).unwrap_or_else(|_| "[\"en-US\",\"en\"]".into());
    format!(
        r#"
(() => {{
  try {{
    const proto = Object.getPrototypeOf(navigator);
    if (proto && Object.getOwnPropertyDescriptor(proto, 'webdriver')) {{
      Object.defineProperty(proto, 'webdriver', {{ get: () => undefined, configurable: true }});
    }}
  }} catch (e) {{}}

  try {{
    Object.defineProperty(navigator, 'languages', {{ get: () => {langs}, configurable: true }});
  }} catch (e) {{}}

  try {{
    if (!navigator.plugins || navigator.plugins.length === 0) {{
      const names = ['PDF Viewer', 'Chrome PDF Viewer', 'Chromium PDF Viewer'];
      const fake = names.map((name) => ({{ name, filename: 'internal-pdf-viewer', description: 'Portable Document Format' }}));
      Object.defineProperty(navigator, 'plugins', {{ get: () => fake, configurable: true }});
    }}
  }} catch (e) {{}}

  try {{
    let state = {canvas_seed} >>> 0;
    const next = () => {{
      state = (state + 0x6D2B79F5) >>> 0;
      let t = state;
      t = Math.imul(t ^ (t >>> 15), t | 1);
      t ^= t + Math.imul(t ^ (t >>> 7), t | 61);
      return ((t ^ (t >>> 14)) >>> 0) / 4294967296;
    }};
    const shift = [0, 1, 2, 3].map(() => (next() < 0.5 ? -1 : 1));
    const perturb = (data) => {{
      for (let i = 0; i < data.length; i += 4 * 97) {{
        data[i] = Math.max(0, Math.min(255, data[i] + shift[(i >> 2) & 3]));
      }}
    }};
    const getImageData = CanvasRenderingContext2D.prototype.getImageData;
    CanvasRenderingContext2D.prototype.getImageData = function(...args) {{
      const img = getImageData.apply(this, args);
      perturb(img.data);
      return img;
    }};
    const toDataURL = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function(...args) {{
      const ctx = this.getContext && this.getContext('2d');
      if (ctx && this.width > 0 && this.height > 0) {{
        const img = getImageData.call(ctx, 0, 0, this.width, this.height);
        perturb(img.data);
        ctx.putImageData(img, 0, 0);
      }}
      return toDataURL.apply(this, args);
    }};
  }} catch (e) {{}}

  if (!window.chrome) {{ window.chrome = {{}}; }}
  if (!window.chrome.runtime) {{
    window.chrome.runtime = {{
      connect: function() {{ return {{ onDisconnect: {{ addListener: function() {{}} }}, postMessage: function() {{}} }}; }},
      sendMessage: function() {{}},
      onMessage: {{ addListener: function() {{}}, removeListener: function() {{}} }},
    }};
  }}

  const query = navigator.permissions && navigator.permissions.query;
  if (query) {{
    navigator.permissions.query = (params) => (
      params && params.name === 'notifications'
        ? Promise.resolve({{ state: Notification.permission }})
        : query.call(navigator.permissions, params)
    );
  }}

  for (const key of ['__playwright', '__puppeteer', '__selenium', '__webdriver_script_fn', 'callPhantom', '_phantom']) {{
    try {{ delete window[key]; }} catch (e) {{}}
  }}
  for (const key of ['__webdriver_evaluate', '__driver_evaluate', '__selenium_unwrapped', '__fxdriver_unwrapped']) {{
    try {{ delete document[key]; }} catch (e) {{}}
  }}
}})();
"#
    )
}
