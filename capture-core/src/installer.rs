//! Installer payload
//!
//! Builds the self-contained script that instruments a document: the
//! environment overrides and, in page mode, the request hook, the response
//! buffer and the trigger. Everything is rendered into one unit so that it
//! installs atomically before the page's own scripts run.
//!
//! The payload publishes a frozen, non-enumerable `window.__capture` object:
//!
//! * `run()`: reset the buffer and click the trigger control; `false` when the
//!   control is absent (page mode only)
//! * `snapshot()`: copy of the captured records (page mode only)
//! * `skipped`, `version`, `installedAt`, `mode`
//!
//! The request hook keeps one capture listener per `XMLHttpRequest`
//! instance; `open()` forgets the previous call and `send()` decides whether
//! the new one is captured, so a reused instance yields at most one record
//! per matching call. A call that ends with status 0 (network error, abort)
//! is passed through without capture.
//!
//! Only `onreadystatechange` is sequenced after the capture. Listeners the
//! page registers with `addEventListener`, and `onload`, are dispatched by the
//! browser on their own; for blob and arraybuffer bodies, which are read
//! asynchronously, they run before the record is appended.

use crate::config::{CaptureConfig, CaptureMode};
use crate::overrides::OverrideRegistry;
use crate::rule::InterceptRule;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Global the payload publishes
pub const ENGINE_GLOBAL: &str = "__capture";
/// Element id of the script inserted by the head strategy
pub const ENGINE_ELEMENT_ID: &str = "_ENGINE_";
/// Payload version, stamped into the page
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Host-side expression starting a capture pass
pub const RUN_EXPRESSION: &str = "window.__capture ? window.__capture.run() : null";
/// Host-side expression draining the buffer
pub const SNAPSHOT_EXPRESSION: &str = "window.__capture ? window.__capture.snapshot() : null";
/// Host-side expression reading the engine status
pub const STATUS_EXPRESSION: &str = "(function () { var e = window.__capture; return e ? { version: e.version, installedAt: e.installedAt, skipped: e.skipped, mode: e.mode } : null; })()";

/// What the page reports about the installed engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub version: String,
    /// Milliseconds since the epoch, page clock
    pub installed_at: f64,
    #[serde(default)]
    pub skipped: Vec<String>,
    pub mode: String,
}

/// Rendered instrumentation script
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    source: String,
}

impl Payload {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Script that inserts the payload as the first child of `document.head`.
    pub fn head_loader(&self) -> String {
        format!(
            r#"(function () {{
  var script = document.createElement('script');
  script.type = 'text/javascript';
  script.id = {id};
  script.setAttribute('data-version', {version});
  script.setAttribute('data-ts', String(Date.now()));
  script.textContent = {source};
  var head = document.head || document.getElementsByTagName('head')[0] || document.documentElement;
  head.insertBefore(script, head.firstChild);
  return true;
}})()"#,
            id = json!(ENGINE_ELEMENT_ID),
            version = json!(ENGINE_VERSION),
            source = Value::String(self.source.clone()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Installer {
    rule: InterceptRule,
    registry: OverrideRegistry,
    trigger_control_id: String,
    mode: CaptureMode,
}

impl Installer {
    pub fn new(
        rule: InterceptRule,
        registry: OverrideRegistry,
        trigger_control_id: impl Into<String>,
        mode: CaptureMode,
    ) -> Self {
        Self {
            rule,
            registry,
            trigger_control_id: trigger_control_id.into(),
            mode,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            config.rule.clone(),
            OverrideRegistry::from_config(&config.fingerprint),
            config.trigger_control_id.clone(),
            config.mode,
        )
    }

    pub fn registry(&self) -> &OverrideRegistry {
        &self.registry
    }

    /// Render the full payload.
    pub fn build(&self) -> Payload {
        let mut source = String::new();
        source.push_str("(function () {\n'use strict';\n");
        source.push_str(&format!("if (window.{}) return;\n", ENGINE_GLOBAL));
        source.push_str("var skipped = [];\n");
        source.push_str(&self.registry.render_install());
        source.push('\n');

        let exports = match self.mode {
            CaptureMode::InPage => {
                source.push_str(&self.render_capture());
                "run: run,\n  snapshot: function () { return buffer.snapshot(); },\n  mode: 'inpage',"
            }
            CaptureMode::Protocol => "mode: 'protocol',",
        };

        source.push_str(&format!(
            r#"
Object.defineProperty(window, {global}, {{
  value: Object.freeze({{
  {exports}
  skipped: Object.freeze(skipped.slice()),
  version: {version},
  installedAt: Date.now()
  }}),
  enumerable: false,
  configurable: false,
  writable: false
}});
}})();
"#,
            global = json!(ENGINE_GLOBAL),
            exports = exports,
            version = json!(ENGINE_VERSION),
        ));

        Payload { source }
    }

    /// Buffer, rule, request hook and trigger for page mode
    fn render_capture(&self) -> String {
        format!(
            r#"var RULE = {rule};
var TRIGGER_ID = {trigger};
var records = [];
var buffer = {{
  reset: function () {{ records = []; }},
  append: function (record) {{ records.push(Object.freeze(record)); }},
  snapshot: function () {{ return records.slice(); }}
}};

function resolveMatch(target) {{
  var url;
  try {{
    url = new URL(target, window.location.origin);
  }} catch (e) {{
    return null;
  }}
  if (RULE.hosts.indexOf(url.host) === -1 || RULE.paths.indexOf(url.pathname) === -1) return null;
  return url.href;
}}

function readBody(xhr) {{
  switch (xhr.responseType) {{
    case '':
    case 'text':
      return JSON.parse(xhr.responseText);
    case 'json':
      if (xhr.response === null) throw new SyntaxError('structured response is null');
      return xhr.response;
    case 'blob':
    case 'arraybuffer':
      return new Response(xhr.response).text().then(JSON.parse);
    default:
      throw new TypeError("response type '" + xhr.responseType + "' cannot be read as JSON");
  }}
}}

function attachCapture(xhr, state, XHR) {{
  var handlers = [];
  if (typeof xhr.onreadystatechange === 'function') handlers.push(xhr.onreadystatechange);
  xhr.onreadystatechange = null;
  Object.defineProperty(xhr, 'onreadystatechange', {{
    configurable: true,
    enumerable: true,
    get: function () {{ return handlers.length ? handlers[0] : null; }},
    set: function (handler) {{ handlers = typeof handler === 'function' ? [handler] : []; }}
  }});
  xhr.addEventListener('readystatechange', function (event) {{
    var self = this;
    var forward = function () {{
      for (var i = 0; i < handlers.length; i++) handlers[i].call(self, event);
    }};
    var call = state.call;
    if (call === null || xhr.readyState !== XHR.DONE) {{
      forward();
      return;
    }}
    state.call = null;
    // network error or abort
    if (xhr.status === 0) {{
      forward();
      return;
    }}
    var decoded;
    try {{
      decoded = readBody(xhr);
    }} catch (error) {{
      forward();
      throw error;
    }}
    if (decoded && typeof decoded.then === 'function') {{
      decoded.then(function (body) {{
        buffer.append({{ url: call.url, body: body }});
      }}).finally(forward);
      return;
    }}
    buffer.append({{ url: call.url, body: decoded }});
    forward();
  }});
  state.attached = true;
}}

(function (XHR) {{
  if (!XHR || !XHR.prototype) return;
  var STATE = typeof Symbol === 'function' ? Symbol('capture') : '__captureState';
  var stateOf = function (xhr) {{
    if (!xhr[STATE]) {{
      Object.defineProperty(xhr, STATE, {{ value: {{ target: null, call: null, attached: false }} }});
    }}
    return xhr[STATE];
  }};
  var open = XHR.prototype.open;
  var send = XHR.prototype.send;
  XHR.prototype.open = function (method, url) {{
    var state = stateOf(this);
    state.target = String(url);
    state.call = null;
    return open.apply(this, arguments);
  }};
  XHR.prototype.send = function (body) {{
    var state = stateOf(this);
    var url = resolveMatch(state.target);
    state.call = url === null ? null : {{ url: url }};
    if (url !== null && !state.attached) attachCapture(this, state, XHR);
    return send.apply(this, arguments);
  }};
}})(window.XMLHttpRequest);

function run() {{
  var control = document.getElementById(TRIGGER_ID);
  if (!control) return false;
  buffer.reset();
  control.click();
  return true;
}}
"#,
            rule = json!({ "hosts": self.rule.hosts, "paths": self.rule.paths }),
            trigger = json!(self.trigger_control_id),
        )
    }
}
