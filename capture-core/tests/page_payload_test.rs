//! Runs the rendered payload in an embedded JavaScript engine against a
//! minimal browser stand-in: a scripted `XMLHttpRequest`, a `document` with
//! controls keyed by id, and the introspection APIs the overrides patch.

use boa_engine::{Context, Source};
use capture_core::{CaptureConfig, CaptureMode, FingerprintConfig, Installer, InterceptRule};
use serde_json::{json, Value};

/// Browser globals the payload touches. Exceptions thrown from
/// `readystatechange` listeners land in `uncaught`, the way a page reports
/// them on `window.onerror`.
const BROWSER_STUB: &str = r##"
var window = globalThis;
window.location = { origin: 'https://api.example.com', href: 'https://api.example.com/app' };
var uncaught = [];
var pending = [];

var ABSOLUTE = /^([a-z][a-z0-9+.-]*):\/\/([^\/?#]+)([^?#]*)(\?[^#]*)?/i;
function URL(target, base) {
  var text = String(target);
  var match = ABSOLUTE.exec(text);
  if (!match && base !== undefined && text.charAt(0) === '/') match = ABSOLUTE.exec(String(base) + text);
  if (!match) throw new TypeError('Invalid URL: ' + text);
  this.protocol = match[1].toLowerCase() + ':';
  this.host = match[2].toLowerCase();
  this.pathname = match[3] || '/';
  this.search = match[4] || '';
  this.href = this.protocol + '//' + this.host + this.pathname + this.search;
}

function Response(body) { this.body = body; }
Response.prototype.text = function () { return Promise.resolve(String(this.body)); };

function XMLHttpRequest() {
  this.readyState = 0;
  this.status = 0;
  this.responseType = '';
  this.response = null;
  this.responseText = '';
  this.listeners = [];
}
XMLHttpRequest.DONE = 4;
Object.defineProperty(XMLHttpRequest.prototype, 'onreadystatechange', {
  configurable: true,
  enumerable: true,
  get: function () { return this.handlerSlot || null; },
  set: function (handler) { this.handlerSlot = handler; }
});
XMLHttpRequest.prototype.addEventListener = function (type, listener) {
  if (type === 'readystatechange') this.listeners.push(listener);
};
XMLHttpRequest.prototype.open = function (method, url) {
  this.readyState = 1;
  this.status = 0;
  this.requested = String(url);
};
XMLHttpRequest.prototype.send = function () { pending.push(this); };
XMLHttpRequest.prototype.advance = function (readyState) {
  this.readyState = readyState;
  var event = { type: 'readystatechange', target: this };
  var listeners = this.listeners.slice();
  if (typeof this.handlerSlot === 'function') listeners.push(this.handlerSlot);
  for (var i = 0; i < listeners.length; i++) {
    try { listeners[i].call(this, event); } catch (error) { uncaught.push(String(error)); }
  }
};

function respond(xhr, body, responseType) {
  xhr.status = 200;
  xhr.responseType = responseType || '';
  xhr.response = body;
  xhr.responseText = body;
  xhr.advance(2);
  xhr.advance(3);
  xhr.advance(4);
}
function fail(xhr) {
  xhr.status = 0;
  xhr.response = null;
  xhr.responseText = '';
  xhr.advance(4);
}
function request(target) {
  var xhr = new XMLHttpRequest();
  xhr.open('GET', target);
  xhr.send();
  return xhr;
}

var controls = {};
var document = { getElementById: function (id) { return controls[id] || null; } };

function Navigator() {}
Object.defineProperty(Navigator.prototype, 'webdriver', { get: function () { return true; }, enumerable: true, configurable: true });
Object.defineProperty(Navigator.prototype, 'languages', { get: function () { return ['de-DE']; }, enumerable: true, configurable: true });
Object.defineProperty(Navigator.prototype, 'plugins', { get: function () { return []; }, enumerable: true, configurable: true });
var navigator = new Navigator();

function WebGLRenderingContext() {}
WebGLRenderingContext.prototype.getParameter = function (code) { return 'native-' + code; };
"##;

struct Page {
    context: Context,
}

impl Page {
    fn load(mode: CaptureMode) -> Self {
        let mut config = CaptureConfig::default();
        config.rule = InterceptRule::new(["api.example.com"], ["/v1/data"]);
        config.trigger_control_id = "load-button".to_string();
        config.mode = mode;
        let payload = Installer::from_config(&config).build();

        let mut page = Self {
            context: Context::default(),
        };
        page.exec(BROWSER_STUB);
        page.exec(payload.source());
        page
    }

    /// Evaluate a script, then drain pending promise jobs
    fn exec(&mut self, script: &str) {
        self.context
            .eval(Source::from_bytes(script.as_bytes()))
            .unwrap();
        self.context.run_jobs();
    }

    fn json(&mut self, expression: &str) -> Value {
        let script = format!("JSON.stringify({})", expression);
        let value = self
            .context
            .eval(Source::from_bytes(script.as_bytes()))
            .unwrap();
        let text = value
            .to_string(&mut self.context)
            .unwrap()
            .to_std_string_escaped();
        serde_json::from_str(&text).unwrap()
    }

    fn snapshot(&mut self) -> Value {
        self.json("window.__capture.snapshot()")
    }

    fn uncaught(&mut self) -> Vec<String> {
        serde_json::from_value(self.json("uncaught")).unwrap()
    }
}

#[test]
fn test_matching_call_captured_other_path_ignored() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        respond(request('https://api.example.com/v1/data'), '{"x":1}');
        respond(request('https://api.example.com/v1/other'), '{"y":2}');
        "#,
    );

    assert_eq!(
        page.snapshot(),
        json!([{ "url": "https://api.example.com/v1/data", "body": { "x": 1 } }])
    );
    assert!(page.uncaught().is_empty());
}

#[test]
fn test_relative_and_foreign_targets() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        respond(request('/v1/data?page=2'), '[1,2]');
        respond(request('https://cdn.example.com/v1/data'), '{"cdn":true}');
        respond(request('http://'), 'not even json');
        "#,
    );

    assert_eq!(
        page.snapshot(),
        json!([{ "url": "https://api.example.com/v1/data?page=2", "body": [1, 2] }])
    );
    assert!(page.uncaught().is_empty());
}

#[test]
fn test_records_follow_completion_order() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var calls = [request('/v1/data'), request('/v1/data'), request('/v1/data')];
        respond(calls[2], '{"n":2}');
        respond(calls[0], '{"n":0}');
        respond(calls[1], '{"n":1}');
        "#,
    );

    let bodies: Vec<Value> = page
        .snapshot()
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["body"]["n"].clone())
        .collect();
    assert_eq!(bodies, vec![json!(2), json!(0), json!(1)]);
}

#[test]
fn test_reused_request_captured_once_per_matching_call() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var done = 0;
        var xhr = new XMLHttpRequest();
        xhr.onreadystatechange = function () { if (this.readyState === 4) done++; };
        xhr.open('GET', '/v1/data'); xhr.send(); respond(xhr, '{"x":1}');
        xhr.open('GET', '/v1/other'); xhr.send(); respond(xhr, '{"y":2}');
        xhr.open('GET', '/v1/data'); xhr.send(); respond(xhr, '{"a":2}');
        "#,
    );

    assert_eq!(
        page.snapshot(),
        json!([
            { "url": "https://api.example.com/v1/data", "body": { "x": 1 } },
            { "url": "https://api.example.com/v1/data", "body": { "a": 2 } }
        ])
    );
    assert_eq!(page.json("done"), json!(3));
}

#[test]
fn test_page_handler_runs_after_capture() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var seen = -1;
        var xhr = new XMLHttpRequest();
        xhr.open('GET', '/v1/data');
        xhr.onreadystatechange = function () {
          if (this.readyState === 4) seen = window.__capture.snapshot().length;
        };
        xhr.send();
        respond(xhr, '{"x":1}');
        "#,
    );

    assert_eq!(page.json("seen"), json!(1));
}

#[test]
fn test_network_failure_passes_through() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var handled = false;
        var xhr = new XMLHttpRequest();
        xhr.open('GET', '/v1/data');
        xhr.onreadystatechange = function () { handled = this.readyState === 4; };
        xhr.send();
        fail(xhr);
        "#,
    );

    assert_eq!(page.snapshot(), json!([]));
    assert!(page.uncaught().is_empty());
    assert_eq!(page.json("handled"), json!(true));
}

#[test]
fn test_unparseable_body_fails_loud_after_page_handler() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var handled = false;
        var xhr = new XMLHttpRequest();
        xhr.open('GET', '/v1/data');
        xhr.onreadystatechange = function () { handled = this.readyState === 4; };
        xhr.send();
        respond(xhr, '<html>maintenance</html>');
        "#,
    );

    assert_eq!(page.snapshot(), json!([]));
    assert_eq!(page.json("handled"), json!(true));
    let uncaught = page.uncaught();
    assert_eq!(uncaught.len(), 1);
    assert!(uncaught[0].starts_with("SyntaxError"));
}

#[test]
fn test_binary_body_decoded_before_handler() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        var listener = -1;
        var handler = -1;
        var xhr = new XMLHttpRequest();
        xhr.open('GET', '/v1/data');
        xhr.addEventListener('readystatechange', function () {
          if (this.readyState === 4) listener = window.__capture.snapshot().length;
        });
        xhr.onreadystatechange = function () {
          if (this.readyState === 4) handler = window.__capture.snapshot().length;
        };
        xhr.send();
        respond(xhr, '{"b":true}', 'arraybuffer');
        "#,
    );

    assert_eq!(
        page.snapshot(),
        json!([{ "url": "https://api.example.com/v1/data", "body": { "b": true } }])
    );
    // only onreadystatechange waits for the async read
    assert_eq!(page.json("handler"), json!(1));
    assert_eq!(page.json("listener"), json!(0));
}

#[test]
fn test_run_without_control_keeps_buffer() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(r#"respond(request('/v1/data'), '{"x":1}');"#);

    assert_eq!(page.json("window.__capture.run()"), json!(false));
    assert_eq!(page.snapshot().as_array().unwrap().len(), 1);
    assert!(page.uncaught().is_empty());
}

#[test]
fn test_run_resets_and_clicks_control() {
    let mut page = Page::load(CaptureMode::InPage);
    page.exec(
        r#"
        respond(request('/v1/data'), '{"stale":true}');
        controls['load-button'] = { click: function () { request('/v1/data'); } };
        "#,
    );

    assert_eq!(page.json("window.__capture.run()"), json!(true));
    assert_eq!(page.snapshot(), json!([]));

    page.exec(r#"respond(pending[pending.length - 1], '{"fresh":true}');"#);
    assert_eq!(
        page.snapshot(),
        json!([{ "url": "https://api.example.com/v1/data", "body": { "fresh": true } }])
    );
}

#[test]
fn test_environment_overrides_installed() {
    let fingerprint = FingerprintConfig::default();
    let mut page = Page::load(CaptureMode::Protocol);

    assert_eq!(page.json("navigator.webdriver"), json!(false));
    assert_eq!(page.json("navigator.languages"), json!(["en-US", "en"]));
    assert_eq!(page.json("navigator.plugins.length"), json!(5));
    assert_eq!(
        page.json(
            "[37445, 37446, 7].map(function (code) { return new WebGLRenderingContext().getParameter(code); })"
        ),
        json!([fingerprint.gpu_vendor, fingerprint.gpu_renderer, "native-7"])
    );

    // targets this stand-in lacks are skipped, the rest still install
    let skipped = page.json("window.__capture.skipped");
    let skipped = skipped.as_array().unwrap();
    assert!(skipped.contains(&json!("webgl2.getParameter")));
    assert!(skipped.contains(&json!("permissions.query")));
    assert!(!skipped.contains(&json!("navigator.webdriver")));

    assert_eq!(page.json("typeof window.__capture.snapshot"), json!("undefined"));
    assert_eq!(page.json("window.__capture.mode"), json!("protocol"));
}
