//! Environment Overrides
//!
//! Wrapper registry for the introspection APIs anti-bot scripts read. Each
//! entry names one `(object, member)` pair and a behaviour that either returns
//! a fixed synthetic value or delegates to the native one.
//!
//! The registry is rendered into the installer payload and installed in the
//! page by iterating the table once. Every entry is isolated: a target that
//! does not exist in the running browser is skipped and reported, the others
//! still install. Property descriptors keep their enumerable and configurable
//! flags.

use crate::config::FingerprintConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// WebGL `UNMASKED_VENDOR_WEBGL`
pub const UNMASKED_VENDOR_WEBGL: u32 = 37445;
/// WebGL `UNMASKED_RENDERER_WEBGL`
pub const UNMASKED_RENDERER_WEBGL: u32 = 37446;

/// How the member is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Getter,
    Method,
}

/// The patched member: a global path to the owning object plus the member name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideTarget {
    pub object: Vec<&'static str>,
    pub member: &'static str,
    pub kind: MemberKind,
}

impl OverrideTarget {
    pub fn getter(object: &[&'static str], member: &'static str) -> Self {
        Self {
            object: object.to_vec(),
            member,
            kind: MemberKind::Getter,
        }
    }

    pub fn method(object: &[&'static str], member: &'static str) -> Self {
        Self {
            object: object.to_vec(),
            member,
            kind: MemberKind::Method,
        }
    }
}

/// One intercepted read or call, as seen by an override
#[derive(Debug, Clone, Copy)]
pub enum Invocation<'a> {
    /// Plain property read
    Read,
    /// `getParameter(code)`
    Parameter(u32),
    /// `height`/`width` read on an image element
    Image { complete: bool, natural_height: u32 },
    /// `permissions.query({ name })`
    Permission {
        name: &'a str,
        notification_permission: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverrideBehavior {
    /// Always report the same value
    Constant(Value),
    /// Fixed vendor/renderer for the two unmasked codes
    GpuParameter { vendor: String, renderer: String },
    /// Placeholder size for a loaded image with zero natural height
    ImageDimension { placeholder: u32 },
    /// Answer notification queries from `Notification.permission`
    NotificationPermission,
}

impl OverrideBehavior {
    /// Result of the overridden member for one invocation; `original` is only
    /// called for inputs the override does not care about.
    pub fn evaluate<F>(&self, invocation: Invocation<'_>, original: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        match (self, invocation) {
            (OverrideBehavior::Constant(value), _) => value.clone(),
            (OverrideBehavior::GpuParameter { vendor, .. }, Invocation::Parameter(UNMASKED_VENDOR_WEBGL)) => {
                Value::String(vendor.clone())
            }
            (OverrideBehavior::GpuParameter { renderer, .. }, Invocation::Parameter(UNMASKED_RENDERER_WEBGL)) => {
                Value::String(renderer.clone())
            }
            (
                OverrideBehavior::ImageDimension { placeholder },
                Invocation::Image {
                    complete: true,
                    natural_height: 0,
                },
            ) => json!(placeholder),
            (
                OverrideBehavior::NotificationPermission,
                Invocation::Permission {
                    name: "notifications",
                    notification_permission,
                },
            ) => json!({ "state": notification_permission }),
            _ => original(),
        }
    }

    /// JavaScript factory `function (original) { ... }` returning the replacement
    fn render_factory(&self) -> String {
        match self {
            OverrideBehavior::Constant(value) => {
                format!("function () {{ return function () {{ return {}; }}; }}", value)
            }
            OverrideBehavior::GpuParameter { vendor, renderer } => format!(
                r#"function (original) {{
      return function (parameter) {{
        if (parameter === {vendor_code}) return {vendor};
        if (parameter === {renderer_code}) return {renderer};
        return original.apply(this, arguments);
      }};
    }}"#,
                vendor_code = UNMASKED_VENDOR_WEBGL,
                renderer_code = UNMASKED_RENDERER_WEBGL,
                vendor = Value::String(vendor.clone()),
                renderer = Value::String(renderer.clone()),
            ),
            OverrideBehavior::ImageDimension { placeholder } => format!(
                r#"function (original) {{
      return function () {{
        if (this.complete && this.naturalHeight === 0) return {};
        return original.call(this);
      }};
    }}"#,
                placeholder
            ),
            OverrideBehavior::NotificationPermission => r#"function (original) {
      return function (parameters) {
        if (parameters && parameters.name === 'notifications') {
          var state = typeof Notification === 'undefined' ? 'default' : Notification.permission;
          return Promise.resolve({ state: state });
        }
        return original.apply(this, arguments);
      };
    }"#
            .to_string(),
        }
    }
}

/// One registry entry
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentOverride {
    pub name: &'static str,
    pub target: OverrideTarget,
    pub behavior: OverrideBehavior,
    /// Page-side expression reading the overridden value back, if cheap to probe
    pub probe: Option<&'static str>,
}

impl EnvironmentOverride {
    /// Value the probe expression should report once installed.
    pub fn expected(&self) -> Option<Value> {
        self.probe?;
        Some(match &self.behavior {
            OverrideBehavior::GpuParameter { .. } => json!([
                self.behavior.evaluate(Invocation::Parameter(UNMASKED_VENDOR_WEBGL), || Value::Null),
                self.behavior.evaluate(Invocation::Parameter(UNMASKED_RENDERER_WEBGL), || Value::Null),
            ]),
            behavior => behavior.evaluate(Invocation::Read, || Value::Null),
        })
    }

    fn render(&self) -> String {
        let object = self
            .target
            .object
            .iter()
            .map(|key| Value::String(key.to_string()).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "  {{\n    name: {name},\n    object: [{object}],\n    member: {member},\n    kind: {kind},\n    factory: {factory}\n  }}",
            name = Value::String(self.name.to_string()),
            object = object,
            member = Value::String(self.target.member.to_string()),
            kind = json!(self.target.kind),
            factory = self.behavior.render_factory(),
        )
    }
}

/// Fixed table of overrides, installed once per document
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRegistry {
    entries: Vec<EnvironmentOverride>,
}

const GPU_PROBE_WEBGL: &str = "(function () { var c = document.createElement('canvas').getContext('webgl'); return c ? [c.getParameter(37445), c.getParameter(37446)] : null; })()";
const GPU_PROBE_WEBGL2: &str = "(function () { var c = document.createElement('canvas').getContext('webgl2'); return c ? [c.getParameter(37445), c.getParameter(37446)] : null; })()";

impl OverrideRegistry {
    /// The standard set presenting a non-automated browser
    pub fn from_config(config: &FingerprintConfig) -> Self {
        let gpu = OverrideBehavior::GpuParameter {
            vendor: config.gpu_vendor.clone(),
            renderer: config.gpu_renderer.clone(),
        };
        let image = OverrideBehavior::ImageDimension {
            placeholder: config.image_placeholder_height,
        };
        let plugins: Vec<Value> = (1..=config.plugin_count).map(|n| json!(n)).collect();

        let entries = vec![
            EnvironmentOverride {
                name: "navigator.webdriver",
                target: OverrideTarget::getter(&["Navigator", "prototype"], "webdriver"),
                behavior: OverrideBehavior::Constant(Value::Bool(false)),
                probe: Some("navigator.webdriver"),
            },
            EnvironmentOverride {
                name: "navigator.languages",
                target: OverrideTarget::getter(&["Navigator", "prototype"], "languages"),
                behavior: OverrideBehavior::Constant(json!([
                    config.primary_language,
                    config.fallback_language
                ])),
                probe: Some("navigator.languages"),
            },
            EnvironmentOverride {
                name: "navigator.plugins",
                target: OverrideTarget::getter(&["Navigator", "prototype"], "plugins"),
                behavior: OverrideBehavior::Constant(Value::Array(plugins)),
                probe: Some("navigator.plugins"),
            },
            EnvironmentOverride {
                name: "webgl.getParameter",
                target: OverrideTarget::method(&["WebGLRenderingContext", "prototype"], "getParameter"),
                behavior: gpu.clone(),
                probe: Some(GPU_PROBE_WEBGL),
            },
            EnvironmentOverride {
                name: "webgl2.getParameter",
                target: OverrideTarget::method(&["WebGL2RenderingContext", "prototype"], "getParameter"),
                behavior: gpu,
                probe: Some(GPU_PROBE_WEBGL2),
            },
            EnvironmentOverride {
                name: "image.height",
                target: OverrideTarget::getter(&["HTMLImageElement", "prototype"], "height"),
                behavior: image.clone(),
                probe: None,
            },
            EnvironmentOverride {
                name: "image.width",
                target: OverrideTarget::getter(&["HTMLImageElement", "prototype"], "width"),
                behavior: image,
                probe: None,
            },
            EnvironmentOverride {
                name: "permissions.query",
                target: OverrideTarget::method(&["Permissions", "prototype"], "query"),
                behavior: OverrideBehavior::NotificationPermission,
                probe: None,
            },
        ];
        Self { entries }
    }

    pub fn entries(&self) -> &[EnvironmentOverride] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentOverride> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// JavaScript statements installing every entry.
    ///
    /// Expects a `skipped` array in scope; names of entries that could not be
    /// installed are pushed onto it.
    pub fn render_install(&self) -> String {
        let table = self
            .entries
            .iter()
            .map(EnvironmentOverride::render)
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            r#"var overrides = [
{table}
];
overrides.forEach(function (entry) {{
  try {{
    var owner = window;
    for (var i = 0; i < entry.object.length && owner != null; i++) owner = owner[entry.object[i]];
    var descriptor = owner != null ? Object.getOwnPropertyDescriptor(owner, entry.member) : undefined;
    if (!descriptor) {{ skipped.push(entry.name); return; }}
    if (entry.kind === 'getter') {{
      if (typeof descriptor.get !== 'function') {{ skipped.push(entry.name); return; }}
      Object.defineProperty(owner, entry.member, {{
        get: entry.factory(descriptor.get),
        set: descriptor.set,
        enumerable: descriptor.enumerable,
        configurable: descriptor.configurable
      }});
    }} else {{
      if (typeof descriptor.value !== 'function') {{ skipped.push(entry.name); return; }}
      Object.defineProperty(owner, entry.member, {{
        value: entry.factory(descriptor.value),
        writable: descriptor.writable,
        enumerable: descriptor.enumerable,
        configurable: descriptor.configurable
      }});
    }}
  }} catch (e) {{
    skipped.push(entry.name);
  }}
}});"#,
            table = table
        )
    }

    /// Expression evaluating to `{ name: value }` for every probe-able entry
    pub fn probe_script(&self) -> String {
        let fields = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry.probe.map(|probe| {
                    format!(
                        "{}: (function () {{ try {{ return {}; }} catch (e) {{ return null; }} }})()",
                        Value::String(entry.name.to_string()),
                        probe
                    )
                })
            })
            .collect::<Vec<_>>()
            .join(",\n  ");
        format!("({{\n  {}\n}})", fields)
    }

    /// Compare probed values against the expected ones.
    ///
    /// A `null` reading means the API is unavailable in this browser and is
    /// not counted as a mismatch.
    pub fn verify(&self, probed: &Value, skipped: &[String]) -> FingerprintReport {
        let mut report = FingerprintReport {
            skipped: skipped.to_vec(),
            ..Default::default()
        };
        for entry in &self.entries {
            let Some(expected) = entry.expected() else {
                continue;
            };
            match probed.get(entry.name) {
                None | Some(Value::Null) => report.unavailable.push(entry.name.to_string()),
                Some(actual) if *actual == expected => report.verified.push(entry.name.to_string()),
                Some(actual) => report.mismatches.push(FingerprintMismatch {
                    name: entry.name.to_string(),
                    expected,
                    actual: actual.clone(),
                }),
            }
        }
        report
    }
}

impl Default for OverrideRegistry {
    fn default() -> Self {
        Self::from_config(&FingerprintConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMismatch {
    pub name: String,
    pub expected: Value,
    pub actual: Value,
}

/// Outcome of reading the overridden values back from a live page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FingerprintReport {
    pub verified: Vec<String>,
    pub mismatches: Vec<FingerprintMismatch>,
    pub unavailable: Vec<String>,
    /// Entries the page could not install
    pub skipped: Vec<String>,
}

impl FingerprintReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}
