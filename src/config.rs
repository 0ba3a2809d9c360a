//! Static project configuration: which files each asset kind reads, where
//! intermediate and final outputs go, and which globs the watch loop observes.
//!
//! Everything here is constructed once at startup and immutable afterwards.
//! Defaults are compiled in; a `Sitekit.toml` next to the project may override
//! paths, server ports and the preprocess contexts, nothing else.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Target browsers for the vendor-prefix pass. Static configuration, not
/// overridable at runtime.
pub const BROWSER_TARGETS: [&str; 8] = [
    "Chrome >= 45",
    "Firefox ESR",
    "Edge >= 12",
    "Explorer >= 10",
    "iOS >= 9",
    "Safari >= 9",
    "Android >= 4.4",
    "Opera >= 30",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Markup,
    Script,
    Style,
    Image,
    Font,
}

impl AssetKind {
    pub const ALL: [AssetKind; 5] = [
        AssetKind::Markup,
        AssetKind::Script,
        AssetKind::Style,
        AssetKind::Image,
        AssetKind::Font,
    ];
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Markup => "markup",
            AssetKind::Script => "script",
            AssetKind::Style => "style",
            AssetKind::Image => "image",
            AssetKind::Font => "font",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRole {
    Source,
    Intermediate,
    Build,
    Watch,
}

impl fmt::Display for PathRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathRole::Source => "source",
            PathRole::Intermediate => "intermediate",
            PathRole::Build => "build",
            PathRole::Watch => "watch",
        };
        f.write_str(name)
    }
}

/// Per-kind path record. `intermediate` is where dev builds land (served by
/// the dev server); kinds without a dev task have none.
#[derive(Debug, Clone)]
pub struct PathSet {
    pub source: Utf8PathBuf,
    pub intermediate: Option<Utf8PathBuf>,
    pub build: Utf8PathBuf,
    pub watch: Utf8PathBuf,
}

/// The path registry: a pure lookup table from (kind, role) to a pattern.
#[derive(Debug, Clone)]
pub struct Paths {
    pub markup: PathSet,
    pub script: PathSet,
    pub style: PathSet,
    pub image: PathSet,
    pub font: PathSet,
    /// Erased in full by the `clean` task.
    pub build_root: Utf8PathBuf,
    /// Root of the content-addressed image cache.
    pub cache_root: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            markup: PathSet {
                source: "src/template/*.html".into(),
                intermediate: Some("src".into()),
                build: "build".into(),
                watch: "src/template/*.html".into(),
            },
            script: PathSet {
                source: "src/js/main.js".into(),
                intermediate: Some("src/rjs".into()),
                build: "build/js".into(),
                watch: "src/js/**/*.js".into(),
            },
            style: PathSet {
                source: "src/style/main.scss".into(),
                intermediate: Some("src/css".into()),
                build: "build/css".into(),
                watch: "src/style/**/*.scss".into(),
            },
            image: PathSet {
                source: "src/img/**/*.*".into(),
                intermediate: None,
                build: "build/img".into(),
                watch: "src/img/**/*.*".into(),
            },
            font: PathSet {
                source: "src/fonts/**/*.*".into(),
                intermediate: None,
                build: "build/fonts".into(),
                watch: "src/fonts/**/*.*".into(),
            },
            build_root: "build".into(),
            cache_root: ".cache/img".into(),
        }
    }
}

impl Paths {
    fn set(&self, kind: AssetKind) -> &PathSet {
        match kind {
            AssetKind::Markup => &self.markup,
            AssetKind::Script => &self.script,
            AssetKind::Style => &self.style,
            AssetKind::Image => &self.image,
            AssetKind::Font => &self.font,
        }
    }

    /// Pure lookup. An undefined or empty (kind, role) pair is a
    /// configuration error, never a silent fallback.
    pub fn resolve(&self, kind: AssetKind, role: PathRole) -> Result<&Utf8Path, ConfigError> {
        let set = self.set(kind);
        let path = match role {
            PathRole::Source => Some(set.source.as_path()),
            PathRole::Intermediate => set.intermediate.as_deref(),
            PathRole::Build => Some(set.build.as_path()),
            PathRole::Watch => Some(set.watch.as_path()),
        };

        match path {
            Some(path) if !path.as_str().is_empty() => Ok(path),
            _ => Err(ConfigError::MissingPath { kind, role }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port of the dev server.
    pub port: u16,
    /// Preferred port of the reload websocket; falls back to an ephemeral
    /// port when taken.
    pub ws_port: u16,
    /// Directory served by the dev server.
    pub root: Utf8PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            ws_port: 1337,
            root: "src".into(),
        }
    }
}

/// Variables injected into markup preprocessing.
pub type Context = BTreeMap<String, String>;

fn context_dev() -> Context {
    BTreeMap::from([
        ("NODE_ENV".to_string(), "development".to_string()),
        ("DEBUG".to_string(), "true".to_string()),
    ])
}

fn context_prod() -> Context {
    BTreeMap::from([
        ("NODE_ENV".to_string(), "production".to_string()),
        ("DEBUG".to_string(), "false".to_string()),
    ])
}

#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub server: ServerConfig,
    pub context_dev: Context,
    pub context_prod: Context,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            server: ServerConfig::default(),
            context_dev: context_dev(),
            context_prod: context_prod(),
        }
    }
}

impl Config {
    /// Load the config: compiled-in defaults, overlaid with `path` when the
    /// file exists, then validated.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::FileSystem {
                path: path.to_owned(),
                source,
            })?;
            let overlay: Overlay = toml::from_str(&text).map_err(Box::new)?;
            overlay.apply(&mut config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every (kind, role) pair a registered task unit needs is
    /// present and that every watch glob compiles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in AssetKind::ALL {
            self.paths.resolve(kind, PathRole::Source)?;
            self.paths.resolve(kind, PathRole::Build)?;
            let watch = self.paths.resolve(kind, PathRole::Watch)?;
            glob::Pattern::new(watch.as_str())?;
        }

        // Only the kinds with a dev task write intermediate output.
        for kind in [AssetKind::Markup, AssetKind::Script, AssetKind::Style] {
            self.paths.resolve(kind, PathRole::Intermediate)?;
        }

        Ok(())
    }
}

// TOML overlay. Every field is optional; omitted fields keep their default.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Overlay {
    #[serde(default)]
    paths: PathsOverlay,
    #[serde(default)]
    server: ServerOverlay,
    #[serde(default)]
    context: ContextOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsOverlay {
    markup: Option<PathSetOverlay>,
    script: Option<PathSetOverlay>,
    style: Option<PathSetOverlay>,
    image: Option<PathSetOverlay>,
    font: Option<PathSetOverlay>,
    build_root: Option<Utf8PathBuf>,
    cache_root: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathSetOverlay {
    source: Option<Utf8PathBuf>,
    intermediate: Option<Utf8PathBuf>,
    build: Option<Utf8PathBuf>,
    watch: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerOverlay {
    port: Option<u16>,
    ws_port: Option<u16>,
    root: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContextOverlay {
    dev: Option<Context>,
    prod: Option<Context>,
}

impl Overlay {
    fn apply(self, config: &mut Config) {
        for (kind, overlay) in [
            (AssetKind::Markup, self.paths.markup),
            (AssetKind::Script, self.paths.script),
            (AssetKind::Style, self.paths.style),
            (AssetKind::Image, self.paths.image),
            (AssetKind::Font, self.paths.font),
        ] {
            let Some(overlay) = overlay else { continue };
            let set = match kind {
                AssetKind::Markup => &mut config.paths.markup,
                AssetKind::Script => &mut config.paths.script,
                AssetKind::Style => &mut config.paths.style,
                AssetKind::Image => &mut config.paths.image,
                AssetKind::Font => &mut config.paths.font,
            };
            if let Some(source) = overlay.source {
                set.source = source;
            }
            if let Some(intermediate) = overlay.intermediate {
                set.intermediate = Some(intermediate);
            }
            if let Some(build) = overlay.build {
                set.build = build;
            }
            if let Some(watch) = overlay.watch {
                set.watch = watch;
            }
        }

        if let Some(build_root) = self.paths.build_root {
            config.paths.build_root = build_root;
        }
        if let Some(cache_root) = self.paths.cache_root {
            config.paths.cache_root = cache_root;
        }

        if let Some(port) = self.server.port {
            config.server.port = port;
        }
        if let Some(ws_port) = self.server.ws_port {
            config.server.ws_port = ws_port;
        }
        if let Some(root) = self.server.root {
            config.server.root = root;
        }

        if let Some(dev) = self.context.dev {
            config.context_dev = dev;
        }
        if let Some(prod) = self.context.prod {
            config.context_prod = prod;
        }
    }
}
