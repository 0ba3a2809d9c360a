//! The fixed task set and its composition. Every task unit reads its paths
//! from the registry, so a missing (kind, role) pair fails here, at startup,
//! before anything runs.

use std::fs;

use camino::Utf8PathBuf;

use crate::cache::ImageCache;
use crate::config::{AssetKind, BROWSER_TARGETS, Config, PathRole};
use crate::error::ConfigError;
use crate::graph::{Registry, action, group, series, task, unit};
use crate::pipeline::{Pipeline, Rename};
use crate::server::Notifier;
use crate::task::{RunMode, TaskUnit, glob_base};
use crate::units::images::RecompressImage;
use crate::units::includes::{IncludeStyle, ResolveIncludes};
use crate::units::markup::Preprocess;
use crate::units::scripts::MinifyJs;
use crate::units::styles::{Autoprefix, CompileScss, StripUnusedCss};

/// Build the full task registry for a validated configuration.
pub fn registry(config: &Config, notifier: &Notifier) -> Result<Registry, ConfigError> {
    config.validate()?;

    let paths = &config.paths;
    let cache = ImageCache::new(paths.cache_root.clone());
    let mut registry = Registry::new();

    let style_src = paths.resolve(AssetKind::Style, PathRole::Source)?;
    let style_dir = glob_base(style_src);

    registry.insert(
        "styles:dev",
        unit(
            TaskUnit::new(
                "styles:dev",
                RunMode::Dev,
                style_src,
                Pipeline::new(vec![
                    Box::new(CompileScss::new(&style_dir, grass::OutputStyle::Expanded)),
                    Box::new(Autoprefix::new(&BROWSER_TARGETS)),
                ]),
                paths.resolve(AssetKind::Style, PathRole::Intermediate)?,
            )
            .with_notifier(notifier.clone()),
        ),
    )?;

    // the unused-selector strip reads the markup sources, which are stable
    // regardless of the order prod tasks finish in
    let markup_src = paths.resolve(AssetKind::Markup, PathRole::Source)?;
    let markup_dev = paths.resolve(AssetKind::Markup, PathRole::Intermediate)?;
    let markup_globs: Vec<Utf8PathBuf> =
        vec![markup_dev.join("*.html"), markup_src.to_owned()];

    registry.insert(
        "styles:prod",
        unit(TaskUnit::new(
            "styles:prod",
            RunMode::Prod,
            style_src,
            Pipeline::new(vec![
                Box::new(CompileScss::new(&style_dir, grass::OutputStyle::Compressed)),
                Box::new(Autoprefix::new(&BROWSER_TARGETS)),
                Box::new(Rename::To("style.min.css")),
                Box::new(StripUnusedCss::new(markup_globs)),
            ]),
            paths.resolve(AssetKind::Style, PathRole::Build)?,
        )),
    )?;

    let script_src = paths.resolve(AssetKind::Script, PathRole::Source)?;

    registry.insert(
        "js:dev",
        unit(
            TaskUnit::new(
                "js:dev",
                RunMode::Dev,
                script_src,
                Pipeline::new(vec![Box::new(ResolveIncludes::new(IncludeStyle::Script))]),
                paths.resolve(AssetKind::Script, PathRole::Intermediate)?,
            )
            .with_notifier(notifier.clone()),
        ),
    )?;

    registry.insert(
        "js:prod",
        unit(TaskUnit::new(
            "js:prod",
            RunMode::Prod,
            script_src,
            Pipeline::new(vec![
                Box::new(ResolveIncludes::new(IncludeStyle::Script)),
                Box::new(MinifyJs),
                Box::new(Rename::Suffix(".min")),
            ]),
            paths.resolve(AssetKind::Script, PathRole::Build)?,
        )),
    )?;

    registry.insert(
        "html:dev",
        unit(
            TaskUnit::new(
                "html:dev",
                RunMode::Dev,
                markup_src,
                Pipeline::new(vec![
                    Box::new(ResolveIncludes::new(IncludeStyle::Markup)),
                    Box::new(Preprocess::new(config.context_dev.clone())),
                ]),
                markup_dev,
            )
            .with_notifier(notifier.clone()),
        ),
    )?;

    registry.insert(
        "html:prod",
        unit(TaskUnit::new(
            "html:prod",
            RunMode::Prod,
            markup_src,
            Pipeline::new(vec![
                Box::new(ResolveIncludes::new(IncludeStyle::Markup)),
                Box::new(Preprocess::new(config.context_prod.clone())),
            ]),
            paths.resolve(AssetKind::Markup, PathRole::Build)?,
        )),
    )?;

    registry.insert(
        "img:prod",
        unit(
            TaskUnit::new(
                "img:prod",
                RunMode::Prod,
                paths.resolve(AssetKind::Image, PathRole::Source)?,
                Pipeline::new(vec![Box::new(RecompressImage::new(cache.clone()))]),
                paths.resolve(AssetKind::Image, PathRole::Build)?,
            )
            .with_progress(),
        ),
    )?;

    registry.insert(
        "fonts:prod",
        unit(TaskUnit::new(
            "fonts:prod",
            RunMode::Prod,
            paths.resolve(AssetKind::Font, PathRole::Source)?,
            Pipeline::passthrough(),
            paths.resolve(AssetKind::Font, PathRole::Build)?,
        )),
    )?;

    let build_root = paths.build_root.clone();
    registry.insert(
        "clean",
        action("clean", move || {
            if build_root.exists() {
                fs::remove_dir_all(&build_root)?;
            }
            fs::create_dir_all(&build_root)?;
            tracing::info!("cleaned '{build_root}'");
            Ok(())
        }),
    )?;

    registry.insert(
        "cache:clear",
        action("cache:clear", move || {
            cache.clear()?;
            Ok(())
        }),
    )?;

    registry.insert(
        "prod",
        series(vec![
            task("clean"),
            group(vec![
                task("html:prod"),
                task("styles:prod"),
                task("js:prod"),
                task("img:prod"),
                task("fonts:prod"),
            ]),
        ]),
    )?;

    registry.validate()?;

    Ok(registry)
}
