use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{ImageEncoder, Rgba, RgbaImage};
use pagesmith::config::PipelineConfig;
use pagesmith::models::{ReloadEvent, ReloadKind};
use pagesmith::pipeline::{Pipeline, PipelineError};
use pagesmith::transform::{FileOutcome, MinifyCss, MinifyHtml, SourceFile, Transform};
use pagesmith::watcher::ChannelSource;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn write(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).expect("Failed to create fixture dir");
    fs::write(path, contents).expect("Failed to write fixture");
}

fn png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(16, 16, Rgba([200, 30, 30, 255]));
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), 16, 16, image::ColorType::Rgba8)
        .expect("Failed to encode fixture image");
    out
}

/// A small project using every category.
fn site() -> (TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = PipelineConfig::rooted_at(dir.path());
    let src = &config.src_root;

    write(
        src,
        "index.html",
        "<!DOCTYPE html>\n<html>\n  <head>\n    <link rel=\"stylesheet\" href=\"/public/css/main.css\">\n  </head>\n  <body>\n    <h1>Home</h1>\n  </body>\n</html>\n",
    );
    write(src, "about/team.html", "<html>\n  <body>\n    <p>Team</p>\n  </body>\n</html>\n");
    write(src, "public/scss/_vars.scss", "$accent: #ff0000;\n");
    write(
        src,
        "public/scss/main.scss",
        "@import 'vars';\n.nav {\n  a { color: $accent; }\n}\n",
    );
    write(src, "public/css/extra.css", ".extra {\n  margin: 0px 0px 0px 0px;\n}\n");
    write(src, "public/img/logo.png", png());
    write(src, "public/font/sans.woff2", [0u8, 159, 146, 150]);
    write(src, "public/js/app.js", "// entry\nfunction start() {\n    return 42;\n}\n");

    (dir, config)
}

async fn next_event(rx: &mut broadcast::Receiver<ReloadEvent>) -> ReloadEvent {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("Timed out waiting for reload event")
        .expect("Reload channel closed")
}

async fn assert_quiet(rx: &mut broadcast::Receiver<ReloadEvent>) {
    let extra = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(extra.is_err(), "unexpected reload event: {:?}", extra);
}

mod build {
    use super::*;

    #[tokio::test]
    async fn writes_every_category_with_relative_paths() {
        let (_dir, config) = site();
        let dist = config.dist_root.clone();
        let pipeline = Pipeline::new(config).unwrap();

        let report = pipeline.build().await.expect("Build failed");

        assert_eq!(report.failures().count(), 0);
        for rel in [
            "index.html",
            "about/team.html",
            "public/css/main.css",
            "public/css/extra.css",
            "public/img/logo.png",
            "public/font/sans.woff2",
        ] {
            assert!(dist.join(rel).is_file(), "missing {}", rel);
        }
        assert!(!dist.join("public/js").exists());
        assert!(!dist.join("public/css/_vars.css").exists());
    }

    #[tokio::test]
    async fn outputs_are_minified_and_stable() {
        let (_dir, config) = site();
        let dist = config.dist_root.clone();
        let pipeline = Pipeline::new(config).unwrap();
        pipeline.build().await.expect("Build failed");

        let html = fs::read(dist.join("index.html")).unwrap();
        let css = fs::read(dist.join("public/css/main.css")).unwrap();
        assert!(!String::from_utf8_lossy(&html).contains("\n    "));
        assert!(String::from_utf8_lossy(&css).contains(".nav a{color:"));

        for (transform, bytes) in [
            (&MinifyHtml::new() as &dyn Transform, html),
            (&MinifyCss as &dyn Transform, css),
        ] {
            let again = transform.apply(SourceFile::new("x", bytes.clone()));
            assert_eq!(again, FileOutcome::Emit(SourceFile::new("x", bytes)));
        }
    }

    #[tokio::test]
    async fn pages_inside_asset_directories_are_written_once() {
        let (_dir, config) = site();
        let page = "<p>\n  preview\n</p>\n";
        write(&config.src_root, "public/img/preview.html", page);
        let target = config.dist_root.join("public/img/preview.html");

        let report = Pipeline::new(config.clone()).unwrap().build().await.expect("Build failed");

        let markup = report.stage("minify-markup").unwrap();
        let images = report.stage("minify-images").unwrap();
        assert!(!markup.written.contains(&target));
        assert!(images.written.contains(&target));
        assert_eq!(fs::read_to_string(&target).unwrap(), page);
    }

    #[tokio::test]
    async fn fonts_are_copied_byte_for_byte() {
        let (_dir, config) = site();
        let dist = config.dist_root.clone();
        Pipeline::new(config).unwrap().build().await.expect("Build failed");

        assert_eq!(
            fs::read(dist.join("public/font/sans.woff2")).unwrap(),
            vec![0u8, 159, 146, 150]
        );
    }

    #[tokio::test]
    async fn removes_stale_output_before_writing() {
        let (_dir, config) = site();
        let dist = config.dist_root.clone();
        write(&dist, "stale.html", "<p>old</p>");
        write(&dist, "public/css/removed.css", ".gone{}");

        Pipeline::new(config).unwrap().build().await.expect("Build failed");

        assert!(!dist.join("stale.html").exists());
        assert!(!dist.join("public/css/removed.css").exists());
        assert!(dist.join("index.html").exists());
    }

    #[tokio::test]
    async fn empty_categories_succeed_with_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::rooted_at(dir.path());
        write(&config.src_root, "index.html", "<p>only markup</p>");
        let dist = config.dist_root.clone();

        let report = Pipeline::new(config).unwrap().build().await.expect("Build failed");

        for stage in ["copy-fonts", "minify-images", "compile-styles", "minify-styles"] {
            let stage = report.stage(stage).expect("stage missing from report");
            assert_eq!(stage.processed, 0);
            assert!(stage.written.is_empty());
        }
        assert!(dist.join("index.html").exists());
        assert!(!dist.join("public").exists());
    }

    #[tokio::test]
    async fn scripts_are_minified_when_enabled() {
        let (_dir, config) = site();
        let dist = config.dist_root.clone();

        let report = Pipeline::new(config.with_scripts(true))
            .unwrap()
            .build()
            .await
            .expect("Build failed");

        assert!(report.stage("minify-scripts").is_some());
        let js = fs::read_to_string(dist.join("public/js/app.js")).unwrap();
        assert!(!js.contains("// entry"));
        assert!(js.contains("function start()"));
    }

    #[tokio::test]
    async fn file_failures_do_not_fail_the_build() {
        let (_dir, config) = site();
        write(&config.src_root, "public/scss/broken.scss", ".x { color: red;");
        let dist = config.dist_root.clone();

        let report = Pipeline::new(config).unwrap().build().await.expect("Build failed");

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].path.ends_with("broken.scss"));
        assert!(dist.join("public/css/main.css").exists());
    }

    #[tokio::test]
    async fn clean_failure_is_fatal() {
        let (_dir, mut config) = site();
        // A regular file where the output directory should be
        let blocker = config.src_root.parent().unwrap().join("dist-file");
        fs::write(&blocker, "not a directory").unwrap();
        config.dist_root = blocker;

        let result = Pipeline::new(config).unwrap().build().await;

        assert!(matches!(result, Err(PipelineError::Clean { .. })));
    }
}

mod dev {
    use super::*;

    async fn start(config: &PipelineConfig) -> (Pipeline, ChannelSource, pagesmith::watcher::WatchSet) {
        let pipeline = Pipeline::new(config.clone()).unwrap();
        let source = ChannelSource::new();
        let watchers = pipeline
            .start_dev(&mut source.clone())
            .await
            .expect("Failed to start dev mode");
        // Let file modification times move past the registration stamps.
        tokio::time::sleep(Duration::from_millis(50)).await;
        (pipeline, source, watchers)
    }

    #[tokio::test]
    async fn compiles_styles_before_watching() {
        let (_dir, config) = site();
        let (_pipeline, _source, watchers) = start(&config).await;

        assert!(config.src_root.join("public/css/main.css").exists());
        assert!(watchers.contains("compile-styles"));
        assert!(watchers.contains("watch-markup"));
        assert!(!watchers.contains("watch-style"));
        assert!(!config.dist_root.exists());
    }

    #[tokio::test]
    async fn sass_change_recompiles_once_and_injects_once() {
        let (_dir, config) = site();
        let (pipeline, source, _watchers) = start(&config).await;
        let mut rx = pipeline.context().reload().subscribe();

        write(&config.src_root, "public/scss/main.scss", ".nav { color: blue; }\n");
        let hits = source.touch(config.src_root.join("public/scss/main.scss"));

        assert_eq!(hits, 1);
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, ReloadKind::InjectCss);
        assert_eq!(event.paths, vec!["/public/css/main.css".to_string()]);
        assert_quiet(&mut rx).await;

        let css = fs::read_to_string(config.src_root.join("public/css/main.css")).unwrap();
        assert!(css.contains("blue"));
    }

    #[tokio::test]
    async fn markup_change_reloads_only_the_changed_page() {
        let (_dir, config) = site();
        let (pipeline, source, _watchers) = start(&config).await;
        let mut rx = pipeline.context().reload().subscribe();

        write(&config.src_root, "index.html", "<h1>Changed</h1>");
        source.touch(config.src_root.join("index.html"));

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, ReloadKind::Reload);
        assert_eq!(event.paths, vec!["/index.html".to_string()]);
        // Sources are served as-is in dev mode.
        assert!(!config.dist_root.exists());
    }

    #[tokio::test]
    async fn broken_sass_does_not_stop_the_watcher() {
        let (_dir, config) = site();
        let (pipeline, source, _watchers) = start(&config).await;
        let mut rx = pipeline.context().reload().subscribe();

        write(&config.src_root, "public/scss/main.scss", ".nav { color: red;");
        source.touch(config.src_root.join("public/scss/main.scss"));
        assert_quiet(&mut rx).await;

        write(&config.src_root, "about/team.html", "<p>Still alive</p>");
        source.touch(config.src_root.join("about/team.html"));
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, ReloadKind::Reload);
        assert_eq!(event.paths, vec!["/about/team.html".to_string()]);

        write(&config.src_root, "public/scss/main.scss", ".nav { color: green; }");
        source.touch(config.src_root.join("public/scss/main.scss"));
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, ReloadKind::InjectCss);
    }
}
