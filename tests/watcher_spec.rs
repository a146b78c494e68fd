use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pagesmith::config::{pattern_under, PipelineConfig};
use pagesmith::pipeline::Pipeline;
use pagesmith::watcher::{ChangeBatch, ChangeSource, ChannelSource, NotifySource};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn write(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).expect("Failed to create fixture dir");
    fs::write(path, contents).expect("Failed to write fixture");
}

async fn next_batch(changes: &mut mpsc::UnboundedReceiver<ChangeBatch>) -> ChangeBatch {
    timeout(Duration::from_secs(10), changes.recv())
        .await
        .expect("Timed out waiting for a change")
        .expect("Change stream closed")
}

/// Poll `path` until it contains `needle`.
async fn wait_for(path: PathBuf, needle: &str) -> String {
    timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(text) = fs::read_to_string(&path) {
                if text.contains(needle) {
                    return text;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never contained {}", path.display(), needle))
}

mod notify_source {
    use super::*;

    fn watched() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("pages")).unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn reports_files_written_under_the_pattern() {
        let (_dir, root) = watched();
        let mut source = NotifySource::new(Duration::from_millis(50));
        let mut changes = source
            .subscribe(&pattern_under(&root, "**/*.html"))
            .expect("Failed to watch");
        tokio::time::sleep(Duration::from_millis(100)).await;

        write(&root, "pages/index.html", "<p>hi</p>");

        let batch = next_batch(&mut changes).await;
        assert!(batch.iter().any(|p| p.ends_with("pages/index.html")));
    }

    #[tokio::test]
    async fn filters_out_files_the_pattern_does_not_match() {
        let (_dir, root) = watched();
        let mut source = NotifySource::new(Duration::from_millis(50));
        let mut changes = source
            .subscribe(&pattern_under(&root, "**/*.html"))
            .expect("Failed to watch");
        tokio::time::sleep(Duration::from_millis(100)).await;

        write(&root, "pages/notes.txt", "not markup");
        write(&root, "pages/about.html", "<p>about</p>");

        let batch = next_batch(&mut changes).await;
        assert!(!batch.is_empty());
        assert!(batch
            .iter()
            .all(|p| p.extension().is_some_and(|ext| ext == "html")));
    }

    #[tokio::test]
    async fn dropping_the_source_closes_the_stream() {
        let (_dir, root) = watched();
        let mut source = NotifySource::new(Duration::from_millis(50));
        let mut changes = source
            .subscribe(&pattern_under(&root, "**/*.html"))
            .expect("Failed to watch");

        drop(source);

        let end = timeout(Duration::from_secs(10), changes.recv())
            .await
            .expect("Change stream stayed open");
        assert!(end.is_none());
    }
}

mod build_watch {
    use super::*;

    async fn built_site() -> (tempfile::TempDir, PipelineConfig, Pipeline) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = PipelineConfig::rooted_at(dir.path());
        write(&config.src_root, "index.html", "<html><body><p>Home</p></body></html>");
        write(
            &config.src_root,
            "public/scss/main.scss",
            ".nav {\n  a { color: #abcdef; }\n}\n",
        );

        let pipeline = Pipeline::new(config.clone()).unwrap();
        pipeline.build().await.expect("Build failed");
        (dir, config, pipeline)
    }

    #[tokio::test]
    async fn attaches_sass_style_and_markup_watchers() {
        let (_dir, _config, pipeline) = built_site().await;
        let source = ChannelSource::new();

        let watchers = pipeline
            .watch_build(&mut source.clone())
            .expect("Failed to watch");

        assert_eq!(watchers.len(), 3);
        assert!(watchers.contains("compile-styles"));
        assert!(watchers.contains("minify-styles"));
        assert!(watchers.contains("minify-markup"));
    }

    #[tokio::test]
    async fn sass_change_rebuilds_the_output_stylesheet() {
        let (_dir, config, pipeline) = built_site().await;
        let source = ChannelSource::new();
        let _watchers = pipeline
            .watch_build(&mut source.clone())
            .expect("Failed to watch");
        // Let file modification times move past the registration stamps.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let scss = config.src_root.join("public/scss/main.scss");
        fs::write(&scss, ".nav {\n  a { color: #123456; }\n}\n").unwrap();
        source.touch(&scss);

        // The compiled stylesheet is itself a style source.
        let compiled = config.src_root.join("public/css/main.css");
        wait_for(compiled.clone(), "#123456").await;
        source.touch(&compiled);

        let css = wait_for(config.dist_root.join("public/css/main.css"), "#123456").await;
        assert!(!css.contains("#abcdef"));
    }

    #[tokio::test]
    async fn draining_lets_triggered_runs_finish() {
        let (_dir, config, pipeline) = built_site().await;
        let source = ChannelSource::new();
        let watchers = pipeline
            .watch_build(&mut source.clone())
            .expect("Failed to watch");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let scss = config.src_root.join("public/scss/main.scss");
        fs::write(&scss, ".nav {\n  a { color: #123456; }\n}\n").unwrap();
        assert_eq!(source.touch(&scss), 1);
        drop(source);

        timeout(Duration::from_secs(10), watchers.drain())
            .await
            .expect("Watch tasks did not finish");

        let css = fs::read_to_string(config.src_root.join("public/css/main.css")).unwrap();
        assert!(css.contains("#123456"));
    }
}
