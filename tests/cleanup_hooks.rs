//! Cleanup accounting, only built with `--features test-hooks`.

#![cfg(all(unix, feature = "test-hooks"))]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use mathrender_core::workspace::{get_cleanup_call_count, reset_cleanup_call_count};
use mathrender_core::{CompilationPipeline, OutputKind, RenderConfig};
use tempfile::TempDir;

#[test]
fn cleanup_runs_once_per_render_and_never_for_guard_rejections() {
    let dir = TempDir::new().expect("temp dir");
    let latex = dir.path().join("fake-latex");
    fs::write(&latex, "#!/bin/sh\nexit 1\n").expect("write script");
    let mut perms = fs::metadata(&latex).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&latex, perms).expect("set perms");

    let config = RenderConfig {
        work_dir: dir.path().join("work"),
        primary_command: latex.display().to_string(),
        ..RenderConfig::default()
    };
    let pipeline = CompilationPipeline::new(config)
        .expect("valid config")
        .with_diagnostics(None);

    reset_cleanup_call_count();

    assert!(pipeline.render(r"\input{x}", OutputKind::Vector).is_err());
    assert_eq!(get_cleanup_call_count(), 0);

    // no DVI is produced, so every render fails after the workspace exists
    for _ in 0..3 {
        assert!(pipeline.render("x", OutputKind::Vector).is_err());
    }
    assert_eq!(get_cleanup_call_count(), 3);
}
