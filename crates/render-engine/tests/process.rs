//! FfmpegExecutor supervision, with small shell scripts standing in for the
//! engine binary. The scripts ignore their arguments except the last one,
//! which is always the output path.

#![cfg(unix)]

mod support;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use duet_common::error::DuetError;
use duet_render_engine::{
    partial_path, render, CancelHandle, CodecSettings, FfmpegExecutor, GraphExecutor,
    ProgressCallback, RenderOptions,
};

use support::scenario_graph;

fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn options() -> RenderOptions {
    RenderOptions::new(CodecSettings::default()).with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn successful_process_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fake_engine(
        dir.path(),
        r#"for last; do :; done
echo "out_time_us=5000000"
echo "progress=continue"
echo "out_time_us=10000000"
echo "progress=end"
printf 'encoded' > "$last""#,
    );
    let executor = FfmpegExecutor::new(&engine);
    assert!(executor.is_available().await);

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let progress: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p.progress));

    let target = dir.path().join("reaction.mp4");
    render(&scenario_graph(), &target, &options(), &executor, Some(&progress))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"encoded");
    let reports = reports.lock().unwrap();
    assert!(reports.contains(&0.5));
    assert_eq!(reports.last(), Some(&1.0));
}

#[tokio::test]
async fn failing_process_keeps_stderr_tail() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fake_engine(
        dir.path(),
        r#"for last; do :; done
printf 'partial' > "$last"
for i in 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25; do
  echo "noise line $i" >&2
done
echo "Error initializing complex filters." >&2
exit 1"#,
    );
    let executor = FfmpegExecutor::new(&engine);
    let target = dir.path().join("reaction.mp4");

    let err = render(&scenario_graph(), &target, &options(), &executor, None)
        .await
        .unwrap_err();
    match err {
        DuetError::RenderEngineFailed {
            exit_code,
            diagnostic_tail,
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(diagnostic_tail.ends_with("Error initializing complex filters."));
            assert!(!diagnostic_tail.contains("noise line 1\n"));
            assert_eq!(diagnostic_tail.lines().count(), 20);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!target.exists());
    assert!(!partial_path(&target, "mp4").exists());
}

#[tokio::test]
async fn hung_process_is_killed_at_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fake_engine(
        dir.path(),
        r#"for last; do :; done
printf 'partial' > "$last"
echo "stuck" >&2
exec sleep 30"#,
    );
    let executor = FfmpegExecutor::new(&engine);
    let target = dir.path().join("reaction.mp4");

    let started = Instant::now();
    let err = render(
        &scenario_graph(),
        &target,
        &options().with_timeout(Duration::from_millis(300)),
        &executor,
        None,
    )
    .await
    .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        DuetError::RenderTimedOut {
            diagnostic_tail, ..
        } => assert_eq!(diagnostic_tail, "stuck"),
        other => panic!("unexpected error {other}"),
    }
    assert!(!partial_path(&target, "mp4").exists());
}

#[tokio::test]
async fn cancel_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fake_engine(
        dir.path(),
        r#"for last; do :; done
printf 'partial' > "$last"
exec sleep 30"#,
    );
    let executor = FfmpegExecutor::new(&engine);
    let target = dir.path().join("reaction.mp4");
    let handle = CancelHandle::new();

    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.cancel();
        })
    };

    let started = Instant::now();
    let err = render(
        &scenario_graph(),
        &target,
        &options().with_cancel(handle.token()),
        &executor,
        None,
    )
    .await
    .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, DuetError::RenderCancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!target.exists());
    assert!(!partial_path(&target, "mp4").exists());
}
