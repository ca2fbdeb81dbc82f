pub mod batch;
pub mod check;
pub mod init;
pub mod plan;
pub mod probe;
pub mod render;

use std::io::Write;

use duet_render_engine::{CancelHandle, ProgressCallback};

/// Cancel the handle on Ctrl-C. Abort the returned task once done.
pub(crate) fn cancel_on_ctrl_c(handle: &CancelHandle) -> tokio::task::JoinHandle<()> {
    let handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            handle.cancel();
        }
    })
}

pub(crate) fn progress_printer() -> ProgressCallback {
    Box::new(|p| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.eta_secs,
        );
        let _ = std::io::stdout().flush();
    })
}
