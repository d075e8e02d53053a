//! Live terminal rendering of `PipelineEngine::stats`, polled at the
//! ~2s cadence `spec.md` §4.D.5 expects the UI to use.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{PipelineEngine, Snapshot};

pub fn print_once(snapshot: &Snapshot) {
    println!("{}", render_line(snapshot));
}

pub async fn watch(engine: &Arc<PipelineEngine>) {
    let bar = ProgressBar::new(engine.stats().total.max(1));
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        let snapshot = engine.stats();
        bar.set_length(snapshot.total.max(1));
        bar.set_position(snapshot.processed);
        bar.set_message(render_line(&snapshot));

        if !snapshot.is_running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    bar.finish_with_message(render_line(&engine.stats()));
}

fn render_line(snapshot: &Snapshot) -> String {
    format!(
        "{} succeeded={} failed={} cancelled={} ocr_active={} llm_active={} in_queue={}",
        style(format!("{}/{}", snapshot.processed, snapshot.total)).bold(),
        snapshot.succeeded,
        snapshot.failed,
        snapshot.cancelled,
        snapshot.ocr_active,
        snapshot.llm_active,
        snapshot.in_queue,
    )
}
