//! Progress bar driven by task snapshots.

use indicatif::{ProgressBar, ProgressStyle};

use fetcher_core::{DownloadState, ProgressListener, TaskSnapshot};

const BAR_TEMPLATE: &str = "{bar:40} {bytes}/{total_bytes} {bytes_per_sec} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner} {bytes} {bytes_per_sec} {msg}";

/// Renders download progress on stderr.
///
/// Starts as a spinner and switches to a bar once the size is announced.
pub(crate) struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new(visible: bool) -> Self {
        let bar = if visible {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template(SPINNER_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }
}

impl ProgressListener for ProgressReporter {
    fn task_updated(&self, snapshot: &TaskSnapshot) {
        if let Some(expected) = snapshot.expected_size
            && self.bar.length() != Some(expected)
        {
            self.bar.set_style(
                ProgressStyle::with_template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            self.bar.set_length(expected);
        }
        self.bar.set_position(snapshot.done_size);

        match snapshot.state {
            DownloadState::Ok => self.bar.finish_and_clear(),
            DownloadState::Failed | DownloadState::Cancelled => {
                self.bar.abandon_with_message(snapshot.state.as_str());
            }
            DownloadState::NotRunning | DownloadState::Running => {}
        }
    }
}
