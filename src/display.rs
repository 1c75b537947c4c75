//! Display collaborator seam
//!
//! The appliance shows session status on a small screen; rendering is
//! outside this core. [`LogDisplay`] routes status lines through tracing so
//! headless runs still surface them.

/// User-visible status surface
pub trait Display: Send {
    /// Show a status line
    fn show_status(&self, status: &str);

    /// Show a status line with a secondary detail line
    fn show_status_with_detail(&self, status: &str, detail: &str);
}

/// Logs status lines instead of drawing them
#[derive(Debug, Default)]
pub struct LogDisplay;

impl Display for LogDisplay {
    fn show_status(&self, status: &str) {
        tracing::info!(status, "display");
    }

    fn show_status_with_detail(&self, status: &str, detail: &str) {
        tracing::info!(status, detail, "display");
    }
}
