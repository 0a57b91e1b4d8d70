//! User-visible status messages ("loaded", "unloaded").

use tracing::info;

/// Longest message passed on to a notifier
pub const MAX_MESSAGE_LEN: usize = 200;

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, text: &str);
}

/// Cut `text` to at most [`MAX_MESSAGE_LEN`] bytes on a char boundary.
pub fn truncate_message(text: &str) -> &str {
    if text.len() <= MAX_MESSAGE_LEN {
        return text;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Writes notifications to the log.
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    enabled: bool,
}

impl TracingNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for TracingNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, text: &str) {
        if self.enabled {
            info!("[notice] {}", truncate_message(text));
        }
    }
}
