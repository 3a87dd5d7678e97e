pub mod calendar;
pub mod http;
pub mod notify;

pub use calendar::HttpCalendarClient;
pub use notify::{LogNotifier, WebhookNotifier};
