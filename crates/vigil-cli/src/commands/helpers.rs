//! Helper utility functions for CLI commands

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};
use vigil_core::{
    daemon::socket_path,
    ipc::{IpcClient, IpcRequest, IpcResponse},
};

/// Send `request` to the running engine. Engine errors become `Err`.
pub async fn send(request: IpcRequest) -> Result<IpcResponse> {
    let client = IpcClient::new(&socket_path()?);
    match client.send_command(request).await? {
        IpcResponse::Error { kind, message } => {
            log::debug!("Engine rejected request ({kind})");
            bail!("{message}")
        }
        response => Ok(response),
    }
}

/// Error for a response of the wrong shape
pub fn unexpected(response: &IpcResponse) -> anyhow::Error {
    anyhow::anyhow!("Unexpected response from daemon: {response:?}")
}

/// Safely truncate a string to a maximum number of characters (not bytes).
/// This avoids panics when slicing multi-byte UTF-8 characters.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// Render seconds as `1h 02m`, `12m 05s` or `45s`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

/// Local wall-clock time of `at`
pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}
