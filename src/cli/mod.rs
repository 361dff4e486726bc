use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Gateway Args ---
    /// Remote message gateway implementation (http, memory)
    #[arg(long, env = "GATEWAY_TYPE", default_value = "http")]
    pub gateway_type: String,

    /// Base URL of the message REST API (e.g., http://127.0.0.1:4000/api)
    #[arg(long, env = "API_BASE_URL", default_value = "http://127.0.0.1:4000/api")]
    pub api_base_url: String,

    /// WebSocket endpoint for realtime message delivery
    #[arg(long, env = "REALTIME_URL", default_value = "ws://127.0.0.1:4000/realtime")]
    pub realtime_url: String,

    /// Optional API key. Sent as a bearer token and used to sign the realtime handshake.
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Timeout in seconds for each REST request.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "15")]
    pub request_timeout_secs: u64,

    // --- Viewer Args ---
    /// Id of the user the engine syncs for (seeker id, or org id for employers)
    #[arg(long, env = "VIEWER_ID")]
    pub viewer_id: String,

    /// Role of the viewer (seeker, org)
    #[arg(long, env = "VIEWER_ROLE", default_value = "seeker")]
    pub viewer_role: String,

    // --- Sync Args ---
    /// Seconds between silent conversation list refreshes.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    pub poll_interval_secs: u64,

    /// How a silent refresh folds into local state (merge, replace).
    /// `merge` keeps locally newer summaries delivered by the realtime channel.
    #[arg(long, env = "REFRESH_POLICY", default_value = "merge")]
    pub refresh_policy: String,

    /// Initial delay in milliseconds before reconnecting a dropped realtime subscription.
    #[arg(long, env = "RECONNECT_BACKOFF_BASE_MS", default_value = "500")]
    pub reconnect_backoff_base_ms: u64,

    /// Upper bound in milliseconds for the reconnect delay.
    #[arg(long, env = "RECONNECT_BACKOFF_MAX_MS", default_value = "30000")]
    pub reconnect_backoff_max_ms: u64,

    // --- General App Args ---
    /// Conversation id to open once the list is loaded.
    #[arg(long, env = "OPEN_CONVERSATION")]
    pub open_conversation: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
