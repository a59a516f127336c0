/// Runtime knobs for the intake pipeline.
///
/// `stale_after_secs` is the liveness heuristic for crash recovery, not a
/// hard deadline: a handler that is alive but slower than the window risks
/// a duplicate concurrent retry being admitted.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Shared secret for the provider's HMAC signature scheme.
    pub webhook_secret: String,
    /// Maximum accepted age of the signed timestamp, in seconds.
    pub signature_tolerance_secs: i64,
    /// Age at which a `processing` row is considered an abandoned lock.
    pub stale_after_secs: i64,
    /// Capacity of the in-process dispatch queue.
    pub queue_capacity: usize,
    /// Bearer token guarding the operator ledger surface. None disables auth.
    pub operator_api_token: Option<String>,
}

impl IntakeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("INTAKE_WEBHOOK_SECRET")
            && !value.trim().is_empty()
        {
            config.webhook_secret = value;
        }
        if let Ok(value) = std::env::var("INTAKE_SIGNATURE_TOLERANCE_SECS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.signature_tolerance_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("INTAKE_STALE_AFTER_SECS")
            && let Ok(parsed) = value.parse::<i64>()
        {
            config.stale_after_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("INTAKE_QUEUE_CAPACITY")
            && let Ok(parsed) = value.parse::<usize>()
        {
            config.queue_capacity = parsed.max(1);
        }
        if let Ok(value) = std::env::var("INTAKE_OPERATOR_API_TOKEN")
            && !value.trim().is_empty()
        {
            config.operator_api_token = Some(value);
        }

        config
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            signature_tolerance_secs: 300,
            stale_after_secs: 300,
            queue_capacity: 256,
            operator_api_token: None,
        }
    }
}
