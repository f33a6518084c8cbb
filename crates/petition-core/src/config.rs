use chrono::Duration;

/// Site-level thresholds and feature switches consumed by the engine.
///
/// These values are configuration the engine depends on but does not own;
/// the hosting application supplies them at construction time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Validated signatures required before a petition enters moderation.
    pub threshold_for_moderation: u64,

    /// Validated signatures required before an open petition is referred
    /// to the relevant committee.
    pub threshold_for_referral: u64,

    /// Validated signatures required before a petition qualifies for a
    /// parliamentary debate.
    pub threshold_for_debate: u64,

    /// How long a signature-collecting petition stays open once published.
    pub petition_duration: Duration,

    /// Switches off every threshold evaluation: no timestamps are written
    /// and no threshold-driven state changes happen.
    pub disable_thresholds_and_debates: bool,

    /// Switches off constituency-local petition features in the hosting
    /// application. Carried here so collaborators read one config source.
    pub disable_local_petitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold_for_moderation: 5,
            threshold_for_referral: 250,
            threshold_for_debate: 10_000,
            petition_duration: Duration::weeks(26),
            disable_thresholds_and_debates: false,
            disable_local_petitions: false,
        }
    }
}
