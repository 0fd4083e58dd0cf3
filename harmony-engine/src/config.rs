use harmony_types::ClientId;

/// When out-of-order commits are folded into snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildPolicy {
    /// Submission rebuilds before returning. A replay failure rejects the
    /// submitted commits.
    #[default]
    OnSubmit,
    /// Submission only appends to the log and marks entities stale. The
    /// first read of a stale entity rebuilds it.
    OnRead,
}

/// Configuration for a [`DataModel`](crate::DataModel).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Author id stamped on locally created commits.
    pub client_id: ClientId,
    pub rebuild_policy: RebuildPolicy,
    /// Check the commit hash chain, then replay the whole log after every
    /// submission and compare it with the stored snapshots. Expensive;
    /// meant for tests and debugging.
    pub verify_after_submit: bool,
}

impl EngineConfig {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rebuild_policy(mut self, policy: RebuildPolicy) -> Self {
        self.rebuild_policy = policy;
        self
    }

    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_after_submit = verify;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId::new(),
            rebuild_policy: RebuildPolicy::default(),
            verify_after_submit: false,
        }
    }
}
