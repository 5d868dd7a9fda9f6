//! Key layout for one named queue.

/// Namespaced keys under `auditgraph:queue:<name>:`.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            prefix: format!("auditgraph:queue:{}", name),
        }
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}{}", self.job_prefix(), id)
    }

    /// Prefix of every job key; scripts append the job id.
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.prefix)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_by_queue() {
        let keys = QueueKeys::new("neo4j-sync");
        assert_eq!(keys.job("abc"), "auditgraph:queue:neo4j-sync:job:abc");
        assert_eq!(keys.wait(), "auditgraph:queue:neo4j-sync:wait");
        assert_eq!(keys.active(), "auditgraph:queue:neo4j-sync:active");
        assert_ne!(QueueKeys::new("a").failed(), QueueKeys::new("b").failed());
    }
}
