//! Configuration for traceweave.
//!
//! Every tuned constant the engine relies on lives in [`TraceweaveConfig`]:
//! tick cadence and cap, completion phrase lists and length thresholds, the
//! two-stage inactivity timeout, history capacity, resource caps, and the
//! lookup tables for model labels and render node ids. Users construct it in
//! code; because it derives `Deserialize` with `#[serde(default)]` it can also
//! be loaded from a partial JSON document.
//!
//! # Example
//!
//! ```rust
//! use traceweave::TraceweaveConfig;
//! use std::time::Duration;
//!
//! let config = TraceweaveConfig {
//!     max_ticks: 120,
//!     soft_inactivity: Duration::from_secs(60),
//!     ..TraceweaveConfig::default()
//! };
//! assert_eq!(config.history_capacity, 10);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Tuned parameters for classification display, reconciliation, ticking,
/// completion detection and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceweaveConfig {
    /// Period of the elapsed-time ticker.
    pub tick_interval: Duration,
    /// Number of ticks after which the ticker stops regardless of state.
    pub max_ticks: u32,

    /// Phrases that mark a streamed answer as finished.
    pub closing_phrases: Vec<String>,
    /// Answers shorter than this never match on a closing phrase.
    pub closing_phrase_min_len: usize,
    /// Answers longer than this are considered finished.
    pub long_answer_len: usize,
    /// Token counted by the structural currency rule.
    pub currency_token: String,
    /// Minimum number of currency tokens for the structural rule.
    pub currency_min_count: usize,
    /// Minimum answer length for the structural rule.
    pub currency_min_len: usize,
    /// Consecutive answer updates closer than this many characters are "stable".
    pub stability_delta: usize,
    /// Stability only counts above this answer length.
    pub stability_min_len: usize,

    /// Phrases in a task's content that complete its trace group.
    pub group_terminal_phrases: Vec<String>,
    /// Task content longer than this completes its trace group.
    pub group_terminal_len: usize,
    /// Task content must be longer than this before the currency rule can
    /// complete its trace group.
    pub group_currency_min_len: usize,

    /// Inactivity before the soft warning fires.
    pub soft_inactivity: Duration,
    /// Further inactivity, after the warning, before the turn is closed.
    pub hard_inactivity: Duration,

    /// Markers of product content; answers containing one get an extra
    /// `product_message_` backup.
    pub product_markers: Vec<String>,

    /// Maximum number of (prompt, response) entries retained in history.
    pub history_capacity: usize,
    /// Maximum number of trace groups retained per session.
    pub max_groups_per_session: usize,
    /// Maximum number of top-level tasks retained per trace group.
    pub max_tasks_per_group: usize,

    /// Agent name → model label, used to build group display titles.
    pub model_labels: HashMap<String, String>,
    /// Agent name → render node id; unmapped names fall back to kebab case.
    pub node_ids: HashMap<String, String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for TraceweaveConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_ticks: 300,
            closing_phrases: strings(&[
                "Can I help you with anything else?",
                "Is there anything else",
                "In conclusion",
                "To summarize",
                "I hope this helps",
                "Please let me know if you have any questions",
                "Let me know if you",
                "Hope that helps",
                "Recommended Products:",
                "Troubleshooting Tips:",
                "Product ID:",
                "Based on your preferences",
            ]),
            closing_phrase_min_len: 50,
            long_answer_len: 800,
            currency_token: "$".to_string(),
            currency_min_count: 3,
            currency_min_len: 400,
            stability_delta: 5,
            stability_min_len: 300,
            group_terminal_phrases: strings(&[
                "Can I help you with anything else?",
                "Is there anything else",
                "In conclusion",
                "To summarize",
            ]),
            group_terminal_len: 2_000,
            group_currency_min_len: 400,
            soft_inactivity: Duration::from_secs(670),
            hard_inactivity: Duration::from_secs(30),
            product_markers: strings(&[
                "ThunderBolt Speaker",
                "SonicWave",
                "Recommended Products:",
                "Troubleshooting Tips:",
            ]),
            history_capacity: 10,
            max_groups_per_session: 32,
            max_tasks_per_group: 256,
            model_labels: table(&[
                ("Supervisor", "Nova Premier"),
                ("ProductRecommendation", "Nova Lite"),
                ("Troubleshoot", "DeepSeek-R1"),
                ("Personalization", "Claude Sonnet 3.7 v1"),
                ("OrderManagement", "Claude 3.5 Haiku"),
                ("ROUTING_CLASSIFIER", "Nova Micro V1"),
            ]),
            node_ids: table(&[
                ("OrderManagement", "order-mgmt-agent"),
                ("ProductRecommendation", "product-rec-agent"),
                ("Personalization", "personalization-agent"),
                ("Troubleshoot", "ts-agent"),
                ("ROUTING_CLASSIFIER", "routing-classifier"),
                ("Supervisor", "supervisor-agent"),
                ("OrderManagementAgent", "order-mgmt-agent"),
                ("ProductRecommendationAgent", "product-rec-agent"),
                ("PersonalizationAgent", "personalization-agent"),
                ("TroubleshootAgent", "ts-agent"),
            ]),
        }
    }
}

impl TraceweaveConfig {
    /// Display title for a new trace group: `"{agent} - {model}"` when the
    /// agent has a model label, the bare agent name otherwise.
    ///
    /// ```rust
    /// use traceweave::TraceweaveConfig;
    ///
    /// let config = TraceweaveConfig::default();
    /// assert_eq!(config.display_title("Supervisor"), "Supervisor - Nova Premier");
    /// assert_eq!(config.display_title("Billing"), "Billing");
    /// ```
    pub fn display_title(&self, agent_name: &str) -> String {
        match self.model_labels.get(agent_name) {
            Some(label) => format!("{} - {}", agent_name, label),
            None => agent_name.to_string(),
        }
    }

    pub fn is_product_content(&self, text: &str) -> bool {
        self.product_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }
}
