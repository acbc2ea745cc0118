//! Agent name → render node id.
//!
//! The render layer animates one node per agent. Known agents map through
//! the configured table; anything else becomes lowercase kebab case so a new
//! agent still gets a stable id.

use std::collections::HashMap;

/// Node id for `agent_name`, looked up in `table` with a kebab-case fallback.
///
/// ```rust
/// use traceweave::nodes::node_id_for;
/// use traceweave::TraceweaveConfig;
///
/// let config = TraceweaveConfig::default();
/// assert_eq!(node_id_for("OrderManagement", &config.node_ids), "order-mgmt-agent");
/// assert_eq!(node_id_for("ShippingAgent", &config.node_ids), "shipping-agent");
/// assert_eq!(node_id_for("Loyalty points_bot", &config.node_ids), "loyalty-points-bot");
/// ```
pub fn node_id_for(agent_name: &str, table: &HashMap<String, String>) -> String {
    if let Some(node_id) = table.get(agent_name) {
        return node_id.clone();
    }
    kebab_case(agent_name)
}

/// `"ProductRecommendation"` → `"product-recommendation"`,
/// `"ROUTING_CLASSIFIER"` → `"routing-classifier"`.
pub fn kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' || c == '_' || c == '-' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
        }
        out.extend(c.to_lowercase());
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kebab_case_boundaries() {
        assert_eq!(kebab_case("ProductRecommendation"), "product-recommendation");
        assert_eq!(kebab_case("ROUTING_CLASSIFIER"), "routing-classifier");
        assert_eq!(kebab_case("HTTPGateway"), "http-gateway");
        assert_eq!(kebab_case("  spaced  name "), "spaced-name");
    }
}
