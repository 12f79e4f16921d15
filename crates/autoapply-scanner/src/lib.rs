/// The in-page agent JavaScript.
/// This string is injected into page and frame contexts by backends.
pub const AGENT_JS: &str = include_str!("agent.js");

/// Global the agent installs itself under.
pub const AGENT_GLOBAL: &str = "AutoApply";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::const_is_empty)]
    fn it_works() {
        assert!(!AGENT_JS.is_empty());
        assert!(AGENT_JS.contains(AGENT_GLOBAL));
    }

    #[test]
    fn every_command_has_a_handler() {
        for action in [
            "snapshot",
            "query",
            "scroll",
            "extract_cards",
            "read_text",
            "fields",
            "set_field",
            "click",
            "focus",
        ] {
            assert!(
                AGENT_JS.contains(&format!("{}:", action)),
                "missing handler for {}",
                action
            );
        }
    }
}
