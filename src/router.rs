use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::Capability;
use crate::anthropic::{MessageSender, MessagesRequest};

/// Which retrieval capabilities run for a query. Computed once per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub sensor: bool,
    pub operator: bool,
    pub maintenance: bool,
}

impl RoutingDecision {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            sensor: true,
            operator: true,
            maintenance: true,
        }
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.set(capability, true);
        self
    }

    pub fn set(&mut self, capability: Capability, selected: bool) {
        match capability {
            Capability::Sensor => self.sensor = selected,
            Capability::Operator => self.operator = selected,
            Capability::Maintenance => self.maintenance = selected,
        }
    }

    pub fn is_selected(&self, capability: Capability) -> bool {
        match capability {
            Capability::Sensor => self.sensor,
            Capability::Operator => self.operator,
            Capability::Maintenance => self.maintenance,
        }
    }

    /// Selected capabilities in canonical order.
    pub fn selected(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.is_selected(*c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !(self.sensor || self.operator || self.maintenance)
    }

    /// An empty decision never drops a query: it widens to every capability.
    pub fn or_all(self) -> Self {
        if self.is_empty() { Self::all() } else { self }
    }
}

impl std::fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.selected().iter().map(|c| c.name()).collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

/// Pluggable classifier that flags the capabilities relevant to a query.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, query: &str) -> anyhow::Result<RoutingDecision>;
}

/// Run a strategy and apply the all-capabilities fallback when it errors or
/// selects nothing.
pub async fn decide(strategy: &dyn RoutingStrategy, query: &str) -> RoutingDecision {
    match strategy.classify(query).await {
        Ok(decision) if decision.is_empty() => {
            warn!(strategy = strategy.name(), "no capability selected, routing to all");
            RoutingDecision::all()
        }
        Ok(decision) => {
            debug!(strategy = strategy.name(), %decision, "routing decided");
            decision
        }
        Err(e) => {
            warn!(strategy = strategy.name(), error = %e, "routing failed, routing to all");
            RoutingDecision::all()
        }
    }
}

/// Weighted keyword scoring against each capability's domain vocabulary.
pub struct KeywordRouter;

impl KeywordRouter {
    /// Minimum score for a capability to be flagged.
    const THRESHOLD: u32 = 5;

    const KEYWORDS: &'static [(&'static str, Capability, u32)] = &[
        ("sensor", Capability::Sensor, 10),
        ("reading", Capability::Sensor, 10),
        ("temperature", Capability::Sensor, 10),
        ("vibration", Capability::Sensor, 10),
        ("pressure", Capability::Sensor, 10),
        ("real-time", Capability::Sensor, 7),
        ("anomal", Capability::Sensor, 7),
        ("spike", Capability::Sensor, 5),
        ("trend", Capability::Sensor, 5),
        ("measurement", Capability::Sensor, 5),
        ("operator", Capability::Operator, 10),
        ("report", Capability::Operator, 7),
        ("incident", Capability::Operator, 10),
        ("observ", Capability::Operator, 7),
        ("shift", Capability::Operator, 5),
        ("maintenance", Capability::Maintenance, 10),
        ("repair", Capability::Maintenance, 10),
        ("component", Capability::Maintenance, 7),
        ("failure", Capability::Maintenance, 7),
        ("technician", Capability::Maintenance, 10),
        ("replace", Capability::Maintenance, 5),
        ("inspection", Capability::Maintenance, 5),
        ("service history", Capability::Maintenance, 5),
    ];

    /// Phrases asking for a general analysis select every capability.
    const GENERAL: &'static [&'static str] = &[
        "root cause",
        "rca",
        "comprehensive",
        "full analysis",
        "all data",
    ];

    pub fn route(query: &str) -> RoutingDecision {
        let lower = query.to_lowercase();

        if Self::GENERAL.iter().any(|phrase| contains_word(&lower, phrase)) {
            return RoutingDecision::all();
        }

        let mut scores = [0u32; 3];
        for &(keyword, capability, weight) in Self::KEYWORDS {
            if lower.contains(keyword) {
                scores[capability.index()] += weight;
            }
        }

        let mut decision = RoutingDecision::none();
        for capability in Capability::ALL {
            if scores[capability.index()] >= Self::THRESHOLD {
                decision.set(capability, true);
            }
        }
        decision
    }
}

#[async_trait]
impl RoutingStrategy for KeywordRouter {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(&self, query: &str) -> anyhow::Result<RoutingDecision> {
        Ok(Self::route(query))
    }
}

// Whole-word match so that e.g. "rca" does not fire inside "circadian".
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Delegates classification to an LLM and parses its `NAME: YES/NO` lines.
pub struct LlmRouter<C> {
    client: C,
    model: String,
}

impl<C: MessageSender> LlmRouter<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn prompt(query: &str) -> String {
        let agents: Vec<String> = Capability::ALL
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}: {}", i + 1, c.label(), c.description()))
            .collect();
        format!(
            "You are a routing agent for a root cause analysis system.\n\
             Analyze the user's query and decide which specialized agents should be invoked.\n\
             \n\
             Available agents:\n\
             {agents}\n\
             \n\
             User query: \"{query}\"\n\
             \n\
             Respond in exactly this format and nothing else:\n\
             SENSOR_AGENT: YES/NO\n\
             OPERATOR_AGENT: YES/NO\n\
             MAINTENANCE_AGENT: YES/NO\n\
             \n\
             For general or comprehensive root cause questions, answer YES for all agents.",
            agents = agents.join("\n"),
        )
    }
}

/// Parse `SENSOR_AGENT: YES` style lines. Missing or unrecognised lines
/// count as NO.
pub fn parse_routing_reply(text: &str) -> RoutingDecision {
    let mut decision = RoutingDecision::none();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches('*').trim().to_uppercase();
        let yes = value.trim().trim_matches('*').trim().to_uppercase().starts_with("YES");
        if let Some(capability) = Capability::ALL
            .into_iter()
            .find(|c| key == format!("{}_AGENT", c.name().to_uppercase()))
        {
            decision.set(capability, yes);
        }
    }
    decision
}

#[async_trait]
impl<C: MessageSender> RoutingStrategy for LlmRouter<C> {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn classify(&self, query: &str) -> anyhow::Result<RoutingDecision> {
        let req = MessagesRequest::user(self.model.clone(), 256, Self::prompt(query))
            .with_temperature(0.3);
        let response = self.client.send_message(&req).await?;
        Ok(parse_routing_reply(&response.text()))
    }
}

/// Tries `primary`, falling back to `secondary` when it errors.
pub struct FallbackRouter {
    primary: Box<dyn RoutingStrategy>,
    secondary: Box<dyn RoutingStrategy>,
}

impl FallbackRouter {
    pub fn new(primary: Box<dyn RoutingStrategy>, secondary: Box<dyn RoutingStrategy>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl RoutingStrategy for FallbackRouter {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn classify(&self, query: &str) -> anyhow::Result<RoutingDecision> {
        match self.primary.classify(query).await {
            Ok(decision) => Ok(decision),
            Err(e) => {
                warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %e,
                    "primary router failed, falling back"
                );
                self.secondary.classify(query).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::types::{ContentBlock, MessagesResponse, Usage};
    use crate::anthropic::AnthropicError;

    // --- KeywordRouter ---

    #[test]
    fn temperature_routes_to_sensor() {
        assert_eq!(
            KeywordRouter::route("What caused the temperature spike?"),
            RoutingDecision::none().with(Capability::Sensor)
        );
    }

    #[test]
    fn incident_routes_to_operator() {
        assert_eq!(
            KeywordRouter::route("Summarize last night's operator incidents"),
            RoutingDecision::none().with(Capability::Operator)
        );
    }

    #[test]
    fn repair_routes_to_maintenance() {
        assert_eq!(
            KeywordRouter::route("When was the pump last repaired by a technician?"),
            RoutingDecision::none().with(Capability::Maintenance)
        );
    }

    #[test]
    fn mixed_query_selects_several() {
        let decision =
            KeywordRouter::route("Correlate vibration readings with recent maintenance work");
        assert!(decision.sensor);
        assert!(decision.maintenance);
        assert!(!decision.operator);
    }

    #[test]
    fn general_rca_selects_all() {
        assert_eq!(
            KeywordRouter::route("Give me a root cause analysis for line 4"),
            RoutingDecision::all()
        );
        assert_eq!(KeywordRouter::route("RCA for MCH_012 please"), RoutingDecision::all());
    }

    #[test]
    fn general_phrase_requires_whole_word() {
        // "rca" inside another word must not widen routing.
        let decision = KeywordRouter::route("circadian vibration");
        assert_eq!(decision, RoutingDecision::none().with(Capability::Sensor));
    }

    #[test]
    fn unrelated_query_selects_nothing() {
        assert!(KeywordRouter::route("hello there").is_empty());
    }

    // --- RoutingDecision ---

    #[test]
    fn or_all_widens_only_empty_decisions() {
        assert_eq!(RoutingDecision::none().or_all(), RoutingDecision::all());
        let one = RoutingDecision::none().with(Capability::Operator);
        assert_eq!(one.or_all(), one);
    }

    #[test]
    fn selected_is_in_canonical_order() {
        let decision = RoutingDecision::none()
            .with(Capability::Maintenance)
            .with(Capability::Sensor);
        assert_eq!(
            decision.selected(),
            vec![Capability::Sensor, Capability::Maintenance]
        );
        assert_eq!(decision.to_string(), "sensor+maintenance");
        assert_eq!(RoutingDecision::none().to_string(), "none");
    }

    // --- decide() fallback law ---

    struct FixedRouter(anyhow::Result<RoutingDecision>);

    #[async_trait]
    impl RoutingStrategy for FixedRouter {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn classify(&self, _query: &str) -> anyhow::Result<RoutingDecision> {
            match &self.0 {
                Ok(d) => Ok(*d),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    #[tokio::test]
    async fn decide_falls_back_to_all_when_empty() {
        let router = FixedRouter(Ok(RoutingDecision::none()));
        assert_eq!(decide(&router, "anything").await, RoutingDecision::all());
    }

    #[tokio::test]
    async fn decide_falls_back_to_all_on_error() {
        let router = FixedRouter(Err(anyhow::anyhow!("classifier offline")));
        assert_eq!(decide(&router, "anything").await, RoutingDecision::all());
    }

    #[tokio::test]
    async fn decide_keeps_non_empty_decision() {
        let only = RoutingDecision::none().with(Capability::Operator);
        let router = FixedRouter(Ok(only));
        assert_eq!(decide(&router, "anything").await, only);
    }

    // --- LLM routing ---

    #[test]
    fn parse_reply_reads_flags() {
        let decision = parse_routing_reply(
            "SENSOR_AGENT: YES\nOPERATOR_AGENT: NO\nMAINTENANCE_AGENT: yes",
        );
        assert_eq!(
            decision,
            RoutingDecision::none()
                .with(Capability::Sensor)
                .with(Capability::Maintenance)
        );
    }

    #[test]
    fn parse_reply_tolerates_markdown_and_noise() {
        let decision = parse_routing_reply(
            "Here you go:\n**SENSOR_AGENT**: NO\n  operator_agent :  **YES**\nnotes: none",
        );
        assert_eq!(decision, RoutingDecision::none().with(Capability::Operator));
    }

    #[test]
    fn parse_reply_garbage_is_empty() {
        assert!(parse_routing_reply("I am not sure.").is_empty());
    }

    struct MockClient {
        result: Result<String, ()>,
    }

    impl MessageSender for MockClient {
        async fn send_message(
            &self,
            _req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            match &self.result {
                Ok(text) => Ok(MessagesResponse {
                    id: "mock".into(),
                    content: vec![ContentBlock {
                        content_type: "text".into(),
                        text: text.clone(),
                    }],
                    model: "mock".into(),
                    stop_reason: Some("end_turn".into()),
                    usage: Usage {
                        input_tokens: 0,
                        output_tokens: 0,
                    },
                }),
                Err(()) => Err(AnthropicError::ApiError {
                    status: 500,
                    message: "mock error".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn llm_router_parses_reply() {
        let router = LlmRouter::new(
            MockClient {
                result: Ok("SENSOR_AGENT: NO\nOPERATOR_AGENT: YES\nMAINTENANCE_AGENT: NO".into()),
            },
            "claude-haiku-4-5-20251001",
        );
        let decision = router.classify("what did the night shift see?").await.unwrap();
        assert_eq!(decision, RoutingDecision::none().with(Capability::Operator));
    }

    #[tokio::test]
    async fn fallback_router_uses_keywords_when_llm_fails() {
        let router = FallbackRouter::new(
            Box::new(LlmRouter::new(MockClient { result: Err(()) }, "m")),
            Box::new(KeywordRouter),
        );
        let decision = router.classify("pressure drop on line 2").await.unwrap();
        assert_eq!(decision, RoutingDecision::none().with(Capability::Sensor));
    }

    #[tokio::test]
    async fn fallback_router_prefers_primary() {
        let router = FallbackRouter::new(
            Box::new(LlmRouter::new(
                MockClient {
                    result: Ok("MAINTENANCE_AGENT: YES".into()),
                },
                "m",
            )),
            Box::new(KeywordRouter),
        );
        let decision = router.classify("pressure drop on line 2").await.unwrap();
        assert_eq!(decision, RoutingDecision::none().with(Capability::Maintenance));
    }

    #[test]
    fn prompt_lists_every_capability() {
        let prompt = LlmRouter::<MockClient>::prompt("why?");
        for c in Capability::ALL {
            assert!(prompt.contains(c.description()));
            assert!(prompt.contains(&format!("{}_AGENT", c.name().to_uppercase())));
        }
    }
}
