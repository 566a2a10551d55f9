//! Startup wiring for everything behind the HTTP surface: outbound
//! destinations, collaborator clients, the rule engine and the device poll
//! loop.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::collaborators::{LedgerService, SpatialService};
use tessera_core::topics::{self, TOPIC_RITUAL_COMPLETED};
use tessera_events::reactions::{Collaborators, DEFAULT_CALL_TIMEOUT};
use tessera_events::rules::{self, RuleConfigError};
use tessera_events::source::DEFAULT_FETCH_TIMEOUT;
use tessera_events::{
    BusMessage, EventBus, EventNormalizer, HttpDeviceSource, RuleDefinition, RuleEngine,
    SourceError, SubscriptionId,
};
use tessera_relay::collaborators::{HttpLedgerClient, HttpSpatialClient};
use tessera_relay::{Destinations, HttpDestination};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, PipelineConfig, RelayConfig};

/// Destination name of the ledger partner.
pub const DESTINATION_LEDGER: &str = "ledger";
/// Destination name of the spatial-data partner.
pub const DESTINATION_SPATIAL: &str = "spatial";

/// How long shutdown waits for the poll loop to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Anything that prevents the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Rules(#[from] RuleConfigError),

    #[error("Failed to create device source: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared outbound client. Individual calls carry their own, tighter bounds.
pub fn http_client(relay: &RelayConfig) -> Result<reqwest::Client, reqwest::Error> {
    let timeout = relay
        .forward_timeout
        .max(relay.health_timeout)
        .max(DEFAULT_CALL_TIMEOUT);
    reqwest::Client::builder().timeout(timeout).build()
}

/// Named destinations for every configured partner URL.
pub fn build_destinations(relay: &RelayConfig, client: &reqwest::Client) -> Destinations {
    let mut destinations = Destinations::new();
    if let Some(url) = &relay.ledger_url {
        destinations.insert(
            DESTINATION_LEDGER,
            Arc::new(HttpDestination::new(client.clone(), url.clone())),
        );
    }
    if let Some(url) = &relay.spatial_url {
        destinations.insert(
            DESTINATION_SPATIAL,
            Arc::new(HttpDestination::new(client.clone(), url.clone())),
        );
    }
    destinations
}

/// Collaborator clients available to rule reactions.
pub fn build_collaborators(relay: &RelayConfig, client: &reqwest::Client) -> Collaborators {
    Collaborators {
        ledger: relay
            .ledger_url
            .as_ref()
            .map(|url| -> Arc<dyn LedgerService> {
                Arc::new(HttpLedgerClient::new(client.clone(), url.clone()))
            }),
        spatial: relay
            .spatial_url
            .as_ref()
            .map(|url| -> Arc<dyn SpatialService> {
                Arc::new(HttpSpatialClient::new(client.clone(), url.clone()))
            }),
        call_timeout: DEFAULT_CALL_TIMEOUT,
    }
}

/// Rule definitions from `RITUALS_PATH`, or the built-in set.
pub fn load_rules(config: &PipelineConfig) -> Result<Vec<RuleDefinition>, RuleConfigError> {
    match &config.rituals_path {
        Some(path) => {
            let definitions = rules::load_definitions(path)?;
            tracing::info!(path = %path.display(), count = definitions.len(), "Loaded rules file");
            Ok(definitions)
        }
        None => Ok(rules::default_definitions()),
    }
}

/// Running event pipeline: rule engine subscriptions plus the optional
/// device poll loop.
pub struct Pipeline {
    bus: Arc<EventBus>,
    engine: Arc<RuleEngine>,
    subscriptions: Vec<SubscriptionId>,
    poller: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Attach the rule engine and completion logger to `bus` and, when a
    /// device source URL is configured, start polling it.
    pub fn start(
        bus: Arc<EventBus>,
        config: &PipelineConfig,
        definitions: Vec<RuleDefinition>,
        collaborators: &Collaborators,
    ) -> Result<Self, StartupError> {
        let engine = Arc::new(RuleEngine::from_definitions(
            Arc::clone(&bus),
            definitions,
            collaborators,
        )?);
        tracing::info!(rules = ?engine.rule_names(), "Rule engine ready");

        let topic = topics::state_changed(&config.source_name);
        let mut subscriptions = vec![engine.attach(topic.clone())];
        subscriptions.push(bus.subscribe(TOPIC_RITUAL_COMPLETED, |message: &BusMessage| {
            if let Some(completion) = message.as_completion() {
                tracing::info!(
                    completion_id = %completion.id,
                    rule = %completion.rule,
                    event_id = %completion.source_event.id,
                    "Ritual completion published",
                );
            }
            Ok(())
        }));

        let cancel = CancellationToken::new();
        let poller = match &config.source_url {
            Some(url) => {
                let source = HttpDeviceSource::new(
                    url.clone(),
                    config.source_token.clone(),
                    DEFAULT_FETCH_TIMEOUT,
                )?;
                let normalizer = EventNormalizer::new(
                    config.source_name.clone(),
                    Arc::new(source),
                    Arc::clone(&bus),
                );
                let every = config.poll_interval;
                let token = cancel.clone();
                Some(tokio::spawn(async move { normalizer.run(every, token).await }))
            }
            None => {
                tracing::warn!(topic = %topic, "DEVICE_SOURCE_URL not set, device polling disabled");
                None
            }
        };

        Ok(Self {
            bus,
            engine,
            subscriptions,
            poller,
            cancel,
        })
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Stop polling and detach every subscription.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(poller) = self.poller {
            stop_poller(poller, SHUTDOWN_GRACE).await;
        }
        for id in self.subscriptions {
            self.bus.unsubscribe(id);
        }
        tracing::info!("Event pipeline stopped");
    }
}

/// How the poll task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerExit {
    Stopped,
    Failed,
    TimedOut,
}

/// Wait up to `grace` for the cancelled poll task to finish.
async fn stop_poller(poller: JoinHandle<()>, grace: Duration) -> PollerExit {
    match tokio::time::timeout(grace, poller).await {
        Ok(Ok(())) => PollerExit::Stopped,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Device poll loop terminated abnormally");
            PollerExit::Failed
        }
        Err(_) => {
            tracing::warn!("Device poll loop did not stop in time");
            PollerExit::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use tessera_core::event::Event;

    use super::*;

    fn relay(ledger: Option<&str>, spatial: Option<&str>) -> RelayConfig {
        RelayConfig {
            ledger_url: ledger.map(String::from),
            spatial_url: spatial.map(String::from),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            forward_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(3),
        }
    }

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            source_name: "homeassistant".into(),
            source_url: None,
            source_token: String::new(),
            poll_interval: Duration::from_secs(30),
            rituals_path: None,
        }
    }

    #[test]
    fn destinations_follow_configured_urls() {
        let client = reqwest::Client::new();

        let none = build_destinations(&relay(None, None), &client);
        assert!(none.is_empty());

        let both = build_destinations(&relay(Some("http://l"), Some("http://s")), &client);
        assert_eq!(both.names(), [DESTINATION_LEDGER, DESTINATION_SPATIAL]);
    }

    #[test]
    fn collaborators_follow_configured_urls() {
        let client = reqwest::Client::new();
        let collaborators = build_collaborators(&relay(Some("http://l"), None), &client);
        assert!(collaborators.ledger.is_some());
        assert!(collaborators.spatial.is_none());
    }

    #[test]
    fn missing_rules_file_is_an_error() {
        let mut config = pipeline_config();
        config.rituals_path = Some(PathBuf::from("/nonexistent/rituals.json"));
        assert_matches!(load_rules(&config), Err(RuleConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn default_pipeline_completes_sensor_on_events() {
        let bus = Arc::new(EventBus::new());
        let config = pipeline_config();
        let pipeline = Pipeline::start(
            Arc::clone(&bus),
            &config,
            load_rules(&config).unwrap(),
            &Collaborators::default(),
        )
        .unwrap();
        assert_eq!(pipeline.engine().rule_names(), ["sensor-on"]);

        let completions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&completions);
        bus.subscribe(TOPIC_RITUAL_COMPLETED, move |message: &BusMessage| {
            if let Some(completion) = message.as_completion() {
                sink.lock().unwrap().push(completion.rule.clone());
            }
            Ok(())
        });

        bus.publish(
            "homeassistant.state_changed",
            Event::new("sensor.hall", "sensor", "on"),
        );
        assert_eq!(*completions.lock().unwrap(), ["sensor-on"]);

        pipeline.shutdown().await;
        bus.publish(
            "homeassistant.state_changed",
            Event::new("sensor.hall", "sensor", "on"),
        );
        assert_eq!(completions.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_exit_is_classified() {
        let grace = Duration::from_secs(5);

        let stopped = tokio::spawn(async {});
        assert_eq!(stop_poller(stopped, grace).await, PollerExit::Stopped);

        let panicked = tokio::spawn(async { panic!("poll loop crashed") });
        assert_eq!(stop_poller(panicked, grace).await, PollerExit::Failed);

        let stuck = tokio::spawn(std::future::pending::<()>());
        assert_eq!(stop_poller(stuck, grace).await, PollerExit::TimedOut);
    }

    #[test]
    fn rules_needing_absent_collaborators_fail_startup() {
        let definitions: Vec<RuleDefinition> = serde_json::from_value(serde_json::json!([{
            "name": "log-ledger",
            "when": { "kind": "sensor" },
            "then": { "type": "ledger_activity", "address": "0xabc" }
        }]))
        .unwrap();

        let result = Pipeline::start(
            Arc::new(EventBus::new()),
            &pipeline_config(),
            definitions,
            &Collaborators::default(),
        );

        assert_matches!(
            result.err(),
            Some(StartupError::Rules(RuleConfigError::Reaction { .. }))
        );
    }
}
