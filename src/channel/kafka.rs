//! # Kafka channel backend.
//!
//! Each role of each run maps to its own topic:
//!
//! ```text
//! {prefix}.source.{run_id}       producer → executors
//! {prefix}.destination.{run_id}  executors → writers
//! {prefix}.events.{run_id}       everyone → tracker
//! ```
//!
//! Messages are JSON payloads keyed by record id. Consumers of a role share one
//! consumer group, so executors (and writers) split the partitions between them.
//!
//! Standalone executor and writer processes serve every run at once:
//! [`KafkaChannelFactory::attach_workers`] subscribes to the role's topic
//! pattern and routes each publish to the topic of the message's own run.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Message as KafkaMessage;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use serde::Deserialize;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelFactory, ChannelRole, ChannelSet, Message};
use crate::config::duration_ms;
use crate::error::{ChannelError, CodecError};
use crate::events::Event;
use crate::record::Record;

/// Kafka connection and topic settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated broker list.
    pub bootstrap_servers: String,
    /// Prefix of every topic name.
    pub topic_prefix: String,
    /// Prefix of every consumer group id.
    pub group_prefix: String,
    /// Partitions of newly created topics.
    pub partitions: i32,
    /// Replication factor of newly created topics (`-1` = broker default).
    pub replication: i32,
    /// How long a publish may wait for broker acknowledgement.
    #[serde(with = "duration_ms")]
    pub publish_timeout: Duration,
    /// Extra librdkafka properties applied to every client.
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".into(),
            topic_prefix: "pipevisor".into(),
            group_prefix: "pipevisor".into(),
            partitions: 1,
            replication: -1,
            publish_timeout: Duration::from_secs(5),
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Topic of `role` for `run_id`.
    pub fn topic(&self, role: ChannelRole, run_id: &str) -> String {
        format!("{}.{}.{}", self.topic_prefix, role, run_id)
    }

    /// Subscription pattern matching the `role` topics of every run.
    pub fn topic_pattern(&self, role: ChannelRole) -> String {
        format!("^{}\\.{}\\..+", self.topic_prefix.replace('.', "\\."), role)
    }

    /// Consumer group shared by all consumers of `role`.
    pub fn group_id(&self, role: ChannelRole) -> String {
        format!("{}-{}", self.group_prefix, role)
    }

    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.bootstrap_servers);
        for (k, v) in &self.properties {
            cfg.set(k, v);
        }
        cfg
    }
}

/// Where a channel sends what it publishes.
#[derive(Clone, Debug)]
enum Route {
    /// Always the same topic.
    Fixed(String),
    /// The topic of the message's run.
    PerRun,
}

/// Kafka-backed channel for one role.
pub struct KafkaChannel<T> {
    role: ChannelRole,
    cfg: Arc<KafkaConfig>,
    producer: FutureProducer,
    consumer: Option<StreamConsumer>,
    route: Route,
    closed: CancellationToken,
    _msg: PhantomData<fn() -> T>,
}

impl<T: Message> KafkaChannel<T> {
    fn topic_for(&self, msg: &T) -> Result<String, ChannelError> {
        match &self.route {
            Route::Fixed(topic) => Ok(topic.clone()),
            Route::PerRun => msg
                .run_id()
                .map(|run_id| self.cfg.topic(self.role, run_id))
                .ok_or_else(|| {
                    ChannelError::backend(self.role, "message has no run id to route by")
                }),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<T, ChannelError> {
        serde_json::from_slice(payload).map_err(|e| ChannelError::Codec {
            role: self.role,
            source: CodecError::Json(e),
        })
    }
}

#[async_trait]
impl<T: Message> Channel<T> for KafkaChannel<T> {
    fn role(&self) -> ChannelRole {
        self.role
    }

    async fn publish(&self, msg: T) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed { role: self.role });
        }
        let topic = self.topic_for(&msg)?;
        let payload = serde_json::to_vec(&msg).map_err(|e| ChannelError::Codec {
            role: self.role,
            source: CodecError::Json(e),
        })?;
        let record = FutureRecord::to(&topic).key(msg.key()).payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.cfg.publish_timeout))
            .await
        {
            Ok(_) => Ok(()),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                Err(ChannelError::Timeout {
                    role: self.role,
                    timeout: self.cfg.publish_timeout,
                })
            }
            Err((err, _)) => Err(ChannelError::backend(self.role, err)),
        }
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed { role: self.role });
        }
        let Some(consumer) = &self.consumer else {
            return Err(ChannelError::backend(self.role, "channel is publish-only"));
        };
        match time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(KafkaError::PartitionEOF(_))) => Ok(None),
            Ok(Err(err)) => Err(ChannelError::backend(self.role, err)),
            Ok(Ok(msg)) => match msg.payload() {
                Some(payload) => self.decode(payload).map(Some),
                None => {
                    warn!(role = %self.role, topic = msg.topic(), "skipping message without payload");
                    Ok(None)
                }
            },
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Some(consumer) = &self.consumer {
            consumer.unsubscribe();
        }
        if let Err(err) = self.producer.flush(Timeout::After(self.cfg.publish_timeout)) {
            warn!(role = %self.role, error = %err, "kafka producer flush failed on close");
        }
    }
}

/// Opens Kafka channels; creates run topics on demand.
#[derive(Clone)]
pub struct KafkaChannelFactory {
    cfg: Arc<KafkaConfig>,
}

impl KafkaChannelFactory {
    /// Creates a factory for the given settings.
    pub fn new(cfg: KafkaConfig) -> Self {
        Self { cfg: Arc::new(cfg) }
    }

    /// Channels for a standalone executor/writer process serving every run.
    ///
    /// Source and destination consume by topic pattern; every publish is routed
    /// to the topic of the message's run. The event channel is publish-only.
    pub fn attach_workers(&self) -> Result<ChannelSet, ChannelError> {
        let producer = self.producer(ChannelRole::Source)?;
        let source: KafkaChannel<Record> = self.channel(
            ChannelRole::Source,
            &producer,
            Some(self.consumer(ChannelRole::Source, &self.cfg.topic_pattern(ChannelRole::Source))?),
            Route::PerRun,
        );
        let destination: KafkaChannel<Record> = self.channel(
            ChannelRole::Destination,
            &producer,
            Some(self.consumer(
                ChannelRole::Destination,
                &self.cfg.topic_pattern(ChannelRole::Destination),
            )?),
            Route::PerRun,
        );
        let events: KafkaChannel<Event> =
            self.channel(ChannelRole::Events, &producer, None, Route::PerRun);

        Ok(ChannelSet {
            source: Arc::new(source),
            destination: Arc::new(destination),
            events: Arc::new(events),
        })
    }

    async fn ensure_topics(&self, run_id: &str) -> Result<(), ChannelError> {
        let admin: AdminClient<DefaultClientContext> = self
            .cfg
            .client_config()
            .create()
            .map_err(|e| ChannelError::backend(ChannelRole::Source, e))?;

        let names: Vec<(ChannelRole, String)> = [
            ChannelRole::Source,
            ChannelRole::Destination,
            ChannelRole::Events,
        ]
        .into_iter()
        .map(|role| (role, self.cfg.topic(role, run_id)))
        .collect();
        let topics: Vec<NewTopic<'_>> = names
            .iter()
            .map(|(_, name)| NewTopic {
                name: name.as_str(),
                num_partitions: self.cfg.partitions,
                replication: TopicReplication::Fixed(self.cfg.replication),
                config: Vec::new(),
            })
            .collect();

        let results = admin
            .create_topics(topics.iter(), &AdminOptions::new())
            .await
            .map_err(|e| ChannelError::backend(ChannelRole::Source, e))?;

        for (result, (role, _)) in results.into_iter().zip(names.iter()) {
            match result {
                Ok(topic) => debug!(topic = %topic, "created kafka topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %topic, "kafka topic already exists")
                }
                Err((topic, code)) => {
                    return Err(ChannelError::backend(
                        *role,
                        format!("cannot create topic {topic}: {code:?}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn producer(&self, role: ChannelRole) -> Result<FutureProducer, ChannelError> {
        self.cfg
            .client_config()
            .set("message.timeout.ms", self.cfg.publish_timeout.as_millis().to_string())
            .create()
            .map_err(|e| ChannelError::backend(role, e))
    }

    fn consumer(&self, role: ChannelRole, topic: &str) -> Result<StreamConsumer, ChannelError> {
        let consumer: StreamConsumer = self
            .cfg
            .client_config()
            .set("group.id", self.cfg.group_id(role))
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| ChannelError::backend(role, e))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| ChannelError::backend(role, e))?;
        Ok(consumer)
    }

    fn run_channel<T: Message>(
        &self,
        role: ChannelRole,
        run_id: &str,
        producer: &FutureProducer,
    ) -> Result<KafkaChannel<T>, ChannelError> {
        let topic = self.cfg.topic(role, run_id);
        let consumer = self.consumer(role, &topic)?;
        Ok(self.channel(role, producer, Some(consumer), Route::Fixed(topic)))
    }

    fn channel<T: Message>(
        &self,
        role: ChannelRole,
        producer: &FutureProducer,
        consumer: Option<StreamConsumer>,
        route: Route,
    ) -> KafkaChannel<T> {
        KafkaChannel {
            role,
            cfg: Arc::clone(&self.cfg),
            producer: producer.clone(),
            consumer,
            route,
            closed: CancellationToken::new(),
            _msg: PhantomData,
        }
    }
}

#[async_trait]
impl ChannelFactory for KafkaChannelFactory {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn open(&self, run_id: &str) -> Result<ChannelSet, ChannelError> {
        self.ensure_topics(run_id).await?;
        let producer = self.producer(ChannelRole::Source)?;

        let source: KafkaChannel<Record> = self.run_channel(ChannelRole::Source, run_id, &producer)?;
        let destination: KafkaChannel<Record> =
            self.run_channel(ChannelRole::Destination, run_id, &producer)?;
        let events: KafkaChannel<Event> = self.run_channel(ChannelRole::Events, run_id, &producer)?;
        debug!(run_id, "opened kafka channels");

        Ok(ChannelSet {
            source: Arc::new(source),
            destination: Arc::new(destination),
            events: Arc::new(events),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_are_scoped_by_role_and_run() {
        let cfg = KafkaConfig {
            topic_prefix: "ingest".into(),
            ..KafkaConfig::default()
        };
        assert_eq!(cfg.topic(ChannelRole::Source, "r1"), "ingest.source.r1");
        assert_eq!(cfg.topic(ChannelRole::Events, "r1"), "ingest.events.r1");
        assert_eq!(cfg.group_id(ChannelRole::Destination), "ingest-destination");
    }

    #[test]
    fn test_pattern_escapes_prefix_dots() {
        let cfg = KafkaConfig {
            topic_prefix: "acme.ingest".into(),
            ..KafkaConfig::default()
        };
        assert_eq!(
            cfg.topic_pattern(ChannelRole::Source),
            "^acme\\.ingest\\.source\\..+"
        );
    }
}
