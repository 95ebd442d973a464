//! Kafka transport.
//!
//! The live client (rdkafka) is compiled only with the `kafka` feature.
//! Without it the transport still validates its parameters, but opening an
//! endpoint fails with a connection error.

use async_trait::async_trait;

use super::{EndpointContext, InputEndpoint, OutputEndpoint, Transport};
use crate::config::{ParamKind, ParamSpec, Params};
use crate::error::ConnectorError;

const SECURITY_PROTOCOLS: &[&str] = &["plaintext", "ssl", "sasl_plaintext", "sasl_ssl"];

pub(crate) const INPUT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("bootstrap.servers", ParamKind::String, "broker list host:port,..."),
    ParamSpec::required("topics", ParamKind::List, "comma-separated topics to consume"),
    ParamSpec::optional("group.id", ParamKind::String, "consumer group"),
    ParamSpec::optional(
        "auto.offset.reset",
        ParamKind::OneOf(&["earliest", "latest"]),
        "where to start without a committed offset",
    ),
    ParamSpec::optional("session.timeout.ms", ParamKind::U64, "group session timeout"),
    ParamSpec::optional(
        "security.protocol",
        ParamKind::OneOf(SECURITY_PROTOCOLS),
        "broker security protocol",
    ),
];

pub(crate) const OUTPUT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("bootstrap.servers", ParamKind::String, "broker list host:port,..."),
    ParamSpec::required("topic", ParamKind::String, "topic to produce to"),
    ParamSpec::optional("message.timeout.ms", ParamKind::U64, "delivery timeout"),
    ParamSpec::optional(
        "security.protocol",
        ParamKind::OneOf(SECURITY_PROTOCOLS),
        "broker security protocol",
    ),
];

#[derive(Debug, Default)]
pub struct KafkaTransport;

#[async_trait]
impl Transport for KafkaTransport {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn input_params(&self) -> &'static [ParamSpec] {
        INPUT_PARAMS
    }

    fn output_params(&self) -> &'static [ParamSpec] {
        OUTPUT_PARAMS
    }

    async fn open_input(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        client::open_input(ctx, params)
    }

    async fn open_output(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        client::open_output(ctx, params)
    }
}

#[cfg(feature = "kafka")]
mod client {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use bytes::Bytes;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::message::Message;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::ClientConfig;
    use tracing::{info, warn};

    use super::super::{EndpointContext, InputEndpoint, OutputEndpoint};
    use crate::config::{required_param, split_list, Params};
    use crate::error::ConnectorError;

    const POLL_TIMEOUT: Duration = Duration::from_millis(100);

    fn client_config(params: &Params, passthrough: &[&str]) -> ClientConfig {
        let mut config = ClientConfig::new();
        for key in passthrough {
            if let Some(value) = params.get(*key) {
                config.set(*key, value);
            }
        }
        config
    }

    pub(super) fn open_input(
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        let topics = split_list(required_param("kafka", params, "topics")?);
        let mut config = client_config(
            params,
            &["bootstrap.servers", "session.timeout.ms", "security.protocol"],
        );
        let group = params
            .get("group.id")
            .cloned()
            .unwrap_or_else(|| format!("ripple-{}-{}", ctx.pipeline, ctx.table));
        config
            .set("group.id", &group)
            .set(
                "auto.offset.reset",
                params
                    .get("auto.offset.reset")
                    .map(String::as_str)
                    .unwrap_or("earliest"),
            )
            .set("enable.auto.commit", "true");

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| ConnectorError::Connect(format!("kafka consumer: {e}")))?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| ConnectorError::Connect(format!("subscribe {topics:?}: {e}")))?;
        info!(table = %ctx.table, group = %group, topics = ?topics, "kafka consumer subscribed");
        Ok(Box::new(KafkaInput { consumer }))
    }

    pub(super) fn open_output(
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        let topic = required_param("kafka", params, "topic")?.to_string();
        let producer: FutureProducer = client_config(
            params,
            &["bootstrap.servers", "message.timeout.ms", "security.protocol"],
        )
        .create()
        .map_err(|e| ConnectorError::Connect(format!("kafka producer: {e}")))?;
        info!(view = %ctx.table, topic = %topic, "kafka producer created");
        Ok(Box::new(KafkaOutput { producer, topic }))
    }

    struct KafkaInput {
        consumer: StreamConsumer,
    }

    #[async_trait]
    impl InputEndpoint for KafkaInput {
        async fn poll_batch(&mut self, max: usize) -> Result<Option<Vec<Bytes>>, ConnectorError> {
            let mut payloads = Vec::new();
            let start = Instant::now();
            while payloads.len() < max && start.elapsed() < POLL_TIMEOUT {
                let remaining = POLL_TIMEOUT.saturating_sub(start.elapsed());
                match tokio::time::timeout(remaining, self.consumer.recv()).await {
                    Ok(Ok(msg)) => {
                        if let Some(payload) = msg.payload() {
                            payloads.push(Bytes::copy_from_slice(payload));
                        }
                    }
                    Ok(Err(e)) if payloads.is_empty() => {
                        return Err(ConnectorError::Read(e.to_string()));
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "kafka consumer error");
                        break;
                    }
                    Err(_) => break,
                }
            }
            Ok(Some(payloads))
        }
    }

    struct KafkaOutput {
        producer: FutureProducer,
        topic: String,
    }

    #[async_trait]
    impl OutputEndpoint for KafkaOutput {
        async fn write_batch(&mut self, records: Vec<Bytes>) -> Result<(), ConnectorError> {
            for record in records {
                let message = FutureRecord::<(), [u8]>::to(&self.topic).payload(&record[..]);
                self.producer
                    .send(message, Duration::from_secs(0))
                    .await
                    .map_err(|(e, _)| ConnectorError::Write(e.to_string()))?;
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "kafka"))]
mod client {
    use super::super::{EndpointContext, InputEndpoint, OutputEndpoint};
    use crate::config::Params;
    use crate::error::ConnectorError;

    const DISABLED: &str = "kafka transport requires the 'kafka' Cargo feature";

    pub(super) fn open_input(
        _ctx: &EndpointContext,
        _params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        Err(ConnectorError::Connect(DISABLED.to_string()))
    }

    pub(super) fn open_output(
        _ctx: &EndpointContext,
        _params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        Err(ConnectorError::Connect(DISABLED.to_string()))
    }
}
