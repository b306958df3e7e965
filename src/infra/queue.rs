use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use tracing::{debug, error, warn};

use crate::app::ports::{Delivery, EventPublisher, EventSource};
use crate::config::AppConfig;
use crate::domain::image::AcceptedImageEvent;
use crate::error::{PipelineError, PipelineResult};

/// SQS-backed event channel. Queues named `*.fifo` are partitioned by image
/// id through the message group id.
#[derive(Clone)]
pub struct QueueClient {
    client: Client,
    queue_name: String,
    queue_url: String,
    fifo: bool,
    dead_letter_url: Option<String>,
}

impl QueueClient {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.queue_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut sqs_builder = aws_sdk_sqs::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.queue_endpoint.clone());
        if let Some(provider) = shared_config.credentials_provider() {
            sqs_builder = sqs_builder.credentials_provider(provider);
        }
        let sqs_config = sqs_builder.build();

        let client = Client::from_conf(sqs_config);
        let queue_url = resolve_queue_url(&client, &config.queue_name).await?;
        let dead_letter_url = match &config.dead_letter_queue_name {
            Some(name) => Some(resolve_queue_url(&client, name).await?),
            None => None,
        };

        Ok(Self {
            client,
            queue_name: config.queue_name.clone(),
            queue_url,
            fifo: is_fifo(&config.queue_name),
            dead_letter_url,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl EventPublisher for QueueClient {
    async fn publish(&self, event: &AcceptedImageEvent) -> PipelineResult<()> {
        let body = event.to_json()?;
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);
        if self.fifo {
            let key = event.id.to_string();
            request = request
                .message_group_id(key.clone())
                .message_deduplication_id(key);
        }

        request
            .send()
            .await
            .context("send accepted image event")
            .map_err(PipelineError::transient)?;

        debug!(image_id = %event.id, "accepted image event published");
        Ok(())
    }
}

#[async_trait]
impl EventSource for QueueClient {
    async fn receive(&self, wait_seconds: i32) -> PipelineResult<Vec<Delivery>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .context("receive accepted image events")
            .map_err(PipelineError::transient)?;

        let mut deliveries = Vec::new();
        for message in response.messages() {
            let receipt = match message.receipt_handle() {
                Some(handle) => handle.to_string(),
                None => {
                    warn!("queue message missing receipt handle");
                    continue;
                }
            };

            let delivery_count = message
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            deliveries.push(Delivery {
                body: message.body().unwrap_or_default().to_string(),
                receipt,
                delivery_count,
            });
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> PipelineResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&delivery.receipt)
            .send()
            .await
            .context("delete queue message")
            .map_err(PipelineError::transient)?;

        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> PipelineResult<()> {
        let Some(dead_letter_url) = &self.dead_letter_url else {
            error!(
                reason = %reason,
                body = %delivery.body,
                "dropping poison message, no dead-letter queue configured"
            );
            return Ok(());
        };

        let reason_attr = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(reason)
            .build()
            .map_err(PipelineError::transient)?;

        let mut request = self
            .client
            .send_message()
            .queue_url(dead_letter_url)
            .message_body(&delivery.body)
            .message_attributes("failure_reason", reason_attr);
        if is_fifo(dead_letter_url) {
            request = request
                .message_group_id("dead-letter")
                .message_deduplication_id(delivery.receipt.chars().take(128).collect::<String>());
        }

        request
            .send()
            .await
            .context("send to dead-letter queue")
            .map_err(PipelineError::transient)?;

        warn!(reason = %reason, "message moved to dead-letter queue");
        Ok(())
    }
}

async fn resolve_queue_url(client: &Client, queue_name: &str) -> Result<String> {
    match client.get_queue_url().queue_name(queue_name).send().await {
        Ok(response) => Ok(response
            .queue_url()
            .ok_or_else(|| anyhow!("missing queue url"))?
            .to_string()),
        Err(SdkError::ServiceError(service_err))
            if service_err.err().is_queue_does_not_exist() =>
        {
            let mut create = client.create_queue().queue_name(queue_name);
            if is_fifo(queue_name) {
                create = create.attributes(QueueAttributeName::FifoQueue, "true");
            }
            let created = create.send().await?;
            Ok(created
                .queue_url()
                .ok_or_else(|| anyhow!("missing queue url"))?
                .to_string())
        }
        Err(err) => Err(anyhow!(err)),
    }
}

fn is_fifo(queue: &str) -> bool {
    queue.ends_with(".fifo")
}
