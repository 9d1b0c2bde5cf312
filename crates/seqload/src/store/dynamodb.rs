use crate::{
    AttributeDefinition, AttributeType, Error, KeyElement, KeyType, PARTITION_ATTR, POSITION_ATTR,
    PartitionId, Result, SequenceEntry, SequenceStore, TableSchema, Throughput, VALUE_ATTR,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    Client,
    error::{DisplayErrorContext, SdkError},
    types::{self as ddb, AttributeValue, BillingMode, ScalarAttributeType},
};
use core::time::Duration;
use num_bigint::BigUint;
use std::collections::HashMap;
use tokio::time::{Instant, sleep};

/// Default bound on how long a deleted table may linger.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(300);
/// Interval between `DescribeTable` polls while waiting for deletion.
pub const DEFAULT_DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A [`SequenceStore`] backed by Amazon DynamoDB.
///
/// Items are laid out as `partition` (N, hash key), `position` (N, range key)
/// and `value` (S). Values are stored as decimal text because DynamoDB numbers
/// stop at 38 significant digits, which Fibonacci terms pass quickly.
#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: Client,
    delete_timeout: Duration,
    poll_interval: Duration,
}

impl DynamoStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            poll_interval: DEFAULT_DELETE_POLL_INTERVAL,
        }
    }

    /// Builds a client from the default AWS credential and region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    #[must_use]
    pub const fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn sdk_error<E, R>(table: &str, op: &str, err: SdkError<E, R>) -> Error
where
    E: std::error::Error + 'static,
    R: core::fmt::Debug,
{
    Error::store(table, format!("{op}: {}", DisplayErrorContext(&err)))
}

fn malformed(table: &str, reason: impl Into<String>) -> Error {
    Error::MalformedEntry {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn number_attr<'a>(
    table: &str,
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .map(String::as_str)
        .ok_or_else(|| malformed(table, format!("missing numeric attribute `{name}`")))
}

fn decode_entry(table: &str, item: &HashMap<String, AttributeValue>) -> Result<SequenceEntry> {
    let partition = number_attr(table, item, PARTITION_ATTR)?
        .parse::<u32>()
        .map_err(|e| malformed(table, format!("bad `{PARTITION_ATTR}`: {e}")))?;
    let position = number_attr(table, item, POSITION_ATTR)?
        .parse::<BigUint>()
        .map_err(|e| malformed(table, format!("bad `{POSITION_ATTR}`: {e}")))?;
    let value = item
        .get(VALUE_ATTR)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| malformed(table, format!("missing string attribute `{VALUE_ATTR}`")))?
        .parse::<BigUint>()
        .map_err(|e| malformed(table, format!("bad `{VALUE_ATTR}`: {e}")))?;
    Ok(SequenceEntry::new(PartitionId(partition), position, value))
}

/// Decodes a page of query results. Items that do not decode are logged and
/// left out, so one bad row cannot pin its partition at resolution.
fn decode_items(table: &str, items: &[HashMap<String, AttributeValue>]) -> Vec<SequenceEntry> {
    items
        .iter()
        .filter_map(|item| match decode_entry(table, item) {
            Ok(entry) => Some(entry),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Skipping unreadable item: {_e}");
                None
            }
        })
        .collect()
}

fn key_element(table: &str, element: &ddb::KeySchemaElement) -> Result<KeyElement> {
    let key_type = match element.key_type() {
        ddb::KeyType::Hash => KeyType::Hash,
        ddb::KeyType::Range => KeyType::Range,
        other => {
            return Err(Error::store(table, format!("unsupported key type {other:?}")));
        }
    };
    Ok(KeyElement {
        attribute_name: element.attribute_name().to_string(),
        key_type,
    })
}

fn attribute_definition(
    table: &str,
    definition: &ddb::AttributeDefinition,
) -> Result<AttributeDefinition> {
    let attribute_type = match definition.attribute_type() {
        ScalarAttributeType::S => AttributeType::String,
        ScalarAttributeType::N => AttributeType::Number,
        ScalarAttributeType::B => AttributeType::Binary,
        other => {
            return Err(Error::store(table, format!("unsupported attribute type {other:?}")));
        }
    };
    Ok(AttributeDefinition {
        attribute_name: definition.attribute_name().to_string(),
        attribute_type,
    })
}

fn to_key_schema_element(table: &str, element: &KeyElement) -> Result<ddb::KeySchemaElement> {
    ddb::KeySchemaElement::builder()
        .attribute_name(&element.attribute_name)
        .key_type(match element.key_type {
            KeyType::Hash => ddb::KeyType::Hash,
            KeyType::Range => ddb::KeyType::Range,
        })
        .build()
        .map_err(|e| Error::store(table, e.to_string()))
}

fn to_attribute_definition(
    table: &str,
    definition: &AttributeDefinition,
) -> Result<ddb::AttributeDefinition> {
    ddb::AttributeDefinition::builder()
        .attribute_name(&definition.attribute_name)
        .attribute_type(match definition.attribute_type {
            AttributeType::String => ScalarAttributeType::S,
            AttributeType::Number => ScalarAttributeType::N,
            AttributeType::Binary => ScalarAttributeType::B,
        })
        .build()
        .map_err(|e| Error::store(table, e.to_string()))
}

/// Tables billed per request still report a zeroed provisioned block, so the
/// billing summary wins over whatever capacity is listed.
fn throughput(description: &ddb::TableDescription) -> Throughput {
    let on_demand = description
        .billing_mode_summary()
        .and_then(|s| s.billing_mode())
        .is_some_and(|mode| *mode == BillingMode::PayPerRequest);
    let provisioned = description.provisioned_throughput().and_then(|p| {
        match (p.read_capacity_units(), p.write_capacity_units()) {
            (Some(read_units), Some(write_units)) if read_units > 0 && write_units > 0 => {
                Some(Throughput::Provisioned {
                    read_units,
                    write_units,
                })
            }
            _ => None,
        }
    });
    match provisioned {
        Some(t) if !on_demand => t,
        _ => Throughput::OnDemand,
    }
}

fn schema_from_description(
    table: &str,
    description: &ddb::TableDescription,
) -> Result<TableSchema> {
    let key_schema = description
        .key_schema()
        .iter()
        .map(|k| key_element(table, k))
        .collect::<Result<Vec<_>>>()?;
    let attribute_definitions = description
        .attribute_definitions()
        .iter()
        .map(|d| attribute_definition(table, d))
        .collect::<Result<Vec<_>>>()?;

    Ok(TableSchema {
        key_schema,
        attribute_definitions,
        throughput: throughput(description),
    })
}

/// `None` when the timeout is too large to land on the clock, which means
/// waiting without a deadline.
fn delete_deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[async_trait]
impl SequenceStore for DynamoStore {
    async fn put_entry(&self, table: &str, entry: &SequenceEntry) -> Result<()> {
        self.client
            .put_item()
            .table_name(table)
            .item(PARTITION_ATTR, AttributeValue::N(entry.partition.to_string()))
            .item(POSITION_ATTR, AttributeValue::N(entry.position.to_string()))
            .item(VALUE_ATTR, AttributeValue::S(entry.value.to_string()))
            .send()
            .await
            .map_err(|e| sdk_error(table, "PutItem", e))?;
        Ok(())
    }

    async fn query(&self, table: &str, partition: PartitionId) -> Result<Vec<SequenceEntry>> {
        let mut entries = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(table)
                .key_condition_expression("#p = :p")
                .expression_attribute_names("#p", PARTITION_ATTR)
                .expression_attribute_values(":p", AttributeValue::N(partition.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| sdk_error(table, "Query", e))?;

            entries.extend(decode_items(table, output.items()));

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(entries)
    }

    async fn describe_schema(&self, table: &str) -> Result<TableSchema> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| sdk_error(table, "DescribeTable", e))?;
        let description = output
            .table()
            .ok_or_else(|| Error::store(table, "DescribeTable returned no table"))?;
        schema_from_description(table, description)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .delete_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| sdk_error(table, "DeleteTable", e))?;
        Ok(())
    }

    async fn await_table_absent(&self, table: &str) -> Result<()> {
        let deadline = delete_deadline(self.delete_timeout);
        loop {
            match self.client.describe_table().table_name(table).send().await {
                Ok(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Table {table} still present, polling again");
                }
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_resource_not_found_exception()) =>
                {
                    return Ok(());
                }
                Err(err) => return Err(sdk_error(table, "DescribeTable", err)),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::DeleteTimeout {
                    table: table.to_string(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let key_schema = schema
            .key_schema
            .iter()
            .map(|k| to_key_schema_element(table, k))
            .collect::<Result<Vec<_>>>()?;
        let attribute_definitions = schema
            .attribute_definitions
            .iter()
            .map(|d| to_attribute_definition(table, d))
            .collect::<Result<Vec<_>>>()?;

        let request = self
            .client
            .create_table()
            .table_name(table)
            .set_key_schema(Some(key_schema))
            .set_attribute_definitions(Some(attribute_definitions));
        let request = match schema.throughput {
            Throughput::Provisioned {
                read_units,
                write_units,
            } => request.provisioned_throughput(
                ddb::ProvisionedThroughput::builder()
                    .read_capacity_units(read_units)
                    .write_capacity_units(write_units)
                    .build()
                    .map_err(|e| Error::store(table, e.to_string()))?,
            ),
            Throughput::OnDemand => request.billing_mode(BillingMode::PayPerRequest),
        };

        request
            .send()
            .await
            .map_err(|e| sdk_error(table, "CreateTable", e))?;
        Ok(())
    }
}
