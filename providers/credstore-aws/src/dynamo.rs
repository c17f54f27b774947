use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue as DynamoValue, KeySchemaElement, KeyType,
    ProvisionedThroughput, ScalarAttributeType, TableStatus as DynamoTableStatus,
};
use credstore_core::types::{ATTR_NAME, ATTR_VERSION};
use credstore_core::{
    AttributeValue, Error, Item, ItemKey, Page, QueryRequest, RecordBackend, Result, TableSpec,
    TableStatus,
};
use std::collections::HashMap;
use tracing::debug;

type DynamoItem = HashMap<String, DynamoValue>;

const NAME_PLACEHOLDER: &str = "#n";

/// Secret table stored in DynamoDB. Every read is strongly consistent.
#[derive(Clone)]
pub struct DynamoBackend {
    client: Client,
}

impl DynamoBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl RecordBackend for DynamoBackend {
    async fn put_if_absent(&self, table: &str, item: Item) -> Result<()> {
        let result = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(to_dynamo_item(&item)))
            .condition_expression(format!("attribute_not_exists({NAME_PLACEHOLDER})"))
            .expression_attribute_names(NAME_PLACEHOLDER, ATTR_NAME)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(Error::ConditionFailed)
            }
            Err(err) => Err(storage_error("PutItem", err)),
        }
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_to_dynamo(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| storage_error("GetItem", err))?;

        output.item().map(from_dynamo_item).transpose()
    }

    async fn query(&self, table: &str, request: QueryRequest<'_>) -> Result<Page> {
        let mut names = HashMap::from([(NAME_PLACEHOLDER.to_string(), ATTR_NAME.to_string())]);
        let projection = request
            .projection
            .map(|columns| projection_expression(columns, &mut names));
        let limit = request
            .limit
            .map(|limit| i32::try_from(limit).unwrap_or(i32::MAX));

        let output = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression(format!("{NAME_PLACEHOLDER} = :name"))
            .set_expression_attribute_names(Some(names))
            .expression_attribute_values(":name", DynamoValue::S(request.name.to_string()))
            .scan_index_forward(false)
            .consistent_read(true)
            .set_limit(limit)
            .set_projection_expression(projection)
            .set_exclusive_start_key(request.start_key.as_ref().map(key_to_dynamo))
            .send()
            .await
            .map_err(|err| storage_error("Query", err))?;

        let page = page_from(output.items(), output.last_evaluated_key())?;
        debug!(table, name = request.name, items = page.items.len(), "query page");
        Ok(page)
    }

    async fn scan(
        &self,
        table: &str,
        projection: Option<&[&str]>,
        start_key: Option<ItemKey>,
    ) -> Result<Page> {
        let mut names = HashMap::new();
        let projection = projection.map(|columns| projection_expression(columns, &mut names));
        let names = (!names.is_empty()).then_some(names);

        let output = self
            .client
            .scan()
            .table_name(table)
            .consistent_read(true)
            .set_projection_expression(projection)
            .set_expression_attribute_names(names)
            .set_exclusive_start_key(start_key.as_ref().map(key_to_dynamo))
            .send()
            .await
            .map_err(|err| storage_error("Scan", err))?;

        let page = page_from(output.items(), output.last_evaluated_key())?;
        debug!(table, items = page.items.len(), "scan page");
        Ok(page)
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<()> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_to_dynamo(key)))
            .send()
            .await
            .map_err(|err| storage_error("DeleteItem", err))?;
        Ok(())
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let attribute = |name: &str| {
            AttributeDefinition::builder()
                .attribute_name(name)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(build_error)
        };
        let key = |name: &str, key_type: KeyType| {
            KeySchemaElement::builder()
                .attribute_name(name)
                .key_type(key_type)
                .build()
                .map_err(build_error)
        };
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(spec.read_capacity)
            .write_capacity_units(spec.write_capacity)
            .build()
            .map_err(build_error)?;

        self.client
            .create_table()
            .table_name(&spec.name)
            .attribute_definitions(attribute(ATTR_NAME)?)
            .attribute_definitions(attribute(ATTR_VERSION)?)
            .key_schema(key(ATTR_NAME, KeyType::Hash)?)
            .key_schema(key(ATTR_VERSION, KeyType::Range)?)
            .provisioned_throughput(throughput)
            .send()
            .await
            .map_err(|err| storage_error("CreateTable", err))?;
        Ok(())
    }

    async fn describe_table_status(&self, table: &str) -> Result<TableStatus> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(output) => Ok(output
                .table()
                .and_then(|description| description.table_status())
                .map(status_from_dynamo)
                .unwrap_or_else(|| TableStatus::Other("UNKNOWN".into()))),
            Err(err) if is_not_found(&err) => Err(Error::NotFound {
                name: table.to_string(),
                version: None,
            }),
            Err(err) => Err(storage_error("DescribeTable", err)),
        }
    }
}

fn to_dynamo_item(item: &Item) -> DynamoItem {
    item.iter()
        .map(|(attr, value)| (attr.clone(), to_dynamo_value(value)))
        .collect()
}

fn to_dynamo_value(value: &AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::S(value) => DynamoValue::S(value.clone()),
        AttributeValue::N(value) => DynamoValue::N(value.clone()),
    }
}

fn from_dynamo_item(item: &DynamoItem) -> Result<Item> {
    item.iter()
        .map(|(attr, value)| Ok((attr.clone(), from_dynamo_value(attr, value)?)))
        .collect()
}

fn from_dynamo_value(attr: &str, value: &DynamoValue) -> Result<AttributeValue> {
    match value {
        DynamoValue::S(value) => Ok(AttributeValue::S(value.clone())),
        DynamoValue::N(value) => Ok(AttributeValue::N(value.clone())),
        _ => Err(Error::CorruptRecord(format!(
            "attribute `{attr}` has an unsupported type"
        ))),
    }
}

fn key_to_dynamo(key: &ItemKey) -> DynamoItem {
    HashMap::from([
        (ATTR_NAME.to_string(), DynamoValue::S(key.name.clone())),
        (ATTR_VERSION.to_string(), DynamoValue::S(key.version.clone())),
    ])
}

fn key_from_dynamo(key: &DynamoItem) -> Result<ItemKey> {
    let attr = |name: &str| match key.get(name) {
        Some(DynamoValue::S(value)) => Ok(value.clone()),
        _ => Err(Error::CorruptRecord(format!(
            "continuation key is missing `{name}`"
        ))),
    };
    Ok(ItemKey::new(attr(ATTR_NAME)?, attr(ATTR_VERSION)?))
}

fn page_from(items: &[DynamoItem], last_evaluated_key: Option<&DynamoItem>) -> Result<Page> {
    Ok(Page {
        items: items.iter().map(from_dynamo_item).collect::<Result<_>>()?,
        last_evaluated_key: last_evaluated_key.map(key_from_dynamo).transpose()?,
    })
}

/// Every column goes through a placeholder since `name` is a reserved word.
fn projection_expression(columns: &[&str], names: &mut HashMap<String, String>) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let placeholder = format!("#p{idx}");
            names.insert(placeholder.clone(), (*column).to_string());
            placeholder
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn status_from_dynamo(status: &DynamoTableStatus) -> TableStatus {
    match status {
        DynamoTableStatus::Active => TableStatus::Active,
        DynamoTableStatus::Creating => TableStatus::Creating,
        DynamoTableStatus::Updating => TableStatus::Updating,
        DynamoTableStatus::Deleting => TableStatus::Deleting,
        other => TableStatus::Other(other.as_str().to_string()),
    }
}

fn is_not_found<T>(err: &SdkError<T>) -> bool
where
    T: ProvideErrorMetadata,
{
    if let SdkError::ServiceError(context) = err {
        return context.err().code() == Some("ResourceNotFoundException");
    }
    false
}

fn storage_error<T>(operation: &str, err: SdkError<T>) -> Error
where
    T: std::error::Error + 'static,
{
    Error::BackendUnavailable(format!("{operation} failed: {}", DisplayErrorContext(&err)))
}

fn build_error(err: aws_sdk_dynamodb::error::BuildError) -> Error {
    Error::BackendUnavailable(format!("invalid table definition: {err}"))
}
